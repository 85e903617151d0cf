//! Expression evaluation seam.
//!
//! Conditions (`when`, `@if`, `@elif`), switch/case values, and for-each sources are
//! evaluated through the [`ExpressionEvaluator`] trait. The engine treats the evaluator as
//! an opaque collaborator and relies only on four capabilities of the returned
//! [`ExprValue`]: truthiness, equality, list extraction, and textual conversion.
//!
//! [`BuiltinEvaluator`] implements a small condition language and is what the CLI uses;
//! embedders can plug in a richer evaluator without touching the interpreter.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::scope::VariableScope;

mod builtin;

pub use builtin::BuiltinEvaluator;

/// Typed bindings visible only to the current step's expressions (loop variable → raw item).
pub type TypedBindings = IndexMap<String, ExprValue>;

/// Value produced by an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    /// Plain data value.
    Json(Value),
    /// Host value with no data representation (for example a function reference).
    Opaque { type_name: String },
    /// List produced by a custom evaluator whose items need not be plain data.
    List(Vec<ExprValue>),
}

impl ExprValue {
    pub fn null() -> Self {
        ExprValue::Json(Value::Null)
    }

    pub fn bool(value: bool) -> Self {
        ExprValue::Json(Value::Bool(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        ExprValue::Json(Value::String(value.into()))
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            ExprValue::Json(Value::Null) => "null",
            ExprValue::Json(Value::Bool(_)) => "bool",
            ExprValue::Json(Value::Number(_)) => "number",
            ExprValue::Json(Value::String(_)) => "string",
            ExprValue::Json(Value::Array(_)) => "list",
            ExprValue::Json(Value::Object(_)) => "map",
            ExprValue::Opaque { type_name } => type_name,
            ExprValue::List(_) => "list",
        }
    }

    /// Truthiness used by `when`, `@if`, and `@elif`.
    ///
    /// `null`, `false`, `0`, the empty string, `"false"`, and empty collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Json(Value::Null) => false,
            ExprValue::Json(Value::Bool(value)) => *value,
            ExprValue::Json(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
            ExprValue::Json(Value::String(text)) => {
                let trimmed = text.trim();
                !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("false")
            }
            ExprValue::Json(Value::Array(items)) => !items.is_empty(),
            ExprValue::Json(Value::Object(map)) => !map.is_empty(),
            ExprValue::Opaque { .. } => true,
            ExprValue::List(items) => !items.is_empty(),
        }
    }

    /// Value equality used by `@switch`/`@case` matching and `==`.
    ///
    /// Numbers compare numerically; a string compares equal to a scalar whose textual
    /// form matches. Host values never compare equal.
    pub fn equals(&self, other: &ExprValue) -> bool {
        let (ExprValue::Json(left), ExprValue::Json(right)) = (self, other) else {
            return false;
        };
        match (left, right) {
            (Value::Number(left), Value::Number(right)) => match (left.as_f64(), right.as_f64()) {
                (Some(left), Some(right)) => left == right,
                _ => left == right,
            },
            (Value::String(text), scalar @ (Value::Number(_) | Value::Bool(_)))
            | (scalar @ (Value::Number(_) | Value::Bool(_)), Value::String(text)) => text.trim() == scalar.to_string(),
            _ => left == right,
        }
    }

    /// Extracts list items; fails for anything that is not list-typed.
    pub fn into_list(self) -> Result<Vec<ExprValue>, ExpressionError> {
        match self {
            ExprValue::Json(Value::Array(items)) => Ok(items.into_iter().map(ExprValue::Json).collect()),
            ExprValue::List(items) => Ok(items),
            other => Err(ExpressionError::NotAList {
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Textual form used for variable binding and report text.
    pub fn to_text(&self) -> Result<String, ExpressionError> {
        match self {
            ExprValue::Json(Value::Null) => Ok(String::new()),
            ExprValue::Json(Value::String(text)) => Ok(text.clone()),
            ExprValue::Json(Value::Bool(value)) => Ok(value.to_string()),
            ExprValue::Json(Value::Number(number)) => Ok(number.to_string()),
            ExprValue::Json(value) => serde_json::to_string(value).map_err(|error| ExpressionError::NotConvertible {
                type_name: format!("{} ({error})", self.type_name()),
            }),
            ExprValue::Opaque { type_name } => Err(ExpressionError::NotConvertible {
                type_name: type_name.clone(),
            }),
            ExprValue::List(items) => {
                let values = items
                    .iter()
                    .map(|item| match item {
                        ExprValue::Json(value) => Ok(value.clone()),
                        other => Err(ExpressionError::NotConvertible {
                            type_name: format!("list of {}", other.type_name()),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                ExprValue::Json(Value::Array(values)).to_text()
            }
        }
    }
}

impl From<Value> for ExprValue {
    fn from(value: Value) -> Self {
        ExprValue::Json(value)
    }
}

/// Location of an expression in the source document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourcePosition {
    /// 1-based line, or 0 when unknown.
    pub line: usize,
}

impl SourcePosition {
    pub fn line(line: usize) -> Self {
        Self { line }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            formatter.write_str("<unknown line>")
        } else {
            write!(formatter, "line {}", self.line)
        }
    }
}

/// Which construct an expression belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionRole {
    When,
    ForEach,
    If,
    Elif,
    Switch,
    Case,
}

impl fmt::Display for ExpressionRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExpressionRole::When => "@when",
            ExpressionRole::ForEach => "@for-each",
            ExpressionRole::If => "@if",
            ExpressionRole::Elif => "@elif",
            ExpressionRole::Switch => "@switch",
            ExpressionRole::Case => "@case",
        };
        formatter.write_str(label)
    }
}

/// Ambient information handed to the evaluator with every expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalContext {
    pub workflow: String,
    /// 1-based index of the declared step.
    pub step: usize,
    pub role: ExpressionRole,
}

/// Failure raised while evaluating or interpreting an expression value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("{position}: {message}")]
    Evaluation { position: SourcePosition, message: String },
    #[error("expected a list, got {found}")]
    NotAList { found: String },
    #[error("cannot convert {type_name} value to text")]
    NotConvertible { type_name: String },
}

/// Opaque typed-value evaluator consumed by the interpreter.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` with the flat `bindings` and the step-local `typed` values.
    fn evaluate(
        &self,
        context: &EvalContext,
        position: SourcePosition,
        expression: &str,
        bindings: &VariableScope,
        typed: &TypedBindings,
    ) -> Result<ExprValue, ExpressionError>;
}
