//! Built-in condition language.
//!
//! Supported syntax:
//! - literals: JSON (`"eu"`, `42`, `true`, `null`, `[1, 2]`, `{"a": 1}`) and `'single quoted'` text
//! - variables: typed loop values (`item`, `item.id`, `item.tags[0]`), flat scope keys
//!   (`vars.workflow.region`, `env.HOME`), and bare names resolved through request then
//!   workflow scope
//! - operators: `==`, `!=`, `&&`, `||`, leading `!`, `left.includes(right)`, parentheses
//!
//! Scope values that hold JSON arrays or objects are decoded so they can drive for-each
//! loops and `.includes(...)`. An optional `{{ ... }}` wrapper around the whole expression
//! is ignored.

use serde_json::Value;

use super::{EvalContext, ExprValue, ExpressionError, ExpressionEvaluator, SourcePosition, TypedBindings};
use crate::scope::VariableScope;

/// Evaluator for the built-in condition language.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl ExpressionEvaluator for BuiltinEvaluator {
    fn evaluate(
        &self,
        _context: &EvalContext,
        position: SourcePosition,
        expression: &str,
        bindings: &VariableScope,
        typed: &TypedBindings,
    ) -> Result<ExprValue, ExpressionError> {
        let normalized = normalize_expression(expression);
        let evaluation = Evaluation {
            position,
            bindings,
            typed,
        };
        if normalized.is_empty() {
            return Err(evaluation.error("expression cannot be empty"));
        }
        evaluation.node(normalized)
    }
}

/// Trims whitespace and strips an outer `{{ ... }}` wrapper when present.
fn normalize_expression(raw_expression: &str) -> &str {
    let trimmed = raw_expression.trim();
    match trimmed.strip_prefix("{{").and_then(|inner| inner.strip_suffix("}}")) {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

struct Evaluation<'a> {
    position: SourcePosition,
    bindings: &'a VariableScope,
    typed: &'a TypedBindings,
}

impl Evaluation<'_> {
    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Evaluation {
            position: self.position,
            message: message.into(),
        }
    }

    fn node(&self, expression: &str) -> Result<ExprValue, ExpressionError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(self.error("operand cannot be empty"));
        }

        if let Some(parts) = split_expression(trimmed, "||") {
            for part in parts {
                if self.node(part)?.is_truthy() {
                    return Ok(ExprValue::bool(true));
                }
            }
            return Ok(ExprValue::bool(false));
        }
        if let Some(parts) = split_expression(trimmed, "&&") {
            for part in parts {
                if !self.node(part)?.is_truthy() {
                    return Ok(ExprValue::bool(false));
                }
            }
            return Ok(ExprValue::bool(true));
        }

        let (negations, inner) = strip_leading_negations(trimmed);
        if negations > 0 {
            if inner.trim().is_empty() {
                return Err(self.error("expression cannot end with negation operator"));
            }
            let truthy = self.node(inner)?.is_truthy();
            return Ok(ExprValue::bool(if negations % 2 == 1 { !truthy } else { truthy }));
        }

        if let Some(position) = find_top_level_operator(inner, "!=") {
            let (left, right) = self.comparison_operands(inner, position, 2)?;
            return Ok(ExprValue::bool(!left.equals(&right)));
        }
        if let Some(position) = find_top_level_operator(inner, "==") {
            let (left, right) = self.comparison_operands(inner, position, 2)?;
            return Ok(ExprValue::bool(left.equals(&right)));
        }

        if let Some(includes_index) = find_top_level_operator(inner, ".includes(") {
            return self.includes(inner, includes_index);
        }

        self.operand(inner)
    }

    fn comparison_operands(
        &self,
        expression: &str,
        position: usize,
        operator_length: usize,
    ) -> Result<(ExprValue, ExprValue), ExpressionError> {
        let left_expression = expression[..position].trim();
        let right_expression = expression[position + operator_length..].trim();
        if left_expression.is_empty() || right_expression.is_empty() {
            return Err(self.error("comparison expression must include both left and right operands"));
        }
        Ok((self.node(left_expression)?, self.node(right_expression)?))
    }

    fn includes(&self, expression: &str, includes_index: usize) -> Result<ExprValue, ExpressionError> {
        let (left_expression, right_expression_with_suffix) = expression.split_at(includes_index);
        let right_expression = right_expression_with_suffix.trim_start_matches(".includes(").trim();
        let Some(right_expression) = right_expression.strip_suffix(')') else {
            return Err(self.error("includes expression is missing a closing parenthesis"));
        };
        if right_expression.trim().is_empty() {
            return Err(self.error("includes expression is missing an argument"));
        }

        let haystack = self.node(left_expression)?;
        let needle = self.node(right_expression)?;
        let found = match haystack {
            ExprValue::Json(Value::String(text)) => {
                let needle_text = needle.to_text()?;
                text.contains(&needle_text)
            }
            other => other.into_list()?.iter().any(|item| item.equals(&needle)),
        };
        Ok(ExprValue::bool(found))
    }

    fn operand(&self, expression: &str) -> Result<ExprValue, ExpressionError> {
        let trimmed = expression.trim();

        if let Some(inner) = strip_wrapping_parentheses(trimmed) {
            return self.node(inner);
        }

        if looks_like_json_literal(trimmed) {
            return serde_json::from_str::<Value>(trimmed)
                .map(ExprValue::Json)
                .map_err(|error| self.error(format!("invalid literal '{}': {}", trimmed, error)));
        }

        if let Some(text) = trimmed.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
            return Ok(ExprValue::string(text));
        }

        self.variable(trimmed)
    }

    fn variable(&self, path: &str) -> Result<ExprValue, ExpressionError> {
        if !is_supported_path_expression(path) {
            return Err(self.error(format!("unsupported expression '{}'", path)));
        }

        let segments: Vec<&str> = path.split('.').collect();
        let (head_name, head_indexes) = split_segment(segments[0]);
        if let Some(ExprValue::Json(raw)) = self.typed.get(head_name) {
            let mut current = index_into(raw, &head_indexes);
            for segment in &segments[1..] {
                let (field, indexes) = split_segment(segment);
                current = current.and_then(|value| value.get(field)).and_then(|value| index_into(value, &indexes));
            }
            return Ok(ExprValue::Json(current.cloned().unwrap_or(Value::Null)));
        }
        if let Some(opaque @ ExprValue::Opaque { .. }) = self.typed.get(head_name)
            && segments.len() == 1
            && head_indexes.is_empty()
        {
            return Ok(opaque.clone());
        }

        match self.bindings.lookup(path) {
            Some(text) => Ok(decode_scope_value(text)),
            None => Err(self.error(format!("unknown variable '{}'", path))),
        }
    }
}

fn decode_scope_value(text: &str) -> ExprValue {
    let trimmed = text.trim();
    if (trimmed.starts_with('[') || trimmed.starts_with('{'))
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
    {
        return ExprValue::Json(value);
    }
    ExprValue::string(text)
}

fn split_segment(segment: &str) -> (&str, Vec<usize>) {
    let Some(bracket) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let indexes = segment[bracket..]
        .split(['[', ']'])
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<usize>().ok())
        .collect();
    (&segment[..bracket], indexes)
}

fn index_into<'v>(value: &'v Value, indexes: &[usize]) -> Option<&'v Value> {
    indexes.iter().try_fold(value, |current, index| current.get(*index))
}

fn strip_wrapping_parentheses(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    // `(a) == (b)` starts and ends with parentheses but is not wrapped.
    let mut depth = 0i32;
    for character in inner.chars() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(inner)
}

fn looks_like_json_literal(expression: &str) -> bool {
    let starts_like_number = expression
        .chars()
        .next()
        .map(|character| character == '-' || character.is_ascii_digit())
        .unwrap_or(false);
    expression.starts_with('[')
        || expression.starts_with('{')
        || expression.starts_with('"')
        || expression == "null"
        || expression == "true"
        || expression == "false"
        || starts_like_number
}

fn is_supported_path_expression(expression: &str) -> bool {
    if expression.contains(char::is_whitespace) {
        return false;
    }
    expression.split('.').all(validate_path_segment)
}

fn validate_path_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    let mut chars = segment.chars().peekable();
    let mut saw_base = false;
    while let Some(character) = chars.peek().copied() {
        if character == '[' {
            break;
        }
        if !is_identifier_character(character) {
            return false;
        }
        saw_base = true;
        chars.next();
    }

    if !saw_base {
        return false;
    }

    while let Some(character) = chars.next() {
        if character != '[' {
            return false;
        }
        let mut saw_digit = false;
        loop {
            let Some(next_character) = chars.next() else {
                return false;
            };
            if next_character == ']' {
                if !saw_digit {
                    return false;
                }
                break;
            }
            if !next_character.is_ascii_digit() {
                return false;
            }
            saw_digit = true;
        }
    }

    true
}

fn is_identifier_character(character: char) -> bool {
    character.is_ascii_alphanumeric() || character == '_' || character == '-' || character == '$'
}

fn split_expression<'a>(expression: &'a str, operator: &str) -> Option<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let length = expression.len();

    while start < length {
        if let Some(relative_index) = find_top_level_operator(&expression[start..], operator) {
            let absolute_index = start + relative_index;
            parts.push(expression[start..absolute_index].trim());
            start = absolute_index + operator.len();
        } else {
            parts.push(expression[start..].trim());
            break;
        }
    }

    if parts.len() > 1 { Some(parts) } else { None }
}

fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }

        if in_single_quote || in_double_quote {
            continue;
        }
        match character {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionRole;
    use serde_json::json;

    fn context() -> EvalContext {
        EvalContext {
            workflow: "demo".into(),
            step: 1,
            role: ExpressionRole::When,
        }
    }

    fn eval(expression: &str, bindings: &VariableScope, typed: &TypedBindings) -> Result<ExprValue, ExpressionError> {
        BuiltinEvaluator.evaluate(&context(), SourcePosition::line(4), expression, bindings, typed)
    }

    fn eval_plain(expression: &str) -> ExprValue {
        eval(expression, &VariableScope::new(), &TypedBindings::new()).expect("evaluate")
    }

    #[test]
    fn literals_and_comparisons() {
        assert_eq!(eval_plain("[1, 2, 3]"), ExprValue::Json(json!([1, 2, 3])));
        assert!(eval_plain("\"a\" == 'a'").is_truthy());
        assert!(eval_plain("1 != 2").is_truthy());
        assert!(!eval_plain("!true").is_truthy());
        assert!(eval_plain("(1 == 2) || (2 == 2)").is_truthy());
        assert!(!eval_plain("true && false").is_truthy());
        assert!(eval_plain("[\"a==b\", \"c\"].includes(\"c\")").is_truthy());
    }

    #[test]
    fn resolves_scope_and_typed_values() {
        let bindings = VariableScope::from_pairs([("vars.workflow.region", "eu"), ("vars.workflow.ids", "[1, 2]")]);
        let mut typed = TypedBindings::new();
        typed.insert("item".into(), ExprValue::Json(json!({"id": 7, "tags": ["x", "y"]})));

        assert!(eval("region == \"eu\"", &bindings, &typed).unwrap().is_truthy());
        assert!(eval("vars.workflow.region == \"eu\"", &bindings, &typed).unwrap().is_truthy());
        assert_eq!(eval("item.id", &bindings, &typed).unwrap(), ExprValue::Json(json!(7)));
        assert_eq!(eval("item.tags[1]", &bindings, &typed).unwrap(), ExprValue::string("y"));
        assert_eq!(eval("item.missing", &bindings, &typed).unwrap(), ExprValue::null());
        assert_eq!(eval("ids", &bindings, &typed).unwrap(), ExprValue::Json(json!([1, 2])));
        assert!(eval("ids.includes(2)", &bindings, &typed).unwrap().is_truthy());
    }

    #[test]
    fn unknown_variables_report_position() {
        let error = eval("nope == 1", &VariableScope::new(), &TypedBindings::new()).expect_err("unknown variable");
        assert_eq!(error.to_string(), "line 4: unknown variable 'nope'");
    }

    #[test]
    fn rejects_empty_and_malformed_expressions() {
        assert!(eval("  ", &VariableScope::new(), &TypedBindings::new()).is_err());
        assert!(eval("== 1", &VariableScope::new(), &TypedBindings::new()).is_err());
        assert!(eval("1abc", &VariableScope::new(), &TypedBindings::new()).is_err());
        assert!(eval("!", &VariableScope::new(), &TypedBindings::new()).is_err());
    }

    #[test]
    fn strips_template_wrapper() {
        assert!(eval_plain("{{ 1 == 1 }}").is_truthy());
    }
}
