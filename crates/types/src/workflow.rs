//! Strongly typed workflow schema definitions shared by the engine and the CLI.
//!
//! Workflows sequence named requests from the same document. A step is either a plain
//! request, a for-each request, an `if`/`elif`/`else` dispatch, or a `switch`/`case`
//! dispatch. The definitions here are immutable inputs; runtime interpretation lives in
//! the engine crate.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::document::ExecutionOptions;

/// Describes a fully authored workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Workflow name used for selection and history.
    pub name: String,
    /// Optional descriptive copy surfaced in pickers and history.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form tags recorded with history entries.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Failure policy applied to steps that do not declare their own.
    #[serde(default)]
    pub on_failure: OnFailure,
    /// Workflow-level execution options.
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Workflow-scoped variables, keyed by name in authoring order.
    #[serde(default)]
    pub vars: IndexMap<String, String>,
    /// Ordered list of steps executed sequentially.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// 1-based source line of the workflow declaration, when known.
    #[serde(default)]
    pub line: usize,
}

/// Per-step policy deciding whether a failed outcome halts the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Stop,
    Continue,
}

impl OnFailure {
    pub fn halts(self) -> bool {
        matches!(self, OnFailure::Stop)
    }
}

/// Declared kind of a workflow step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Dispatch the `using` request once (or per item when a for-each is attached).
    #[default]
    Request,
    /// Dispatch the `using` request once per item of the required for-each block.
    ForEach,
    /// Evaluate the `if` block and dispatch the matching branch.
    If,
    /// Evaluate the `switch` block and dispatch the matching case.
    Switch,
}

impl fmt::Display for StepKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::Request => "request",
            StepKind::ForEach => "for-each",
            StepKind::If => "@if",
            StepKind::Switch => "@switch",
        };
        formatter.write_str(label)
    }
}

/// Describes a single step within a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Optional display name; falls back to the referenced request name.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared step kind.
    #[serde(default)]
    pub kind: StepKind,
    /// Name of the request dispatched by request and for-each steps.
    #[serde(default)]
    pub using: Option<String>,
    /// Step-level failure policy; inherits the workflow default when absent.
    #[serde(default)]
    pub on_failure: Option<OnFailure>,
    /// Condition evaluated before dispatch; false records a skip.
    #[serde(default)]
    pub when: Option<String>,
    /// 1-based source line of the `when` condition, when known.
    #[serde(default)]
    pub when_line: usize,
    /// Loop declaration for for-each dispatch.
    #[serde(default)]
    pub for_each: Option<ForEachSpec>,
    /// Declared expectations (`status`, `statuscode`) checked against the response.
    #[serde(default)]
    pub expect: IndexMap<String, String>,
    /// Step-declared variables. Keys without a scope marker are request scoped.
    #[serde(default)]
    pub vars: IndexMap<String, String>,
    /// Step-level execution option overrides.
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Branch payload for `if` steps.
    #[serde(default, rename = "if")]
    pub if_block: Option<IfBlock>,
    /// Branch payload for `switch` steps.
    #[serde(default)]
    pub switch: Option<SwitchBlock>,
    /// 1-based source line of the step declaration, when known.
    #[serde(default)]
    pub line: usize,
}

/// `@if` / `@elif` / `@else` alternatives of an `if` step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IfBlock {
    /// Primary branch; its condition is evaluated first.
    pub then: Branch,
    /// Additional conditional branches evaluated in order.
    #[serde(default)]
    pub elif: Vec<Branch>,
    /// Fallback branch taken when no condition holds.
    #[serde(default, rename = "else")]
    pub otherwise: Option<Branch>,
}

/// `@switch` expression with `@case` / `@default` alternatives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SwitchBlock {
    /// Expression evaluated once and compared against every case.
    pub expr: String,
    /// Cases compared in order; `when` holds the case value expression.
    #[serde(default)]
    pub cases: Vec<Branch>,
    /// Fallback branch taken when no case matches.
    #[serde(default)]
    pub default: Option<Branch>,
    #[serde(default)]
    pub line: usize,
}

/// One conditional alternative.
///
/// Exactly one of `run` and `fail` must be set. For `@case` branches `when` is the value
/// expression compared against the switch value; for `@else`/`@default` it is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    #[serde(default)]
    pub when: Option<String>,
    /// Name of the request dispatched when the branch is taken.
    #[serde(default)]
    pub run: Option<String>,
    /// Failure message recorded without dispatching anything.
    #[serde(default)]
    pub fail: Option<String>,
    /// Failure policy for the request dispatched by `run`.
    #[serde(default)]
    pub on_failure: Option<OnFailure>,
    #[serde(default)]
    pub line: usize,
}

/// Loop declaration: evaluate `expr` once and bind each item to `var`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForEachSpec {
    /// Source expression producing a list.
    pub expr: String,
    /// Loop variable name bound to each item.
    #[serde(rename = "as", default = "default_loop_variable")]
    pub var: String,
    /// 1-based source line of the loop declaration, when known.
    #[serde(default)]
    pub line: usize,
}

fn default_loop_variable() -> String {
    "item".to_string()
}
