use thiserror::Error;
use weft_types::StepKind;

/// Errors that prevent a run from starting.
///
/// Validation failures name the workflow and the 1-based step index so the caller can
/// point the user at the offending declaration. Per-step failures during a run are
/// recorded as step results instead and never surface through this type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("workflow '{workflow}' step {step}: unknown request '{name}'")]
    Reference { workflow: String, step: usize, name: String },
    #[error("workflow '{workflow}' step {step}: {kind} step is missing `using`")]
    MissingUsing { workflow: String, step: usize, kind: StepKind },
    #[error("workflow '{workflow}' step {step}: for-each step is missing its `for_each` declaration")]
    MissingForEach { workflow: String, step: usize },
    #[error("workflow '{workflow}' step {step}: {kind} step is missing its branch block")]
    MissingBranchBlock { workflow: String, step: usize, kind: StepKind },
    #[error("workflow '{workflow}' step {step}: {reason}")]
    InvalidBranch { workflow: String, step: usize, reason: String },
    #[error("a workflow run is already in progress")]
    RunActive,
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),
    #[error("unknown request '{0}'")]
    UnknownRequest(String),
    #[error("request '{0}' does not declare a for-each loop")]
    RequestWithoutLoop(String),
}
