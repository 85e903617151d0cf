//! Run-time records exchanged between the engine, execution clients, and callers.
//!
//! These types describe what happened during a workflow run: the raw execution outcome
//! reported by a client, the per-step [`StepResult`] appended by the engine, the final
//! [`RunReport`], and the lifecycle events streamed to a UI while a run is in progress.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correlates a dispatched request with the response event that answers it.
///
/// A token is minted for every dispatch; the engine ignores response events carrying
/// any token other than the one currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchToken {
    pub run_id: u64,
    pub sequence: u64,
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.run_id, self.sequence)
    }
}

/// Result of one test assertion executed by the client's scripting layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Snapshot of a completed execution as reported by the execution client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// Status text, for example `200 OK`.
    #[serde(default)]
    pub status: String,
    /// Numeric status code for HTTP responses.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Wall-clock duration reported by the client.
    #[serde(default)]
    pub duration_ms: u64,
    /// Test assertions in execution order.
    #[serde(default)]
    pub tests: Vec<TestResult>,
    /// Error raised by a response script, if any.
    #[serde(default)]
    pub script_error: Option<String>,
    /// Network or client failure, if the transport did not succeed.
    #[serde(default)]
    pub transport_error: Option<String>,
    /// Response body text, when captured.
    #[serde(default)]
    pub body: Option<String>,
}

impl ResponseSnapshot {
    /// Builds a snapshot describing a transport failure.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            transport_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Returns the first failing test assertion, if any.
    pub fn first_failed_test(&self) -> Option<&TestResult> {
        self.tests.iter().find(|test| !test.passed)
    }
}

/// Terminal event an execution client reports for one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed(ResponseSnapshot),
    Skipped { reason: String },
    Canceled,
}

/// Status of a recorded step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "PASS",
            StepStatus::Failed => "FAIL",
            StepStatus::Skipped => "SKIP",
        }
    }
}

/// Position of a for-each item within its loop (1-based `index`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub index: usize,
    pub total: usize,
}

impl fmt::Display for Iteration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.index, self.total)
    }
}

/// One recorded outcome appended by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    /// 0-based index of the declared step that produced this outcome.
    pub step_index: usize,
    /// Display label of the declared step.
    pub step_label: String,
    /// Name of the request that was (or would have been) dispatched.
    #[serde(default)]
    pub request: Option<String>,
    /// Branch label for outcomes produced through `@if`/`@switch` dispatch.
    #[serde(default)]
    pub branch: Option<String>,
    pub status: StepStatus,
    /// Status text reported by the client, empty for skipped outcomes.
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub duration_ms: u64,
    /// Human readable explanation for failures and skips.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub response: Option<ResponseSnapshot>,
    #[serde(default)]
    pub iteration: Option<Iteration>,
    /// Underlying error text (expression or transport failures).
    #[serde(default)]
    pub error: Option<String>,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StepStatus::Skipped
    }

    /// Label including branch target and iteration suffix, e.g. `route → EuCheckout (2/5)`.
    pub fn display_label(&self) -> String {
        let mut label = self.step_label.clone();
        if let Some(branch) = &self.branch {
            label.push_str(" → ");
            label.push_str(branch);
        }
        if let Some(iteration) = &self.iteration {
            label.push_str(&format!(" ({iteration})"));
        }
        label
    }
}

/// Where a run originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    /// A workflow declared in the document.
    Workflow,
    /// A single request with its own for-each, launched directly from the editor.
    AdHocForEach,
}

impl RunOrigin {
    /// Whether loop items are also bound under the workflow scope.
    pub fn promotes_loop_scope(self) -> bool {
        matches!(self, RunOrigin::Workflow)
    }
}

/// Terminal status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Canceled,
}

/// Final record of a run, produced once when the run finalizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: u64,
    pub workflow: String,
    pub origin: RunOrigin,
    pub status: RunStatus,
    /// One-line summary such as `3/3 steps passed`.
    pub summary: String,
    /// Recorded outcomes in execution order.
    pub results: Vec<StepResult>,
    /// Number of declared steps.
    pub total_steps: usize,
    /// Whether a failure halted the run before the last declared step.
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub canceled_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().try_into().unwrap_or(0)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|result| result.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results.iter().filter(|result| result.is_skipped()).count()
    }
}

/// Control commands a caller can send to an in-progress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunControl {
    Cancel { reason: Option<String> },
}

/// Lifecycle events streamed while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run_id: u64,
        workflow: String,
        total_steps: usize,
        at: DateTime<Utc>,
    },
    /// Live `step X/Y: label` status emitted before every dispatch.
    StepStarted {
        token: DispatchToken,
        status_line: String,
    },
    StepFinished {
        result: StepResult,
    },
    /// Error surfaced to the caller's error channel (for example an expression failure).
    Error {
        message: String,
    },
    RunCompleted {
        report: RunReport,
    },
}

/// History entry appended once per finalized declared-workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowHistoryEntry {
    pub name: String,
    pub status_summary: String,
    pub duration_ms: u64,
    pub definition_text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}
