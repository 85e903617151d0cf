//! Response evaluation.
//!
//! A completed response succeeds only when the transport succeeded, the status code is
//! below 400, every test assertion passed, no script error was raised, and every declared
//! expectation holds. The failure message is picked in that order, with an expectation
//! mismatch reported ahead of the generic status message.

use indexmap::IndexMap;
use tracing::warn;
use weft_types::{ResponseSnapshot, StepStatus};

use crate::resolve::interpolate;
use crate::scope::VariableScope;

/// First status code treated as a failure.
const FAILURE_STATUS_FLOOR: u16 = 400;

/// Outcome of judging one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: StepStatus,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl Verdict {
    fn passed() -> Self {
        Self {
            status: StepStatus::Succeeded,
            message: None,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            status: StepStatus::Failed,
            message: Some(message),
            error: None,
        }
    }
}

/// Declared expectation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    /// Case-insensitive exact match against the status text.
    Status,
    /// Exact integer match against the status code.
    StatusCode,
}

impl Expectation {
    fn parse(key: &str) -> Option<Self> {
        let normalized: String = key
            .chars()
            .filter(|character| *character != '_' && *character != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "status" => Some(Expectation::Status),
            "statuscode" => Some(Expectation::StatusCode),
            _ => None,
        }
    }
}

/// Judges `snapshot` against the step's expectations; expected values may reference
/// variables from the dispatch scope.
pub fn judge_response(snapshot: &ResponseSnapshot, expect: &IndexMap<String, String>, scope: &VariableScope) -> Verdict {
    if let Some(error) = &snapshot.transport_error {
        return Verdict {
            status: StepStatus::Failed,
            message: Some(error.clone()),
            error: Some(error.clone()),
        };
    }

    if let Some(test) = snapshot.first_failed_test() {
        let message = test
            .message
            .clone()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("test '{}' failed", test.name));
        return Verdict::failed(message);
    }

    if let Some(script_error) = &snapshot.script_error {
        return Verdict::failed(format!("script error: {script_error}"));
    }

    if let Some(mismatch) = expectation_mismatch(snapshot, expect, scope) {
        return Verdict::failed(mismatch);
    }

    if let Some(code) = snapshot.status_code
        && code >= FAILURE_STATUS_FLOOR
    {
        return Verdict::failed(format!("unexpected status code {code}"));
    }

    Verdict::passed()
}

fn expectation_mismatch(snapshot: &ResponseSnapshot, expect: &IndexMap<String, String>, scope: &VariableScope) -> Option<String> {
    for (key, raw_expected) in expect {
        let Some(kind) = Expectation::parse(key) else {
            warn!(expectation = %key, "ignoring unknown expectation");
            continue;
        };
        let expected = interpolate(raw_expected, scope);
        let expected = expected.trim();
        match kind {
            Expectation::Status => {
                if !snapshot.status.trim().eq_ignore_ascii_case(expected) {
                    return Some(format!("expected status '{}', got '{}'", expected, snapshot.status.trim()));
                }
            }
            Expectation::StatusCode => {
                let actual = snapshot
                    .status_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "none".to_string());
                match expected.parse::<u16>() {
                    Ok(code) if snapshot.status_code == Some(code) => {}
                    Ok(code) => return Some(format!("expected status code {code}, got {actual}")),
                    Err(_) => return Some(format!("invalid status code expectation '{expected}'")),
                }
            }
        }
    }
    None
}
