use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::StatusCode;
use weft_types::{ExecutionOptions, ExecutionOutcome, ResponseSnapshot, TestResult};
use weft_util::http::status_text;

use super::{ExecutionClient, PreparedRequest};
use crate::scope::VariableScope;

/// Deterministic execution client that replays scripted outcomes.
///
/// Outcomes are queued per request name (case-insensitive) and consumed in order. When a
/// queue is empty the fallback outcome (`200 OK` unless overridden) is returned. Every
/// call is captured for assertions.
pub struct ScriptedClient {
    responses: Mutex<IndexMap<String, VecDeque<ExecutionOutcome>>>,
    calls: Mutex<Vec<ScriptedCall>>,
    hang_on: HashSet<String>,
    fallback: ExecutionOutcome,
    delay: Option<Duration>,
}

/// One captured call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub request: PreparedRequest,
    pub options: ExecutionOptions,
    pub variables: VariableScope,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(IndexMap::new()),
            calls: Mutex::new(Vec::new()),
            hang_on: HashSet::new(),
            fallback: status(200),
            delay: None,
        }
    }

    /// Queues `outcome` for the next call to `request`.
    pub fn respond(self, request: &str, outcome: ExecutionOutcome) -> Self {
        self.responses
            .lock()
            .expect("scripted responses lock poisoned")
            .entry(request.trim().to_ascii_lowercase())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Outcome returned when no scripted outcome is queued.
    pub fn with_fallback(mut self, outcome: ExecutionOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Calls to `request` never complete; used to hold a run in flight.
    pub fn hang_on(mut self, request: &str) -> Self {
        self.hang_on.insert(request.trim().to_ascii_lowercase());
        self
    }

    /// Sleeps before every outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().expect("scripted calls lock poisoned").clone()
    }

    /// Names of the requests executed so far, in call order.
    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.request.name).collect()
    }

    fn next_outcome(&self, request: &str) -> ExecutionOutcome {
        let mut responses = self.responses.lock().expect("scripted responses lock poisoned");
        responses
            .get_mut(&request.to_ascii_lowercase())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ExecutionClient for ScriptedClient {
    async fn execute(&self, request: PreparedRequest, options: ExecutionOptions, variables: VariableScope) -> ExecutionOutcome {
        let name = request.name.clone();
        self.calls.lock().expect("scripted calls lock poisoned").push(ScriptedCall {
            request,
            options,
            variables,
        });

        if self.hang_on.contains(&name.to_ascii_lowercase()) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_outcome(&name)
    }
}

/// Completed outcome with the given HTTP status code.
pub fn status(code: u16) -> ExecutionOutcome {
    ExecutionOutcome::Completed(snapshot(code))
}

/// Completed outcome whose test assertions are `tests` (name, passed, message).
pub fn with_tests(code: u16, tests: &[(&str, bool, Option<&str>)]) -> ExecutionOutcome {
    ExecutionOutcome::Completed(ResponseSnapshot {
        tests: tests
            .iter()
            .map(|(name, passed, message)| TestResult {
                name: name.to_string(),
                passed: *passed,
                message: message.map(str::to_string),
            })
            .collect(),
        ..snapshot(code)
    })
}

/// Completed outcome describing a transport failure.
pub fn transport_error(message: &str) -> ExecutionOutcome {
    ExecutionOutcome::Completed(ResponseSnapshot::transport_failure(message))
}

fn snapshot(code: u16) -> ResponseSnapshot {
    let status = StatusCode::from_u16(code).map(status_text).unwrap_or_else(|_| code.to_string());
    ResponseSnapshot {
        status,
        status_code: Some(code),
        duration_ms: 1,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::Protocol;

    fn prepared(name: &str) -> PreparedRequest {
        PreparedRequest {
            name: name.into(),
            protocol: Protocol::Http,
            method: "GET".into(),
            url: "https://example.com".into(),
            headers: IndexMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn replays_queued_outcomes_then_falls_back() {
        let client = ScriptedClient::new().respond("login", status(500)).respond("Login", status(201));

        let first = client.execute(prepared("Login"), ExecutionOptions::default(), VariableScope::new()).await;
        let second = client.execute(prepared("Login"), ExecutionOptions::default(), VariableScope::new()).await;
        let third = client.execute(prepared("Login"), ExecutionOptions::default(), VariableScope::new()).await;

        assert_eq!(first, status(500));
        assert_eq!(second, status(201));
        assert_eq!(third, status(200));
        assert_eq!(client.call_names(), vec!["Login", "Login", "Login"]);
    }

    #[test]
    fn snapshots_carry_reason_phrases() {
        let ExecutionOutcome::Completed(snapshot) = status(404) else {
            panic!("expected completed outcome");
        };
        assert_eq!(snapshot.status, "404 Not Found");
    }
}
