//! Execution client seam.
//!
//! The interpreter never performs I/O. Every dispatch hands a fully substituted
//! [`PreparedRequest`] to an [`ExecutionClient`], which reports exactly one terminal
//! [`ExecutionOutcome`]. Timeouts and retries are the client's concern.

use async_trait::async_trait;
use indexmap::IndexMap;
use weft_types::{ExecutionOptions, ExecutionOutcome, Protocol};

use crate::scope::VariableScope;

pub mod http;
pub mod scripted;

pub use http::HttpExecutionClient;
pub use scripted::ScriptedClient;

/// Variable-substituted clone of a request template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub name: String,
    pub protocol: Protocol,
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

/// Performs the real network exchange for one dispatch.
///
/// Implementations must not panic on transport problems; failures are reported as a
/// completed outcome carrying `transport_error`. Dropping the returned future cancels
/// the exchange.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn execute(&self, request: PreparedRequest, options: ExecutionOptions, variables: VariableScope) -> ExecutionOutcome;
}
