use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use weft_types::{ExecutionOptions, ExecutionOutcome, Protocol, ResponseSnapshot};
use weft_util::http::{HttpRequest, build_client, send_request};

use super::{ExecutionClient, PreparedRequest};
use crate::scope::VariableScope;

/// Redirects are followed unless an option layer turns them off.
const DEFAULT_FOLLOW_REDIRECTS: bool = true;

/// Execution client backed by reqwest. Only the `http` protocol is supported; other
/// protocols complete with a transport error.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpExecutionClient;

impl HttpExecutionClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn execute(&self, request: PreparedRequest, options: ExecutionOptions, _variables: VariableScope) -> ExecutionOutcome {
        if request.protocol != Protocol::Http {
            warn!(request = %request.name, protocol = request.protocol.as_str(), "protocol not supported by the HTTP client");
            return ExecutionOutcome::Completed(ResponseSnapshot::transport_failure(format!(
                "{} requests are not supported by the HTTP client",
                request.protocol.as_str()
            )));
        }

        let timeout = options.timeout_ms.map(Duration::from_millis);
        let follow_redirects = options.follow_redirects.unwrap_or(DEFAULT_FOLLOW_REDIRECTS);
        let client = match build_client(timeout, follow_redirects) {
            Ok(client) => client,
            Err(error) => return ExecutionOutcome::Completed(ResponseSnapshot::transport_failure(error.to_string())),
        };

        let http_request = HttpRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
        };

        match send_request(&client, &http_request).await {
            Ok(response) => {
                debug!(request = %request.name, status = response.status.as_u16(), "request completed");
                ExecutionOutcome::Completed(ResponseSnapshot {
                    status: response.status_text(),
                    status_code: Some(response.status.as_u16()),
                    duration_ms: response.elapsed.as_millis().try_into().unwrap_or(u64::MAX),
                    body: Some(response.body),
                    ..Default::default()
                })
            }
            Err(error) => ExecutionOutcome::Completed(ResponseSnapshot::transport_failure(error.to_string())),
        }
    }
}
