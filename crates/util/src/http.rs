//! # HTTP Utilities
//!
//! Thin reqwest helpers used by the engine's HTTP execution client: building a client
//! from per-request options, sending a fully substituted request, and capturing the
//! status line, body, and elapsed time.

use std::str::FromStr;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, redirect};
use thiserror::Error;
use tracing::debug;

use crate::text_processing::{is_sensitive_header, redact_sensitive};

/// Redirect hops followed when redirects are enabled.
const MAX_REDIRECTS: usize = 10;
/// Connect timeout applied to every client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while preparing or sending a request.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),
    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("could not create the HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
}

/// A fully substituted HTTP request ready to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

/// Captured response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
    pub elapsed: Duration,
}

impl HttpResponse {
    /// Status line such as `404 Not Found`.
    pub fn status_text(&self) -> String {
        status_text(self.status)
    }
}

/// Formats a status code with its canonical reason phrase.
pub fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// Builds a client honouring the per-request timeout and redirect options.
pub fn build_client(timeout: Option<Duration>, follow_redirects: bool) -> Result<Client, HttpError> {
    let policy = if follow_redirects {
        redirect::Policy::limited(MAX_REDIRECTS)
    } else {
        redirect::Policy::none()
    };
    let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT).redirect(policy);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(HttpError::Client)
}

/// Sends `request` and captures the response body as text.
pub async fn send_request(client: &Client, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
    let method = Method::from_str(request.method.trim().to_ascii_uppercase().as_str())
        .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;
    let headers = build_header_map(&request.headers)?;

    debug!(
        method = %method,
        url = %redact_sensitive(&request.url),
        headers = ?loggable_headers(&request.headers),
        has_body = request.body.is_some(),
        "sending HTTP request"
    );

    let started_at = Instant::now();
    let mut builder = client.request(method, &request.url).headers(headers);
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(classify_error)?;
    let status = response.status();
    let body = response.text().await.map_err(classify_error)?;
    let elapsed = started_at.elapsed();

    debug!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "received HTTP response");
    Ok(HttpResponse { status, body, elapsed })
}

fn build_header_map(headers: &IndexMap<String, String>) -> Result<HeaderMap, HttpError> {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name.trim()).map_err(|error| HttpError::InvalidHeader {
            name: name.clone(),
            reason: error.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|error| HttpError::InvalidHeader {
            name: name.clone(),
            reason: error.to_string(),
        })?;
        header_map.append(header_name, header_value);
    }
    Ok(header_map)
}

fn loggable_headers(headers: &IndexMap<String, String>) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| {
            if is_sensitive_header(name) {
                format!("{name}: [REDACTED]")
            } else {
                format!("{name}: {value}")
            }
        })
        .collect()
}

fn classify_error(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Network(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_includes_reason() {
        assert_eq!(status_text(StatusCode::NOT_FOUND), "404 Not Found");
        assert_eq!(status_text(StatusCode::OK), "200 OK");
    }

    #[test]
    fn invalid_header_names_are_rejected() {
        let mut headers = IndexMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let error = build_header_map(&headers).expect_err("header name with space");
        assert!(matches!(error, HttpError::InvalidHeader { .. }));
    }

    #[test]
    fn sensitive_headers_are_masked_in_logs() {
        let mut headers = IndexMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        let logged = loggable_headers(&headers);
        assert_eq!(logged[0], "Authorization: [REDACTED]");
        assert_eq!(logged[1], "Accept: application/json");
    }

    #[tokio::test]
    async fn invalid_method_is_reported_before_sending() {
        let client = build_client(None, true).expect("client");
        let request = HttpRequest {
            method: "NOT A METHOD".into(),
            url: "http://127.0.0.1:9/".into(),
            ..Default::default()
        };
        let error = send_request(&client, &request).await.expect_err("invalid method");
        assert!(matches!(error, HttpError::InvalidMethod(_)));
    }
}
