//! Parsed request documents.
//!
//! A document is the unit a user edits: a set of named request templates, ambient
//! variables, default execution options, and any workflows that sequence those requests.
//! Authoring order is preserved (via `IndexMap` and `Vec`) so navigators and reports can
//! render entries in a predictable sequence.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::workflow::{ForEachSpec, WorkflowDefinition};

/// A parsed document holding requests and workflows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Optional display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Ambient variables declared at document level.
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    /// Execution options applied to every request unless overridden.
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Named request templates in authoring order.
    #[serde(default)]
    pub requests: Vec<RequestTemplate>,
    /// Workflows declared in this document.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

impl Document {
    /// Looks up a request by name, ignoring ASCII case.
    pub fn find_request(&self, name: &str) -> Option<&RequestTemplate> {
        let needle = name.trim();
        self.requests.iter().find(|request| request.name.eq_ignore_ascii_case(needle))
    }

    /// Looks up a workflow by name, ignoring ASCII case.
    pub fn find_workflow(&self, name: &str) -> Option<&WorkflowDefinition> {
        let needle = name.trim();
        self.workflows.iter().find(|workflow| workflow.name.eq_ignore_ascii_case(needle))
    }
}

/// Wire protocol a request template targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
    #[serde(alias = "ws")]
    WebSocket,
    Sse,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
            Protocol::WebSocket => "websocket",
            Protocol::Sse => "sse",
        }
    }
}

/// A named request as authored in the document.
///
/// Templates may contain `{{name}}` placeholders in the URL, header values, and body.
/// The engine never mutates a template; each dispatch works on a substituted clone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTemplate {
    /// Unique (case-insensitive) name used by workflow `using`/`run` references.
    pub name: String,
    /// Target protocol; defaults to HTTP.
    #[serde(default)]
    pub protocol: Protocol,
    /// HTTP method or protocol verb.
    #[serde(default = "default_method")]
    pub method: String,
    /// Target URL template.
    pub url: String,
    /// Header templates in authoring order.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Optional body template.
    #[serde(default)]
    pub body: Option<String>,
    /// Request-level condition evaluated before every dispatch.
    #[serde(default)]
    pub when: Option<String>,
    /// Request-level for-each loop declaration.
    #[serde(default)]
    pub for_each: Option<ForEachSpec>,
    /// Request-level execution option overrides.
    #[serde(default)]
    pub options: ExecutionOptions,
    /// 1-based source line of the request declaration, when known.
    #[serde(default)]
    pub line: usize,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Options handed to the execution client alongside each request.
///
/// Every field is optional so option layers can be merged; `None` means "inherit".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Overall request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Whether redirects are followed.
    #[serde(default)]
    pub follow_redirects: Option<bool>,
}

impl ExecutionOptions {
    /// Returns a copy of `self` with every field set in `overlay` taking precedence.
    pub fn merge(&self, overlay: &ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            timeout_ms: overlay.timeout_ms.or(self.timeout_ms),
            follow_redirects: overlay.follow_redirects.or(self.follow_redirects),
        }
    }
}
