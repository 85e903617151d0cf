//! # Weft Engine
//!
//! The Weft engine sequences the requests declared in a document into workflows: plain
//! request steps, `@if`/`@elif`/`@else` branches, `@switch`/`@case` dispatch, and for-each
//! loops over dynamically computed lists. One request is in flight at a time; every
//! outcome is recorded and summarized into a [`RunReport`](weft_types::RunReport).
//!
//! ## Usage
//!
//! ```rust
//! use weft_engine::parse_document_file;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let document_path = temp_dir.path().join("api.yaml");
//! std::fs::write(&document_path, r#"
//! requests:
//!   - name: Health
//!     url: https://example.com/health
//! workflows:
//!   - name: smoke
//!     steps:
//!       - using: Health
//! "#)?;
//!
//! let document = parse_document_file(&document_path)?;
//! assert_eq!(document.workflows[0].steps.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`workflow::definition`**: validates workflows and resolves request references
//! - **`scope`**: layered variable scopes for each dispatch
//! - **`expr`**: expression evaluator seam and the built-in condition language
//! - **`workflow::interpreter`**: the single-run state machine
//! - **`workflow::recorder`**: summaries and report text
//! - **`workflow::runner`**: async driver with cancellation and history
//! - **`executor`**: execution client seam, HTTP client, scripted client
//! - **`resolve`**: `{{name}}` template substitution

use std::{fs, path::Path};

use anyhow::{Context, Result};
use weft_types::Document;
use weft_util::path_processing::extension_lowercase;

pub mod error;
pub mod executor;
pub mod expr;
pub mod resolve;
pub mod scope;
mod source_lines;
pub mod workflow;

pub use error::EngineError;
pub use executor::{ExecutionClient, HttpExecutionClient, PreparedRequest, ScriptedClient};
pub use expr::{BuiltinEvaluator, EvalContext, ExprValue, ExpressionError, ExpressionEvaluator, ExpressionRole, SourcePosition};
pub use scope::VariableScope;
pub use workflow::interpreter::{Directive, Dispatch, ResponseEvent, RunRequest, WorkflowEngine};
pub use workflow::recorder::render_report;
pub use workflow::runner::{RunServices, drive_workflow_run};

/// Loads a document from the filesystem.
///
/// Files ending in `.json` are parsed as JSON; anything else is parsed as YAML.
pub fn parse_document_file(file_path: impl AsRef<Path>) -> Result<Document> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read document: {}", file_path.display()))?;
    let content_string = String::from_utf8_lossy(&file_content);

    let is_json = extension_lowercase(file_path).as_deref() == Some("json");
    parse_document_str(&content_string, is_json).with_context(|| format!("Failed to parse document: {}", file_path.display()))
}

/// Parses document text, annotating requests, workflows, steps, branches and for-each
/// declarations with their source line.
pub fn parse_document_str(content: &str, is_json: bool) -> Result<Document> {
    let mut document: Document = if is_json {
        serde_json::from_str(content).context("invalid JSON document")?
    } else {
        serde_yaml::from_str(content).context("invalid YAML document")?
    };
    source_lines::annotate_document(&mut document, content);
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_documents_with_line_numbers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let document_path = temp_dir.path().join("api.yaml");
        fs::write(
            &document_path,
            r#"variables:
  host: example.com
requests:
  - name: Login
    url: https://{{host}}/login
workflows:
  - name: "smoke"
    steps:
      - using: Login
"#,
        )
        .unwrap();

        let document = parse_document_file(&document_path).expect("parse document");
        assert_eq!(document.requests[0].line, 4);
        assert_eq!(document.workflows[0].line, 7);
        assert_eq!(document.variables["host"], "example.com");
    }

    #[test]
    fn parses_json_documents_by_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let document_path = temp_dir.path().join("api.JSON");
        fs::write(
            &document_path,
            r#"{
  "requests": [
    { "name": "Ping", "url": "https://example.com/ping" }
  ]
}"#,
        )
        .unwrap();

        let document = parse_document_file(&document_path).expect("parse document");
        assert_eq!(document.requests[0].name, "Ping");
        assert_eq!(document.requests[0].method, "GET");
    }

    #[test]
    fn reports_the_failing_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let document_path = temp_dir.path().join("broken.yaml");
        fs::write(&document_path, "requests: [").unwrap();

        let error = parse_document_file(&document_path).expect_err("invalid document");
        assert!(error.to_string().contains("broken.yaml"));
    }
}
