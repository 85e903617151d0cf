//! Weft utilities shared by the engine and the CLI.
//!
//! - [`http`]: reqwest transport helpers used by the HTTP execution client
//! - [`history_store`]: persisted history of finished workflow runs
//! - [`path_processing`]: tilde expansion and config directory helpers
//! - [`text_processing`]: secret redaction

pub mod history_store;
pub mod http;
pub mod path_processing;
pub mod text_processing;

pub use history_store::{HistoryRecord, HistorySink, HistoryStoreError, InMemoryHistoryStore, JsonHistoryStore};
pub use path_processing::expand_tilde;
pub use text_processing::redact_sensitive;
