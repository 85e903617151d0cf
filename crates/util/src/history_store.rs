//! History persistence for finished workflow runs.
//!
//! This module exposes the [`HistorySink`] abstraction the engine appends to once per
//! finalized workflow run, along with a JSON-backed implementation (tilde expansion,
//! config directory fallback, bounded length) and an in-memory store for tests.

use std::collections::VecDeque;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use weft_types::WorkflowHistoryEntry;

use crate::path_processing::{config_file_path, expand_tilde};
use crate::text_processing::redact_sensitive;

/// Environment variable controlling the history file location.
pub const HISTORY_PATH_ENV: &str = "WEFT_HISTORY_PATH";

/// Default filename for the persisted history store.
pub const HISTORY_FILE_NAME: &str = "history.json";

/// Maximum number of entries retained by the store.
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Errors surfaced by history store operations.
#[derive(Debug, Error)]
pub enum HistoryStoreError {
    /// I/O failure while reading or writing the history file.
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stored history entry with its write timestamp.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    #[serde(flatten)]
    pub entry: WorkflowHistoryEntry,
    #[serde(with = "ts_seconds")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct HistoryFile {
    entries: VecDeque<HistoryRecord>,
}

impl HistoryFile {
    fn push(&mut self, entry: WorkflowHistoryEntry, limit: usize) {
        let entry = WorkflowHistoryEntry {
            definition_text: redact_sensitive(&entry.definition_text),
            ..entry
        };
        self.entries.push_front(HistoryRecord {
            entry,
            recorded_at: Utc::now(),
        });
        self.truncate(limit);
    }

    fn truncate(&mut self, limit: usize) {
        while self.entries.len() > limit {
            self.entries.pop_back();
        }
    }

    fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        self.entries.iter().take(limit).cloned().collect()
    }
}

/// Shared trait implemented by history persistence backends.
pub trait HistorySink: Send + Sync {
    /// Append a finished workflow run. Definition text is redacted before it is stored.
    fn append(&self, entry: WorkflowHistoryEntry) -> Result<(), HistoryStoreError>;

    /// List up to `limit` entries, ordered from most recent to oldest.
    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryStoreError>;
}

/// JSON-backed history store persisted on disk.
pub struct JsonHistoryStore {
    path: PathBuf,
    entries: Mutex<HistoryFile>,
    max_entries: usize,
}

impl JsonHistoryStore {
    /// Create a new store at the provided path (or the default path when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(path: P, max_entries: usize) -> Result<Self, HistoryStoreError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_history_path(),
        };

        let file = load_history_file(&resolved_path)?;
        Ok(Self {
            path: resolved_path,
            entries: Mutex::new(file),
            max_entries,
        })
    }

    /// Initialize a store using the default settings.
    pub fn with_defaults() -> Result<Self, HistoryStoreError> {
        Self::new(None::<PathBuf>, DEFAULT_HISTORY_LIMIT)
    }

    /// Access the underlying history path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, history_file: &HistoryFile) -> Result<(), HistoryStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(history_file)?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), entries = history_file.entries.len(), "history saved");
        Ok(())
    }
}

impl HistorySink for JsonHistoryStore {
    fn append(&self, entry: WorkflowHistoryEntry) -> Result<(), HistoryStoreError> {
        let mut entries = self.entries.lock().expect("history lock poisoned");
        entries.push(entry, self.max_entries);
        self.save_locked(&entries)
    }

    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryStoreError> {
        let entries = self.entries.lock().expect("history lock poisoned");
        Ok(entries.recent(limit))
    }
}

/// In-memory history store primarily used for unit testing.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<HistoryFile>,
}

impl InMemoryHistoryStore {
    /// Create an empty in-memory history store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("history lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistorySink for InMemoryHistoryStore {
    fn append(&self, entry: WorkflowHistoryEntry) -> Result<(), HistoryStoreError> {
        let mut entries = self.entries.lock().expect("history lock poisoned");
        entries.push(entry, DEFAULT_HISTORY_LIMIT);
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryStoreError> {
        let entries = self.entries.lock().expect("history lock poisoned");
        Ok(entries.recent(limit))
    }
}

fn default_history_path() -> PathBuf {
    if let Ok(path) = env::var(HISTORY_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_file_path(HISTORY_FILE_NAME)
}

fn load_history_file(path: &Path) -> Result<HistoryFile, HistoryStoreError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<HistoryFile>(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                warn!("Failed to parse history file at {}: {}", path.display(), error);
                Ok(HistoryFile::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HistoryFile::default()),
        Err(error) => Err(HistoryStoreError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn entry(name: &str) -> WorkflowHistoryEntry {
        WorkflowHistoryEntry {
            name: name.to_string(),
            status_summary: "2/2 steps passed".into(),
            duration_ms: 42,
            definition_text: "name: smoke\n".into(),
            tags: vec!["smoke".into()],
            description: None,
        }
    }

    #[test]
    fn in_memory_store_lists_newest_first() {
        let store = InMemoryHistoryStore::new();
        store.append(entry("first")).unwrap();
        store.append(entry("second")).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entry.name, "second");
        assert_eq!(recent[1].entry.name, "first");
    }

    #[test]
    fn json_store_persists_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = JsonHistoryStore::new(Some(path.clone()), 10).unwrap();
        store.append(entry("smoke")).unwrap();

        drop(store);
        let store_reloaded = JsonHistoryStore::new(Some(path.clone()), 10).unwrap();
        let recent = store_reloaded.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].entry.status_summary, "2/2 steps passed");
    }

    #[test]
    fn json_store_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = JsonHistoryStore::new(Some(path.clone()), 2).unwrap();

        for index in 0..3 {
            store.append(entry(&format!("wf{}", index))).unwrap();
        }

        drop(store);
        let store_reloaded = JsonHistoryStore::new(Some(path.clone()), 2).unwrap();
        let len = store_reloaded.entries.lock().unwrap().entries.len();
        assert_eq!(len, 2);
    }

    #[test]
    fn definition_text_is_redacted_before_storage() {
        let store = InMemoryHistoryStore::new();
        let mut secret_entry = entry("auth");
        secret_entry.definition_text = "headers:\n  Authorization: Bearer abc123\n".into();
        store.append(secret_entry).unwrap();

        let stored = &store.recent(1).unwrap()[0];
        assert!(!stored.entry.definition_text.contains("abc123"));
    }

    #[test]
    fn default_path_honors_env_override() {
        let override_path = "~/custom/history.json";
        temp_env::with_var(HISTORY_PATH_ENV, Some(override_path), || {
            let path = default_history_path();
            let expected = expand_tilde(override_path);
            assert_eq!(path, expected);
        });
    }

    #[test]
    fn invalid_json_returns_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonHistoryStore::new(Some(path.clone()), 10).unwrap();
        assert!(store.recent(10).unwrap().is_empty());
    }

    #[test]
    fn concurrent_appends_are_all_recorded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = Arc::new(JsonHistoryStore::new(Some(path.clone()), 10).unwrap());
        let mut handles = Vec::new();
        for index in 0..5 {
            let handle_store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                handle_store.append(entry(&format!("wf{index}"))).unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.recent(10).unwrap().len(), 5);
    }
}
