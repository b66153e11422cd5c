//! Progress ledger: which documents already reached a terminal state.
//!
//! The ledger is read once when a batch starts and appended after each
//! document settles. Appends rewrite `progress.json` through a temporary
//! file and a rename, so a crash leaves either the old or the new list.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::stores::file::write_json_atomic;

/// File name of the ledger inside an output directory.
pub const LEDGER_FILE: &str = "progress.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    completed: BTreeSet<String>,
    last_updated: DateTime<Utc>,
}

/// Set of settled document ids, optionally backed by a file.
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: Option<PathBuf>,
    completed: BTreeSet<String>,
    last_updated: DateTime<Utc>,
}

impl ProgressLedger {
    /// Ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            completed: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }

    /// Open the ledger in `output_dir`, creating an empty one if absent.
    pub async fn open(output_dir: impl AsRef<Path>) -> StorageResult<Self> {
        Self::load(output_dir.as_ref().join(LEDGER_FILE)).await
    }

    /// Load the ledger at `path`, creating an empty one if absent.
    pub async fn load(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: LedgerFile =
                    serde_json::from_slice(&bytes).map_err(|e| StorageError::format(&path, e))?;
                info!(
                    path = %path.display(),
                    completed = file.completed.len(),
                    "Loaded progress ledger"
                );
                Ok(Self {
                    path: Some(path),
                    completed: file.completed,
                    last_updated: file.last_updated,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let ledger = Self {
                    path: Some(path),
                    completed: BTreeSet::new(),
                    last_updated: Utc::now(),
                };
                ledger.persist().await?;
                debug!(path = ?ledger.path, "Created progress ledger");
                Ok(ledger)
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.completed.contains(document_id)
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(String::as_str)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Record a settled document and persist.
    pub async fn append(&mut self, document_id: &str) -> StorageResult<()> {
        self.completed.insert(document_id.to_string());
        self.last_updated = Utc::now();
        self.persist().await
    }

    /// Forget every settled document and persist.
    pub async fn reset(&mut self) -> StorageResult<()> {
        self.completed.clear();
        self.last_updated = Utc::now();
        self.persist().await
    }

    async fn persist(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = LedgerFile {
            completed: self.completed.clone(),
            last_updated: self.last_updated,
        };
        write_json_atomic(path, &file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_ledger_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::open(dir.path()).await.unwrap();

        assert!(ledger.is_empty());
        assert!(dir.path().join(LEDGER_FILE).exists());
    }

    #[tokio::test]
    async fn test_append_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::open(dir.path()).await.unwrap();
        ledger.append("doc-b").await.unwrap();
        ledger.append("doc-a").await.unwrap();

        let reloaded = ProgressLedger::open(dir.path()).await.unwrap();
        assert_eq!(reloaded.completed().collect::<Vec<_>>(), vec!["doc-a", "doc-b"]);
        assert!(reloaded.contains("doc-a"));
        assert!(!reloaded.contains("doc-c"));
    }

    #[tokio::test]
    async fn test_reset_clears_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::open(dir.path()).await.unwrap();
        ledger.append("doc-a").await.unwrap();
        ledger.reset().await.unwrap();

        let reloaded = ProgressLedger::open(dir.path()).await.unwrap();
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEDGER_FILE), b"not json").unwrap();

        let err = ProgressLedger::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, StorageError::Format { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_never_touches_disk() {
        let mut ledger = ProgressLedger::in_memory();
        ledger.append("doc-a").await.unwrap();
        assert!(ledger.contains("doc-a"));
        assert!(ledger.path().is_none());
    }
}
