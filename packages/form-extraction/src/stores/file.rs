//! Filesystem result storage.
//!
//! Layout under the output directory:
//!
//! ```text
//! results/<sanitized-id>.json
//! summaries/summary-<run-id>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::traits::store::ResultStore;
use crate::types::record::{BatchSummary, DocumentRecord};

pub const RESULTS_DIR: &str = "results";
pub const SUMMARIES_DIR: &str = "summaries";

/// Turn a document id into a safe file stem.
///
/// Ids that needed rewriting get a short hash suffix so that two ids
/// differing only in unsafe characters do not share a file.
pub fn sanitize_file_stem(document_id: &str) -> String {
    let cleaned: String = document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned == document_id && !cleaned.is_empty() {
        return cleaned.to_string();
    }

    let digest = format!("{:x}", Sha256::digest(document_id.as_bytes()));
    let stem = if cleaned.is_empty() { "_" } else { cleaned };
    format!("{}-{}", stem, &digest[..8])
}

/// Serialize `value` as pretty JSON and replace `path` via a rename.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::format(path, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

/// One JSON file per document.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    root: PathBuf,
}

impl FileResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join(SUMMARIES_DIR)
    }

    /// Where the record for `document_id` is written.
    pub fn record_path(&self, document_id: &str) -> PathBuf {
        self.results_dir()
            .join(format!("{}.json", sanitize_file_stem(document_id)))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save_record(&self, record: &DocumentRecord) -> StorageResult<()> {
        let path = self.record_path(&record.document_id);
        write_json_atomic(&path, record).await?;
        debug!(document_id = %record.document_id, path = %path.display(), "Saved result record");
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<DocumentRecord>> {
        let dir = self.results_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            match serde_json::from_slice::<DocumentRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable result record");
                }
            }
        }

        records.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(records)
    }

    async fn save_summary(&self, summary: &BatchSummary) -> StorageResult<()> {
        let path = self
            .summaries_dir()
            .join(format!("summary-{}.json", summary.run_id));
        write_json_atomic(&path, summary).await
    }

    async fn clear(&self) -> StorageResult<()> {
        let dir = self.results_dir();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::DocumentStatus;
    use crate::types::result::Usage;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn record(id: &str) -> DocumentRecord {
        DocumentRecord {
            document_id: id.to_string(),
            schema_id: "iep".into(),
            status: DocumentStatus::Completed,
            run_id: Uuid::now_v7(),
            processed_at: Utc::now(),
            content_hash: Some("abc".into()),
            attempts: 1,
            usage: Usage::new(10, 2),
            duration_ms: 12,
            consensus: None,
            validation: None,
            data: Some(json!({"student": {"name": "Ada"}})),
            error: None,
            last_error_kind: None,
        }
    }

    #[test]
    fn test_sanitize_keeps_safe_ids() {
        assert_eq!(sanitize_file_stem("iep-2024_01.v2"), "iep-2024_01.v2");
    }

    #[test]
    fn test_sanitize_rewrites_unsafe_ids_without_collisions() {
        let slash = sanitize_file_stem("district/iep 7");
        let underscore = sanitize_file_stem("district_iep_7");
        assert!(slash.starts_with("district_iep_7-"));
        assert_ne!(slash, underscore);
        assert!(!sanitize_file_stem("../etc/passwd").contains('/'));
        assert!(!sanitize_file_stem("..").starts_with('.'));
    }

    #[tokio::test]
    async fn test_records_round_trip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        store.save_record(&record("b")).await.unwrap();
        store.save_record(&record("a/1")).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a/1", "b"]);
        assert_eq!(loaded[1].data, Some(json!({"student": {"name": "Ada"}})));
    }

    #[tokio::test]
    async fn test_load_all_without_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path().join("fresh"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        store.save_record(&record("a")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        store.clear().await.unwrap();
    }
}
