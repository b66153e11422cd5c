//! Storage trait for per-document records and run summaries.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::record::{BatchSummary, DocumentRecord};

/// Durable home for result records.
///
/// Only the orchestrator's consuming task writes, so implementations
/// need not order concurrent writers.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write (or overwrite) the record for `record.document_id`.
    async fn save_record(&self, record: &DocumentRecord) -> StorageResult<()>;

    /// Every stored record, ordered by document id.
    async fn load_all(&self) -> StorageResult<Vec<DocumentRecord>>;

    /// Write a run summary.
    async fn save_summary(&self, summary: &BatchSummary) -> StorageResult<()>;

    /// Remove every stored record.
    async fn clear(&self) -> StorageResult<()>;
}
