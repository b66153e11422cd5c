//! In-memory result storage for testing and development.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::traits::store::ResultStore;
use crate::types::record::{BatchSummary, DocumentRecord};

/// Records and summaries held in process memory.
///
/// Data is lost on drop.
#[derive(Default)]
pub struct MemoryResultStore {
    records: RwLock<BTreeMap<String, DocumentRecord>>,
    summaries: RwLock<Vec<BatchSummary>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Record for one document, if stored.
    pub fn record(&self, document_id: &str) -> Option<DocumentRecord> {
        self.records.read().ok()?.get(document_id).cloned()
    }

    /// Every summary saved so far, oldest first.
    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.summaries.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save_record(&self, record: &DocumentRecord) -> StorageResult<()> {
        self.records
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .insert(record.document_id.clone(), record.clone());
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<DocumentRecord>> {
        Ok(self
            .records
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .values()
            .cloned()
            .collect())
    }

    async fn save_summary(&self, summary: &BatchSummary) -> StorageResult<()> {
        self.summaries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .push(summary.clone());
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.records.write().map_err(|_| StorageError::Poisoned)?.clear();
        Ok(())
    }
}
