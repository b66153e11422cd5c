//! Persisted per-document records and batch summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorKind, ExtractionError};
use crate::pipeline::consensus::{CandidateScore, ConsensusResult, SelectionReason};
use crate::schema::ValidationReport;
use crate::types::result::Usage;

/// Terminal outcome of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Completed,
    Failed,
}

/// Classified failure as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RecordedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ExtractionError> for RecordedError {
    fn from(err: &ExtractionError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// How the final tree was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDiagnostics {
    pub source: String,
    pub reason: SelectionReason,
    pub confidence: u8,
    pub candidates: Vec<CandidateScore>,
    #[serde(default)]
    pub conflicted_fields: Vec<String>,
}

impl From<&ConsensusResult> for ConsensusDiagnostics {
    fn from(result: &ConsensusResult) -> Self {
        Self {
            source: result.source.clone(),
            reason: result.reason,
            confidence: result.confidence(),
            candidates: result.candidates.clone(),
            conflicted_fields: result.conflicted_fields.clone(),
        }
    }
}

/// Result file for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub schema_id: String,
    pub status: DocumentStatus,
    pub run_id: Uuid,
    pub processed_at: DateTime<Utc>,

    /// SHA-256 of the content handed to the extractors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Extractor calls made for this document, across the chain.
    pub attempts: u32,

    pub usage: Usage,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusDiagnostics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,

    /// The selected semantic tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,

    /// Kind of the last failed extractor call, kept even when a later
    /// extractor in the chain succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<ErrorKind>,
}

impl DocumentRecord {
    pub fn is_completed(&self) -> bool {
        self.status == DocumentStatus::Completed
    }

    pub fn source(&self) -> Option<&str> {
        self.consensus.as_ref().map(|c| c.source.as_str())
    }

    pub fn confidence(&self) -> Option<u8> {
        self.consensus.as_ref().map(|c| c.confidence)
    }

    pub fn completeness(&self) -> Option<u8> {
        self.validation.as_ref().map(|v| v.completeness)
    }
}

/// A failed document as listed in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub document_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-schema tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTally {
    pub documents: usize,
    pub completed: usize,
    pub failed: usize,
    pub valid: usize,
}

/// Aggregate over every persisted record in the output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub total_documents: usize,
    pub completed: usize,
    pub failed: usize,
    pub valid: usize,
    pub invalid: usize,

    /// Completed documents per winning extractor.
    pub by_source: BTreeMap<String, usize>,

    pub by_schema: BTreeMap<String, SchemaTally>,

    /// Failed documents per error classification.
    pub failures_by_kind: BTreeMap<String, usize>,

    pub failures: Vec<FailureEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_completeness: Option<f64>,

    pub total_attempts: u64,

    /// Sum of per-document processing time.
    #[serde(default)]
    pub total_duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,

    /// Mean cost over every document, failed ones included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cost_usd: Option<f64>,

    pub usage: Usage,
}

/// What a batch run returns to its caller.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub run_id: Uuid,

    /// Documents settled in this run.
    pub processed: usize,

    /// Documents skipped because the ledger already held them.
    pub skipped: usize,

    /// Highest number of documents observed in flight at once.
    pub peak_concurrency: usize,

    pub summary: BatchSummary,
}
