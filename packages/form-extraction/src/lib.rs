//! Structured Form Extraction
//!
//! Turns unstructured documents (forms with free text, tables and
//! checkboxes) into validated structured records by calling one or more
//! extraction providers, scoring their outputs and reconciling
//! disagreement.
//!
//! # Design
//!
//! - Providers are injected as [`Extractor`] trait objects; the library
//!   never builds clients on its own
//! - Failures are classified ([`ExtractionError`]) and the orchestrator
//!   branches on the class: back off, retry, fall back, or abort
//! - Scoring, consensus and validation are pure and deterministic
//! - Progress is resumable: a ledger of settled documents is appended as
//!   each document finishes
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use form_extraction::{BatchOrchestrator, FileResultStore, ProgressLedger, SchemaRegistry};
//! use form_extraction::testing::MockExtractor;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut schemas = SchemaRegistry::new();
//! schemas.load_file("schemas/iep.json")?;
//!
//! let orchestrator = BatchOrchestrator::new(
//!     vec![Arc::new(MockExtractor::new("primary"))],
//!     Arc::new(schemas),
//!     Arc::new(FileResultStore::new("out")),
//! );
//! let mut ledger = ProgressLedger::open("out").await?;
//! let report = orchestrator.run(documents, &mut ledger, CancellationToken::new()).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Extractor and result store abstractions
//! - [`types`] - Requests, results, configuration, job state, records
//! - [`schema`] - Schema specifications and the validator
//! - [`pipeline`] - Scoring, consensus, orchestration, summaries
//! - [`stores`] - Progress ledger and result stores
//! - [`extractors`] - Rate limiting, file uploads, OpenAI adapter
//! - [`security`] - Credential handling
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod extractors;
pub mod pipeline;
pub mod schema;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod tree;
pub mod types;

// Re-export core types at crate root
pub use error::{
    BatchError, ConsensusError, ErrorKind, ExtractionError, RequestError, SchemaError,
    StorageError,
};
pub use extractors::{with_uploaded_file, ExtractorExt, FileHost, RateLimitedExtractor};
pub use pipeline::{
    BatchOrchestrator, ConfidenceScore, ConfidenceScorer, ConsensusEngine, ConsensusResult,
    Rubric, RubricSection, SectionKind, SelectionReason,
};
pub use schema::{
    validate, CrossReference, FieldSpec, FieldType, IssueKind, SchemaRegistry, SchemaSpec,
    Severity, ValidationIssue, ValidationReport,
};
pub use stores::{FileResultStore, MemoryResultStore, ProgressLedger};
pub use traits::{extractor::Extractor, store::ResultStore};
pub use types::{
    config::{BatchConfig, ExtractionStrategy, RetryPolicy},
    job::{BatchJob, JobState},
    record::{BatchReport, BatchSummary, DocumentRecord, DocumentStatus, RecordedError},
    request::{Document, DocumentContent, EffortLevel, ExtractionRequest},
    result::{ExtractionResult, Usage},
};

#[cfg(feature = "openai")]
pub use extractors::{ModelPricing, OpenAIExtractor};
