//! Extraction pipeline.
//!
//! - Confidence scoring of individual results
//! - Consensus selection among candidates
//! - Batch orchestration (extract → reconcile → validate → persist)
//! - Summary aggregation over persisted records

pub mod consensus;
pub mod orchestrator;
pub mod scoring;
pub mod summary;

pub use consensus::{CandidateScore, ConsensusEngine, ConsensusResult, SelectionReason};
pub use orchestrator::BatchOrchestrator;
pub use scoring::{
    ConfidenceScore, ConfidenceScorer, Penalties, Rubric, RubricSection, SectionKind, SectionScore,
    SCORE_CEILING,
};
pub use summary::summarize;
