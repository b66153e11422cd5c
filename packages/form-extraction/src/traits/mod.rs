//! Seams the orchestrator is built against.
//!
//! Applications inject extractors and storage; the library never
//! constructs provider clients itself.

pub mod extractor;
pub mod store;
