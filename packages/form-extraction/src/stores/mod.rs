//! Storage implementations.
//!
//! - `ProgressLedger` - Completed document ids (`progress.json`)
//! - `FileResultStore` - One JSON file per document under `results/`
//! - `MemoryResultStore` - In-memory records for tests and embedding

pub mod file;
pub mod ledger;
pub mod memory;

pub use file::{sanitize_file_stem, FileResultStore};
pub use ledger::ProgressLedger;
pub use memory::MemoryResultStore;
