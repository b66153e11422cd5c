//! Data types for documents, results and batch book-keeping.

pub mod config;
pub mod job;
pub mod record;
pub mod request;
pub mod result;
