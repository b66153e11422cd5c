//! Extractor implementations and wrappers.
//!
//! - `RateLimitedExtractor` - Request quota around any extractor
//! - `with_uploaded_file` - Scoped provider file uploads
//! - `OpenAIExtractor` - OpenAI structured outputs (requires `openai` feature)

pub mod files;
pub mod rate_limited;

#[cfg(feature = "openai")]
pub mod openai;

pub use files::{with_uploaded_file, FileHost};
pub use rate_limited::{ExtractorExt, RateLimitedExtractor};

#[cfg(feature = "openai")]
pub use openai::{ModelPricing, OpenAIExtractor};
