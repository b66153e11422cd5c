//! Extractor trait: one provider behind a uniform contract.

use async_trait::async_trait;

use crate::error::ExtractionError;
use crate::schema::SchemaSpec;
use crate::types::request::ExtractionRequest;
use crate::types::result::ExtractionResult;

/// A provider that turns a document into a semantic tree.
///
/// Implementations must be cheap to share across tasks; the orchestrator
/// holds them behind `Arc<dyn Extractor>`.
///
/// # Contract
///
/// - On success the tree is a JSON object carrying every required
///   top-level key of `schema` (values may be null).
/// - Failures are classified; see [`ExtractionError`] for how each
///   variant is handled by the caller.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stable identifier recorded as the source of a selected result.
    fn id(&self) -> &str;

    /// Largest content this provider accepts, in bytes.
    fn max_content_bytes(&self) -> Option<usize> {
        None
    }

    /// Extract a tree shaped by `schema` from the request's content.
    async fn extract(
        &self,
        request: &ExtractionRequest,
        schema: &SchemaSpec,
    ) -> Result<ExtractionResult, ExtractionError>;
}

/// Reject content larger than the extractor accepts.
///
/// Oversized content is a mismatch for this provider, not for the chain.
pub fn ensure_within_limit(extractor: &dyn Extractor, request: &ExtractionRequest) -> Result<(), ExtractionError> {
    match extractor.max_content_bytes() {
        Some(limit) if request.content().len() > limit => Err(ExtractionError::SchemaMismatch(format!(
            "document {} is {} bytes, {} accepts at most {}",
            request.document_id(),
            request.content().len(),
            extractor.id(),
            limit
        ))),
        _ => Ok(()),
    }
}
