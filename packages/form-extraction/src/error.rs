//! Typed errors for the extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure returned by an [`Extractor`](crate::traits::extractor::Extractor).
///
/// Callers branch on the variant, never on the message text.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// Provider asked us to slow down. Retry the same extractor after backing off.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network or provider hiccup (including deadline overruns). Retry the same extractor.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Provider output could not be read against the requested shape,
    /// or the provider cannot serve this request. Escalate to the next extractor.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Authentication or configuration failure. Abort the whole batch.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ExtractionError {
    /// Shorthand for a rate-limit error without a retry hint.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) => ErrorKind::Transient,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the same extractor may be called again for this request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Provider-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure classification as recorded in result files and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Transient,
    SchemaMismatch,
    Fatal,
    /// Document rejected before any extractor was called.
    InvalidRequest,
    /// Every extractor in the chain failed to produce a candidate.
    NoExtractionAvailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Fatal => "fatal",
            Self::InvalidRequest => "invalid_request",
            Self::NoExtractionAvailable => "no_extraction_available",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building an extraction request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Document content has no bytes.
    #[error("document {document_id} has empty content")]
    EmptyContent { document_id: String },

    /// Document id is blank.
    #[error("document id is empty")]
    EmptyDocumentId,
}

/// Errors from the consensus step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsensusError {
    /// No candidate survived the extractor chain.
    #[error("no extraction available")]
    NoExtractionAvailable,
}

/// Errors loading or checking a schema specification.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Schema file could not be read
    #[error("failed to read schema {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Schema document is not valid JSON for a schema spec
    #[error("schema parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Schema is well-formed JSON but internally inconsistent
    #[error("invalid schema {schema_id}: {reason}")]
    Invalid { schema_id: String, reason: String },

    /// No schema registered under this id
    #[error("unknown schema: {0}")]
    Unknown(String),
}

/// Errors from the persisted ledger and result storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored file is not valid JSON for its record type
    #[error("storage format error at {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Lock was poisoned by a panicking writer
    #[error("storage lock poisoned")]
    Poisoned,
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Format {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end a batch run.
#[derive(Debug, Error)]
pub enum BatchError {
    /// An extractor reported a fatal condition; remaining work was cancelled.
    #[error("batch aborted on document {document_id}: {source}")]
    Fatal {
        document_id: String,
        #[source]
        source: ExtractionError,
    },

    /// Ledger or result storage failed; continuing could corrupt progress.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Run was cancelled from outside.
    #[error("batch cancelled")]
    Cancelled,
}

/// Result type alias for extractor calls.
pub type ExtractionResultOf<T> = std::result::Result<T, ExtractionError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for schema operations.
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ExtractionError::rate_limited("slow down").is_retryable());
        assert!(ExtractionError::Transient("reset".into()).is_retryable());
        assert!(!ExtractionError::SchemaMismatch("bad json".into()).is_retryable());
        assert!(!ExtractionError::Fatal("401".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = ExtractionError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ExtractionError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SchemaMismatch).unwrap();
        assert_eq!(json, "\"schema_mismatch\"");
        assert_eq!(ErrorKind::NoExtractionAvailable.to_string(), "no_extraction_available");
    }
}
