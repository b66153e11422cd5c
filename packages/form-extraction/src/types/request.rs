//! Documents and extraction requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RequestError;

/// Effort/quality level requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl EffortLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffortLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown effort level '{}' (expected low|medium|high)", other)),
        }
    }
}

/// Already-resolved document content.
///
/// Text is sent inline; binary content (e.g. a PDF) is handed to the
/// provider as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text(String),
    Binary {
        filename: String,
        media_type: String,
        bytes: Vec<u8>,
    },
}

impl DocumentContent {
    /// Create inline text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create binary content.
    pub fn binary(filename: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Binary {
            filename: filename.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary { bytes, .. } => bytes.len(),
        }
    }

    /// True when there is nothing to extract from. Whitespace-only text counts as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Binary { bytes, .. } => bytes.is_empty(),
        }
    }

    /// Hex SHA-256 of the raw content.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Self::Text(text) => hasher.update(text.as_bytes()),
            Self::Binary { bytes, .. } => hasher.update(bytes),
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// A unit of work for a batch run.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub schema_id: String,
    pub content: DocumentContent,
}

impl Document {
    pub fn new(id: impl Into<String>, schema_id: impl Into<String>, content: DocumentContent) -> Self {
        Self {
            id: id.into(),
            schema_id: schema_id.into(),
            content,
        }
    }
}

/// Immutable request handed to an extractor.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    document_id: String,
    content: DocumentContent,
    schema_id: String,
    effort: EffortLevel,
}

impl ExtractionRequest {
    /// Build a request, rejecting blank ids and empty content.
    pub fn new(
        document_id: impl Into<String>,
        content: DocumentContent,
        schema_id: impl Into<String>,
        effort: EffortLevel,
    ) -> Result<Self, RequestError> {
        let document_id = document_id.into();
        if document_id.trim().is_empty() {
            return Err(RequestError::EmptyDocumentId);
        }
        if content.is_empty() {
            return Err(RequestError::EmptyContent { document_id });
        }
        Ok(Self {
            document_id,
            content,
            schema_id: schema_id.into(),
            effort,
        })
    }

    /// Build a request for a batch document.
    pub fn for_document(document: &Document, effort: EffortLevel) -> Result<Self, RequestError> {
        Self::new(
            document.id.clone(),
            document.content.clone(),
            document.schema_id.clone(),
            effort,
        )
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn content(&self) -> &DocumentContent {
        &self.content
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn effort(&self) -> EffortLevel {
        self.effort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_content() {
        let err = ExtractionRequest::new("doc-1", DocumentContent::text("   "), "iep", EffortLevel::Low)
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::EmptyContent {
                document_id: "doc-1".into()
            }
        );

        let err = ExtractionRequest::new(
            "doc-2",
            DocumentContent::binary("a.pdf", "application/pdf", vec![]),
            "iep",
            EffortLevel::Low,
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::EmptyContent { .. }));
    }

    #[test]
    fn test_rejects_blank_id() {
        let err = ExtractionRequest::new(" ", DocumentContent::text("x"), "iep", EffortLevel::Low)
            .unwrap_err();
        assert_eq!(err, RequestError::EmptyDocumentId);
    }

    #[test]
    fn test_effort_parsing() {
        assert_eq!("HIGH".parse::<EffortLevel>().unwrap(), EffortLevel::High);
        assert_eq!(" low ".parse::<EffortLevel>().unwrap(), EffortLevel::Low);
        assert!("extreme".parse::<EffortLevel>().is_err());
        assert_eq!(EffortLevel::default(), EffortLevel::Medium);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = DocumentContent::text("Student: Ada");
        let b = DocumentContent::text("Student: Ada");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
        assert_ne!(a.content_hash(), DocumentContent::text("Student: Bob").content_hash());
    }
}
