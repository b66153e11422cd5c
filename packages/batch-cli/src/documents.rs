//! Loads a directory of documents for a batch run.
//!
//! Text formats are read as UTF-8; PDFs are passed to the provider as
//! bytes. Anything else is skipped with a warning. The document id is the
//! file stem.

use std::path::Path;

use anyhow::{Context, Result};
use form_extraction::{Document, DocumentContent};
use tracing::{debug, warn};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "json"];

/// Read every supported file directly under `dir`, sorted by file name.
pub fn load_documents(dir: &Path, schema_id: &str) -> Result<Vec<Document>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read documents directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!(path = %path.display(), "Skipping file with unreadable name");
            continue;
        };
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let content = if TEXT_EXTENSIONS.contains(&extension.as_str()) {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            DocumentContent::text(text)
        } else if extension == "pdf" {
            let bytes =
                std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(id)
                .to_string();
            DocumentContent::binary(filename, "application/pdf", bytes)
        } else {
            warn!(path = %path.display(), "Skipping unsupported document type");
            continue;
        };

        debug!(document_id = id, bytes = content.len(), "Loaded document");
        documents.push(Document::new(id, schema_id, content));
    }

    Ok(documents)
}
