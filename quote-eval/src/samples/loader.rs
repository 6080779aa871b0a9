//! Document import from JSON Lines and JSON array files

use std::path::Path;

use crate::store::Document;

/// Error type for document loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}

/// Load documents from a `.json` array or a JSON Lines file
pub fn load_documents_from_file(path: impl AsRef<Path>) -> Result<Vec<Document>, LoadError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    load_documents_from_str(&content)
}

/// Parse documents from either a JSON array or one JSON object per line
pub fn load_documents_from_str(content: &str) -> Result<Vec<Document>, LoadError> {
    let trimmed = content.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let documents = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<Document>>(trimmed)
            .map_err(|e| LoadError::Parse(e.to_string()))?
    } else {
        let mut documents = Vec::new();
        for (idx, line) in trimmed.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let document: Document = serde_json::from_str(line)
                .map_err(|e| LoadError::Parse(format!("line {}: {}", idx + 1, e)))?;
            documents.push(document);
        }
        documents
    };

    if let Some(position) = documents.iter().position(|d| d.id.is_empty()) {
        return Err(LoadError::MissingField(format!("id (document {})", position + 1)));
    }
    Ok(documents)
}
