//! Boundary of the file-reading collaborator used by Ingestion.

use std::path::Path;

/// Result of reading a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Extracted text (possibly empty).
    Text(String),
    /// The file could not be read; the diagnostic becomes the content.
    Degraded(String),
}

impl ReadOutcome {
    /// The text that enters the pipeline, whichever way reading went.
    pub fn into_content(self) -> String {
        match self {
            ReadOutcome::Text(text) | ReadOutcome::Degraded(text) => text,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ReadOutcome::Degraded(_))
    }
}

/// Reads a document into text. Implementations never fail; problems are
/// reported as [`ReadOutcome::Degraded`].
pub trait DocumentReader: Send + Sync {
    /// `extension` is the lowercase file extension without the dot.
    fn read(&self, path: &Path, extension: &str) -> ReadOutcome;
}

/// Lowercase extension of `path`, or `""` when it has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}
