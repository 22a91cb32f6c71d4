//! Context retrieval.
//!
//! Turns a question plus the session's (optional) index into a grounding
//! context string: the top-`k` chunks, most relevant first, joined by a
//! blank line.
//!
//! "No index" and "retrieval is broken" are deliberately different
//! outcomes: the former is `Ok("")`, the latter a [`RetrievalError`].

use thiserror::Error;

use crate::index::SimilarityIndex;

/// Default number of chunks to retrieve.
pub const DEFAULT_TOP_K: usize = 5;

/// Separator placed between retrieved chunks.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// The similarity backend failed or did not answer in time.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("similarity search failed: {0}")]
    Backend(String),
    #[error("similarity search timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Retrieve a context string for `question`.
///
/// Returns `Ok(String::new())` when `index` is `None`.
pub async fn retrieve(
    index: Option<&dyn SimilarityIndex>,
    question: &str,
    k: usize,
) -> Result<String, RetrievalError> {
    let Some(index) = index else {
        return Ok(String::new());
    };

    let hits = index
        .search(question, k)
        .await
        .map_err(|e| RetrievalError::Backend(format!("{:#}", e)))?;

    Ok(hits
        .into_iter()
        .take(k)
        .map(|hit| hit.text)
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR))
}
