//! Similarity index abstraction.
//!
//! A [`SimilarityIndex`] answers "which chunks of this document are most
//! similar to the question". An [`IndexCatalog`] builds indexes from
//! ordered chunks (embedding them with its [`EmbeddingProvider`]) and keeps
//! exactly one active document per [`IndexScope`].
//!
//! Replacement is wholesale: a new upload in the same scope supersedes the
//! previous document and its index. Readers observe either the old or the
//! new index, never a partially built one.
//!
//! | Implementation | Crate |
//! |----------------|-------|
//! | [`memory::MemoryIndexCatalog`] | core (tests, embedded use) |
//! | `SqliteIndexCatalog` | `personaplex` app crate |
//!
//! [`EmbeddingProvider`]: crate::embedding::EmbeddingProvider

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Chunk, DocumentRef, IndexScope};

/// A chunk returned from a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Query side of an indexed document.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Return up to `k` chunks ordered by descending similarity to `query`.
    ///
    /// Must not mutate the index.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;
}

/// The document attached to a scope, and its index if one was built.
///
/// `index` is `None` when the document was registered without embeddings
/// (embedding provider disabled, or the document produced no chunks).
#[derive(Clone)]
pub struct ActiveDocument {
    pub document: DocumentRef,
    pub index: Option<Arc<dyn SimilarityIndex>>,
}

impl std::fmt::Debug for ActiveDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDocument")
            .field("document", &self.document)
            .field("indexed", &self.index.is_some())
            .finish()
    }
}

/// Build side: owns the per-scope documents and their indexes.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    /// Register `document` for `scope`, building an index over `chunks`.
    ///
    /// Supersedes any document previously registered for the scope. If
    /// building fails the previous document stays active.
    async fn replace(&self, scope: &IndexScope, document: DocumentRef, chunks: Vec<Chunk>)
        -> Result<()>;

    /// The active document for `scope`, if any.
    async fn active(&self, scope: &IndexScope) -> Result<Option<ActiveDocument>>;

    /// Drop the document registered for `scope`. Missing scopes are a no-op.
    async fn remove(&self, scope: &IndexScope) -> Result<()>;
}

/// Sort scored chunks by descending score, breaking ties by chunk order,
/// and keep the top `k`.
pub fn rank_top_k(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    scored.truncate(k);
    scored
}
