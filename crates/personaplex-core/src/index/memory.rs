//! In-memory [`IndexCatalog`] for tests and embedded use.
//!
//! Each scope maps to an `Arc<ActiveDocument>`; replacing a document swaps
//! the `Arc` under a write lock after the new index is fully built, so
//! concurrent readers keep whichever index they already cloned.
//! Search is brute-force cosine similarity over all chunk vectors.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, embed_one, EmbeddingProvider};
use crate::models::{Chunk, DocumentRef, IndexScope};

use super::{rank_top_k, ActiveDocument, IndexCatalog, ScoredChunk, SimilarityIndex};

/// A fully built, immutable vector index over one document's chunks.
pub struct MemoryIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemoryIndex {
    /// Embed `chunks` in batches of `batch_size` and build the index.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Result<Self> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(anyhow!(
                    "embedding provider returned {} vectors for {} chunks",
                    embedded.len(),
                    texts.len()
                ));
            }
            vectors.extend(embedded);
        }

        Ok(Self {
            chunks,
            vectors,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl SimilarityIndex for MemoryIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), query).await?;

        let scored = self
            .chunks
            .iter()
            .zip(self.vectors.iter())
            .map(|(chunk, vec)| ScoredChunk {
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                score: cosine_similarity(&query_vec, vec),
            })
            .collect();

        Ok(rank_top_k(scored, k))
    }
}

/// In-memory catalog of per-scope documents.
pub struct MemoryIndexCatalog {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: usize,
    entries: RwLock<HashMap<IndexScope, Arc<ActiveDocument>>>,
}

impl MemoryIndexCatalog {
    /// Create a catalog. Without an embedder, documents are registered
    /// but never indexed.
    pub fn new(embedder: Option<Arc<dyn EmbeddingProvider>>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl IndexCatalog for MemoryIndexCatalog {
    async fn replace(
        &self,
        scope: &IndexScope,
        document: DocumentRef,
        chunks: Vec<Chunk>,
    ) -> Result<()> {
        let index: Option<Arc<dyn SimilarityIndex>> = match &self.embedder {
            Some(embedder) if !chunks.is_empty() => Some(Arc::new(
                MemoryIndex::build(chunks, embedder.clone(), self.batch_size).await?,
            )),
            _ => None,
        };

        let entry = Arc::new(ActiveDocument { document, index });
        self.entries
            .write()
            .map_err(|_| anyhow!("index catalog lock poisoned"))?
            .insert(scope.clone(), entry);
        Ok(())
    }

    async fn active(&self, scope: &IndexScope) -> Result<Option<ActiveDocument>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("index catalog lock poisoned"))?;
        Ok(entries.get(scope).map(|entry| entry.as_ref().clone()))
    }

    async fn remove(&self, scope: &IndexScope) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| anyhow!("index catalog lock poisoned"))?
            .remove(scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_text, ChunkParams};

    /// Embeds text as counts of a few marker words.
    struct KeywordEmbedder;

    const MARKERS: [&str; 4] = ["rust", "python", "docker", "salary"];

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            MARKERS.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    MARKERS
                        .iter()
                        .map(|m| lower.matches(m).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(anyhow!("backend unavailable"))
        }
    }

    fn doc_chunks() -> Vec<Chunk> {
        let text = "Rust ownership and borrowing. Rust traits.\n\
                    Python notebooks for data work.\n\
                    Docker images and docker compose files.";
        chunk_text(text, &ChunkParams::new(40, 5).unwrap())
    }

    fn scope() -> IndexScope {
        IndexScope::new("alice", "s1")
    }

    #[tokio::test]
    async fn test_search_ranks_most_similar_first() {
        let index = MemoryIndex::build(doc_chunks(), Arc::new(KeywordEmbedder), 2)
            .await
            .unwrap();
        let hits = index.search("tell me about docker", 2).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].text.to_lowercase().contains("docker"));
        assert!(hits.len() <= 2);
    }

    #[tokio::test]
    async fn test_catalog_replaces_wholesale() {
        let catalog = MemoryIndexCatalog::new(Some(Arc::new(KeywordEmbedder)), 8);
        catalog
            .replace(&scope(), DocumentRef::new("a.txt", "/tmp/a.txt"), doc_chunks())
            .await
            .unwrap();
        let before = catalog.active(&scope()).await.unwrap().unwrap();

        let other = chunk_text("salary bands and salary review", &ChunkParams::default());
        catalog
            .replace(&scope(), DocumentRef::new("b.txt", "/tmp/b.txt"), other)
            .await
            .unwrap();
        let after = catalog.active(&scope()).await.unwrap().unwrap();

        assert_eq!(after.document.file_name, "b.txt");
        let hits = after.index.unwrap().search("salary", 5).await.unwrap();
        assert_eq!(hits.len(), 1);

        // A reader holding the old index still sees the old document.
        let old_hits = before.index.unwrap().search("docker", 5).await.unwrap();
        assert!(old_hits.iter().any(|h| h.text.to_lowercase().contains("docker")));
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_document() {
        let good = MemoryIndexCatalog::new(Some(Arc::new(BrokenEmbedder)), 8);
        good.entries.write().unwrap().insert(
            scope(),
            Arc::new(ActiveDocument {
                document: DocumentRef::new("old.txt", "/tmp/old.txt"),
                index: None,
            }),
        );
        let result = good
            .replace(&scope(), DocumentRef::new("new.txt", "/tmp/new.txt"), doc_chunks())
            .await;
        assert!(result.is_err());
        let active = good.active(&scope()).await.unwrap().unwrap();
        assert_eq!(active.document.file_name, "old.txt");
    }

    #[tokio::test]
    async fn test_without_embedder_document_is_unindexed() {
        let catalog = MemoryIndexCatalog::new(None, 8);
        catalog
            .replace(&scope(), DocumentRef::new("a.txt", "/tmp/a.txt"), doc_chunks())
            .await
            .unwrap();
        let active = catalog.active(&scope()).await.unwrap().unwrap();
        assert!(active.index.is_none());

        catalog.remove(&scope()).await.unwrap();
        assert!(catalog.active(&scope()).await.unwrap().is_none());
    }
}
