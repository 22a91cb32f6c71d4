//! SQLite-backed conversation store and document index catalog.
//!
//! Both types wrap the same [`SqlitePool`]. Multi-row writes (an exchange of
//! two turns, a document replacement, a session deletion) each run in a
//! single transaction, so readers never see half of one.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use personaplex_core::conversation::{derive_title, ConversationStore};
use personaplex_core::embedding::{
    blob_to_vec, cosine_similarity, embed_one, vec_to_blob, EmbeddingProvider,
};
use personaplex_core::index::{
    rank_top_k, ActiveDocument, IndexCatalog, ScoredChunk, SimilarityIndex,
};
use personaplex_core::models::{
    ChatSession, Chunk, DocumentRef, IndexScope, Role, SessionSummary, Turn, UNTITLED_SESSION,
};

fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

/// SQLite implementation of [`ConversationStore`].
pub struct SqliteConversationStore {
    pool: SqlitePool,
    title_chars: usize,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool, title_chars: usize) -> Self {
        Self { pool, title_chars }
    }

    /// Append `turns` to a session inside an open transaction, setting the
    /// title from the first user turn if the session has none.
    ///
    /// The title update is the first statement so the transaction takes the
    /// write lock up front and waits on `busy_timeout` instead of failing
    /// with `SQLITE_BUSY` when another connection commits in between.
    async fn append_turns(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
        turns: &[(Role, &str)],
    ) -> Result<()> {
        let title = turns
            .iter()
            .find(|(role, _)| *role == Role::User)
            .and_then(|(_, content)| derive_title(content, self.title_chars));

        let updated = sqlx::query("UPDATE sessions SET title = COALESCE(title, ?) WHERE id = ?")
            .bind(title)
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        if updated.rows_affected() == 0 {
            bail!("session not found: {}", session_id);
        }

        let now = Utc::now().timestamp();
        for (role, content) in turns {
            sqlx::query(
                "INSERT INTO turns (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(role.as_str())
            .bind(*content)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        let rows =
            sqlx::query("SELECT role, content FROM turns WHERE session_id = ? ORDER BY id ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok::<_, anyhow::Error>(Turn {
                    role: role.parse()?,
                    content: row.get("content"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_session(&self, owner: &str, title: Option<&str>) -> Result<String> {
        if owner.trim().is_empty() {
            bail!("session owner must not be empty");
        }
        let id = uuid::Uuid::new_v4().to_string();
        let title = title.and_then(|t| derive_title(t, self.title_chars));

        sqlx::query("INSERT INTO sessions (id, owner, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(owner)
            .bind(&title)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT id, owner, title, created_at FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(ChatSession {
            id: row.get("id"),
            owner: row.get("owner"),
            title: row.get("title"),
            created_at: from_unix(row.get("created_at")),
            turns: self.turns(session_id).await?,
        }))
    }

    async fn append_turn(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append_turns(&mut *tx, session_id, &[(role, content)])
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_exchange(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append_turns(
            &mut *tx,
            session_id,
            &[(Role::User, question), (Role::Assistant, answer)],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, created_at
            FROM sessions
            WHERE owner = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let title: Option<String> = row.get("title");
                SessionSummary {
                    id: row.get("id"),
                    title: title.unwrap_or_else(|| UNTITLED_SESSION.to_string()),
                    created_at: from_unix(row.get("created_at")),
                }
            })
            .collect())
    }

    async fn load_session(&self, session_id: &str) -> Result<Vec<Turn>> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            bail!("session not found: {}", session_id);
        }
        self.turns(session_id).await
    }

    async fn delete_session(&self, owner: &str, session_id: &str) -> Result<bool> {
        // Writes only: the first statement takes the write lock. Turns go
        // before their session row to satisfy the foreign key.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM turns WHERE session_id IN
                (SELECT id FROM sessions WHERE id = ? AND owner = ?)
            "#,
        )
        .bind(session_id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM sessions WHERE id = ? AND owner = ?")
            .bind(session_id)
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        delete_documents(&mut *tx, owner, session_id).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn last_answer(&self, session_id: &str) -> Result<Option<String>> {
        let answer: Option<String> = sqlx::query_scalar(
            r#"
            SELECT content FROM turns
            WHERE session_id = ? AND role = 'assistant'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(answer)
    }
}

/// Delete the document registered for `(owner, session_id)` together with
/// its chunks and vectors.
async fn delete_documents(conn: &mut SqliteConnection, owner: &str, session_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM chunk_vectors WHERE document_id IN
            (SELECT id FROM documents WHERE owner = ? AND session_id = ?)
        "#,
    )
    .bind(owner)
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM chunks WHERE document_id IN
            (SELECT id FROM documents WHERE owner = ? AND session_id = ?)
        "#,
    )
    .bind(owner)
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM documents WHERE owner = ? AND session_id = ?")
        .bind(owner)
        .bind(session_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// SQLite implementation of [`IndexCatalog`].
///
/// A replacement writes the new document under a fresh id, so every
/// [`SqliteDocumentIndex`] handle reads a fixed set of rows.
pub struct SqliteIndexCatalog {
    pool: SqlitePool,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: usize,
}

impl SqliteIndexCatalog {
    pub fn new(
        pool: SqlitePool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            embedder,
            batch_size,
        }
    }

    async fn embed_chunks(
        &self,
        embedder: &dyn EmbeddingProvider,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size.max(1)) {
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
        Ok(vectors)
    }
}

#[async_trait]
impl IndexCatalog for SqliteIndexCatalog {
    async fn replace(
        &self,
        scope: &IndexScope,
        document: DocumentRef,
        chunks: Vec<Chunk>,
    ) -> Result<()> {
        // Embed before touching the database so a failed build leaves the
        // previous document in place.
        let vectors = match &self.embedder {
            Some(embedder) if !chunks.is_empty() => {
                Some(self.embed_chunks(embedder.as_ref(), &chunks).await?)
            }
            _ => None,
        };

        let doc_id = uuid::Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        delete_documents(&mut *tx, &scope.owner, &scope.session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, owner, session_id, file_name, file_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc_id)
        .bind(&scope.owner)
        .bind(&scope.session_id)
        .bind(&document.file_name)
        .bind(&document.file_path)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk_id)
            .bind(&doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            if let Some(vec) = vectors.as_ref().and_then(|v| v.get(i)) {
                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)",
                )
                .bind(&chunk_id)
                .bind(&doc_id)
                .bind(vec_to_blob(vec))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn active(&self, scope: &IndexScope) -> Result<Option<ActiveDocument>> {
        let row = sqlx::query(
            "SELECT id, file_name, file_path FROM documents WHERE owner = ? AND session_id = ?",
        )
        .bind(&scope.owner)
        .bind(&scope.session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let doc_id: String = row.get("id");
        let document = DocumentRef::new(
            row.get::<String, _>("file_name"),
            row.get::<String, _>("file_path"),
        );

        let vector_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE document_id = ?")
                .bind(&doc_id)
                .fetch_one(&self.pool)
                .await?;

        let index: Option<Arc<dyn SimilarityIndex>> = match &self.embedder {
            Some(embedder) if vector_count > 0 => Some(Arc::new(SqliteDocumentIndex {
                pool: self.pool.clone(),
                document_id: doc_id,
                embedder: embedder.clone(),
            })),
            _ => None,
        };

        Ok(Some(ActiveDocument { document, index }))
    }

    async fn remove(&self, scope: &IndexScope) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_documents(&mut *tx, &scope.owner, &scope.session_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Query handle over one stored document's chunk vectors.
pub struct SqliteDocumentIndex {
    pool: SqlitePool,
    document_id: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

#[async_trait]
impl SimilarityIndex for SqliteDocumentIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            r#"
            SELECT c.chunk_index, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.document_id = ?
            "#,
        )
        .bind(&self.document_id)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_top_k(scored, k))
    }
}
