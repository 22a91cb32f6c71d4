//! Per-turn entry point tying the router, pipeline, index catalog and
//! conversation store together.
//!
//! Turns and uploads for one session are serialized by a per-session async
//! lock; different sessions proceed independently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use personaplex_core::chunk::{chunk_text, ChunkParams};
use personaplex_core::conversation::ConversationStore;
use personaplex_core::index::IndexCatalog;
use personaplex_core::models::{ChatSession, DocumentRef, IndexScope, SessionSummary};
use personaplex_core::reader::{extension_of, DocumentReader, ReadOutcome};
use personaplex_core::router::{classify, Category};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::extract::FileExtractor;
use crate::llm::create_generator;
use crate::migrate;
use crate::pipeline::{Pipeline, PipelineSettings, Stage, TurnOutcome};
use crate::sqlite_store::{SqliteConversationStore, SqliteIndexCatalog};

/// Answer to one user turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    pub category: Category,
    pub answer: String,
    pub outcome: TurnOutcome,
    pub stages: Vec<Stage>,
}

/// Result of attaching a document to a session.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub session_id: String,
    pub file_name: String,
    pub chunks: usize,
    pub indexed: bool,
    /// Diagnostic when the document could not be read.
    pub degraded: Option<String>,
}

/// One async mutex per session. An entry lives only while some turn,
/// upload or delete holds or waits on it, so the map is bounded by the
/// number of sessions with work in flight.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, session_id: &str) -> SessionGuard<'_> {
        let lock = {
            let mut guard = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        SessionGuard {
            locks: self,
            session_id: session_id.to_owned(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held for the duration of one session operation. Dropping it releases the
/// session and removes the map entry when nobody else is waiting.
struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // Clones are only handed out under the map lock, so the count can't
        // grow while it is held.
        let mut locks = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        let idle = locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.session_id);
        }
    }
}

pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    catalog: Arc<dyn IndexCatalog>,
    reader: Arc<dyn DocumentReader>,
    pipeline: Pipeline,
    chunk_params: ChunkParams,
    locks: SessionLocks,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        catalog: Arc<dyn IndexCatalog>,
        reader: Arc<dyn DocumentReader>,
        pipeline: Pipeline,
        chunk_params: ChunkParams,
    ) -> Self {
        Self {
            store,
            catalog,
            reader,
            pipeline,
            chunk_params,
            locks: SessionLocks::default(),
        }
    }

    /// Wire up the SQLite stores and the configured providers.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let reader: Arc<dyn DocumentReader> = Arc::new(FileExtractor);

        let store = Arc::new(SqliteConversationStore::new(
            pool.clone(),
            config.pipeline.title_chars,
        ));
        let catalog = Arc::new(SqliteIndexCatalog::new(
            pool,
            embedder,
            config.embedding.batch_size,
        ));
        let pipeline = Pipeline::new(
            generator,
            reader.clone(),
            PipelineSettings::from_config(config),
        );

        Ok(Self::new(
            store,
            catalog,
            reader,
            pipeline,
            config.chunking.params()?,
        ))
    }

    /// Answer `question` in `owner`'s session, creating a session when
    /// `session_id` is `None`. The question and answer are recorded together.
    pub async fn ask(
        &self,
        owner: &str,
        session_id: Option<&str>,
        question: &str,
    ) -> Result<TurnReply> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }

        let (session_id, created) = self
            .resolve_session(owner, session_id, Some(question))
            .await?;
        let _guard = self.locks.acquire(&session_id).await;

        let category = classify(question);
        // A session created for this turn has no document yet.
        let active = if created {
            None
        } else {
            self.catalog
                .active(&IndexScope::new(owner, &session_id))
                .await?
        };
        tracing::debug!(
            session = %session_id,
            %category,
            document = active.as_ref().map(|a| a.document.file_name.as_str()),
            "turn start"
        );

        let run = self.pipeline.run(question, category, active.as_ref()).await;

        if let Err(e) = self
            .store
            .append_exchange(&session_id, question, &run.answer)
            .await
        {
            if created {
                if let Err(cleanup) = self.store.delete_session(owner, &session_id).await {
                    tracing::warn!(session = %session_id, error = %cleanup, "failed to remove empty session");
                }
            }
            return Err(e.context(format!("Failed to record turn in session {}", session_id)));
        }

        Ok(TurnReply {
            session_id,
            category,
            answer: run.answer,
            outcome: run.outcome,
            stages: run.stages,
        })
    }

    /// Attach the document at `path` to `owner`'s session, replacing any
    /// previous document and its index.
    pub async fn upload(
        &self,
        owner: &str,
        session_id: Option<&str>,
        path: &Path,
    ) -> Result<UploadReport> {
        let file_path = std::fs::canonicalize(path)
            .with_context(|| format!("File not found: {}", path.display()))?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (session_id, _) = self.resolve_session(owner, session_id, None).await?;
        let _guard = self.locks.acquire(&session_id).await;

        let reader = self.reader.clone();
        let read_path = file_path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let extension = extension_of(&read_path);
            reader.read(&read_path, &extension)
        })
        .await?;

        let (chunks, degraded) = match outcome {
            ReadOutcome::Text(text) => (chunk_text(&text, &self.chunk_params), None),
            ReadOutcome::Degraded(diagnostic) => {
                tracing::warn!(file = %file_path.display(), %diagnostic, "upload degraded");
                (Vec::new(), Some(diagnostic))
            }
        };
        let chunk_count = chunks.len();

        let scope = IndexScope::new(owner, &session_id);
        let document = DocumentRef::new(&file_name, file_path.to_string_lossy());
        self.catalog
            .replace(&scope, document, chunks)
            .await
            .with_context(|| format!("Failed to index {}", file_name))?;

        let indexed = self
            .catalog
            .active(&scope)
            .await?
            .map(|active| active.index.is_some())
            .unwrap_or(false);

        tracing::info!(session = %session_id, file = %file_name, chunks = chunk_count, indexed, "document uploaded");

        Ok(UploadReport {
            session_id,
            file_name,
            chunks: chunk_count,
            indexed,
            degraded,
        })
    }

    pub async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions(owner).await
    }

    pub async fn session(&self, session_id: &str) -> Result<ChatSession> {
        self.store
            .get_session(session_id)
            .await?
            .with_context(|| format!("Session not found: {}", session_id))
    }

    /// The document attached to a session, if any.
    pub async fn document(&self, owner: &str, session_id: &str) -> Result<Option<DocumentRef>> {
        Ok(self
            .catalog
            .active(&IndexScope::new(owner, session_id))
            .await?
            .map(|active| active.document))
    }

    pub async fn last_answer(&self, session_id: &str) -> Result<Option<String>> {
        self.store.last_answer(session_id).await
    }

    /// Delete `owner`'s session with its history and document. Waits for
    /// any in-flight turn of the session to finish first.
    pub async fn delete_session(&self, owner: &str, session_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(session_id).await;
        if !self.store.delete_session(owner, session_id).await? {
            return Ok(false);
        }
        self.catalog
            .remove(&IndexScope::new(owner, session_id))
            .await
            .with_context(|| format!("Failed to drop document of session {}", session_id))?;
        tracing::info!(session = %session_id, "session deleted");
        Ok(true)
    }

    /// The session id to use, and whether it was created by this call.
    async fn resolve_session(
        &self,
        owner: &str,
        session_id: Option<&str>,
        first_question: Option<&str>,
    ) -> Result<(String, bool)> {
        match session_id {
            Some(id) => {
                let owned = self
                    .store
                    .get_session(id)
                    .await?
                    .map(|s| s.owner == owner)
                    .unwrap_or(false);
                if !owned {
                    bail!("Session not found: {}", id);
                }
                Ok((id.to_string(), false))
            }
            None => {
                let id = self.store.create_session(owner, first_question).await?;
                tracing::info!(session = %id, owner, "session created");
                Ok((id, true))
            }
        }
    }
}
