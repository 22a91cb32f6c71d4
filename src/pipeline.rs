//! The four-stage answer pipeline.
//!
//! ```text
//! Intake ──▶ Ingestion ──▶ Generation ──▶ Refinement
//! ```
//!
//! Stages run in that order exactly once per turn, each taking the
//! [`PipelineState`] by value and returning the next one. Generation asks
//! the session's index (if any) for context, builds the prompt chosen by the
//! turn's [`Category`], and calls the [`Generator`]; Refinement calls it
//! again to clean the draft into plain text.
//!
//! Failures are contained per turn:
//! - an unreadable document degrades to a diagnostic in `file_content`;
//! - a retrieval error or timeout falls back to `file_content`;
//! - a generation error or timeout ends the turn with an
//!   `Agent error: …` answer and [`TurnOutcome::Failed`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use personaplex_core::generation::Generator;
use personaplex_core::index::{ActiveDocument, SimilarityIndex};
use personaplex_core::prompt::{GenerationInput, PromptBuilder};
use personaplex_core::reader::{extension_of, DocumentReader, ReadOutcome};
use personaplex_core::retrieval::{retrieve, RetrievalError};
use personaplex_core::router::Category;
use personaplex_core::state::PipelineState;

use crate::config::Config;

/// Prefix of the answer recorded when a turn fails.
pub const AGENT_ERROR_PREFIX: &str = "Agent error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intake,
    Ingestion,
    Generation,
    Refinement,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Intake,
        Stage::Ingestion,
        Stage::Generation,
        Stage::Refinement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Ingestion => "ingestion",
            Stage::Generation => "generation",
            Stage::Refinement => "refinement",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation call that ended the turn.
#[derive(Debug, Clone, Error)]
pub enum GenerationFailure {
    #[error("{stage} timed out after {timeout:?}")]
    Timeout { stage: Stage, timeout: Duration },
    #[error("{stage} failed: {message}")]
    Backend { stage: Stage, message: String },
}

impl GenerationFailure {
    pub fn stage(&self) -> Stage {
        match self {
            GenerationFailure::Timeout { stage, .. } | GenerationFailure::Backend { stage, .. } => {
                *stage
            }
        }
    }
}

/// How a turn ended. Either way the turn produces exactly one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TurnOutcome {
    Answered,
    Failed { reason: String },
}

impl TurnOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, TurnOutcome::Answered)
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub answer: String,
    pub outcome: TurnOutcome,
    /// Stages that ran, in order.
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
    pub timeout_retries: u32,
    pub max_file_chars: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            retrieval_timeout: Duration::from_secs(config.retrieval.timeout_secs),
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
            timeout_retries: config.generation.timeout_retries,
            max_file_chars: config.pipeline.max_file_chars,
        }
    }
}

pub struct Pipeline {
    generator: Arc<dyn Generator>,
    reader: Arc<dyn DocumentReader>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn Generator>,
        reader: Arc<dyn DocumentReader>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            generator,
            reader,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run all four stages for `task`.
    ///
    /// Never returns an error: generation failures become a
    /// [`TurnOutcome::Failed`] run whose answer starts with
    /// [`AGENT_ERROR_PREFIX`].
    pub async fn run(
        &self,
        task: &str,
        category: Category,
        document: Option<&ActiveDocument>,
    ) -> PipelineRun {
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let mut state = PipelineState::new(task, category)
            .with_max_file_chars(self.settings.max_file_chars);
        if let Some(active) = document {
            state = state.with_document(&active.document);
        }
        let index = document.and_then(|active| active.index.clone());

        stages.push(Stage::Intake);
        let state = self.intake(state);

        stages.push(Stage::Ingestion);
        let state = self.ingestion(state).await;

        stages.push(Stage::Generation);
        let state = match self.generation(state.clone(), index.as_deref()).await {
            Ok(next) => next,
            Err(failure) => return failed(state, failure, stages),
        };

        stages.push(Stage::Refinement);
        let state = match self.refinement(state.clone()).await {
            Ok(next) => next,
            Err(failure) => return failed(state, failure, stages),
        };

        let answer = state.last_message().unwrap_or_default().to_string();
        PipelineRun {
            state,
            answer,
            outcome: TurnOutcome::Answered,
            stages,
        }
    }

    fn intake(&self, state: PipelineState) -> PipelineState {
        tracing::debug!(stage = %Stage::Intake, category = %state.category(), "stage start");
        state.reset()
    }

    async fn ingestion(&self, state: PipelineState) -> PipelineState {
        tracing::debug!(stage = %Stage::Ingestion, file = state.file_name(), "stage start");
        if !state.has_document() {
            return state.with_file_content("");
        }

        let path = PathBuf::from(state.file_path());
        let extension = extension_of(&path);
        let reader = self.reader.clone();
        let outcome = tokio::task::spawn_blocking(move || reader.read(&path, &extension))
            .await
            .unwrap_or_else(|e| ReadOutcome::Degraded(format!("File reading error: {}", e)));

        if let ReadOutcome::Degraded(diagnostic) = &outcome {
            tracing::warn!(file = state.file_path(), %diagnostic, "document ingestion degraded");
        }
        state.with_file_content(&outcome.into_content())
    }

    async fn generation(
        &self,
        state: PipelineState,
        index: Option<&dyn SimilarityIndex>,
    ) -> Result<PipelineState, GenerationFailure> {
        tracing::debug!(stage = %Stage::Generation, "stage start");
        let context = self.context(&state, index).await;
        let material = if context.is_empty() {
            state.file_content()
        } else {
            context.as_str()
        };

        let prompt = PromptBuilder::generation(&GenerationInput {
            category: state.category(),
            task: state.task(),
            file_name: state.file_name(),
            material,
        });
        let draft = self.call(Stage::Generation, &prompt).await?;
        Ok(state.with_message(draft))
    }

    async fn refinement(&self, state: PipelineState) -> Result<PipelineState, GenerationFailure> {
        tracing::debug!(stage = %Stage::Refinement, "stage start");
        let draft = state.last_message().ok_or_else(|| GenerationFailure::Backend {
            stage: Stage::Refinement,
            message: "no draft answer to refine".to_string(),
        })?;

        let prompt = PromptBuilder::refinement(draft);
        let cleaned = self.call(Stage::Refinement, &prompt).await?;
        Ok(state.with_message(cleaned))
    }

    /// Retrieved context for the turn, or `""` to fall back to the document
    /// text.
    async fn context(&self, state: &PipelineState, index: Option<&dyn SimilarityIndex>) -> String {
        if index.is_none() {
            tracing::debug!("no index for session, using document text");
            return String::new();
        }

        let result = tokio::time::timeout(
            self.settings.retrieval_timeout,
            retrieve(index, state.task(), self.settings.top_k),
        )
        .await
        .unwrap_or(Err(RetrievalError::Timeout(self.settings.retrieval_timeout)));

        match result {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, using document text");
                String::new()
            }
        }
    }

    /// One generator call under the configured timeout, re-attempted after
    /// a timeout up to `timeout_retries` times.
    async fn call(&self, stage: Stage, prompt: &str) -> Result<String, GenerationFailure> {
        let timeout = self.settings.generation_timeout;
        let attempts = self.settings.timeout_retries + 1;

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, self.generator.generate(prompt)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => {
                    return Err(GenerationFailure::Backend {
                        stage,
                        message: format!("{:#}", e),
                    })
                }
                Err(_) => {
                    tracing::warn!(%stage, attempt, ?timeout, generator = self.generator.name(), "generation timed out");
                }
            }
        }

        Err(GenerationFailure::Timeout { stage, timeout })
    }
}

fn failed(state: PipelineState, failure: GenerationFailure, stages: Vec<Stage>) -> PipelineRun {
    tracing::error!(stage = %failure.stage(), error = %failure, "turn failed");
    PipelineRun {
        state,
        answer: format!("{}{}", AGENT_ERROR_PREFIX, failure),
        outcome: TurnOutcome::Failed {
            reason: failure.to_string(),
        },
        stages,
    }
}
