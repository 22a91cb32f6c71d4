//! # PersonaPlex
//!
//! Answers questions about an uploaded document. Each question is
//! classified by intent, run through a four-stage pipeline (Intake,
//! Ingestion, Generation, Refinement), and recorded with its answer in a
//! per-session conversation log.
//!
//! ## Architecture
//!
//! ```text
//! question ──▶ router ──▶ ┌──────────────────────────────────────────┐
//!                         │ Intake ▶ Ingestion ▶ Generation ▶ Refine │
//!                         └───────────────┬──────────────────────────┘
//!                                         │ retrieval (top-k chunks)
//!   upload ──▶ extract ▶ chunk ▶ embed ──▶ SQLite (sessions, turns,
//!                                          documents, chunk vectors)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite conversation store and index catalog |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, fastembed) |
//! | [`llm`] | Generation providers (Groq, OpenAI, Ollama) |
//! | [`http`] | JSON POST with retry/backoff |
//! | [`extract`] | PDF / text / CSV extraction |
//! | [`pipeline`] | Four-stage answer pipeline |
//! | [`chat`] | Per-turn entry point with per-session locking |
//!
//! Runtime-agnostic pieces (router, chunker, prompts, pipeline state, index
//! and store traits) live in `personaplex-core`.

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod sqlite_store;
