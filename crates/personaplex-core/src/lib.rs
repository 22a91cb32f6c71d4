//! # PersonaPlex Core
//!
//! Runtime-agnostic logic for PersonaPlex: data models, the intent router,
//! document chunking, prompt strategies, the typed pipeline state, the
//! similarity index and retrieval contract, and the conversation store
//! abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Concrete providers (SQLite, HTTP generation/embedding backends, file
//! extraction) live in the `personaplex` application crate.

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod reader;
pub mod retrieval;
pub mod router;
pub mod state;
