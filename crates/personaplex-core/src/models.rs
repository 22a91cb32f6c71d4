//! Core data models shared by the router, pipeline, retriever, and
//! conversation store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Title shown for a session whose first turn has not been recorded yet.
pub const UNTITLED_SESSION: &str = "New Chat";

/// A segment of document text produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within its document, starting at 0.
    pub chunk_index: i64,
    /// Chunk text. At most `chunk_size` characters.
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("unknown turn role: '{}'", other),
        }
    }
}

/// One `(role, content)` entry of a session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A full chat session with its ordered turns.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub owner: String,
    /// `None` until the session receives its first turn.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl ChatSession {
    /// Title for display, falling back to [`UNTITLED_SESSION`].
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED_SESSION)
    }
}

/// Lightweight `(id, title)` row returned by session listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Identifiers of the document attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub file_name: String,
    pub file_path: String,
}

impl DocumentRef {
    pub fn new(file_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: file_path.into(),
        }
    }
}

/// Owner/session pair a document index belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexScope {
    pub owner: String,
    pub session_id: String,
}

impl IndexScope {
    pub fn new(owner: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            session_id: session_id.into(),
        }
    }
}
