//! Conversation store abstraction.
//!
//! The store is the only durable authority for chat sessions. Logs are
//! append-only: turns are never edited or reordered, and a session's title
//! is fixed once set. The only removal is [`ConversationStore::delete_session`],
//! which discards a whole session at once.
//!
//! | Implementation | Crate |
//! |----------------|-------|
//! | [`memory::MemoryConversationStore`] | core (tests, embedded use) |
//! | `SqliteConversationStore` | `personaplex` app crate |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChatSession, Role, SessionSummary, Turn};
use crate::state::truncate_chars;

/// Default length of a title derived from the first user turn.
pub const DEFAULT_TITLE_CHARS: usize = 60;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a session for `owner` and return its id.
    ///
    /// With `title == None` the session stays untitled until its first user
    /// turn is appended.
    async fn create_session(&self, owner: &str, title: Option<&str>) -> Result<String>;

    /// Session metadata and turns, or `None` if it does not exist.
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>>;

    /// Append one turn. Fails if the session does not exist.
    async fn append_turn(&self, session_id: &str, role: Role, content: &str) -> Result<()>;

    /// Append a user turn and its assistant answer as one atomic write.
    async fn append_exchange(&self, session_id: &str, question: &str, answer: &str) -> Result<()>;

    /// `owner`'s sessions, newest first.
    async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>>;

    /// Turns of a session in append order. Fails if the session does not
    /// exist.
    async fn load_session(&self, session_id: &str) -> Result<Vec<Turn>>;

    /// Delete `owner`'s session and everything attached to it. Returns
    /// `false` when there was nothing to delete.
    async fn delete_session(&self, owner: &str, session_id: &str) -> Result<bool>;

    /// Content of the latest assistant turn.
    async fn last_answer(&self, session_id: &str) -> Result<Option<String>>;
}

/// Title derived from a user turn: the first `max_chars` characters of the
/// trimmed text, or `None` if nothing remains.
pub fn derive_title(text: &str, max_chars: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || max_chars == 0 {
        return None;
    }
    Some(truncate_chars(trimmed, max_chars).trim_end().to_string())
}
