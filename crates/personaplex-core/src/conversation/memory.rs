//! In-memory [`ConversationStore`] for tests and embedded use.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{derive_title, ConversationStore, DEFAULT_TITLE_CHARS};
use crate::models::{ChatSession, Role, SessionSummary, Turn};

/// Sessions kept in creation order behind a mutex.
pub struct MemoryConversationStore {
    title_chars: usize,
    sessions: Mutex<Vec<ChatSession>>,
}

impl MemoryConversationStore {
    pub fn new(title_chars: usize) -> Self {
        Self {
            title_chars,
            sessions: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ChatSession>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow!("conversation store lock poisoned"))
    }

    fn push_turn(&self, session: &mut ChatSession, turn: Turn) {
        if session.title.is_none() && turn.role == Role::User {
            session.title = derive_title(&turn.content, self.title_chars);
        }
        session.turns.push(turn);
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE_CHARS)
    }
}

fn find_mut<'a>(sessions: &'a mut [ChatSession], id: &str) -> Result<&'a mut ChatSession> {
    sessions
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| anyhow!("session not found: {}", id))
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_session(&self, owner: &str, title: Option<&str>) -> Result<String> {
        if owner.trim().is_empty() {
            bail!("session owner must not be empty");
        }
        let session = ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            title: title.and_then(|t| derive_title(t, self.title_chars)),
            created_at: Utc::now(),
            turns: Vec::new(),
        };
        let id = session.id.clone();
        self.lock()?.push(session);
        Ok(id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.lock()?.iter().find(|s| s.id == session_id).cloned())
    }

    async fn append_turn(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        let mut sessions = self.lock()?;
        let session = find_mut(&mut sessions, session_id)?;
        self.push_turn(
            session,
            Turn {
                role,
                content: content.to_string(),
            },
        );
        Ok(())
    }

    async fn append_exchange(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        let mut sessions = self.lock()?;
        let session = find_mut(&mut sessions, session_id)?;
        self.push_turn(session, Turn::user(question));
        self.push_turn(session, Turn::assistant(answer));
        Ok(())
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.lock()?;
        let mut owned: Vec<(usize, &ChatSession)> = sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.owner == owner)
            .collect();
        owned.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(owned
            .into_iter()
            .map(|(_, s)| SessionSummary {
                id: s.id.clone(),
                title: s.display_title().to_string(),
                created_at: s.created_at,
            })
            .collect())
    }

    async fn load_session(&self, session_id: &str) -> Result<Vec<Turn>> {
        let sessions = self.lock()?;
        sessions
            .iter()
            .find(|s| s.id == session_id)
            .map(|s| s.turns.clone())
            .ok_or_else(|| anyhow!("session not found: {}", session_id))
    }

    async fn delete_session(&self, owner: &str, session_id: &str) -> Result<bool> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|s| !(s.id == session_id && s.owner == owner));
        Ok(sessions.len() != before)
    }

    async fn last_answer(&self, session_id: &str) -> Result<Option<String>> {
        let sessions = self.lock()?;
        Ok(sessions
            .iter()
            .find(|s| s.id == session_id)
            .and_then(|s| s.turns.iter().rev().find(|t| t.role == Role::Assistant))
            .map(|t| t.content.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNTITLED_SESSION;

    #[tokio::test]
    async fn test_turns_load_in_append_order() {
        let store = MemoryConversationStore::default();
        let id = store.create_session("alice", None).await.unwrap();
        for n in 0..3 {
            store
                .append_exchange(&id, &format!("q{}", n), &format!("a{}", n))
                .await
                .unwrap();
        }
        let turns = store.load_session(&id).await.unwrap();
        assert_eq!(turns.len(), 6);
        for (i, turn) in turns.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
        }
        assert_eq!(turns[4].content, "q2");
        assert_eq!(store.last_answer(&id).await.unwrap().as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_title_set_once_from_first_user_turn() {
        let store = MemoryConversationStore::new(5);
        let id = store.create_session("alice", None).await.unwrap();
        assert_eq!(store.list_sessions("alice").await.unwrap()[0].title, UNTITLED_SESSION);

        store.append_turn(&id, Role::User, "Explain chapter two").await.unwrap();
        store.append_turn(&id, Role::User, "Something else").await.unwrap();
        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("Expla"));
    }

    #[tokio::test]
    async fn test_explicit_title_is_kept() {
        let store = MemoryConversationStore::default();
        let id = store.create_session("alice", Some("Contract")).await.unwrap();
        store.append_exchange(&id, "What is the term?", "Two years.").await.unwrap();
        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.display_title(), "Contract");
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_owner_scoped() {
        let store = MemoryConversationStore::default();
        let first = store.create_session("alice", Some("first")).await.unwrap();
        let _other = store.create_session("bob", Some("bob's")).await.unwrap();
        let second = store.create_session("alice", Some("second")).await.unwrap();

        let listed = store.list_sessions("alice").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = MemoryConversationStore::default();
        let id = store.create_session("alice", None).await.unwrap();
        assert!(!store.delete_session("mallory", &id).await.unwrap());
        assert!(store.delete_session("alice", &id).await.unwrap());
        assert!(store.get_session(&id).await.unwrap().is_none());
        assert!(store.load_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_append_to_missing_session_fails() {
        let store = MemoryConversationStore::default();
        assert!(store.append_turn("nope", Role::User, "hi").await.is_err());
        assert!(store.create_session(" ", None).await.is_err());
    }
}
