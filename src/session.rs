//! Per-user state between requests: what has been fetched and the running
//! conversation. Sessions are created, read, updated and expired explicitly
//! through a [`SessionStore`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Turns kept in a session's chat history.
pub const MAX_HISTORY_TURNS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Queries whose results were fetched and stored during this session.
    pub fetched_queries: Vec<String>,
    pub chat_history: Vec<ChatTurn>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            fetched_queries: Vec::new(),
            chat_history: Vec::new(),
        }
    }

    pub fn has_fetched(&self) -> bool {
        !self.fetched_queries.is_empty()
    }

    pub fn record_fetch(&mut self, query: &str) {
        if !self.fetched_queries.iter().any(|q| q == query) {
            self.fetched_queries.push(query.to_string());
        }
    }

    pub fn record_turn(&mut self, question: &str, answer: &str) {
        self.chat_history.push(ChatTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            asked_at: Utc::now(),
        });
        if self.chat_history.len() > MAX_HISTORY_TURNS {
            let excess = self.chat_history.len() - MAX_HISTORY_TURNS;
            self.chat_history.drain(..excess);
        }
    }

    /// The last `n` turns as (question, answer) pairs, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<(String, String)> {
        let start = self.chat_history.len().saturating_sub(n);
        self.chat_history[start..]
            .iter()
            .map(|turn| (turn.question.clone(), turn.answer.clone()))
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.chat_history.clear();
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_active > ttl
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory session registry with idle expiry.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn create(&self) -> Session {
        let session = Session::new();
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        debug!("Created session {}", session.id);
        session
    }

    /// A snapshot of the session, or `None` if it is unknown or has expired.
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .filter(|session| !session.is_expired(self.ttl, now))
            .cloned()
    }

    /// Applies `change` to a live session and marks it active. Returns the
    /// closure's result, or `None` if the session is unknown or expired.
    pub async fn update<F, T>(&self, id: Uuid, change: F) -> Option<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        if sessions.get(&id)?.is_expired(self.ttl, now) {
            sessions.remove(&id);
            return None;
        }
        let session = sessions.get_mut(&id)?;
        session.last_active = now;
        Some(change(session))
    }

    pub async fn remove(&self, id: Uuid) -> Option<Session> {
        self.sessions.write().await.remove(&id)
    }

    /// Drops every session idle for longer than the TTL. Returns how many
    /// were removed.
    pub async fn expire_stale(&self) -> usize {
        self.expire_stale_at(Utc::now()).await
    }

    pub async fn expire_stale_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Expired {} idle sessions", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new(Duration::minutes(60));
        let session = store.create().await;
        assert!(!session.has_fetched());

        store
            .update(session.id, |s| s.record_fetch("CRISPR cancer"))
            .await
            .unwrap();
        store
            .update(session.id, |s| s.record_fetch("CRISPR cancer"))
            .await
            .unwrap();
        let snapshot = store.get(session.id).await.unwrap();
        assert_eq!(snapshot.fetched_queries, vec!["CRISPR cancer"]);
        assert!(snapshot.last_active >= session.last_active);

        assert!(store.remove(session.id).await.is_some());
        assert!(store.get(session.id).await.is_none());
        assert!(store.update(session.id, |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let store = SessionStore::new(Duration::minutes(30));
        let idle = store.create().await;
        let active = store.create().await;

        let later = Utc::now() + Duration::minutes(20);
        store
            .update(active.id, |s| s.last_active = later)
            .await
            .unwrap();

        assert_eq!(store.expire_stale_at(Utc::now() + Duration::minutes(45)).await, 1);
        assert!(store.get(idle.id).await.is_none());
        assert!(store.get(active.id).await.is_some());
    }

    #[test]
    fn test_session_survives_json_snapshot() {
        let mut session = Session::new();
        session.record_fetch("BRCA1 PARP");
        session.record_turn("Which drugs?", "Olaparib.");

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains(&session.id.to_string()));

        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.last_active, session.last_active);
        assert_eq!(restored.fetched_queries, vec!["BRCA1 PARP"]);
        assert_eq!(restored.chat_history, session.chat_history);
    }

    #[test]
    fn test_history_is_bounded_and_ordered() {
        let mut session = Session::new();
        for i in 0..(MAX_HISTORY_TURNS + 5) {
            session.record_turn(&format!("q{}", i), &format!("a{}", i));
        }
        assert_eq!(session.chat_history.len(), MAX_HISTORY_TURNS);
        assert_eq!(session.chat_history[0].question, "q5");

        let recent = session.recent_history(2);
        let expected_last = MAX_HISTORY_TURNS + 4;
        assert_eq!(recent[1].0, format!("q{}", expected_last));
        assert_eq!(recent[0].0, format!("q{}", expected_last - 1));
    }
}
