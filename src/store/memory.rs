//! In-memory session store, used by default and as the test fake.

use super::{apply_assignment, apply_closed, ClosedFilter, SessionStore, StorageError, StorageResult};
use crate::session::{ChatMessage, ClientData, HistoryTurn, Session, SessionStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a record directly.
    pub async fn insert(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn modify(&self, session_id: &str, f: impl FnOnce(&mut Session)) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::not_found(session_id))?;
        f(session);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_or_create(&self, session_id: &str) -> StorageResult<Session> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .clone())
    }

    async fn upsert(&self, session: &Session) -> StorageResult<()> {
        self.insert(session.clone()).await;
        Ok(())
    }

    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> StorageResult<()> {
        self.modify(session_id, |s| s.push_message(message.clone()))
            .await
    }

    async fn append_history(&self, session_id: &str, turn: &HistoryTurn) -> StorageResult<()> {
        self.modify(session_id, |s| s.push_turn(turn.clone())).await
    }

    async fn update_profile(
        &self,
        session_id: &str,
        client_data: &ClientData,
    ) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .submit_profile(client_data.clone());
        Ok(())
    }

    async fn update_assignment(
        &self,
        session_id: &str,
        assigned_to: Option<&str>,
        status: SessionStatus,
    ) -> StorageResult<()> {
        self.modify(session_id, |s| apply_assignment(s, assigned_to, status))
            .await
    }

    async fn mark_closed(&self, session_id: &str) -> StorageResult<()> {
        self.modify(session_id, apply_closed).await
    }

    async fn find_open(&self) -> StorageResult<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect())
    }

    async fn find_closed(&self, filter: &ClosedFilter) -> StorageResult<Vec<Session>> {
        let sessions = self.sessions.read().await;
        Ok(filter.select(sessions.values().cloned()))
    }
}
