//! Session persistence - the store interface and its backends
//!
//! The engine never awaits the store. Writes flow through the
//! [`WriteBehind`] queue; reads happen in connection tasks before a command
//! reaches the engine.

mod error;
mod file;
mod memory;
mod write_behind;

pub use error::{StorageError, StorageResult};
pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use write_behind::{StoreOp, WriteBehind};

use crate::config::{StoreBackend, StoreConfig};
use crate::presence::Role;
use crate::session::{ChatMessage, ClientData, HistoryTurn, Session, SessionStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Persistent session records.
///
/// Every method may fail; callers log failures and carry on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, creating a fresh `active` record when none exists.
    async fn find_or_create(&self, session_id: &str) -> StorageResult<Session>;

    /// Insert or fully replace a record.
    async fn upsert(&self, session: &Session) -> StorageResult<()>;

    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> StorageResult<()>;

    async fn append_history(&self, session_id: &str, turn: &HistoryTurn) -> StorageResult<()>;

    /// Record a hand-off profile; creates the record when missing.
    async fn update_profile(&self, session_id: &str, client_data: &ClientData)
        -> StorageResult<()>;

    async fn update_assignment(
        &self,
        session_id: &str,
        assigned_to: Option<&str>,
        status: SessionStatus,
    ) -> StorageResult<()>;

    async fn mark_closed(&self, session_id: &str) -> StorageResult<()>;

    /// Every session that is not closed, for attendant rehydration.
    async fn find_open(&self) -> StorageResult<Vec<Session>>;

    async fn find_closed(&self, filter: &ClosedFilter) -> StorageResult<Vec<Session>>;
}

/// Query for closed conversations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedFilter {
    /// Only sessions owned by this identity; `None` means all
    pub assigned_to: Option<String>,
    pub limit: usize,
}

impl ClosedFilter {
    /// Admins see every closed session, attendants only their own.
    pub fn for_viewer(role: Role, identity: &str, limit: usize) -> Self {
        Self {
            assigned_to: (!role.is_admin()).then(|| identity.to_string()),
            limit,
        }
    }

    pub fn matches(&self, session: &Session) -> bool {
        session.is_closed()
            && self
                .assigned_to
                .as_deref()
                .map_or(true, |owner| session.assigned_to.as_deref() == Some(owner))
    }

    /// Filter, order newest first, and truncate.
    pub(crate) fn select(&self, sessions: impl IntoIterator<Item = Session>) -> Vec<Session> {
        let mut selected: Vec<Session> =
            sessions.into_iter().filter(|s| self.matches(s)).collect();
        selected.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        selected.truncate(self.limit);
        selected
    }
}

/// Build the configured store backend.
pub fn open(config: &StoreConfig) -> Arc<dyn SessionStore> {
    match config.backend {
        StoreBackend::Memory => Arc::new(MemorySessionStore::new()),
        StoreBackend::File => Arc::new(FileSessionStore::new(config.dir())),
    }
}

pub(crate) fn apply_assignment(
    session: &mut Session,
    assigned_to: Option<&str>,
    status: SessionStatus,
) {
    session.assigned_to = assigned_to.map(str::to_string);
    session.status = status;
    session.touch();
}

pub(crate) fn apply_closed(session: &mut Session) {
    session.status = SessionStatus::Closed;
    session.touch();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(id: &str, owner: &str) -> Session {
        let mut session = Session::new(id);
        session.assign(owner);
        session.close(owner);
        session
    }

    #[test]
    fn test_filter_for_attendant_restricts_owner() {
        let filter = ClosedFilter::for_viewer(Role::Attendant, "bob", 10);
        assert!(filter.matches(&closed("s1", "bob")));
        assert!(!filter.matches(&closed("s2", "carol")));
        assert!(!filter.matches(&Session::new("s3")));
    }

    #[test]
    fn test_filter_for_admin_sees_all_closed() {
        let filter = ClosedFilter::for_viewer(Role::Admin, "carol", 10);
        assert!(filter.matches(&closed("s1", "bob")));
        assert!(filter.matches(&closed("s2", "carol")));
        assert!(!filter.matches(&Session::new("s3")));
    }

    #[test]
    fn test_select_orders_newest_first_and_limits() {
        let mut sessions = Vec::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut s = closed(id, "bob");
            s.updated_at = chrono::Utc::now() + chrono::Duration::seconds(i as i64);
            sessions.push(s);
        }
        let filter = ClosedFilter {
            assigned_to: None,
            limit: 2,
        };
        let ids: Vec<_> = filter
            .select(sessions)
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
