//! In-memory session cache - the authoritative view the engine mutates

use super::Session;
use crate::presence::ConnectionId;
use crate::protocol::ClientSummary;
use std::collections::HashMap;

/// A session paired with its visitor's live connection, if any
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub session: Session,
    pub connection: Option<ConnectionId>,
}

impl ClientEntry {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            connection: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connection.is_some()
    }

    /// Row shown in an attendant's session list
    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            session_id: self.session.session_id.clone(),
            client_name: self.session.display_name(),
            status: self.session.status,
            assigned_to: self.session.assigned_to.clone(),
            last_activity: self.session.updated_at,
            is_online: self.is_online(),
        }
    }
}

/// Session id -> entry map owned by the engine
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<String, ClientEntry>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<&ClientEntry> {
        self.entries.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut ClientEntry> {
        self.entries.get_mut(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    /// Insert a session unless one with the same id is already cached.
    ///
    /// The cached copy may lead the store, so it always wins.
    pub fn insert_if_absent(&mut self, session: Session) -> bool {
        if self.entries.contains_key(&session.session_id) {
            return false;
        }
        self.entries
            .insert(session.session_id.clone(), ClientEntry::new(session));
        true
    }

    pub fn remove(&mut self, session_id: &str) -> Option<ClientEntry> {
        self.entries.remove(session_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ClientEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
