//! Presence registry - who is connected right now
//!
//! Tracks attendant connections (connection id -> identity and role) and
//! visitor connections (connection id -> session id). Holds membership only;
//! the engine decides what membership changes mean.

use crate::protocol::AttendantInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of one live socket
pub type ConnectionId = Uuid;

/// Attendant privilege level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Attendant,
    Admin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Attendant => write!(f, "attendant"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// A connected attendant. Lives only as long as its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendantPresence {
    pub identity: String,
    pub role: Role,
    pub connection_id: ConnectionId,
}

/// What a disconnecting connection turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departed {
    Attendant(AttendantPresence),
    Visitor(String),
    Unknown,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    attendants: HashMap<ConnectionId, AttendantPresence>,
    visitors: HashMap<ConnectionId, String>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attendant connection, replacing any stale entry for it.
    pub fn register_attendant(
        &mut self,
        connection_id: ConnectionId,
        identity: impl Into<String>,
        role: Role,
    ) {
        self.visitors.remove(&connection_id);
        self.attendants.insert(
            connection_id,
            AttendantPresence {
                identity: identity.into(),
                role,
                connection_id,
            },
        );
    }

    /// Bind a visitor connection to a session, returning the session it was
    /// previously bound to (if it differs).
    pub fn bind_visitor(
        &mut self,
        connection_id: ConnectionId,
        session_id: impl Into<String>,
    ) -> Option<String> {
        let session_id = session_id.into();
        self.attendants.remove(&connection_id);
        self.visitors
            .insert(connection_id, session_id.clone())
            .filter(|previous| *previous != session_id)
    }

    pub fn unregister(&mut self, connection_id: ConnectionId) -> Departed {
        if let Some(presence) = self.attendants.remove(&connection_id) {
            return Departed::Attendant(presence);
        }
        match self.visitors.remove(&connection_id) {
            Some(session_id) => Departed::Visitor(session_id),
            None => Departed::Unknown,
        }
    }

    pub fn attendant(&self, connection_id: ConnectionId) -> Option<&AttendantPresence> {
        self.attendants.get(&connection_id)
    }

    pub fn visitor_session(&self, connection_id: ConnectionId) -> Option<&str> {
        self.visitors.get(&connection_id).map(String::as_str)
    }

    pub fn attendants(&self) -> impl Iterator<Item = &AttendantPresence> {
        self.attendants.values()
    }

    /// Online attendants, one row per connection, ordered by identity.
    pub fn roster(&self) -> Vec<AttendantInfo> {
        let mut roster: Vec<AttendantInfo> = self
            .attendants
            .values()
            .map(|a| AttendantInfo {
                identity: a.identity.clone(),
                role: a.role,
            })
            .collect();
        roster.sort_by(|a, b| a.identity.cmp(&b.identity));
        roster
    }

    /// Drop every visitor binding to `session_id`, returning the freed connections.
    pub fn release_session(&mut self, session_id: &str) -> Vec<ConnectionId> {
        let released: Vec<ConnectionId> = self
            .visitors
            .iter()
            .filter(|(_, bound)| bound.as_str() == session_id)
            .map(|(conn, _)| *conn)
            .collect();
        for conn in &released {
            self.visitors.remove(conn);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_attendant_is_idempotent() {
        let mut registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();

        registry.register_attendant(conn, "bob", Role::Attendant);
        registry.register_attendant(conn, "bob", Role::Admin);

        assert_eq!(registry.attendants().count(), 1);
        assert_eq!(registry.attendant(conn).map(|a| a.role), Some(Role::Admin));
    }

    #[test]
    fn test_unregister_reports_kind() {
        let mut registry = PresenceRegistry::new();
        let attendant = Uuid::new_v4();
        let visitor = Uuid::new_v4();

        registry.register_attendant(attendant, "bob", Role::Attendant);
        registry.bind_visitor(visitor, "s1");

        assert!(matches!(
            registry.unregister(attendant),
            Departed::Attendant(p) if p.identity == "bob"
        ));
        assert_eq!(registry.unregister(visitor), Departed::Visitor("s1".into()));
        assert_eq!(registry.unregister(visitor), Departed::Unknown);
        assert_eq!(registry.attendants().count(), 0);
    }

    #[test]
    fn test_rebinding_visitor_reports_previous_session() {
        let mut registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();

        assert_eq!(registry.bind_visitor(conn, "s1"), None);
        assert_eq!(registry.bind_visitor(conn, "s1"), None);
        assert_eq!(registry.bind_visitor(conn, "s2"), Some("s1".into()));
        assert_eq!(registry.visitor_session(conn), Some("s2"));
    }

    #[test]
    fn test_release_session_frees_every_binding() {
        let mut registry = PresenceRegistry::new();
        let (old, new, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        registry.bind_visitor(old, "s1");
        registry.bind_visitor(new, "s1");
        registry.bind_visitor(other, "s2");

        let mut released = registry.release_session("s1");
        released.sort();
        let mut expected = vec![old, new];
        expected.sort();
        assert_eq!(released, expected);
        assert_eq!(registry.visitor_session(new), None);
        assert_eq!(registry.visitor_session(other), Some("s2"));
    }

    #[test]
    fn test_roster_is_sorted() {
        let mut registry = PresenceRegistry::new();
        registry.register_attendant(Uuid::new_v4(), "carol", Role::Admin);
        registry.register_attendant(Uuid::new_v4(), "alice", Role::Attendant);

        let names: Vec<_> = registry.roster().into_iter().map(|a| a.identity).collect();
        assert_eq!(names, vec!["alice", "carol"]);
    }
}
