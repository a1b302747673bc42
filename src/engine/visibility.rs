//! Per-attendant session visibility

use crate::presence::Role;
use crate::protocol::ClientSummary;
use crate::session::{ClientEntry, Session};

/// Admins see everything; attendants see the open queue plus their own.
pub fn can_see(session: &Session, role: Role, identity: &str) -> bool {
    role.is_admin()
        || session
            .assigned_to
            .as_deref()
            .map_or(true, |owner| owner == identity)
}

/// The list one attendant is shown, most recently active first.
pub fn visible_sessions<'a>(
    entries: impl IntoIterator<Item = &'a ClientEntry>,
    role: Role,
    identity: &str,
) -> Vec<ClientSummary> {
    let mut visible: Vec<ClientSummary> = entries
        .into_iter()
        .filter(|entry| can_see(&entry.session, role, identity))
        .map(ClientEntry::summary)
        .collect();
    visible.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    visible
}
