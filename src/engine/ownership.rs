//! Ownership rules: who may reply to or close a session

use super::RouteError;
use crate::presence::Role;
use crate::session::Session;

/// How an accepted reply relates to the session's ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Session was unowned; the sender now owns it
    Claimed,
    /// Sender already owned it
    Owned,
    /// An admin took it from `previous`
    Override { previous: String },
}

impl Claim {
    pub fn takes_ownership(&self) -> bool {
        !matches!(self, Claim::Owned)
    }
}

/// Decide whether `identity` may reply to `session`.
///
/// First reply claims an unowned session; after that only the owner may
/// reply, except that any admin may take the session over.
pub fn authorize_send(session: &Session, identity: &str, role: Role) -> Result<Claim, RouteError> {
    match session.assigned_to.as_deref() {
        None => Ok(Claim::Claimed),
        Some(owner) if owner == identity => Ok(Claim::Owned),
        Some(owner) if role.is_admin() => Ok(Claim::Override {
            previous: owner.to_string(),
        }),
        Some(owner) => Err(RouteError::OwnershipConflict {
            session_id: session.session_id.clone(),
            owner: owner.to_string(),
        }),
    }
}

/// Only the owner or an admin may close a session.
pub fn authorize_close(session: &Session, identity: &str, role: Role) -> Result<(), RouteError> {
    if role.is_admin() || session.assigned_to.as_deref() == Some(identity) {
        Ok(())
    } else {
        Err(RouteError::CloseNotPermitted {
            session_id: session.session_id.clone(),
        })
    }
}
