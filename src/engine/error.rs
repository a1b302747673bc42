use thiserror::Error;

/// Why the engine refused an inbound command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("This chat is already being handled by {owner}")]
    OwnershipConflict { session_id: String, owner: String },

    #[error("Session not found: {0}")]
    UnknownSession(String),

    #[error("You are not allowed to close this chat")]
    CloseNotPermitted { session_id: String },

    /// The connection has not joined in the role the command needs.
    #[error("Connection has not joined")]
    NotJoined,

    /// Empty or oversized content. Dropped without telling the sender.
    #[error("Malformed input: {0}")]
    Malformed(String),
}

impl RouteError {
    /// Whether the initiating connection gets a `message_error`.
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            RouteError::OwnershipConflict { .. }
                | RouteError::UnknownSession(_)
                | RouteError::CloseNotPermitted { .. }
        )
    }
}
