//! Outbound delivery to live connections

use super::visibility::visible_sessions;
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::protocol::ServerMessage;
use crate::session::SessionCache;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Outbound queues of every live connection.
///
/// Sending never waits: a full or closed queue drops the message.
#[derive(Debug, Default)]
pub struct Dispatcher {
    outboxes: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, connection_id: ConnectionId, outbox: mpsc::Sender<ServerMessage>) {
        self.outboxes.insert(connection_id, outbox);
    }

    pub fn detach(&mut self, connection_id: ConnectionId) {
        self.outboxes.remove(&connection_id);
    }

    /// Returns whether the message was queued.
    pub fn send(&self, connection_id: ConnectionId, msg: ServerMessage) -> bool {
        let Some(outbox) = self.outboxes.get(&connection_id) else {
            tracing::debug!(connection = %connection_id, "No outbox for connection, skipping");
            return false;
        };
        match outbox.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection = %connection_id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection = %connection_id, "Connection gone, skipping");
                false
            }
        }
    }
}

/// Push every attendant its own filtered session list.
pub fn broadcast_session_list(
    presence: &PresenceRegistry,
    cache: &SessionCache,
    dispatcher: &Dispatcher,
) {
    for attendant in presence.attendants() {
        let clients = visible_sessions(cache.entries(), attendant.role, &attendant.identity);
        dispatcher.send(
            attendant.connection_id,
            ServerMessage::UpdateClientList { clients },
        );
    }
}

/// Push the online roster to every attendant connection.
pub fn broadcast_attendant_roster(presence: &PresenceRegistry, dispatcher: &Dispatcher) {
    let roster = presence.roster();
    for attendant in presence.attendants() {
        dispatcher.send(
            attendant.connection_id,
            ServerMessage::UpdateAttendantList {
                attendants: roster.clone(),
            },
        );
    }
}
