//! Session routing engine
//!
//! [`Engine`] owns the presence registry and the session cache and is the
//! only thing that mutates them. It runs on a single task (see [`spawn`])
//! and handles one [`Command`] at a time, so every mutation is atomic with
//! respect to every other. Store writes are queued on the write-behind queue
//! and never awaited; broadcasts happen synchronously after each change.

mod actor;
mod broadcast;
mod error;
mod mention;
mod ownership;
mod visibility;

pub use actor::{spawn, EngineHandle, COMMAND_CAPACITY};
pub use broadcast::Dispatcher;
pub use error::RouteError;
pub use mention::extract_mentions;
pub use ownership::{authorize_close, authorize_send, Claim};
pub use visibility::{can_see, visible_sessions};

use crate::config::LimitsConfig;
use crate::presence::{ConnectionId, Departed, PresenceRegistry, Role};
use crate::protocol::{ClientSummary, ServerMessage};
use crate::session::{
    ChatMessage, ClientData, HistoryTurn, Session, SessionCache, SessionStatus, TurnRole,
};
use crate::store::{StoreOp, WriteBehind};
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};

/// Notice sent to a visitor whose conversation was closed
pub const CLOSED_NOTICE: &str = "This conversation has been closed.";

/// Inbound events, in the order the engine should apply them
#[derive(Debug)]
pub enum Command {
    /// A socket opened; `outbox` feeds its writer task
    Connected {
        connection_id: ConnectionId,
        outbox: mpsc::Sender<ServerMessage>,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    /// Authenticated attendant, with the store's open sessions for rehydration
    AttendantJoined {
        connection_id: ConnectionId,
        identity: String,
        role: Role,
        open_sessions: Vec<Session>,
    },
    /// Visitor bound to a session; `stored` is the store's record if it could be read
    VisitorJoined {
        connection_id: ConnectionId,
        session_id: String,
        stored: Option<Session>,
    },
    VisitorMessage {
        connection_id: ConnectionId,
        content: String,
    },
    SubmitProfile {
        session_id: String,
        client_data: ClientData,
    },
    /// One assistant exchange; `answer` is `None` when the visitor was handed off
    AssistantTurn {
        session_id: String,
        question: String,
        answer: Option<String>,
    },
    SendToSession {
        connection_id: ConnectionId,
        to_session: String,
        content: String,
    },
    CloseSession {
        connection_id: ConnectionId,
        session_id: String,
    },
    InternalMessage {
        connection_id: ConnectionId,
        content: String,
    },
    Inspect {
        session_id: String,
        reply: oneshot::Sender<Option<Session>>,
    },
    Shutdown,
}

pub struct Engine {
    presence: PresenceRegistry,
    cache: SessionCache,
    dispatcher: Dispatcher,
    persist: WriteBehind,
    limits: LimitsConfig,
    /// Ids of sessions closed while this engine ran. Closed is terminal, so
    /// nothing may bring them back into the cache or write to them again.
    closed: HashSet<String>,
}

impl Engine {
    pub fn new(persist: WriteBehind, limits: LimitsConfig) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            cache: SessionCache::new(),
            dispatcher: Dispatcher::new(),
            persist,
            limits,
            closed: HashSet::new(),
        }
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Connected {
                connection_id,
                outbox,
            } => self.attach(connection_id, outbox),
            Command::Disconnected { connection_id } => {
                self.unregister(connection_id);
                self.dispatcher.detach(connection_id);
            }
            Command::AttendantJoined {
                connection_id,
                identity,
                role,
                open_sessions,
            } => self.register_attendant(connection_id, identity, role, open_sessions),
            Command::VisitorJoined {
                connection_id,
                session_id,
                stored,
            } => {
                self.register_visitor_connection(connection_id, &session_id, stored);
            }
            Command::VisitorMessage {
                connection_id,
                content,
            } => {
                if let Err(e) = self.visitor_message(connection_id, content) {
                    tracing::warn!(connection = %connection_id, error = %e, "Visitor message dropped");
                }
            }
            Command::SubmitProfile {
                session_id,
                client_data,
            } => self.submit_profile(&session_id, client_data),
            Command::AssistantTurn {
                session_id,
                question,
                answer,
            } => self.record_assistant_turn(&session_id, question, answer),
            Command::SendToSession {
                connection_id,
                to_session,
                content,
            } => {
                let result = self
                    .send_attendant_message(connection_id, &to_session, content)
                    .map(|_| ());
                self.report(connection_id, &to_session, result);
            }
            Command::CloseSession {
                connection_id,
                session_id,
            } => {
                let result = self.close_session(connection_id, &session_id);
                self.report(connection_id, &session_id, result);
            }
            Command::InternalMessage {
                connection_id,
                content,
            } => {
                let result = self.route_internal_message(connection_id, content).map(|_| ());
                self.report(connection_id, "", result);
            }
            Command::Inspect { session_id, reply } => {
                let _ = reply.send(self.session(&session_id).cloned());
            }
            Command::Shutdown => {}
        }
    }

    /// Register where messages for `connection_id` go.
    pub fn attach(&mut self, connection_id: ConnectionId, outbox: mpsc::Sender<ServerMessage>) {
        self.dispatcher.attach(connection_id, outbox);
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.cache.get(session_id).map(|entry| &entry.session)
    }

    pub fn is_visitor_online(&self, session_id: &str) -> bool {
        self.cache
            .get(session_id)
            .map_or(false, |entry| entry.is_online())
    }

    pub fn session_count(&self) -> usize {
        self.cache.len()
    }

    /// Register an attendant and merge the store's open sessions into the cache.
    ///
    /// Cached sessions win over stored copies since the cache may be ahead.
    pub fn register_attendant(
        &mut self,
        connection_id: ConnectionId,
        identity: String,
        role: Role,
        open_sessions: Vec<Session>,
    ) {
        let mut restored = 0;
        // The store may still show a session open while its close is queued.
        let reopenable = |s: &Session| !s.is_closed() && !self.closed.contains(&s.session_id);
        let open_sessions: Vec<Session> = open_sessions.into_iter().filter(reopenable).collect();
        for session in open_sessions {
            if self.cache.insert_if_absent(session) {
                restored += 1;
            }
        }

        tracing::info!(
            connection = %connection_id,
            identity = %identity,
            role = %role,
            restored,
            "Attendant joined"
        );
        self.presence
            .register_attendant(connection_id, identity.clone(), role);
        self.dispatcher
            .send(connection_id, ServerMessage::Joined { identity, role });

        self.broadcast_attendant_roster();
        self.broadcast_session_list();
    }

    /// Bind a visitor connection to its session, creating the session if
    /// needed. Returns false when the stored session is already closed.
    pub fn register_visitor_connection(
        &mut self,
        connection_id: ConnectionId,
        session_id: &str,
        stored: Option<Session>,
    ) -> bool {
        if self.closed.contains(session_id) {
            self.refuse_closed(connection_id, session_id);
            return false;
        }
        if !self.cache.contains(session_id) {
            let session = match stored {
                Some(session) if session.session_id == session_id => session,
                _ => {
                    let session = Session::new(session_id);
                    self.persist.enqueue(StoreOp::Upsert(session.clone()));
                    session
                }
            };
            if session.is_closed() {
                self.closed.insert(session_id.to_string());
                self.refuse_closed(connection_id, session_id);
                return false;
            }
            self.cache.insert_if_absent(session);
        }

        if let Some(previous) = self.presence.bind_visitor(connection_id, session_id) {
            if let Some(entry) = self.cache.get_mut(&previous) {
                if entry.connection == Some(connection_id) {
                    entry.connection = None;
                }
            }
        }
        if let Some(entry) = self.cache.get_mut(session_id) {
            entry.connection = Some(connection_id);
        }

        tracing::info!(
            session_id,
            connection = %connection_id,
            cached = self.session_count(),
            "Visitor connected"
        );
        self.broadcast_session_list();
        true
    }

    /// Forget a closed socket. Visitor sessions stay cached, just offline.
    pub fn unregister(&mut self, connection_id: ConnectionId) {
        match self.presence.unregister(connection_id) {
            Departed::Attendant(presence) => {
                tracing::info!(identity = %presence.identity, "Attendant disconnected");
                self.broadcast_attendant_roster();
            }
            Departed::Visitor(session_id) => {
                if let Some(entry) = self.cache.get_mut(&session_id) {
                    if entry.connection == Some(connection_id) {
                        entry.connection = None;
                    }
                }
                tracing::info!(session_id = %session_id, "Visitor disconnected (offline)");
                self.broadcast_session_list();
            }
            Departed::Unknown => {}
        }
    }

    /// Store a hand-off profile; an `active` session starts waiting for a human.
    pub fn submit_profile(&mut self, session_id: &str, client_data: ClientData) {
        if self.closed.contains(session_id) {
            tracing::warn!(session_id, "Profile for closed session ignored");
            return;
        }
        self.cache.insert_if_absent(Session::new(session_id));
        let Some(entry) = self.cache.get_mut(session_id) else {
            return;
        };
        if entry.session.is_closed() {
            tracing::warn!(session_id, "Profile for closed session ignored");
            return;
        }

        let notice = ChatMessage::system(client_data.summary());
        entry.session.submit_profile(client_data.clone());
        entry.session.push_message(notice.clone());

        self.persist.enqueue(StoreOp::UpdateProfile {
            session_id: session_id.to_string(),
            client_data,
        });
        self.persist.enqueue(StoreOp::AppendMessage {
            session_id: session_id.to_string(),
            message: notice,
        });

        tracing::info!(session_id, "Visitor requested a human");
        self.broadcast_session_list();
    }

    /// Record an assistant exchange in the session's AI history.
    pub fn record_assistant_turn(
        &mut self,
        session_id: &str,
        question: String,
        answer: Option<String>,
    ) {
        if self.closed.contains(session_id) {
            tracing::debug!(session_id, "Assistant turn for closed session not recorded");
            return;
        }
        let mut turns = vec![HistoryTurn::new(TurnRole::User, question)];
        if let Some(answer) = answer {
            turns.push(HistoryTurn::new(TurnRole::Assistant, answer));
        }

        let cached = match self.cache.get_mut(session_id) {
            Some(entry) if !entry.session.is_closed() => {
                for turn in &turns {
                    entry.session.push_turn(turn.clone());
                }
                true
            }
            _ => false,
        };

        for turn in turns {
            self.persist.enqueue(StoreOp::AppendHistory {
                session_id: session_id.to_string(),
                turn,
            });
        }
        if cached {
            self.broadcast_session_list();
        }
    }

    /// Visitor chat line: append, persist, relay to attendants who can see it.
    pub fn visitor_message(
        &mut self,
        connection_id: ConnectionId,
        content: String,
    ) -> Result<(), RouteError> {
        validate_content(&content, self.limits.max_message_chars)?;
        let session_id = self
            .presence
            .visitor_session(connection_id)
            .ok_or(RouteError::NotJoined)?
            .to_string();
        let entry = self
            .cache
            .get_mut(&session_id)
            .filter(|e| !e.session.is_closed())
            .ok_or_else(|| RouteError::UnknownSession(session_id.clone()))?;

        let message = ChatMessage::visitor(content.clone());
        entry.session.push_message(message.clone());
        self.persist.enqueue(StoreOp::AppendMessage {
            session_id: session_id.clone(),
            message,
        });

        let relay = ServerMessage::VisitorMessage {
            content,
            from_session: session_id.clone(),
            from_name: entry.session.display_name(),
        };
        for attendant in self.presence.attendants() {
            if can_see(&entry.session, attendant.role, &attendant.identity) {
                self.dispatcher.send(attendant.connection_id, relay.clone());
            }
        }

        self.broadcast_session_list();
        Ok(())
    }

    /// Attendant reply to a session, claiming or overriding ownership as the
    /// rules in [`authorize_send`] allow.
    pub fn send_attendant_message(
        &mut self,
        connection_id: ConnectionId,
        session_id: &str,
        content: String,
    ) -> Result<Claim, RouteError> {
        let attendant = self
            .presence
            .attendant(connection_id)
            .ok_or(RouteError::NotJoined)?;
        let (identity, role) = (attendant.identity.clone(), attendant.role);
        validate_content(&content, self.limits.max_message_chars)?;

        let entry = self
            .cache
            .get_mut(session_id)
            .filter(|e| !e.session.is_closed())
            .ok_or_else(|| RouteError::UnknownSession(session_id.to_string()))?;
        let claim = authorize_send(&entry.session, &identity, role)?;

        if claim.takes_ownership() {
            entry.session.assign(&identity);
            self.persist.enqueue(StoreOp::UpdateAssignment {
                session_id: session_id.to_string(),
                assigned_to: Some(identity.clone()),
                status: SessionStatus::InProgress,
            });
            match &claim {
                Claim::Override { previous } => tracing::info!(
                    session_id,
                    previous = %previous,
                    admin = %identity,
                    "Admin took over session"
                ),
                _ => tracing::info!(session_id, attendant = %identity, "Session claimed"),
            }
            if let Some(visitor) = entry.connection {
                self.dispatcher.send(
                    visitor,
                    ServerMessage::AttendantJoined {
                        identity: identity.clone(),
                    },
                );
            }
        }

        let message = ChatMessage::attendant(identity.clone(), content.clone());
        entry.session.push_message(message.clone());
        self.persist.enqueue(StoreOp::AppendMessage {
            session_id: session_id.to_string(),
            message,
        });
        if let Some(visitor) = entry.connection {
            self.dispatcher.send(
                visitor,
                ServerMessage::AttendantReply {
                    content,
                    from: identity,
                },
            );
        }

        self.broadcast_session_list();
        Ok(claim)
    }

    /// Close a session on behalf of its owner or an admin.
    pub fn close_session(
        &mut self,
        connection_id: ConnectionId,
        session_id: &str,
    ) -> Result<(), RouteError> {
        let attendant = self
            .presence
            .attendant(connection_id)
            .ok_or(RouteError::NotJoined)?;
        let (identity, role) = (attendant.identity.clone(), attendant.role);

        let entry = self
            .cache
            .get(session_id)
            .ok_or_else(|| RouteError::UnknownSession(session_id.to_string()))?;
        authorize_close(&entry.session, &identity, role)?;

        let Some(mut entry) = self.cache.remove(session_id) else {
            return Err(RouteError::UnknownSession(session_id.to_string()));
        };
        if entry.session.close(&identity) {
            self.persist.enqueue(StoreOp::UpdateAssignment {
                session_id: session_id.to_string(),
                assigned_to: Some(identity.clone()),
                status: SessionStatus::Closed,
            });
        }
        self.persist.enqueue(StoreOp::MarkClosed {
            session_id: session_id.to_string(),
        });
        self.closed.insert(session_id.to_string());
        let released = self.presence.release_session(session_id);

        if let Some(visitor) = entry.connection {
            self.dispatcher.send(
                visitor,
                ServerMessage::ChatClosed {
                    message: CLOSED_NOTICE.to_string(),
                },
            );
        }

        tracing::info!(
            session_id,
            attendant = %identity,
            released = released.len(),
            "Session closed"
        );
        self.broadcast_session_list();
        Ok(())
    }

    /// Internal channel message from a joined attendant connection.
    /// Returns how many mention notices were sent.
    pub fn route_internal_message(
        &mut self,
        connection_id: ConnectionId,
        content: String,
    ) -> Result<usize, RouteError> {
        let sender = self
            .presence
            .attendant(connection_id)
            .ok_or(RouteError::NotJoined)?
            .identity
            .clone();
        validate_content(&content, self.limits.max_internal_chars)?;
        Ok(self.route_internal(&sender, &content))
    }

    /// Deliver an internal message to every attendant and a mention notice to
    /// each online attendant named with `@identity` (other than the sender).
    pub fn route_internal(&self, sender: &str, content: &str) -> usize {
        let mentioned = extract_mentions(content);
        let mut notified = 0;

        for attendant in self.presence.attendants() {
            if attendant.identity != sender && mentioned.iter().any(|m| *m == attendant.identity)
            {
                let delivered = self.dispatcher.send(
                    attendant.connection_id,
                    ServerMessage::YouWereMentioned {
                        from: sender.to_string(),
                        content: content.to_string(),
                    },
                );
                if delivered {
                    notified += 1;
                }
            }
        }

        let payload = ServerMessage::NewInternalMessage {
            from: sender.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        for attendant in self.presence.attendants() {
            self.dispatcher
                .send(attendant.connection_id, payload.clone());
        }

        notified
    }

    /// Sessions `identity` may see under `role`, most recent first.
    pub fn visible_sessions(&self, role: Role, identity: &str) -> Vec<ClientSummary> {
        visible_sessions(self.cache.entries(), role, identity)
    }

    pub fn broadcast_session_list(&self) {
        broadcast::broadcast_session_list(&self.presence, &self.cache, &self.dispatcher);
    }

    pub fn broadcast_attendant_roster(&self) {
        broadcast::broadcast_attendant_roster(&self.presence, &self.dispatcher);
    }

    /// Tell a visitor its session is over without binding the connection.
    fn refuse_closed(&self, connection_id: ConnectionId, session_id: &str) {
        tracing::info!(session_id, connection = %connection_id, "Visitor rejoined a closed session");
        self.dispatcher.send(
            connection_id,
            ServerMessage::ChatClosed {
                message: CLOSED_NOTICE.to_string(),
            },
        );
    }

    fn report(&self, connection_id: ConnectionId, to_session: &str, result: Result<(), RouteError>) {
        let Err(error) = result else {
            return;
        };
        if error.is_reported() {
            tracing::warn!(connection = %connection_id, error = %error, "Command rejected");
            self.dispatcher.send(
                connection_id,
                ServerMessage::MessageError {
                    error: error.to_string(),
                    to_session: to_session.to_string(),
                },
            );
        } else if let RouteError::Malformed(reason) = &error {
            tracing::warn!(connection = %connection_id, reason = %reason, "Dropping malformed input");
        } else {
            tracing::debug!(connection = %connection_id, error = %error, "Ignoring command");
        }
    }
}

fn validate_content(content: &str, max_chars: usize) -> Result<(), RouteError> {
    if content.trim().is_empty() {
        return Err(RouteError::Malformed("empty content".to_string()));
    }
    let len = content.chars().count();
    if len > max_chars {
        return Err(RouteError::Malformed(format!(
            "{} characters exceeds limit of {}",
            len, max_chars
        )));
    }
    Ok(())
}
