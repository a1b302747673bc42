//! Per-connection handling: framing, role guard, and command forwarding

use crate::assistant::{Reply, Responder};
use crate::auth::IdentityProvider;
use crate::config::LimitsConfig;
use crate::engine::{Command, EngineHandle};
use crate::presence::{ConnectionId, Role};
use crate::protocol::{
    check_frame_len, check_version_compatibility, deserialize, frame_message, serialize,
    ClientMessage, ServerMessage, PROTOCOL_VERSION,
};
use crate::store::{ClosedFilter, SessionStore};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Longest accepted visitor session id
const MAX_SESSION_ID_LEN: usize = 128;

/// Shared collaborators every connection task needs
#[derive(Clone)]
pub struct ConnectionContext {
    pub engine: EngineHandle,
    pub store: Arc<dyn SessionStore>,
    pub identities: Arc<dyn IdentityProvider>,
    pub responder: Arc<dyn Responder>,
    pub limits: LimitsConfig,
    pub max_frame_bytes: u32,
    pub outbound_queue: usize,
}

/// What this connection has joined as. Decides which commands it may issue.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Joined {
    Nobody,
    Visitor { session_id: String },
    Attendant { identity: String, role: Role },
}

/// Live connection state owned by the reader task
pub struct ClientConnection {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
    joined: Joined,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            sender,
            joined: Joined::Nobody,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send a message straight to this connection's writer
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| anyhow!("Failed to send message to client"))
    }

    async fn send_error(&self, message: impl Into<String>) -> Result<()> {
        self.send(ServerMessage::Error {
            message: message.into(),
        })
        .await
    }

    /// Handle one decoded command.
    pub async fn process(&mut self, msg: ClientMessage, ctx: &ConnectionContext) -> Result<()> {
        tracing::debug!(connection = %self.id, command = msg.name(), "Processing command");

        match msg {
            ClientMessage::Hello { protocol_version } => {
                match check_version_compatibility(protocol_version, PROTOCOL_VERSION) {
                    Ok(()) => {
                        self.send(ServerMessage::Ack {
                            for_command: "Hello".to_string(),
                        })
                        .await
                    }
                    Err(e) => self.send_error(e.to_string()).await,
                }
            }

            ClientMessage::AttendantJoin { token } => {
                if matches!(self.joined, Joined::Visitor { .. }) {
                    tracing::debug!(connection = %self.id, "Visitor connection tried to join as attendant");
                    return Ok(());
                }
                let Some(credentials) = ctx.identities.authenticate(&token).await else {
                    tracing::warn!(connection = %self.id, "Attendant authentication failed");
                    return self.send_error("Authentication failed").await;
                };

                let open_sessions = match ctx.store.find_open().await {
                    Ok(sessions) => sessions,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not load open sessions for rehydration");
                        Vec::new()
                    }
                };

                self.joined = Joined::Attendant {
                    identity: credentials.identity.clone(),
                    role: credentials.role,
                };
                ctx.engine
                    .send(Command::AttendantJoined {
                        connection_id: self.id,
                        identity: credentials.identity,
                        role: credentials.role,
                        open_sessions,
                    })
                    .await
            }

            ClientMessage::VisitorJoin { session_id } => {
                if matches!(self.joined, Joined::Attendant { .. }) {
                    tracing::debug!(connection = %self.id, "Attendant connection sent visitor join");
                    return Ok(());
                }
                if session_id.trim().is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
                    tracing::warn!(connection = %self.id, "Dropping visitor join with invalid session id");
                    return Ok(());
                }

                let stored = match ctx.store.find_or_create(&session_id).await {
                    Ok(session) => Some(session),
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Session lookup failed");
                        None
                    }
                };

                self.joined = Joined::Visitor {
                    session_id: session_id.clone(),
                };
                ctx.engine
                    .send(Command::VisitorJoined {
                        connection_id: self.id,
                        session_id,
                        stored,
                    })
                    .await
            }

            ClientMessage::VisitorMessage { content } => match &self.joined {
                Joined::Visitor { .. } => {
                    ctx.engine
                        .send(Command::VisitorMessage {
                            connection_id: self.id,
                            content,
                        })
                        .await
                }
                Joined::Attendant { .. } => Ok(()),
                Joined::Nobody => self.send_error("Join a session first").await,
            },

            ClientMessage::SubmitProfile { client_data } => match &self.joined {
                Joined::Visitor { session_id } => {
                    ctx.engine
                        .send(Command::SubmitProfile {
                            session_id: session_id.clone(),
                            client_data,
                        })
                        .await
                }
                Joined::Attendant { .. } => Ok(()),
                Joined::Nobody => self.send_error("Join a session first").await,
            },

            ClientMessage::AskAssistant { content } => {
                let session_id = match &self.joined {
                    Joined::Visitor { session_id } => session_id.clone(),
                    Joined::Attendant { .. } => return Ok(()),
                    Joined::Nobody => return self.send_error("Join a session first").await,
                };
                self.ask_assistant(session_id, content, ctx).await
            }

            ClientMessage::SendToSession {
                to_session,
                content,
            } => {
                if !self.require_attendant().await? {
                    return Ok(());
                }
                ctx.engine
                    .send(Command::SendToSession {
                        connection_id: self.id,
                        to_session,
                        content,
                    })
                    .await
            }

            ClientMessage::CloseSession { session_id } => {
                if !self.require_attendant().await? {
                    return Ok(());
                }
                ctx.engine
                    .send(Command::CloseSession {
                        connection_id: self.id,
                        session_id,
                    })
                    .await
            }

            ClientMessage::InternalMessage { content } => {
                if !self.require_attendant().await? {
                    return Ok(());
                }
                ctx.engine
                    .send(Command::InternalMessage {
                        connection_id: self.id,
                        content,
                    })
                    .await
            }

            ClientMessage::FetchHistory => {
                let Joined::Attendant { identity, role } = &self.joined else {
                    return self.require_attendant().await.map(|_| ());
                };
                let filter = ClosedFilter::for_viewer(*role, identity, ctx.limits.history_limit);
                match ctx.store.find_closed(&filter).await {
                    Ok(sessions) => self.send(ServerMessage::ClosedSessions { sessions }).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Closed session query failed");
                        self.send_error("Could not load history").await
                    }
                }
            }
        }
    }

    /// Attendant-only commands: visitors are ignored, unjoined connections told to join.
    async fn require_attendant(&self) -> Result<bool> {
        match self.joined {
            Joined::Attendant { .. } => Ok(true),
            Joined::Visitor { .. } => {
                tracing::debug!(connection = %self.id, "Visitor connection sent attendant command");
                Ok(false)
            }
            Joined::Nobody => {
                self.send_error("Join as an attendant first").await?;
                Ok(false)
            }
        }
    }

    /// Ask the responder without holding up the engine; only this
    /// connection waits for the answer.
    async fn ask_assistant(
        &self,
        session_id: String,
        content: String,
        ctx: &ConnectionContext,
    ) -> Result<()> {
        let len = content.chars().count();
        if content.trim().is_empty() || len > ctx.limits.max_message_chars {
            tracing::warn!(session_id = %session_id, len, "Dropping malformed assistant question");
            return Ok(());
        }

        let reply = ctx.responder.generate_reply(&content, &session_id).await;
        let (answer, transfer_to_human) = match reply {
            Reply::Text(text) => (Some(text), false),
            Reply::Transfer => (None, true),
        };

        ctx.engine
            .send(Command::AssistantTurn {
                session_id,
                question: content,
                answer: answer.clone(),
            })
            .await?;

        self.send(ServerMessage::AssistantReply {
            content: answer.unwrap_or_default(),
            transfer_to_human,
        })
        .await
    }
}

/// Read a length-prefixed message from a stream
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_len: u32,
) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];

    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes);
    check_frame_len(len, max_len)?;

    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer).await?;

    Ok(Some(buffer))
}

/// Write a length-prefixed message to a stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let framed = frame_message(payload);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Task to write outgoing messages to the client
pub async fn client_writer_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut receiver: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = receiver.recv().await {
        match serialize(&msg) {
            Ok(payload) => {
                if let Err(e) = write_message(&mut writer, &payload).await {
                    tracing::error!("Failed to write message to client: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
            }
        }
    }

    tracing::debug!("Client writer task finished");
}

/// Parse a client message from bytes
pub fn parse_client_message(bytes: &[u8]) -> Result<ClientMessage> {
    deserialize(bytes)
}

/// Create a welcome message for a new connection
pub fn create_welcome_message(connection_id: ConnectionId) -> ServerMessage {
    ServerMessage::Welcome {
        connection_id,
        protocol_version: PROTOCOL_VERSION,
    }
}
