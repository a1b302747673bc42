//! Message types for the handoff protocol

use crate::presence::Role;
use crate::session::{ClientData, Session, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from a connection (visitor or attendant) to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake with protocol version
    Hello { protocol_version: u32 },

    /// Authenticate as an attendant
    AttendantJoin { token: String },

    /// Reply to a visitor session (claims it when unowned)
    SendToSession { to_session: String, content: String },

    /// Close a session
    CloseSession { session_id: String },

    /// Post on the attendants' internal channel
    InternalMessage { content: String },

    /// Request closed conversations visible to this attendant
    FetchHistory,

    /// Bind this connection to a visitor session
    VisitorJoin { session_id: String },

    /// Visitor chat line for the attendants
    VisitorMessage { content: String },

    /// Visitor asks for a human and leaves contact details
    SubmitProfile { client_data: ClientData },

    /// Visitor question for the AI assistant
    AskAssistant { content: String },
}

impl ClientMessage {
    /// Short command name used in logs and acks
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "Hello",
            ClientMessage::AttendantJoin { .. } => "AttendantJoin",
            ClientMessage::SendToSession { .. } => "SendToSession",
            ClientMessage::CloseSession { .. } => "CloseSession",
            ClientMessage::InternalMessage { .. } => "InternalMessage",
            ClientMessage::FetchHistory => "FetchHistory",
            ClientMessage::VisitorJoin { .. } => "VisitorJoin",
            ClientMessage::VisitorMessage { .. } => "VisitorMessage",
            ClientMessage::SubmitProfile { .. } => "SubmitProfile",
            ClientMessage::AskAssistant { .. } => "AskAssistant",
        }
    }
}

/// Messages sent from server to a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect
    Welcome {
        connection_id: Uuid,
        protocol_version: u32,
    },

    /// Acknowledgment (for commands that need confirmation)
    Ack { for_command: String },

    /// Error response
    Error { message: String },

    /// Attendant authentication accepted
    Joined { identity: String, role: Role },

    // Visitor-facing
    /// A human took over the conversation
    AttendantJoined { identity: String },

    /// Attendant chat line delivered to the visitor
    #[serde(rename = "server_message")]
    AttendantReply { content: String, from: String },

    /// The conversation was closed by an attendant
    ChatClosed { message: String },

    /// AI assistant answer; `transfer_to_human` asks the visitor for a profile
    AssistantReply {
        content: String,
        transfer_to_human: bool,
    },

    // Attendant-facing
    /// Role-filtered session list, most recent activity first
    UpdateClientList { clients: Vec<ClientSummary> },

    /// Visitor chat line relayed to attendants
    #[serde(rename = "client_message")]
    VisitorMessage {
        content: String,
        from_session: String,
        from_name: String,
    },

    /// Currently connected attendants
    UpdateAttendantList { attendants: Vec<AttendantInfo> },

    /// Internal channel message
    NewInternalMessage {
        from: String,
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// Targeted notice for an `@identity` mention
    YouWereMentioned { from: String, content: String },

    /// A command on a session was rejected
    MessageError { error: String, to_session: String },

    /// Closed conversations for the history view
    ClosedSessions { sessions: Vec<Session> },
}

/// One row of an attendant's session list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub session_id: String,
    pub client_name: String,
    pub status: SessionStatus,
    pub assigned_to: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub is_online: bool,
}

/// One row of the online-attendants roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendantInfo {
    pub identity: String,
    pub role: Role,
}
