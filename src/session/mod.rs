//! Session records - one visitor's conversation across AI and human phases

mod cache;

pub use cache::{ClientEntry, SessionCache};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// Transitions only move forward: `Active -> WaitingHuman -> InProgress -> Closed`,
/// with `Active -> InProgress` allowed when an attendant replies before any
/// profile was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    WaitingHuman,
    InProgress,
    Closed,
}

impl SessionStatus {
    /// Statuses in which a session has no owner.
    pub fn is_unowned(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::WaitingHuman)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionStatus::Closed)
    }
}

/// Author of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    Visitor,
    Attendant,
    System,
}

/// One entry of the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: MessageSender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attendant_name: Option<String>,
}

impl ChatMessage {
    pub fn visitor(content: impl Into<String>) -> Self {
        Self {
            sender: MessageSender::Visitor,
            content: content.into(),
            timestamp: Utc::now(),
            attendant_name: None,
        }
    }

    pub fn attendant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: MessageSender::Attendant,
            content: content.into(),
            timestamp: Utc::now(),
            attendant_name: Some(name.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            sender: MessageSender::System,
            content: content.into(),
            timestamp: Utc::now(),
            attendant_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One AI exchange turn, kept apart from the human transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Hand-off profile submitted by a visitor who asked for a human.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientData {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub project: Option<String>,
    pub urgency: Option<String>,
    pub message: Option<String>,
    pub referral: Option<String>,
    /// Seconds spent on the page before opening the chat
    pub time_on_page: Option<u64>,
}

impl ClientData {
    /// Transcript line announcing the profile to attendants.
    pub fn summary(&self) -> String {
        fn or<'a>(value: &'a Option<String>, missing: &'a str) -> &'a str {
            value.as_deref().filter(|v| !v.is_empty()).unwrap_or(missing)
        }

        format!(
            "New client profile:\nName: {}\nE-mail: {}\nPhone: {}\nProject: {}\nUrgency: {}\nMessage: {}",
            or(&self.name, "-"),
            or(&self.email, "-"),
            or(&self.phone, "-"),
            or(&self.project, "Not provided"),
            or(&self.urgency, "Not provided"),
            or(&self.message, "No additional message"),
        )
    }
}

/// A visitor's conversation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub client_data: Option<ClientData>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    pub status: SessionStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh `active` session with no profile.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            client_data: None,
            messages: Vec::new(),
            history: Vec::new(),
            status: SessionStatus::Active,
            assigned_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Placeholder name shown until the visitor submits a profile.
    pub fn default_name(session_id: &str) -> String {
        let tag = session_id.get(8..12).unwrap_or(session_id);
        format!("Visitor {}", tag)
    }

    pub fn display_name(&self) -> String {
        self.client_data
            .as_ref()
            .and_then(|data| data.name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| Self::default_name(&self.session_id))
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn push_turn(&mut self, turn: HistoryTurn) {
        self.history.push(turn);
        self.touch();
    }

    /// Hand ownership to `identity`, returning the previous owner.
    pub fn assign(&mut self, identity: &str) -> Option<String> {
        let previous = self.assigned_to.replace(identity.to_string());
        self.status = SessionStatus::InProgress;
        self.touch();
        previous
    }

    /// Store the hand-off profile. Only an `active` session moves to `waiting_human`.
    pub fn submit_profile(&mut self, client_data: ClientData) {
        self.client_data = Some(client_data);
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::WaitingHuman;
        }
        self.touch();
    }

    /// Close the session. An unowned session is attributed to whoever closes it.
    /// Returns true when that attribution happened.
    pub fn close(&mut self, closed_by: &str) -> bool {
        let attributed = self.assigned_to.is_none();
        if attributed {
            self.assigned_to = Some(closed_by.to_string());
        }
        self.status = SessionStatus::Closed;
        self.touch();
        attributed
    }

    /// `assigned_to` is unset exactly when the status is unowned.
    pub fn ownership_consistent(&self) -> bool {
        self.assigned_to.is_none() == self.status.is_unowned()
    }
}
