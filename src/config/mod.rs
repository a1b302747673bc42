//! Configuration management

use crate::presence::Role;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub store: StoreConfig,
    pub assistant: AssistantConfig,
    pub attendants: Vec<AttendantEntry>,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept connections on
    pub listen: String,

    /// Largest accepted inbound frame
    pub max_frame_bytes: u32,

    /// Per-connection outbound queue capacity; a full queue drops messages
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4600".to_string(),
            max_frame_bytes: crate::protocol::MAX_MESSAGE_SIZE,
            outbound_queue: 256,
        }
    }
}

/// Input limits enforced by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest chat message (visitor or attendant), in characters
    pub max_message_chars: usize,

    /// Longest internal-channel message, in characters
    pub max_internal_chars: usize,

    /// Most closed sessions returned by a history query
    pub history_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 5000,
            max_internal_chars: 2000,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Directory for the file backend
    pub dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("handoff")
                .join("sessions")
        })
    }
}

/// Built-in assistant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Phrases that make the assistant hand the visitor over to a human
    pub transfer_phrases: Vec<String>,

    /// Answer given to everything else
    pub fallback_reply: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            transfer_phrases: [
                "talk to an attendant",
                "human attendant",
                "talk to a person",
                "talk to someone",
                "consultant",
                "specialist",
                "hire you",
                "close the deal",
                "commercial proposal",
                "meeting",
                "phone",
                "whatsapp",
                "call me",
                "direct contact",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            fallback_reply: "Thanks for your message! I can answer questions about our \
                             services, or connect you with someone from our team."
                .to_string(),
        }
    }
}

/// One attendant credential: join token -> identity and role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendantEntry {
    pub token: String,
    pub identity: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Attendant
}

impl Config {
    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("handoff")
            .join("config.toml")
    }
}
