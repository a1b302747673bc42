//! AI auto-responder seam
//!
//! The real generator is an external collaborator. [`KeywordResponder`]
//! covers the hand-off detection and gives a canned answer otherwise.

use crate::config::AssistantConfig;
use async_trait::async_trait;

/// Outcome of asking the assistant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// The visitor should be handed over to a human
    Transfer,
}

#[async_trait]
pub trait Responder: Send + Sync {
    /// Never fails; an unavailable generator answers with an apology.
    async fn generate_reply(&self, text: &str, session_id: &str) -> Reply;
}

#[derive(Debug, Clone)]
pub struct KeywordResponder {
    phrases: Vec<String>,
    fallback: String,
}

impl KeywordResponder {
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            phrases: config
                .transfer_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            fallback: config.fallback_reply.clone(),
        }
    }

    pub fn wants_human(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }
}

#[async_trait]
impl Responder for KeywordResponder {
    async fn generate_reply(&self, text: &str, _session_id: &str) -> Reply {
        if self.wants_human(text) {
            Reply::Transfer
        } else {
            Reply::Text(self.fallback.clone())
        }
    }
}
