//! Attendant identity resolution
//!
//! The engine trusts whatever identity and role the provider returns at join
//! time and never re-checks them per message.

use crate::config::AttendantEntry;
use crate::presence::Role;
use async_trait::async_trait;
use std::collections::HashMap;

/// Identity and role of an authenticated attendant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub role: Role,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a join token, or `None` when it is not recognised.
    async fn authenticate(&self, token: &str) -> Option<Credentials>;
}

/// Fixed token table loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Credentials>,
}

impl TokenTable {
    pub fn new(entries: &[AttendantEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Credentials {
                        identity: entry.identity.clone(),
                        role: entry.role,
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn with_token(mut self, token: &str, identity: &str, role: Role) -> Self {
        self.tokens.insert(
            token.to_string(),
            Credentials {
                identity: identity.to_string(),
                role,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for TokenTable {
    async fn authenticate(&self, token: &str) -> Option<Credentials> {
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_table_resolves_configured_entries() {
        let table = TokenTable::new(&[AttendantEntry {
            token: "t-bob".into(),
            identity: "bob".into(),
            role: Role::Attendant,
        }])
        .with_token("t-carol", "carol", Role::Admin);

        let bob = table.authenticate("t-bob").await.unwrap();
        assert_eq!(bob.identity, "bob");
        assert_eq!(bob.role, Role::Attendant);

        let carol = table.authenticate("t-carol").await.unwrap();
        assert_eq!(carol.role, Role::Admin);

        assert!(table.authenticate("wrong").await.is_none());
        assert!(table.authenticate("").await.is_none());
    }
}
