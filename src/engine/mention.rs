//! `@identity` mention extraction

use regex::Regex;
use std::sync::LazyLock;

static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]+)").unwrap());

/// Identifiers of every `@word` token in `text`, first occurrence order,
/// without duplicates. Knows nothing about who is online.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for capture in MENTION_PATTERN.captures_iter(text) {
        let name = &capture[1];
        if !mentions.iter().any(|m| m == name) {
            mentions.push(name.to_string());
        }
    }
    mentions
}
