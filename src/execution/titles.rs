//! Session title assignment.
//!
//! When the executor reports the agent session id for a scheduled run, the
//! scheduler offers a human-readable title for that session to an optional
//! [`TitleAssigner`]. Assignment is best-effort; failures are swallowed by
//! the caller.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a title assigner.
#[derive(Debug, Error)]
pub enum TitleError {
    /// The backing store rejected the title.
    #[error("failed to store title: {0}")]
    Store(String),
}

/// Stores display titles for agent sessions.
#[async_trait]
pub trait TitleAssigner: Send + Sync {
    /// Assign a title to a session unless one already exists.
    async fn assign(&self, session_id: &str, title: &str) -> Result<(), TitleError>;
}

/// Format a command name into a readable title.
///
/// Separators (`_`, `-`, `:`) become spaces, camelCase words are split, and
/// every word is capitalized: `vault:dailyDigest` becomes `Vault Daily
/// Digest`.
pub fn format_command_title(command_name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for ch in command_name.chars() {
        if matches!(ch, '_' | '-' | ':') || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
