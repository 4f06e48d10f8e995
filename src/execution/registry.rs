//! The command registry boundary.
//!
//! Scheduled commands are validated against a registry of known command
//! identifiers before each run. Identifiers are namespaced as
//! `namespace:name` when the command lives in a subdirectory.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by a command registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to enumerate commands.
    #[error("failed to list commands: {0}")]
    Io(#[from] std::io::Error),
}

/// Lists the known command identifiers.
#[async_trait]
pub trait CommandRegistry: Send + Sync {
    /// Return the set of known command identifiers.
    async fn list(&self) -> Result<HashSet<String>, RegistryError>;
}

/// A registry backed by a directory of command definition files.
///
/// Every `*.md` file under the root is a command; files in subdirectories
/// are namespaced by the directory path, joined with `:`. A file at
/// `commands/git/sync.md` is the command `git:sync`.
pub struct DirectoryCommandRegistry {
    root: PathBuf,
}

impl DirectoryCommandRegistry {
    /// Create a registry over the given commands directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The commands directory this registry scans.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(dir: &Path, namespace: Option<&str>, out: &mut HashSet<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            if path.is_dir() {
                if name.starts_with('.') {
                    continue;
                }
                let nested = match namespace {
                    Some(ns) => format!("{}:{}", ns, name),
                    None => name.to_string(),
                };
                Self::scan(&path, Some(&nested), out)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                let full = match namespace {
                    Some(ns) => format!("{}:{}", ns, name),
                    None => name.to_string(),
                };
                out.insert(full);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRegistry for DirectoryCommandRegistry {
    async fn list(&self) -> Result<HashSet<String>, RegistryError> {
        // A missing commands directory just means no commands are defined.
        if !self.root.exists() {
            return Ok(HashSet::new());
        }

        let root = self.root.clone();
        let commands = tokio::task::spawn_blocking(move || {
            let mut out = HashSet::new();
            Self::scan(&root, None, &mut out).map(|_| out)
        })
        .await
        .map_err(|e| RegistryError::Io(std::io::Error::other(e)))??;

        Ok(commands)
    }
}
