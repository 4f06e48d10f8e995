//! Vault-wide mutual exclusion.
//!
//! The vault lock serializes every operation that mutates the vault, not
//! just scheduled jobs. It is constructed once by the embedding application
//! and cloned into each consumer; the scheduler never owns the only handle.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard proving the vault lock is held. Released on drop.
pub type VaultLockGuard = OwnedMutexGuard<()>;

/// A clonable handle to the vault-wide lock.
#[derive(Clone, Default)]
pub struct VaultLock {
    inner: Arc<Mutex<()>>,
}

impl VaultLock {
    /// Create a new, unheld vault lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, waiting until it is available.
    pub async fn acquire(&self) -> VaultLockGuard {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// Try to acquire the lock without waiting.
    pub fn try_acquire(&self) -> Option<VaultLockGuard> {
        Arc::clone(&self.inner).try_lock_owned().ok()
    }
}

impl std::fmt::Debug for VaultLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultLock").finish()
    }
}
