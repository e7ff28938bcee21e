//! Per-credential session locks
//!
//! The platform's local session store is single-writer, so every attempt
//! that uses a credential must hold that credential's lock from connect to
//! disconnect. Different credentials never wait on each other.

use super::credential::Fingerprint;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Process-wide fingerprint -> lock registry
///
/// The registry lock is only held to look up or insert an entry; the
/// per-fingerprint lock is awaited outside of it. Entries live for the
/// lifetime of the process.
#[derive(Default)]
pub struct SessionLocks {
    locks: RwLock<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

/// Exclusive access to one credential's session storage
pub struct CredentialGuard {
    fingerprint: Fingerprint,
    _guard: OwnedMutexGuard<()>,
}

impl CredentialGuard {
    /// Fingerprint this guard protects
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for CredentialGuard {
    fn drop(&mut self) {
        debug!(fingerprint = self.fingerprint.short(), "Session lock released");
    }
}

impl SessionLocks {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `fingerprint`
    pub async fn acquire(&self, fingerprint: &Fingerprint) -> CredentialGuard {
        let lock = self.lock_for(fingerprint).await;
        let guard = lock.lock_owned().await;
        debug!(fingerprint = fingerprint.short(), "Session lock acquired");
        CredentialGuard {
            fingerprint: fingerprint.clone(),
            _guard: guard,
        }
    }

    /// Take the lock only if nobody holds it
    pub async fn try_acquire(&self, fingerprint: &Fingerprint) -> Option<CredentialGuard> {
        let lock = self.lock_for(fingerprint).await;
        let guard = lock.try_lock_owned().ok()?;
        Some(CredentialGuard {
            fingerprint: fingerprint.clone(),
            _guard: guard,
        })
    }

    async fn lock_for(&self, fingerprint: &Fingerprint) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(fingerprint) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of fingerprints seen so far
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    /// Whether no fingerprint has been seen yet
    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}
