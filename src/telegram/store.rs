//! On-disk session store
//!
//! One JSON document per bot credential, `bot_<fingerprint>.session`, holds
//! the bot identity and the peers this bot has already resolved. While a
//! session is open the holder keeps an exclusive `flock` on the sibling
//! `.session.lock` file; a second opener fails to take it and reports the
//! store as busy. The kernel drops the lock when the holder exits, so a
//! crashed process never leaves the store locked.

use crate::relay::{Fingerprint, PeerHandle, PeerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Session store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another holder owns the lock
    #[error("session store {} is locked by another process", path.display())]
    Busy {
        /// Lock file path
        path: PathBuf,
    },
    /// Filesystem failure
    #[error("session store I/O error: {0}")]
    Io(#[from] io::Error),
    /// Record could not be encoded
    #[error("session record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    /// No advisory file locks on this platform
    #[error("session file locking is not supported on this platform")]
    UnsupportedPlatform,
}

/// Peer remembered from an earlier lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPeer {
    /// Addressing class at the time it was seen
    pub kind: PeerKind,
    /// When it was last confirmed
    pub seen_at: DateTime<Utc>,
}

/// Persisted per-bot state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Bot user id reported by the handshake
    pub bot_id: Option<u64>,
    /// Bot username reported by the handshake
    pub username: Option<String>,
    /// chat id -> cached peer
    #[serde(default)]
    pub peers: BTreeMap<i64, CachedPeer>,
    /// Last time the record was written
    pub updated_at: DateTime<Utc>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            bot_id: None,
            username: None,
            peers: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl SessionRecord {
    /// Record the identity returned by the handshake
    pub fn bind_bot(&mut self, bot_id: u64, username: Option<String>) {
        self.bot_id = Some(bot_id);
        self.username = username;
    }

    /// Remember a resolved peer
    pub fn remember(&mut self, peer: &PeerHandle) {
        self.peers.insert(
            peer.id,
            CachedPeer {
                kind: peer.kind,
                seen_at: Utc::now(),
            },
        );
    }

    /// Cached handle for `chat_id`
    #[must_use]
    pub fn peer(&self, chat_id: i64) -> Option<PeerHandle> {
        self.peers.get(&chat_id).map(|cached| PeerHandle {
            id: chat_id,
            kind: cached.kind,
        })
    }
}

/// Directory of session records
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record path for `fingerprint`
    #[must_use]
    pub fn session_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("bot_{}.session", fingerprint.as_str()))
    }

    /// Lock file path for `fingerprint`
    #[must_use]
    pub fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir
            .join(format!("bot_{}.session.lock", fingerprint.as_str()))
    }

    /// Take the lock (non-blocking) and load the record.
    ///
    /// # Errors
    ///
    /// `StoreError::Busy` when another open handle holds the lock,
    /// `StoreError::Io` on filesystem failures.
    pub async fn acquire(&self, fingerprint: &Fingerprint) -> Result<SessionLease, StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let lock_path = self.lock_path(fingerprint);
        let lock = FileLock::try_acquire(&lock_path)?;

        let session_path = self.session_path(fingerprint);
        // On error the lock is dropped with `lock`
        let record = load_record(&session_path).await?;

        debug!(fingerprint = fingerprint.short(), "Session store acquired");
        Ok(SessionLease {
            session_path,
            record,
            _lock: lock,
        })
    }
}

/// Exclusive `flock` on a lock file, released on drop or process exit
#[derive(Debug)]
struct FileLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
    path: PathBuf,
}

impl FileLock {
    fn try_acquire(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::fcntl::{Flock, FlockArg};

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => {
                    // Holder pid, for operators only; the lock itself is the flock
                    flock.set_len(0)?;
                    (&*flock).write_all(format!("{}\n", std::process::id()).as_bytes())?;
                    debug!(path = %path.display(), "Session lock taken");
                    Ok(Self {
                        _flock: flock,
                        path: path.to_path_buf(),
                    })
                }
                // EWOULDBLOCK and EAGAIN are the same on some platforms
                Err((_, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EAGAIN => {
                    Err(StoreError::Busy {
                        path: path.to_path_buf(),
                    })
                }
                Err((_, errno)) => Err(io::Error::other(format!("flock failed: {errno}")).into()),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = file;
            Err(StoreError::UnsupportedPlatform)
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Session lock released");
    }
}

async fn load_record(path: &Path) -> Result<SessionRecord, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SessionRecord::default()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&raw) {
        Ok(record) => Ok(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Session record unreadable, starting fresh");
            Ok(SessionRecord::default())
        }
    }
}

/// Exclusive use of one session record
///
/// Dropping the lease without [`SessionLease::release`] frees the lock but
/// does not persist changes.
#[derive(Debug)]
pub struct SessionLease {
    session_path: PathBuf,
    record: SessionRecord,
    _lock: FileLock,
}

impl SessionLease {
    /// Loaded record
    #[must_use]
    pub const fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Mutable record
    pub fn record_mut(&mut self) -> &mut SessionRecord {
        &mut self.record
    }

    /// Persist the record (temp file + rename), then free the lock.
    ///
    /// # Errors
    ///
    /// Returns the write error. The lock is freed either way.
    pub async fn release(mut self) -> Result<(), StoreError> {
        self.record.updated_at = Utc::now();
        let body = serde_json::to_vec_pretty(&self.record)?;
        let tmp = self.session_path.with_extension("session.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.session_path).await?;
        info!(
            path = %self.session_path.display(),
            peers = self.record.peers.len(),
            "Session record saved"
        );
        Ok(())
    }
}
