//! Connection sessions
//!
//! A [`Connector`] authenticates one credential and hands back a
//! [`PlatformSession`]. The pipeline opens a session inside the held
//! credential lock and closes it before releasing the lock, on every path.

use super::credential::Credential;
use super::dispatcher::OutgoingDocument;
use super::error::PlatformError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Smallest marked id used by Telegram for supergroups and channels
const MAX_MARKED_CHANNEL_ID: i64 = -1_000_000_000_000;

/// Class of a destination, derived from its marked chat id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// Private chat with a user
    User,
    /// Basic group. This addressing form is refused once the group has been
    /// upgraded, so it is never trusted as a resolved address.
    LegacyGroup,
    /// Supergroup or channel
    Channel,
}

impl PeerKind {
    /// Classify a marked chat id
    #[must_use]
    pub const fn from_chat_id(id: i64) -> Self {
        if id > 0 {
            Self::User
        } else if id <= MAX_MARKED_CHANNEL_ID {
            Self::Channel
        } else {
            Self::LegacyGroup
        }
    }

    /// Whether this is the legacy addressing form
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::LegacyGroup)
    }
}

/// Destination as the platform knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Marked chat id
    pub id: i64,
    /// Addressing class
    pub kind: PeerKind,
}

impl PeerHandle {
    /// Handle for a bare id, kind derived from the id itself
    #[must_use]
    pub const fn from_id(id: i64) -> Self {
        Self {
            id,
            kind: PeerKind::from_chat_id(id),
        }
    }
}

/// What the send call is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A resolved platform handle
    Peer(PeerHandle),
    /// The caller's identifier, used as-is
    Raw(i64),
}

impl Address {
    /// Chat id the address points at
    #[must_use]
    pub const fn chat_id(&self) -> i64 {
        match self {
            Self::Peer(peer) => peer.id,
            Self::Raw(id) => *id,
        }
    }
}

/// Authenticates credentials against the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run the authentication handshake for `credential`.
    ///
    /// `PlatformError::StorageBusy` means the credential's local session
    /// store is held elsewhere.
    async fn open(&self, credential: &Credential)
        -> Result<Box<dyn PlatformSession>, PlatformError>;
}

/// One authenticated connection for one credential
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Full entity lookup by raw id
    async fn lookup_entity(&self, chat_id: i64) -> Result<PeerHandle, PlatformError>;

    /// Lightweight lookup among addresses this session already knows
    async fn lookup_input_address(&self, chat_id: i64)
        -> Result<Option<PeerHandle>, PlatformError>;

    /// Send a minimal silent message so the platform learns the chat
    async fn send_probe(&self, chat_id: i64) -> Result<(), PlatformError>;

    /// Upload the document
    async fn send_document(
        &self,
        address: &Address,
        document: OutgoingDocument,
    ) -> Result<(), PlatformError>;

    /// Tear the session down. Callers log and ignore failures.
    async fn close(&self) -> Result<(), PlatformError>;
}
