//! Error taxonomy for the delivery pipeline.
//!
//! [`PlatformError`] is what a platform adapter reports for a single remote
//! call. It is consumed by the retry controller, which turns it into either
//! another attempt or a terminal [`RelayError`] surfaced to the caller.

use std::time::Duration;
use thiserror::Error;

/// Reasons a request is refused before any session work starts
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectReason {
    /// Payload is bigger than the configured maximum
    #[error("file size ({size} bytes) exceeds maximum limit ({max} bytes)")]
    TooLarge {
        /// Declared or measured size
        size: u64,
        /// Configured limit
        max: u64,
    },
    /// A required form field was absent or empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// A field was present but could not be used
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name as sent by the client
        field: &'static str,
        /// Human readable explanation
        reason: String,
    },
    /// The platform refused the bot credential during the handshake
    #[error("bot token was rejected by Telegram: {0}")]
    CredentialRejected(String),
}

/// Terminal outcome of a failed delivery
#[derive(Debug, Error)]
pub enum RelayError {
    /// Oversized payload, missing or malformed parameter
    #[error("input rejected: {0}")]
    InputRejected(#[from] RejectReason),
    /// Disk I/O failed while capturing the upload
    #[error("failed to stage upload: {0}")]
    StagingFailed(#[source] std::io::Error),
    /// The bot is not a member of the destination or may not post there
    #[error(
        "bot cannot access destination {destination}: {detail}. \
         Add the bot to the group/channel and allow it to post messages"
    )]
    DestinationUnreachable {
        /// Raw destination identifier from the request
        destination: i64,
        /// What the platform said
        detail: String,
    },
    /// Counted retry budget ran out
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of counted attempts that failed
        attempts: u32,
        /// Message of the last failure
        last_error: String,
    },
    /// Anything the taxonomy does not know how to recover from
    #[error("unexpected delivery error: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Whether this failure was caused by the caller's input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InputRejected(_) | Self::DestinationUnreachable { .. }
        )
    }
}

/// Failure of a single remote call, as classified by a platform adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// Platform-issued cooldown
    #[error("rate limited by Telegram, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// How long the platform asked us to wait
        retry_after: Duration,
    },
    /// The local session store is held by someone else
    #[error("session storage is busy: {0}")]
    StorageBusy(String),
    /// Destination does not exist or the bot has no access to it
    #[error("destination not found or not accessible: {0}")]
    NotFound(String),
    /// A basic group was upgraded; the chat now lives under a new id
    #[error("group was upgraded to a supergroup with id {0}")]
    Migrated(i64),
    /// The credential itself was refused
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Any other remote-call failure (network, 5xx, unknown API error)
    #[error("remote call failed: {0}")]
    Remote(String),
    /// Failure that does not fit any known class
    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    /// Errors that must reach the retry controller even when raised by a
    /// strategy that would otherwise degrade.
    #[must_use]
    pub const fn is_retry_signal(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::StorageBusy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_unreachable_names_operational_cause() {
        let err = RelayError::DestinationUnreachable {
            destination: -1_001_234_567_890,
            detail: "chat not found".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("-1001234567890"));
        assert!(text.contains("Add the bot"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_retry_signals() {
        assert!(PlatformError::RateLimited {
            retry_after: Duration::from_secs(3)
        }
        .is_retry_signal());
        assert!(PlatformError::StorageBusy("locked".into()).is_retry_signal());
        assert!(!PlatformError::NotFound("chat not found".into()).is_retry_signal());
        assert!(!PlatformError::Remote("502".into()).is_retry_signal());
    }

    #[test]
    fn test_too_large_message() {
        let err = RelayError::from(RejectReason::TooLarge { size: 10, max: 5 });
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "input rejected: file size (10 bytes) exceeds maximum limit (5 bytes)"
        );
    }
}
