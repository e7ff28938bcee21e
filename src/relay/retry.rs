//! Retry/backoff controller
//!
//! Every attempt walks `Connecting -> Resolving -> Sending`. When a phase
//! fails, [`transition`] decides whether the pipeline re-enters
//! `Connecting` after a delay or stops with a terminal [`RelayError`].
//!
//! | Failure | Decision | Delay | Counted |
//! |---------|----------|-------|---------|
//! | rate limited (wait N) | retry | N + 1 unit | no |
//! | storage busy | retry | (1 + attempt index) units | yes |
//! | remote, other class | retry | fixed transient delay | yes |
//! | not found / no access | fatal `DestinationUnreachable` | - | - |
//! | credential refused | fatal `InputRejected` | - | - |
//! | anything else | fatal `Unexpected` | - | - |
//!
//! A counted failure that uses up the budget turns into `RetriesExhausted`.

use super::error::{PlatformError, RejectReason, RelayError};
use std::fmt;
use std::time::Duration;

/// Default number of counted attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delays and attempt budget for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Counted failures allowed before giving up
    pub max_attempts: u32,
    /// Base unit every delay is expressed in (one second in production)
    pub time_unit: Duration,
    /// Units to wait after a transient remote failure
    pub transient_delay_units: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            time_unit: Duration::from_secs(1),
            transient_delay_units: 1,
        }
    }
}

impl RetryPolicy {
    /// Cooldown after the platform asked us to wait `wait`
    #[must_use]
    pub fn rate_limit_delay(&self, wait: Duration) -> Duration {
        wait + self.time_unit
    }

    /// Backoff after session-storage contention; `attempt` is zero based
    #[must_use]
    pub fn busy_delay(&self, attempt: u32) -> Duration {
        self.time_unit * attempt.saturating_add(1)
    }

    /// Pause after a transient remote failure
    #[must_use]
    pub fn transient_delay(&self) -> Duration {
        self.time_unit * self.transient_delay_units
    }
}

/// Stage of an attempt in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Session handshake
    Connecting,
    /// Destination resolution
    Resolving,
    /// Document upload
    Sending,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Resolving => "resolving",
            Self::Sending => "sending",
        })
    }
}

/// Why the controller chose to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Platform-issued cooldown
    RateLimited,
    /// Session storage held elsewhere
    SessionContended,
    /// Network or server-side hiccup
    TransientRemote,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RateLimited => "rate_limited",
            Self::SessionContended => "session_contended",
            Self::TransientRemote => "transient_remote",
        })
    }
}

/// What to do after a failed attempt
#[derive(Debug)]
pub enum Decision {
    /// Sleep, then start a fresh attempt
    Retry {
        /// How long to sleep
        delay: Duration,
        /// Whether this failure consumed the attempt budget
        counted: bool,
        /// Failure class
        reason: RetryReason,
    },
    /// Stop with this outcome
    Fatal(RelayError),
}

/// Transition table for one failure.
///
/// `failures` is the number of counted failures seen before this one.
#[must_use]
pub fn transition(
    policy: &RetryPolicy,
    failures: u32,
    destination: i64,
    error: PlatformError,
) -> Decision {
    let counted = |reason: RetryReason, delay: Duration, error: PlatformError| {
        if failures + 1 >= policy.max_attempts {
            Decision::Fatal(RelayError::RetriesExhausted {
                attempts: failures + 1,
                last_error: error.to_string(),
            })
        } else {
            Decision::Retry {
                delay,
                counted: true,
                reason,
            }
        }
    };

    match error {
        PlatformError::RateLimited { retry_after } => Decision::Retry {
            delay: policy.rate_limit_delay(retry_after),
            counted: false,
            reason: RetryReason::RateLimited,
        },
        err @ PlatformError::StorageBusy(_) => counted(
            RetryReason::SessionContended,
            policy.busy_delay(failures),
            err,
        ),
        err @ PlatformError::Remote(_) => {
            counted(RetryReason::TransientRemote, policy.transient_delay(), err)
        }
        PlatformError::NotFound(detail) => {
            Decision::Fatal(RelayError::DestinationUnreachable {
                destination,
                detail,
            })
        }
        err @ PlatformError::Migrated(_) => {
            Decision::Fatal(RelayError::DestinationUnreachable {
                destination,
                detail: err.to_string(),
            })
        }
        PlatformError::Unauthorized(detail) => {
            Decision::Fatal(RejectReason::CredentialRejected(detail).into())
        }
        PlatformError::Other(detail) => Decision::Fatal(RelayError::Unexpected(detail)),
    }
}

/// Attempt bookkeeping for one delivery
#[derive(Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    destination: i64,
    failures: u32,
    attempts: u32,
}

impl RetryController {
    /// Fresh controller for one delivery
    #[must_use]
    pub const fn new(policy: RetryPolicy, destination: i64) -> Self {
        Self {
            policy,
            destination,
            failures: 0,
            attempts: 0,
        }
    }

    /// Record the start of an attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Classify a failure raised in `phase`
    pub fn on_failure(&mut self, phase: Phase, error: PlatformError) -> Decision {
        tracing::debug!(
            destination = self.destination,
            %phase,
            attempt = self.attempts,
            error = %error,
            "Attempt failed"
        );
        let decision = transition(&self.policy, self.failures, self.destination, error);
        if matches!(decision, Decision::Retry { counted: true, .. }) {
            self.failures += 1;
        }
        decision
    }

    /// Attempts started so far, uncounted ones included
    #[must_use]
    pub const fn attempts_used(&self) -> u32 {
        self.attempts
    }

    /// Failures charged against the budget so far
    #[must_use]
    pub const fn counted_failures(&self) -> u32 {
        self.failures
    }
}
