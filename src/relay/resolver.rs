//! Destination resolution
//!
//! Telegram silently refuses the basic-group addressing form for chats that
//! were upgraded, and the right form for a given id cannot be known without
//! probing. Resolution therefore walks an ordered strategy chain and stops at
//! the first strategy that resolves.
//!
//! | # | Strategy | Degrades when | Fails when |
//! |---|----------|---------------|------------|
//! | 1 | [`Strategy::FullEntity`] | lookup errors | - |
//! | 2 | [`Strategy::InputAddress`] | not cached, or cached as legacy kind | - |
//! | 3 | [`Strategy::Probe`] | probe or re-lookup errors | probe reports not-found / no access |
//! | 4 | [`Strategy::RawFallback`] | - | - |
//!
//! Rate-limit and storage-busy errors are never degraded; they go back to
//! the retry controller.

use super::error::PlatformError;
use super::session::{Address, PeerHandle, PlatformSession};
use std::fmt;
use tracing::{debug, info, warn};

/// One way of turning a raw id into an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Direct full-entity lookup by raw id
    FullEntity,
    /// Cached input-address lookup
    InputAddress,
    /// Probe message, then full-entity lookup again
    Probe,
    /// Use the raw id unresolved
    RawFallback,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FullEntity => "full_entity",
            Self::InputAddress => "input_address",
            Self::Probe => "probe",
            Self::RawFallback => "raw_fallback",
        })
    }
}

/// Evaluation order
pub const STRATEGY_CHAIN: [Strategy; 4] = [
    Strategy::FullEntity,
    Strategy::InputAddress,
    Strategy::Probe,
    Strategy::RawFallback,
];

/// Outcome of resolving one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// Caller's identifier
    pub raw: i64,
    /// Address handed to the dispatcher
    pub address: Address,
    /// Strategy that produced it
    pub strategy: Strategy,
}

impl ResolvedAddress {
    /// Replace a legacy-kind handle with the raw identifier
    #[must_use]
    pub fn finalize(self) -> Self {
        match &self.address {
            Address::Peer(peer) if peer.kind.is_legacy() => {
                debug!(
                    raw = self.raw,
                    peer = peer.id,
                    "Resolved handle is legacy kind, using raw id"
                );
                Self {
                    address: Address::Raw(self.raw),
                    ..self
                }
            }
            _ => self,
        }
    }
}

/// Tagged result of a single strategy
#[derive(Debug)]
enum StrategyResult {
    Resolved(Address),
    Degraded(String),
    Failed(Failure),
}

#[derive(Debug)]
enum Failure {
    /// Bot lacks membership or permission; retrying never helps
    Unreachable(String),
    /// Hand the error to the retry controller untouched
    Propagate(PlatformError),
}

/// Resolve `destination` with the strategy chain.
///
/// # Errors
///
/// `PlatformError::NotFound` when the probe proves the bot cannot reach the
/// chat, or a rate-limit/storage-busy error raised by any strategy.
pub async fn resolve(
    session: &dyn PlatformSession,
    destination: i64,
) -> Result<ResolvedAddress, PlatformError> {
    for strategy in STRATEGY_CHAIN {
        match run_strategy(strategy, session, destination).await {
            StrategyResult::Resolved(address) => {
                let resolved = ResolvedAddress {
                    raw: destination,
                    address,
                    strategy,
                }
                .finalize();
                info!(
                    destination,
                    %strategy,
                    chat_id = resolved.address.chat_id(),
                    "Destination resolved"
                );
                return Ok(resolved);
            }
            StrategyResult::Degraded(reason) => {
                debug!(destination, %strategy, %reason, "Resolution strategy degraded");
            }
            StrategyResult::Failed(Failure::Unreachable(detail)) => {
                warn!(destination, %strategy, %detail, "Destination unreachable");
                return Err(PlatformError::NotFound(detail));
            }
            StrategyResult::Failed(Failure::Propagate(err)) => return Err(err),
        }
    }

    Ok(ResolvedAddress {
        raw: destination,
        address: Address::Raw(destination),
        strategy: Strategy::RawFallback,
    })
}

async fn run_strategy(
    strategy: Strategy,
    session: &dyn PlatformSession,
    destination: i64,
) -> StrategyResult {
    match strategy {
        Strategy::FullEntity => full_entity(session, destination).await,
        Strategy::InputAddress => input_address(session, destination).await,
        Strategy::Probe => probe(session, destination).await,
        Strategy::RawFallback => StrategyResult::Resolved(Address::Raw(destination)),
    }
}

async fn full_entity(session: &dyn PlatformSession, destination: i64) -> StrategyResult {
    match session.lookup_entity(destination).await {
        Ok(peer) => StrategyResult::Resolved(Address::Peer(peer)),
        Err(PlatformError::Migrated(new_id)) => {
            info!(destination, new_id, "Group was upgraded, following migration");
            StrategyResult::Resolved(Address::Peer(PeerHandle::from_id(new_id)))
        }
        Err(err) if err.is_retry_signal() => StrategyResult::Failed(Failure::Propagate(err)),
        Err(err) => StrategyResult::Degraded(err.to_string()),
    }
}

async fn input_address(session: &dyn PlatformSession, destination: i64) -> StrategyResult {
    match session.lookup_input_address(destination).await {
        Ok(Some(peer)) if peer.kind.is_legacy() => {
            StrategyResult::Degraded(format!("cached address {} is legacy kind", peer.id))
        }
        Ok(Some(peer)) => StrategyResult::Resolved(Address::Peer(peer)),
        Ok(None) => StrategyResult::Degraded("address not cached".to_string()),
        Err(err) if err.is_retry_signal() => StrategyResult::Failed(Failure::Propagate(err)),
        Err(err) => StrategyResult::Degraded(err.to_string()),
    }
}

async fn probe(session: &dyn PlatformSession, destination: i64) -> StrategyResult {
    match session.send_probe(destination).await {
        Ok(()) => {}
        Err(PlatformError::NotFound(detail)) => {
            return StrategyResult::Failed(Failure::Unreachable(detail))
        }
        Err(err @ PlatformError::Unauthorized(_)) => {
            return StrategyResult::Failed(Failure::Propagate(err))
        }
        Err(err) if err.is_retry_signal() => {
            return StrategyResult::Failed(Failure::Propagate(err))
        }
        Err(err) => return StrategyResult::Degraded(format!("probe failed: {err}")),
    }

    match session.lookup_entity(destination).await {
        Ok(peer) => StrategyResult::Resolved(Address::Peer(peer)),
        Err(err) if err.is_retry_signal() => StrategyResult::Failed(Failure::Propagate(err)),
        Err(err) => StrategyResult::Degraded(format!("lookup after probe failed: {err}")),
    }
}
