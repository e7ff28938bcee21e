//! Testing helpers.
//!
//! [`ScriptedPlatform`] is an in-memory [`Connector`] whose answers are
//! queued up front. It records every call with a timestamp from tokio's
//! clock, so tests running with a paused clock can assert on backoff
//! delays, and it tracks how many sessions per credential are open at once.

use crate::relay::{
    Address, Connector, Credential, OutgoingDocument, PeerHandle, PlatformError, PlatformSession,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Barrier;
use tokio::time::Instant;

/// Scripted outcome of one `send_document` call
#[derive(Debug, Clone)]
pub enum SendScript {
    /// Read the whole payload and succeed
    Deliver,
    /// Fail without reading
    Fail(PlatformError),
    /// Read `bytes` bytes, then fail, leaving the shared cursor moved
    FailAfterReading {
        /// Bytes consumed before failing
        bytes: usize,
        /// Error returned
        error: PlatformError,
    },
}

/// Kind of a recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    /// Session opened (handshake done)
    Open,
    /// Handshake failed
    OpenFailed,
    /// Session closed
    Close,
    /// Full entity lookup
    LookupEntity(i64),
    /// Cached address lookup
    LookupInputAddress(i64),
    /// Probe message
    Probe(i64),
    /// Document send attempt
    Send(i64),
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct Call {
    /// When it happened, on tokio's clock
    pub at: Instant,
    /// Short fingerprint of the credential
    pub fingerprint: String,
    /// What was called
    pub kind: CallKind,
}

/// A document that reached the fake platform in full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Address the send was issued to
    pub address: Address,
    /// Filename
    pub file_name: String,
    /// Caption
    pub caption: String,
    /// Payload bytes as read from the reader
    pub bytes: Vec<u8>,
    /// Button label, if a button was attached
    pub button_text: Option<String>,
}

#[derive(Default)]
struct Script {
    open: VecDeque<Result<(), PlatformError>>,
    entity: VecDeque<Result<PeerHandle, PlatformError>>,
    input: VecDeque<Result<Option<PeerHandle>, PlatformError>>,
    probe: VecDeque<Result<(), PlatformError>>,
    send: VecDeque<SendScript>,
    send_delay: Option<Duration>,
    send_barrier: Option<Arc<Barrier>>,
    calls: Vec<Call>,
    delivered: Vec<Delivered>,
    open_now: HashMap<String, usize>,
    max_open: HashMap<String, usize>,
}

/// In-memory platform with queued answers
///
/// Empty queues fall back to the happy path: handshakes succeed, lookups
/// resolve the id as-is, nothing is cached, probes and sends succeed.
#[derive(Clone, Default)]
pub struct ScriptedPlatform {
    script: Arc<Mutex<Script>>,
}

impl ScriptedPlatform {
    /// Fresh platform with empty queues
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, fingerprint: &str, kind: CallKind) {
        self.script().calls.push(Call {
            at: Instant::now(),
            fingerprint: fingerprint.to_string(),
            kind,
        });
    }

    /// Queue a handshake outcome
    pub fn push_open(&self, outcome: Result<(), PlatformError>) -> &Self {
        self.script().open.push_back(outcome);
        self
    }

    /// Queue a full entity lookup outcome
    pub fn push_entity(&self, outcome: Result<PeerHandle, PlatformError>) -> &Self {
        self.script().entity.push_back(outcome);
        self
    }

    /// Queue a cached address lookup outcome
    pub fn push_input_address(&self, outcome: Result<Option<PeerHandle>, PlatformError>) -> &Self {
        self.script().input.push_back(outcome);
        self
    }

    /// Queue a probe outcome
    pub fn push_probe(&self, outcome: Result<(), PlatformError>) -> &Self {
        self.script().probe.push_back(outcome);
        self
    }

    /// Queue a send outcome
    pub fn push_send(&self, outcome: SendScript) -> &Self {
        self.script().send.push_back(outcome);
        self
    }

    /// Make every send take `delay` on tokio's clock
    pub fn set_send_delay(&self, delay: Duration) -> &Self {
        self.script().send_delay = Some(delay);
        self
    }

    /// Make every send wait on `barrier` before completing
    pub fn set_send_barrier(&self, barrier: Arc<Barrier>) -> &Self {
        self.script().send_barrier = Some(barrier);
        self
    }

    /// All calls so far
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    /// Calls of one kind
    #[must_use]
    pub fn calls_where(&self, pred: impl Fn(&CallKind) -> bool) -> Vec<Call> {
        self.script()
            .calls
            .iter()
            .filter(|c| pred(&c.kind))
            .cloned()
            .collect()
    }

    /// Documents delivered in full
    #[must_use]
    pub fn delivered(&self) -> Vec<Delivered> {
        self.script().delivered.clone()
    }

    /// Highest number of simultaneously open sessions seen for a credential
    #[must_use]
    pub fn max_concurrent_sessions(&self, credential: &Credential) -> usize {
        self.script()
            .max_open
            .get(credential.fingerprint().short())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for ScriptedPlatform {
    async fn open(
        &self,
        credential: &Credential,
    ) -> Result<Box<dyn PlatformSession>, PlatformError> {
        let fingerprint = credential.fingerprint().short().to_string();
        let outcome = self.script().open.pop_front().unwrap_or(Ok(()));
        if let Err(e) = outcome {
            self.record(&fingerprint, CallKind::OpenFailed);
            return Err(e);
        }

        {
            let mut script = self.script();
            let open = script.open_now.entry(fingerprint.clone()).or_default();
            *open += 1;
            let now = *open;
            let max = script.max_open.entry(fingerprint.clone()).or_default();
            *max = (*max).max(now);
        }
        self.record(&fingerprint, CallKind::Open);

        Ok(Box::new(ScriptedSession {
            platform: self.clone(),
            fingerprint,
        }))
    }
}

struct ScriptedSession {
    platform: ScriptedPlatform,
    fingerprint: String,
}

impl ScriptedSession {
    fn record(&self, kind: CallKind) {
        self.platform.record(&self.fingerprint, kind);
    }
}

#[async_trait]
impl PlatformSession for ScriptedSession {
    async fn lookup_entity(&self, chat_id: i64) -> Result<PeerHandle, PlatformError> {
        self.record(CallKind::LookupEntity(chat_id));
        self.platform
            .script()
            .entity
            .pop_front()
            .unwrap_or_else(|| Ok(PeerHandle::from_id(chat_id)))
    }

    async fn lookup_input_address(
        &self,
        chat_id: i64,
    ) -> Result<Option<PeerHandle>, PlatformError> {
        self.record(CallKind::LookupInputAddress(chat_id));
        self.platform.script().input.pop_front().unwrap_or(Ok(None))
    }

    async fn send_probe(&self, chat_id: i64) -> Result<(), PlatformError> {
        self.record(CallKind::Probe(chat_id));
        self.platform.script().probe.pop_front().unwrap_or(Ok(()))
    }

    async fn send_document(
        &self,
        address: &Address,
        mut document: OutgoingDocument,
    ) -> Result<(), PlatformError> {
        self.record(CallKind::Send(address.chat_id()));
        let (outcome, delay, barrier) = {
            let mut script = self.platform.script();
            (
                script.send.pop_front().unwrap_or(SendScript::Deliver),
                script.send_delay,
                script.send_barrier.clone(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        match outcome {
            SendScript::Deliver => {
                let mut bytes = Vec::new();
                document
                    .reader
                    .read_to_end(&mut bytes)
                    .await
                    .map_err(|e| PlatformError::Remote(e.to_string()))?;
                self.platform.script().delivered.push(Delivered {
                    address: address.clone(),
                    file_name: document.file_name,
                    caption: document.caption,
                    bytes,
                    button_text: document.button.map(|b| b.text),
                });
                Ok(())
            }
            SendScript::Fail(error) => Err(error),
            SendScript::FailAfterReading { bytes, error } => {
                let mut buf = vec![0u8; bytes];
                let _ = document.reader.read(&mut buf).await;
                Err(error)
            }
        }
    }

    async fn close(&self) -> Result<(), PlatformError> {
        if let Some(open) = self.platform.script().open_now.get_mut(&self.fingerprint) {
            *open = open.saturating_sub(1);
        }
        self.record(CallKind::Close);
        Ok(())
    }
}
