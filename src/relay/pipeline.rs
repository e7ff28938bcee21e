//! Delivery pipeline: stage, check size, then lock/connect/resolve/send
//! under the retry controller. The staged file is cleaned up on every
//! terminal outcome.

use super::dispatcher::{Dispatcher, DEFAULT_CAPTION, DEFAULT_TRANSFER_CHUNK_SIZE};
use super::error::{PlatformError, RejectReason, RelayError};
use super::locks::SessionLocks;
use super::request::{DeliveryReceipt, DeliveryRequest};
use super::resolver::{self, ResolvedAddress};
use super::retry::{Decision, Phase, RetryController, RetryPolicy};
use super::session::{Connector, PlatformSession};
use super::stager::{StagedPayload, Stager, DEFAULT_STAGE_CHUNK_SIZE};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};

/// Default maximum payload size (2 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Tunables for [`Relay`]
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Where uploads are staged and retained
    pub upload_dir: PathBuf,
    /// Staging chunk size
    pub stage_chunk_size: usize,
    /// Largest accepted payload
    pub max_file_size: u64,
    /// Caption used when the request has none
    pub default_caption: String,
    /// Transfer chunk size handed to the platform adapter
    pub transfer_chunk_size: usize,
    /// Retry delays and budget
    pub retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            stage_chunk_size: DEFAULT_STAGE_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            default_caption: DEFAULT_CAPTION.to_string(),
            transfer_chunk_size: DEFAULT_TRANSFER_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// The delivery pipeline, shared by all requests of the process
pub struct Relay {
    connector: Arc<dyn Connector>,
    locks: SessionLocks,
    stager: Stager,
    dispatcher: Dispatcher,
    policy: RetryPolicy,
    max_file_size: u64,
}

impl Relay {
    /// Build a pipeline around `connector`
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: RelayConfig) -> Self {
        Self {
            connector,
            locks: SessionLocks::new(),
            stager: Stager::new(config.upload_dir)
                .with_chunk_size(config.stage_chunk_size)
                .with_max_size(config.max_file_size),
            dispatcher: Dispatcher::new(config.default_caption, config.transfer_chunk_size),
            policy: config.retry,
            max_file_size: config.max_file_size,
        }
    }

    /// Largest accepted payload
    #[must_use]
    pub const fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Credential lock registry
    #[must_use]
    pub const fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Reject a client-declared size above the limit before staging.
    ///
    /// # Errors
    ///
    /// `RelayError::InputRejected` with `TooLarge`.
    pub fn check_declared_size(&self, declared: Option<u64>) -> Result<(), RelayError> {
        match declared {
            Some(size) if size > self.max_file_size => Err(RejectReason::TooLarge {
                size,
                max: self.max_file_size,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Stage an inbound stream.
    ///
    /// # Errors
    ///
    /// See [`Stager::stage`].
    pub async fn stage<R>(&self, reader: R, name_hint: &str) -> Result<StagedPayload, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        self.stager.stage(reader, name_hint).await
    }

    /// Stage `reader` and deliver it.
    ///
    /// # Errors
    ///
    /// Any terminal [`RelayError`].
    pub async fn relay<R>(
        &self,
        request: &DeliveryRequest,
        reader: R,
    ) -> Result<DeliveryReceipt, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        self.check_declared_size(request.declared_size)?;
        let payload = self.stage(reader, &request.file_name).await?;
        self.deliver(request, payload).await
    }

    /// Deliver an already staged payload and clean it up.
    ///
    /// The staged file is removed (or retained on request) exactly once,
    /// whatever the outcome. Cleanup failures are logged and never replace
    /// the delivery outcome.
    ///
    /// # Errors
    ///
    /// Any terminal [`RelayError`].
    pub async fn deliver(
        &self,
        request: &DeliveryRequest,
        mut payload: StagedPayload,
    ) -> Result<DeliveryReceipt, RelayError> {
        let size = payload.size();
        let outcome = if size > self.max_file_size {
            Err(RejectReason::TooLarge {
                size,
                max: self.max_file_size,
            }
            .into())
        } else {
            self.run_attempts(request, &mut payload).await
        };

        let staged_path = payload.path().to_path_buf();
        let retained_path = match payload.finish(request.retain, &request.file_name).await {
            Ok(kept) => kept,
            Err(e) => {
                warn!(
                    path = %staged_path.display(),
                    error = %e,
                    "Failed to clean up staged upload"
                );
                None
            }
        };

        let (resolved, attempts) = outcome?;
        Ok(DeliveryReceipt {
            file_name: request.file_name.clone(),
            size,
            destination: request.destination,
            strategy: resolved.strategy,
            attempts,
            retained_path,
        })
    }

    async fn run_attempts(
        &self,
        request: &DeliveryRequest,
        payload: &mut StagedPayload,
    ) -> Result<(ResolvedAddress, u32), RelayError> {
        let mut controller = RetryController::new(self.policy, request.destination);

        loop {
            let attempt = controller.begin_attempt();
            payload.rewind().await.map_err(RelayError::StagingFailed)?;

            let (phase, error) = match self.attempt(request, payload).await {
                Ok(resolved) => return Ok((resolved, attempt)),
                Err(failure) => failure,
            };

            match controller.on_failure(phase, error) {
                Decision::Retry {
                    delay,
                    counted,
                    reason,
                } => {
                    warn!(
                        destination = request.destination,
                        fingerprint = request.credential.fingerprint().short(),
                        attempt,
                        %phase,
                        %reason,
                        counted,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying delivery"
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Fatal(err) => {
                    warn!(
                        destination = request.destination,
                        attempt,
                        %phase,
                        error = %err,
                        "Delivery failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// One locked attempt: open, resolve, send, close
    async fn attempt(
        &self,
        request: &DeliveryRequest,
        payload: &StagedPayload,
    ) -> Result<ResolvedAddress, (Phase, PlatformError)> {
        let fingerprint = request.credential.fingerprint();
        let _guard = self.locks.acquire(fingerprint).await;

        let session = self
            .connector
            .open(&request.credential)
            .await
            .map_err(|e| (Phase::Connecting, e))?;

        let result = self.resolve_and_send(session.as_ref(), request, payload).await;

        if let Err(e) = session.close().await {
            warn!(
                fingerprint = fingerprint.short(),
                error = %e,
                "Failed to close session"
            );
        }
        result
    }

    async fn resolve_and_send(
        &self,
        session: &dyn PlatformSession,
        request: &DeliveryRequest,
        payload: &StagedPayload,
    ) -> Result<ResolvedAddress, (Phase, PlatformError)> {
        let resolved = resolver::resolve(session, request.destination)
            .await
            .map_err(|e| (Phase::Resolving, e))?;

        self.dispatcher
            .send(session, &resolved.address, request, payload)
            .await
            .map_err(|e| (Phase::Sending, e))?;

        info!(
            destination = request.destination,
            strategy = %resolved.strategy,
            size = payload.size(),
            "Relay completed"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::request::RequestDraft;
    use crate::relay::session::{MockConnector, MockPlatformSession, PeerHandle};

    fn request(retain: bool) -> DeliveryRequest {
        RequestDraft {
            destination: Some(-1_001_000_000_042),
            bot_token: Some("42:secret".to_string()),
            file_name: Some("app.apk".to_string()),
            retain,
            ..RequestDraft::default()
        }
        .build()
        .expect("valid draft")
    }

    fn happy_session() -> MockPlatformSession {
        let mut session = MockPlatformSession::new();
        session
            .expect_lookup_entity()
            .returning(|id| Ok(PeerHandle::from_id(id)));
        session.expect_send_document().returning(|_, _| Ok(()));
        session.expect_close().times(1).returning(|| Ok(()));
        session
    }

    fn relay_with(connector: MockConnector, dir: &std::path::Path, max: u64) -> Relay {
        Relay::new(
            Arc::new(connector),
            RelayConfig {
                upload_dir: dir.to_path_buf(),
                max_file_size: max,
                ..RelayConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_successful_delivery_removes_staged_file() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(|_| Ok(Box::new(happy_session()) as Box<dyn PlatformSession>));
        let relay = relay_with(connector, dir.path(), 1024);

        let receipt = relay.relay(&request(false), &b"payload"[..]).await?;

        assert_eq!(receipt.size, 7);
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.file_name, "app.apk");
        assert!(receipt.retained_path.is_none());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_retained_file_survives() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .returning(|_| Ok(Box::new(happy_session()) as Box<dyn PlatformSession>));
        let relay = relay_with(connector, dir.path(), 1024);

        let receipt = relay.relay(&request(true), &b"payload"[..]).await?;

        let kept = receipt.retained_path.ok_or("retained path missing")?;
        assert_eq!(kept, dir.path().join("app.apk"));
        assert_eq!(std::fs::read(kept)?, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn test_declared_oversize_never_opens_session() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut connector = MockConnector::new();
        connector.expect_open().never();
        let relay = relay_with(connector, dir.path(), 4);

        let mut req = request(false);
        req.declared_size = Some(5);
        let result = relay.relay(&req, &b"abc"[..]).await;

        assert!(matches!(
            result,
            Err(RelayError::InputRejected(RejectReason::TooLarge { size: 5, max: 4 }))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).map(Iterator::count).unwrap_or(0), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unauthorized_handshake_is_rejected_input() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(|_| Err(PlatformError::Unauthorized("invalid token".into())));
        let relay = relay_with(connector, dir.path(), 1024);

        let result = relay.relay(&request(false), &b"x"[..]).await;

        assert!(matches!(
            result,
            Err(RelayError::InputRejected(RejectReason::CredentialRejected(_)))
        ));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_check_declared_size() {
        let relay = Relay::new(
            Arc::new(MockConnector::new()),
            RelayConfig {
                max_file_size: 10,
                ..RelayConfig::default()
            },
        );
        assert!(relay.check_declared_size(None).is_ok());
        assert!(relay.check_declared_size(Some(10)).is_ok());
        assert!(relay.check_declared_size(Some(11)).is_err());
    }
}
