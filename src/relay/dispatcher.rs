//! Builds and issues the document send.

use super::error::PlatformError;
use super::request::{Button, DeliveryRequest};
use super::session::{Address, PlatformSession};
use super::stager::StagedPayload;
use crate::utils::truncate_str;
use tokio::fs::File;
use tracing::{debug, info};

/// Telegram caption limit
pub const CAPTION_LIMIT: usize = 1024;

/// Caption used when the client sends none
pub const DEFAULT_CAPTION: &str = "New Flutter release";

/// Platform transfer chunk size passed to the adapter (512 KiB)
pub const DEFAULT_TRANSFER_CHUNK_SIZE: usize = 512 * 1024;

/// A fully built send call
#[derive(Debug)]
pub struct OutgoingDocument {
    /// Payload reader positioned at offset 0
    pub reader: File,
    /// Filename shown to recipients
    pub file_name: String,
    /// Caption text
    pub caption: String,
    /// Always send as a generic document, never as inline media
    pub force_document: bool,
    /// Whether the platform may reuse a cached copy of the attachment
    pub allow_cache: bool,
    /// Single-row, single-button inline action
    pub button: Option<Button>,
    /// Transfer chunk size recommended by the platform
    pub chunk_size: usize,
}

/// Issues the send for a delivery request
#[derive(Debug, Clone)]
pub struct Dispatcher {
    default_caption: String,
    chunk_size: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTION, DEFAULT_TRANSFER_CHUNK_SIZE)
    }
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(default_caption: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            default_caption: default_caption.into(),
            chunk_size,
        }
    }

    /// Caption actually sent for `request`
    #[must_use]
    pub fn caption_for(&self, request: &DeliveryRequest) -> String {
        let caption = request
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.default_caption.as_str());
        truncate_str(caption, CAPTION_LIMIT)
    }

    /// Assemble the outgoing call
    #[must_use]
    pub fn build(&self, request: &DeliveryRequest, reader: File) -> OutgoingDocument {
        OutgoingDocument {
            reader,
            file_name: request.file_name.clone(),
            caption: self.caption_for(request),
            force_document: true,
            allow_cache: false,
            button: request.button.clone(),
            chunk_size: self.chunk_size,
        }
    }

    /// Send the staged payload to `address`.
    ///
    /// The payload must already be rewound; the reader shares its cursor.
    ///
    /// # Errors
    ///
    /// Returns whatever the session reports. A failure to duplicate the file
    /// handle is reported as `PlatformError::Other`.
    pub async fn send(
        &self,
        session: &dyn PlatformSession,
        address: &Address,
        request: &DeliveryRequest,
        payload: &StagedPayload,
    ) -> Result<(), PlatformError> {
        let reader = payload
            .reader()
            .await
            .map_err(|e| PlatformError::Other(format!("cannot read staged payload: {e}")))?;
        let document = self.build(request, reader);

        debug!(
            chat_id = address.chat_id(),
            file_name = %document.file_name,
            with_button = document.button.is_some(),
            "Sending document"
        );
        session.send_document(address, document).await?;

        info!(
            chat_id = address.chat_id(),
            file_name = %request.file_name,
            size = payload.size(),
            "Document delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::request::{ButtonSpec, RequestDraft};
    use crate::relay::session::MockPlatformSession;
    use crate::relay::stager::Stager;

    fn request(caption: Option<&str>, button: ButtonSpec) -> DeliveryRequest {
        RequestDraft {
            destination: Some(-1_001_111_111_111),
            bot_token: Some("1:token".to_string()),
            file_name: Some("release.apk".to_string()),
            caption: caption.map(ToString::to_string),
            button,
            ..RequestDraft::default()
        }
        .build()
        .expect("valid draft")
    }

    #[test]
    fn test_caption_default_and_truncation() {
        let dispatcher = Dispatcher::new("Fallback", 1024);
        assert_eq!(
            dispatcher.caption_for(&request(None, ButtonSpec::default())),
            "Fallback"
        );
        assert_eq!(
            dispatcher.caption_for(&request(Some("  v1.2.0  "), ButtonSpec::default())),
            "v1.2.0"
        );
        let long = "x".repeat(CAPTION_LIMIT + 50);
        assert_eq!(
            dispatcher
                .caption_for(&request(Some(&long), ButtonSpec::default()))
                .chars()
                .count(),
            CAPTION_LIMIT
        );
    }

    #[tokio::test]
    async fn test_send_builds_document_call() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let payload = Stager::new(dir.path()).stage(&b"apk"[..], "release.apk").await?;
        let request = request(
            Some("Build 42"),
            ButtonSpec {
                text: Some("Open".to_string()),
                url: Some("https://example.com".to_string()),
                active: true,
            },
        );

        let mut session = MockPlatformSession::new();
        session
            .expect_send_document()
            .withf(|address, doc| {
                *address == Address::Raw(-1_001_111_111_111)
                    && doc.file_name == "release.apk"
                    && doc.caption == "Build 42"
                    && doc.force_document
                    && !doc.allow_cache
                    && doc.chunk_size == 4096
                    && doc
                        .button
                        .as_ref()
                        .is_some_and(|b| b.text == "Open" && b.url.as_str() == "https://example.com/")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        Dispatcher::new("unused", 4096)
            .send(
                &session,
                &Address::Raw(-1_001_111_111_111),
                &request,
                &payload,
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_inactive_button_is_not_sent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let payload = Stager::new(dir.path()).stage(&b"x"[..], "x").await?;
        let request = request(
            None,
            ButtonSpec {
                text: Some("Open".to_string()),
                url: Some("https://example.com".to_string()),
                active: false,
            },
        );

        let mut session = MockPlatformSession::new();
        session
            .expect_send_document()
            .withf(|_, doc| doc.button.is_none())
            .times(1)
            .returning(|_, _| Ok(()));

        Dispatcher::default()
            .send(&session, &Address::Raw(-1), &request, &payload)
            .await?;
        Ok(())
    }
}
