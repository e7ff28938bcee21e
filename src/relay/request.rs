//! Delivery request model.

use super::credential::Credential;
use super::error::RejectReason;
use super::resolver::Strategy;
use reqwest::Url;
use std::path::PathBuf;
use tracing::warn;

/// Filename used when the client did not send one
pub const FALLBACK_FILE_NAME: &str = "unknown_file";

/// Inline call-to-action button attached under the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    /// Button label
    pub text: String,
    /// Link opened on tap
    pub url: Url,
}

/// Button fields exactly as the client sent them
#[derive(Debug, Clone, Default)]
pub struct ButtonSpec {
    /// Label, may be absent or blank
    pub text: Option<String>,
    /// Link, may be absent or blank
    pub url: Option<String>,
    /// Whether the client wants the button shown at all
    pub active: bool,
}

impl ButtonSpec {
    /// A button is attached only when it is active and both text and URL are
    /// non-empty. A URL Telegram would refuse drops the button, not the upload.
    #[must_use]
    pub fn into_button(self) -> Option<Button> {
        if !self.active {
            return None;
        }
        let text = self.text.map(|t| t.trim().to_string()).unwrap_or_default();
        let url = self.url.map(|u| u.trim().to_string()).unwrap_or_default();
        if text.is_empty() || url.is_empty() {
            return None;
        }
        match Url::parse(&url) {
            Ok(url) => Some(Button { text, url }),
            Err(e) => {
                warn!(
                    button_url = %url,
                    error = %e,
                    "Button URL does not parse, sending without button"
                );
                None
            }
        }
    }
}

/// Collected form parameters before validation
#[derive(Debug, Clone, Default)]
pub struct RequestDraft {
    /// Target chat id
    pub destination: Option<i64>,
    /// Raw bot token
    pub bot_token: Option<String>,
    /// Original filename of the upload
    pub file_name: Option<String>,
    /// Optional caption
    pub caption: Option<String>,
    /// Optional button fields
    pub button: ButtonSpec,
    /// Keep the staged file after delivery
    pub retain: bool,
    /// Size announced by the client ahead of the payload
    pub declared_size: Option<u64>,
}

impl RequestDraft {
    /// Validate the draft into an immutable request.
    ///
    /// # Errors
    ///
    /// Returns a `RejectReason` for a missing or invalid destination or
    /// credential.
    pub fn build(self) -> Result<DeliveryRequest, RejectReason> {
        let destination = self
            .destination
            .ok_or(RejectReason::MissingField("group_id"))?;
        if destination == 0 {
            return Err(RejectReason::Invalid {
                field: "group_id",
                reason: "chat id cannot be 0".to_string(),
            });
        }
        let credential = Credential::new(
            self.bot_token
                .ok_or(RejectReason::MissingField("bot_token"))?,
        )?;
        let file_name = self
            .file_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
        let caption = self.caption.filter(|c| !c.trim().is_empty());

        Ok(DeliveryRequest {
            destination,
            credential,
            file_name,
            caption,
            button: self.button.into_button(),
            retain: self.retain,
            declared_size: self.declared_size,
        })
    }
}

/// One relay job
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Raw destination chat id
    pub destination: i64,
    /// Bot credential used for every attempt
    pub credential: Credential,
    /// Filename presented to the recipients
    pub file_name: String,
    /// Caption, `None` means "use the default"
    pub caption: Option<String>,
    /// Button to attach, already validated
    pub button: Option<Button>,
    /// Keep the staged file after the terminal outcome
    pub retain: bool,
    /// Size announced by the client, if any
    pub declared_size: Option<u64>,
}

/// Successful delivery summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Filename actually sent
    pub file_name: String,
    /// Measured byte size of the payload
    pub size: u64,
    /// Raw destination chat id
    pub destination: i64,
    /// Strategy that produced the address used for the send
    pub strategy: Strategy,
    /// Attempts it took, rate-limit waits included
    pub attempts: u32,
    /// Where the payload was kept, when retention was requested
    pub retained_path: Option<PathBuf>,
}
