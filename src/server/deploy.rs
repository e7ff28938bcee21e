//! `POST /deploy`: multipart upload relayed to a Telegram chat.
//!
//! Form fields:
//!
//! | field | required | notes |
//! |-------|----------|-------|
//! | `file` | yes | streamed straight into the stager |
//! | `group_id` | yes | marked chat id |
//! | `bot_token` | yes | |
//! | `caption` | no | defaults to the configured caption |
//! | `button_text`, `button_url` | no | both needed for a button |
//! | `button_active` | no | `false` unless set |
//! | `keep_file` | no | server default unless set |
//!
//! Fields other than `file` are capped at [`MAX_TEXT_FIELD_BYTES`] each.
//!
//! Fields may come in any order. A file part that arrives before the other
//! fields is staged right away and discarded if the form turns out invalid.

use super::{ApiError, AppState};
use crate::relay::request::FALLBACK_FILE_NAME;
use crate::relay::{ButtonSpec, DeliveryReceipt, RejectReason, RequestDraft, StagedPayload};
use crate::utils::bytes_to_mb;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use futures_util::TryStreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use tokio_util::io::StreamReader;
use tracing::{error, info};

/// Largest accepted non-file field. Captions are capped at 1024 characters,
/// so this leaves room for 4-byte UTF-8.
pub const MAX_TEXT_FIELD_BYTES: usize = 8 * 1024;

/// Success body
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// `ok`, or `accepted` for background delivery
    pub status: &'static str,
    /// Filename sent to Telegram
    pub filename: String,
    /// Bytes received
    pub size: u64,
    /// Megabytes received, two decimals
    pub size_mb: f64,
    /// Human readable summary
    pub message: String,
}

impl DeployResponse {
    fn delivered(receipt: &DeliveryReceipt) -> Self {
        Self {
            status: "ok",
            filename: receipt.file_name.clone(),
            size: receipt.size,
            size_mb: bytes_to_mb(receipt.size),
            message: "File uploaded successfully and sent to Telegram.".to_string(),
        }
    }

    fn accepted(file_name: &str, size: u64) -> Self {
        Self {
            status: "accepted",
            filename: file_name.to_string(),
            size,
            size_mb: bytes_to_mb(size),
            message: "File received, delivery to Telegram continues in the background."
                .to_string(),
        }
    }
}

/// Form contents collected so far
#[derive(Default)]
struct DeployForm {
    fields: HashMap<String, String>,
    file_name: Option<String>,
    declared_size: Option<u64>,
    payload: Option<StagedPayload>,
}

impl DeployForm {
    async fn read(state: &AppState, mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        if let Err(e) = form.fill(state, &mut multipart).await {
            form.abandon().await;
            return Err(e);
        }
        Ok(form)
    }

    async fn fill(&mut self, state: &AppState, multipart: &mut Multipart) -> Result<(), ApiError> {
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let Some(name) = field.name().map(ToString::to_string) else {
                continue;
            };

            if name != "file" {
                let value = read_text_field(field, &name).await?;
                self.fields.insert(name, value);
                continue;
            }

            if self.payload.is_some() {
                return Err(RejectReason::Invalid {
                    field: "file",
                    reason: "only one file per request".to_string(),
                }
                .into());
            }

            let file_name = field
                .file_name()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(ToString::to_string);
            let declared_size = declared_size(field.headers());
            state.relay().check_declared_size(declared_size)?;

            let hint = file_name.clone().unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
            info!(file_name = %hint, declared_size, "Receiving upload");

            let reader = StreamReader::new(field.map_err(io::Error::other));
            tokio::pin!(reader);
            let payload = state.relay().stage(reader, &hint).await?;

            self.file_name = file_name;
            self.declared_size = declared_size;
            self.payload = Some(payload);
        }
        Ok(())
    }

    async fn abandon(&mut self) {
        if let Some(payload) = self.payload.take() {
            payload.discard().await;
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, RejectReason> {
        self.text(key).map(|v| parse_bool(key, &v)).transpose()
    }

    fn draft(&self, default_retain: bool) -> Result<RequestDraft, RejectReason> {
        let destination = self
            .text("group_id")
            .map(|v| {
                v.parse::<i64>().map_err(|e| RejectReason::Invalid {
                    field: "group_id",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(RequestDraft {
            destination,
            bot_token: self.text("bot_token"),
            file_name: self.file_name.clone(),
            // Caption keeps inner whitespace, only blank means absent
            caption: self.fields.get("caption").cloned(),
            button: ButtonSpec {
                text: self.text("button_text"),
                url: self.text("button_url"),
                active: self.flag("button_active")?.unwrap_or(false),
            },
            retain: self.flag("keep_file")?.unwrap_or(default_retain),
            declared_size: self.declared_size,
        })
    }
}

/// Read a text field, refusing it once it grows past [`MAX_TEXT_FIELD_BYTES`]
async fn read_text_field(mut field: Field<'_>, name: &str) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(RejectReason::Invalid {
                field: "form",
                reason: format!("field {name:?} exceeds {MAX_TEXT_FIELD_BYTES} bytes"),
            }
            .into());
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| {
        ApiError::from(RejectReason::Invalid {
            field: "form",
            reason: format!("field {name:?} is not valid UTF-8"),
        })
    })
}

fn malformed(err: MultipartError) -> ApiError {
    RejectReason::Invalid {
        field: "form",
        reason: err.body_text(),
    }
    .into()
}

/// `Content-Length` of the file part, when the client sent one
fn declared_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, RejectReason> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RejectReason::Invalid {
            field,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Handle one deploy request
///
/// # Errors
///
/// Any `RelayError`, rendered by [`ApiError`].
pub async fn deploy_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<DeployResponse>), ApiError> {
    let mut form = DeployForm::read(&state, multipart).await?;

    let request = match form.draft(state.keep_uploads()).and_then(RequestDraft::build) {
        Ok(request) => request,
        Err(reason) => {
            form.abandon().await;
            return Err(reason.into());
        }
    };
    let Some(payload) = form.payload.take() else {
        return Err(RejectReason::MissingField("file").into());
    };

    info!(
        destination = request.destination,
        fingerprint = request.credential.fingerprint().short(),
        file_name = %request.file_name,
        size = payload.size(),
        "Deploy request accepted"
    );

    if state.background_delivery() {
        let body = DeployResponse::accepted(&request.file_name, payload.size());
        let relay = state.relay_handle();
        tokio::spawn(async move {
            match relay.deliver(&request, payload).await {
                Ok(receipt) => info!(
                    destination = receipt.destination,
                    attempts = receipt.attempts,
                    "Background delivery finished"
                ),
                Err(e) => error!(
                    destination = request.destination,
                    error = %e,
                    "Background delivery failed"
                ),
            }
        });
        return Ok((StatusCode::ACCEPTED, Json(body)));
    }

    let receipt = state.relay().deliver(&request, payload).await?;
    Ok((StatusCode::OK, Json(DeployResponse::delivered(&receipt))))
}
