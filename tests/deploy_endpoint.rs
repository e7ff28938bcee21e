//! HTTP surface tests, driven through the router with `oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use oxide_relay::relay::{Relay, RelayConfig};
use oxide_relay::server::{build_router, AppState};
use oxide_relay::testing::ScriptedPlatform;
use serde_json::Value;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "relay-test-boundary";

/// Hand-built multipart body
#[derive(Default)]
struct Form {
    body: Vec<u8>,
}

impl Form {
    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    fn file(mut self, file_name: &str, data: &[u8], content_length: Option<u64>) -> Self {
        let mut head = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n"
        );
        if let Some(len) = content_length {
            head.push_str(&format!("Content-Length: {len}\r\n"));
        }
        head.push_str("\r\n");
        self.body.extend_from_slice(head.as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn into_request(mut self) -> Result<Request<Body>, axum::http::Error> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/deploy")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(self.body))
    }
}

fn state(platform: &ScriptedPlatform, dir: &Path, max: u64, background: bool) -> AppState {
    let relay = Relay::new(
        Arc::new(platform.clone()),
        RelayConfig {
            upload_dir: dir.to_path_buf(),
            max_file_size: max,
            ..RelayConfig::default()
        },
    );
    AppState::new(Arc::new(relay), false, background)
}

async fn json_body(response: axum::response::Response) -> Result<Value, Box<dyn Error>> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(Iterator::count).unwrap_or(0)
}

#[tokio::test]
async fn test_deploy_success() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 1024, false));

    // File first, fields after
    let request = Form::default()
        .file("app-release.apk", b"0123456789", None)
        .text("group_id", "-1001234567890")
        .text("bot_token", "123:secret")
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["filename"], "app-release.apk");
    assert_eq!(body["size"], 10);

    let delivered = platform.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].bytes, b"0123456789");
    assert_eq!(delivered[0].caption, "New Flutter release");
    assert_eq!(delivered[0].button_text, None);
    assert_eq!(staged_files(dir.path()), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_group_id_is_bad_request() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 1024, false));

    let request = Form::default()
        .text("bot_token", "123:secret")
        .file("app.apk", b"data", None)
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.contains("group_id"), "detail was {detail:?}");
    assert!(platform.calls().is_empty());
    assert_eq!(staged_files(dir.path()), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_bad_request() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 1024, false));

    let request = Form::default()
        .text("group_id", "-100")
        .text("bot_token", "123:secret")
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_oversize_upload_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 8, false));

    let request = Form::default()
        .text("group_id", "-1001234567890")
        .text("bot_token", "123:secret")
        .file("big.bin", &[7u8; 64], None)
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await?;
    assert!(body["detail"]
        .as_str()
        .unwrap_or_default()
        .contains("exceeds maximum limit"));
    assert!(platform.calls().is_empty());
    assert_eq!(staged_files(dir.path()), 0);
    Ok(())
}

#[tokio::test]
async fn test_oversized_text_field_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 8, false));

    let caption = "x".repeat(4 * 1024 * 1024);
    let request = Form::default()
        .file("app.apk", b"tiny", None)
        .text("group_id", "-1001234567890")
        .text("bot_token", "123:secret")
        .text("caption", &caption)
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.contains("caption"), "detail was {detail:?}");
    assert!(platform.calls().is_empty());
    // The already staged file is discarded
    assert_eq!(staged_files(dir.path()), 0);
    Ok(())
}

#[tokio::test]
async fn test_caption_at_field_limit_is_accepted() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 1024, false));

    let caption = "y".repeat(oxide_relay::server::deploy::MAX_TEXT_FIELD_BYTES);
    let request = Form::default()
        .text("group_id", "-1001234567890")
        .text("bot_token", "123:secret")
        .text("caption", &caption)
        .file("app.apk", b"data", None)
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(platform.delivered()[0].caption.chars().count(), 1024);
    Ok(())
}

#[tokio::test]
async fn test_declared_oversize_is_rejected_before_staging() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 8, false));

    let request = Form::default()
        .file("big.bin", b"tiny", Some(4096))
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(staged_files(dir.path()), 0);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_destination_explains_fix() -> Result<(), Box<dyn Error>> {
    use oxide_relay::relay::PlatformError;

    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    platform
        .push_entity(Err(PlatformError::Remote("PEER_ID_INVALID".into())))
        .push_probe(Err(PlatformError::NotFound("chat not found".into())));
    let app = build_router(state(&platform, dir.path(), 1024, false));

    let request = Form::default()
        .text("group_id", "-1001234567890")
        .text("bot_token", "123:secret")
        .file("app.apk", b"data", None)
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert!(body["detail"]
        .as_str()
        .unwrap_or_default()
        .contains("Add the bot"));
    Ok(())
}

#[tokio::test]
async fn test_background_delivery_accepts_then_delivers() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let platform = ScriptedPlatform::new();
    let app = build_router(state(&platform, dir.path(), 1024, true));

    let request = Form::default()
        .text("group_id", "-1001234567890")
        .text("bot_token", "123:secret")
        .text("caption", "Nightly")
        .file("app.apk", b"nightly build", None)
        .into_request()?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "accepted");

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(doc) = platform.delivered().pop() {
                return doc;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(delivered.caption, "Nightly");
    assert_eq!(delivered.bytes, b"nightly build");
    Ok(())
}

#[tokio::test]
async fn test_health() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let app = build_router(state(&ScriptedPlatform::new(), dir.path(), 1024, false));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await?.to_bytes();
    assert_eq!(&bytes[..], b"OK");
    Ok(())
}
