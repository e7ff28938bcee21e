//! HTTP surface of the relay.
//!
//! # Endpoints
//!
//! - `POST /deploy` - multipart upload relayed to a Telegram chat
//! - `GET /health` - returns 200 while the server is running
//!
//! CORS is fully open and the body limit is left to the stager, which
//! enforces the configured maximum file size while streaming.

use crate::relay::Relay;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod deploy;
pub mod error;
pub mod health;

pub use deploy::{deploy_handler, DeployResponse};
pub use error::ApiError;
pub use health::health_handler;

/// Shared application state, passed to handlers via `State`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    relay: Arc<Relay>,
    /// Retention used when a request does not send `keep_file`
    keep_uploads: bool,
    /// Reply 202 and deliver in a spawned task
    background_delivery: bool,
}

impl AppState {
    /// Create state around a shared pipeline
    #[must_use]
    pub fn new(relay: Arc<Relay>, keep_uploads: bool, background_delivery: bool) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                relay,
                keep_uploads,
                background_delivery,
            }),
        }
    }

    /// The delivery pipeline
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.inner.relay
    }

    /// Owned handle to the pipeline, for spawned deliveries
    #[must_use]
    pub fn relay_handle(&self) -> Arc<Relay> {
        Arc::clone(&self.inner.relay)
    }

    /// Default retention flag
    #[must_use]
    pub fn keep_uploads(&self) -> bool {
        self.inner.keep_uploads
    }

    /// Whether deliveries run after the response is sent
    #[must_use]
    pub fn background_delivery(&self) -> bool {
        self.inner.background_delivery
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/deploy", post(deploy_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
