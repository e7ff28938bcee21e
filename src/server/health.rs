//! Liveness endpoint.

use axum::http::StatusCode;

/// `GET /health` answers 200 with `OK` while the process is serving
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let (status, body) = health_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
