//! HTTP error mapping.

use crate::relay::{RejectReason, RelayError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// Error returned by handlers, rendered as `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError(pub RelayError);

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    /// Status code for the wrapped error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::InputRejected(RejectReason::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            RelayError::InputRejected(_) | RelayError::DestinationUnreachable { .. } => {
                StatusCode::BAD_REQUEST
            }
            RelayError::StagingFailed(_)
            | RelayError::RetriesExhausted { .. }
            | RelayError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl From<RejectReason> for ApiError {
    fn from(reason: RejectReason) -> Self {
        Self(reason.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Deploy request failed");
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: RelayError| ApiError(e).status();
        assert_eq!(
            status(RejectReason::TooLarge { size: 2, max: 1 }.into()),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status(RejectReason::MissingField("group_id").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(RelayError::DestinationUnreachable {
                destination: -1,
                detail: "chat not found".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(RelayError::RetriesExhausted {
                attempts: 3,
                last_error: "502".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
