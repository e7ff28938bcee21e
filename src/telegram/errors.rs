//! Mapping of teloxide errors onto [`PlatformError`].

use crate::logging::redact;
use crate::relay::PlatformError;
use teloxide::{ApiError, RequestError};

/// Description fragments meaning the bot cannot reach the chat
const UNREACHABLE_MARKERS: &[&str] = &[
    "chat not found",
    "not a member",
    "not enough rights",
    "have no rights",
    "bot was kicked",
    "bot was blocked",
    "forbidden",
    "peer_id_invalid",
    "channel_private",
    "chat_write_forbidden",
];

/// Classify one failed Bot API call
#[must_use]
pub fn map_request_error(err: RequestError) -> PlatformError {
    match err {
        RequestError::RetryAfter(wait) => PlatformError::RateLimited {
            retry_after: wait.duration(),
        },
        RequestError::MigrateToChatId(chat) => PlatformError::Migrated(chat.0),
        RequestError::Api(api) => map_api_error(&api),
        err @ (RequestError::Network(_) | RequestError::Io(_) | RequestError::InvalidJson { .. }) => {
            PlatformError::Remote(redact(&err.to_string()))
        }
        #[allow(unreachable_patterns)]
        other => PlatformError::Other(redact(&other.to_string())),
    }
}

fn map_api_error(api: &ApiError) -> PlatformError {
    let text = redact(&api.to_string());
    match api {
        ApiError::ChatNotFound
        | ApiError::UserNotFound
        | ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::CantInitiateConversation
        | ApiError::GroupDeactivated => PlatformError::NotFound(text),
        ApiError::InvalidToken => PlatformError::Unauthorized(text),
        _ => classify_description(&text),
    }
}

/// Classify an error description the client library has no variant for
#[must_use]
pub fn classify_description(description: &str) -> PlatformError {
    let lower = description.to_lowercase();
    if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        PlatformError::NotFound(description.to_string())
    } else if lower.contains("unauthorized") {
        PlatformError::Unauthorized(description.to_string())
    } else {
        PlatformError::Remote(description.to_string())
    }
}
