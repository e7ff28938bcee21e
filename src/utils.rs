//! Small helpers shared by the relay, the HTTP layer and the discovery tool.
//!
//! Regex patterns use `lazy-regex`, so they are validated at compile time and
//! built on first use.

// Allow non_std_lazy_statics because we use lazy_regex! macro which uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use anyhow::Result;
use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Characters that are not safe in a file name on common filesystems
static RE_UNSAFE_FILE_CHARS: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"[^A-Za-z0-9._-]");

/// Longest file name we create on disk
const MAX_FILE_NAME_CHARS: usize = 120;

/// Name used when nothing usable is left after sanitizing
const EMPTY_FILE_NAME: &str = "upload";

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use oxide_relay::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Turn a client-supplied file name into a single safe path component.
///
/// Directory parts are dropped, unsafe characters become `_`, leading dots
/// are stripped so the result is never hidden or a parent reference.
///
/// # Examples
///
/// ```
/// use oxide_relay::utils::sanitize_file_name;
/// assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
/// assert_eq!(sanitize_file_name("my report.txt"), "my_report.txt");
/// ```
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = RE_UNSAFE_FILE_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return EMPTY_FILE_NAME.to_string();
    }
    truncate_str(cleaned, MAX_FILE_NAME_CHARS)
}

/// Bytes to megabytes, rounded to two decimals
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Meant for one-shot Bot API calls outside the delivery pipeline (the
/// discovery tool) that may fail due to transient network errors. The
/// pipeline has its own controller with platform-specific rules.
///
/// The retry strategy uses exponential backoff with jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (constants in `config.rs`)
///
/// # Errors
///
/// Returns the last error if all attempts fail.
///
/// # Examples
///
/// ```no_run
/// use oxide_relay::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn fetch_me() -> Result<u64> {
///     Ok(42)
/// }
///
/// # async fn example() -> Result<()> {
/// let id = retry_telegram_operation(|| async { fetch_me().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}
