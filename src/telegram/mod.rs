//! Telegram Bot API adapter built on teloxide.

pub mod client;
pub mod discover;
pub mod errors;
pub mod store;

pub use client::{TelegramConnector, TelegramSession};
pub use store::{SessionStore, StoreError};
