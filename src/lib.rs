#![deny(missing_docs)]
//! Oxide relay library.
//!
//! Accepts uploaded files over HTTP and relays them into Telegram chats
//! through a bot credential.

/// Configuration management.
pub mod config;
/// Log setup and token redaction.
pub mod logging;
/// Delivery pipeline.
pub mod relay;
/// HTTP endpoints.
pub mod server;
/// Telegram Bot API adapter.
pub mod telegram;
/// Scripted platform for tests.
pub mod testing;
/// Utility functions.
pub mod utils;
