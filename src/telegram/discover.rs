//! Chat discovery for operators looking for a destination id.
//!
//! The Bot API has no "list my chats" call, so discovery reads pending
//! updates and collects every group, supergroup and channel they mention.
//! A bot that was just added to a group sees a membership update there.

use crate::utils::retry_telegram_operation;
use std::collections::HashSet;
use std::fmt;
use teloxide::prelude::*;
use teloxide::types::Chat;

/// Kind of a discovered chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatClass {
    /// Basic group
    Group,
    /// Supergroup
    Supergroup,
    /// Broadcast channel
    Channel,
}

impl fmt::Display for ChatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
        })
    }
}

/// A chat the bot can post into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredChat {
    /// Marked chat id, usable as `group_id`
    pub id: i64,
    /// Title
    pub title: String,
    /// Kind
    pub class: ChatClass,
    /// Public username
    pub username: Option<String>,
}

impl DiscoveredChat {
    /// Private chats yield `None`
    #[must_use]
    pub fn from_chat(chat: &Chat) -> Option<Self> {
        let class = if chat.is_channel() {
            ChatClass::Channel
        } else if chat.is_supergroup() {
            ChatClass::Supergroup
        } else if chat.is_group() {
            ChatClass::Group
        } else {
            return None;
        };
        Some(Self {
            id: chat.id.0,
            title: chat.title().unwrap_or("(untitled)").to_string(),
            class,
            username: chat.username().map(ToString::to_string),
        })
    }

    /// Human readable block for the terminal
    #[must_use]
    pub fn describe(&self) -> String {
        let username = self
            .username
            .as_deref()
            .map_or_else(|| "none".to_string(), |u| format!("@{u}"));
        format!(
            "Title:    {}\nID:       {}\nType:     {}\nUsername: {}",
            self.title, self.id, self.class, username
        )
    }
}

/// Drop repeated ids, keeping first-seen order
#[must_use]
pub fn dedupe(chats: impl IntoIterator<Item = DiscoveredChat>) -> Vec<DiscoveredChat> {
    let mut seen = HashSet::new();
    chats
        .into_iter()
        .filter(|chat| seen.insert(chat.id))
        .collect()
}

/// Fetch pending updates and list the chats they reference.
///
/// # Errors
///
/// Returns the last Bot API error once retries are exhausted.
pub async fn discover_chats(bot: &Bot) -> anyhow::Result<Vec<DiscoveredChat>> {
    let updates = retry_telegram_operation(|| async {
        bot.get_updates()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram getUpdates error: {e}"))
    })
    .await?;

    Ok(dedupe(
        updates
            .iter()
            .filter_map(|update| update.chat())
            .filter_map(DiscoveredChat::from_chat),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: i64, title: &str, class: ChatClass) -> DiscoveredChat {
        DiscoveredChat {
            id,
            title: title.to_string(),
            class,
            username: None,
        }
    }

    #[test]
    fn test_dedupe_keeps_first_seen() {
        let chats = dedupe(vec![
            chat(-1_001, "Releases", ChatClass::Channel),
            chat(-42, "Team", ChatClass::Group),
            chat(-1_001, "Releases (renamed)", ChatClass::Channel),
        ]);
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].title, "Releases");
        assert_eq!(chats[1].id, -42);
    }

    #[test]
    fn test_describe() {
        let mut c = chat(-1_001_234_567_890, "Builds", ChatClass::Supergroup);
        assert!(c.describe().contains("ID:       -1001234567890"));
        assert!(c.describe().contains("Username: none"));
        c.username = Some("builds".to_string());
        assert!(c.describe().contains("Username: @builds"));
        assert!(c.describe().contains("Type:     supergroup"));
    }
}
