//! Lists the groups and channels a bot has seen, to find a `group_id`.
//!
//! Reads `BOT_TOKEN` from the environment or `.env`. Add the bot to the
//! target chat (or post something there) before running it.

use dotenvy::dotenv;
use oxide_relay::logging::init_logging;
use oxide_relay::telegram::discover::discover_chats;
use oxide_relay::utils::retry_telegram_operation;
use teloxide::prelude::*;
use tracing::error;

const SEPARATOR: &str = "------------------------------------------------------------";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_logging();

    let Some(token) = std::env::var("BOT_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty())
    else {
        println!("Set BOT_TOKEN in .env or in the environment and run again.");
        anyhow::bail!("BOT_TOKEN is not set");
    };

    let mut bot = Bot::new(token.trim());
    if let Some(url) = std::env::var("TELEGRAM_API_URL").ok().filter(|u| !u.is_empty()) {
        bot = bot.set_api_url(reqwest::Url::parse(&url)?);
    }
    let me = retry_telegram_operation(|| async {
        bot.get_me()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram getMe error: {e}"))
    })
    .await
    .inspect_err(|e| error!("Bot token rejected or Telegram unreachable: {e}"))?;

    let chats = discover_chats(&bot).await?;

    println!(
        "\nGroups and channels seen by @{}:",
        me.user.username.as_deref().unwrap_or("bot")
    );
    println!("{SEPARATOR}");

    if chats.is_empty() {
        println!("No groups or channels found.");
        println!("\nSteps:");
        println!("1. Add the bot to the group or channel");
        println!("2. Allow it to post messages");
        println!("3. Send any message in the chat, then run this again");
        return Ok(());
    }

    for chat in &chats {
        println!("{}", chat.describe());
        println!("{SEPARATOR}");
    }
    println!("\nUse one of the IDs above as the group_id form field.");
    println!("Example: group_id={}", chats[0].id);
    Ok(())
}
