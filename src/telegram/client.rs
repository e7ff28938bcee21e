//! Bot API implementation of the relay's platform traits.

use super::errors::map_request_error;
use super::store::{SessionLease, SessionStore, StoreError};
use crate::relay::{
    Address, Connector, Credential, OutgoingDocument, PeerHandle, PlatformError, PlatformSession,
};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Probe text: a zero-width space renders as an empty bubble
const PROBE_TEXT: &str = "\u{200B}";

/// Builds a Bot API session per credential
pub struct TelegramConnector {
    client: reqwest::Client,
    api_url: Option<Url>,
    store: SessionStore,
}

impl TelegramConnector {
    /// Create a connector.
    ///
    /// `upload_timeout` bounds each request, document uploads included.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or `api_url`
    /// does not parse.
    pub fn new(
        store: SessionStore,
        api_url: Option<&str>,
        upload_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(upload_timeout)
            .build()?;
        let api_url = api_url.map(Url::parse).transpose()?;
        Ok(Self {
            client,
            api_url,
            store,
        })
    }

    fn bot(&self, credential: &Credential) -> Bot {
        let bot = Bot::with_client(credential.expose(), self.client.clone());
        match &self.api_url {
            Some(url) => bot.set_api_url(url.clone()),
            None => bot,
        }
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    async fn open(
        &self,
        credential: &Credential,
    ) -> Result<Box<dyn PlatformSession>, PlatformError> {
        let fingerprint = credential.fingerprint();
        let mut lease = self.store.acquire(fingerprint).await.map_err(|e| match e {
            StoreError::Busy { .. } => PlatformError::StorageBusy(e.to_string()),
            other => PlatformError::Other(other.to_string()),
        })?;

        let bot = self.bot(credential);
        // Dropping the lease on error frees the session lock
        let me = bot.get_me().await.map_err(map_request_error)?;
        lease
            .record_mut()
            .bind_bot(me.user.id.0, me.user.username.clone());

        info!(
            fingerprint = fingerprint.short(),
            bot_id = me.user.id.0,
            "Telegram session opened"
        );
        Ok(Box::new(TelegramSession {
            bot,
            lease: Mutex::new(Some(lease)),
        }))
    }
}

/// One opened Bot API session with its store lease
pub struct TelegramSession {
    bot: Bot,
    lease: Mutex<Option<SessionLease>>,
}

impl TelegramSession {
    async fn remember(&self, peer: &PeerHandle) {
        if let Some(lease) = self.lease.lock().await.as_mut() {
            lease.record_mut().remember(peer);
        }
    }
}

#[async_trait]
impl PlatformSession for TelegramSession {
    async fn lookup_entity(&self, chat_id: i64) -> Result<PeerHandle, PlatformError> {
        let chat = self
            .bot
            .get_chat(ChatId(chat_id))
            .await
            .map_err(map_request_error)?;
        let peer = PeerHandle::from_id(chat.id.0);
        self.remember(&peer).await;
        Ok(peer)
    }

    async fn lookup_input_address(
        &self,
        chat_id: i64,
    ) -> Result<Option<PeerHandle>, PlatformError> {
        Ok(self
            .lease
            .lock()
            .await
            .as_ref()
            .and_then(|lease| lease.record().peer(chat_id)))
    }

    async fn send_probe(&self, chat_id: i64) -> Result<(), PlatformError> {
        let probe = self
            .bot
            .send_message(ChatId(chat_id), PROBE_TEXT)
            .disable_notification(true)
            .await
            .map_err(map_request_error)?;

        if let Err(e) = self.bot.delete_message(probe.chat.id, probe.id).await {
            debug!(chat_id, error = %map_request_error(e), "Probe message left in chat");
        }
        Ok(())
    }

    async fn send_document(
        &self,
        address: &Address,
        document: OutgoingDocument,
    ) -> Result<(), PlatformError> {
        let OutgoingDocument {
            reader,
            file_name,
            caption,
            force_document,
            // The Bot API always uploads a fresh copy for streamed input
            allow_cache: _,
            button,
            chunk_size,
        } = document;

        let input =
            InputFile::read(BufReader::with_capacity(chunk_size, reader)).file_name(file_name);
        let mut request = self
            .bot
            .send_document(ChatId(address.chat_id()), input)
            .caption(caption)
            .disable_content_type_detection(force_document);

        if let Some(button) = button {
            request = request.reply_markup(InlineKeyboardMarkup::new(vec![vec![
                InlineKeyboardButton::url(button.text, button.url),
            ]]));
        }

        request.await.map_err(map_request_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PlatformError> {
        let Some(lease) = self.lease.lock().await.take() else {
            return Ok(());
        };
        lease
            .release()
            .await
            .map_err(|e| PlatformError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_leftover_lock_file_does_not_block_open() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let store = SessionStore::new(dir.path());
        let credential = Credential::new("123456:leftover")?;
        // Lock file of a process that died while holding the session
        std::fs::write(store.lock_path(credential.fingerprint()), b"999999\n")?;

        // Nothing listens there, so the handshake fails after the store lock
        let connector = TelegramConnector::new(
            store.clone(),
            Some("http://127.0.0.1:9"),
            Duration::from_secs(5),
        )?;
        match connector.open(&credential).await {
            Ok(_) => return Err("handshake against a closed port succeeded".into()),
            Err(e) => assert!(!matches!(e, PlatformError::StorageBusy(_)), "got {e:?}"),
        }

        // The failed open gave the lock back
        store.acquire(credential.fingerprint()).await?;
        Ok(())
    }
}
