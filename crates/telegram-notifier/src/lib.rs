mod offset;

pub use offset::OffsetStore;

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use agent_core::{ChatChannel, ChatUpdate};

/// Long-poll bot client for the operator chat channel.
///
/// The highest consumed update id is persisted after every successful poll,
/// so a message handled before shutdown is never re-delivered after restart.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: i64,
    last_update_id: AtomicI64,
    offset_store: OffsetStore,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: i64, offset_store: OffsetStore) -> Result<Self> {
        // Read timeout sits above the server-side long-poll wait.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(40))
            .build()?;
        let last_update_id = AtomicI64::new(offset_store.load().unwrap_or(0));
        Ok(Self {
            client,
            bot_token,
            chat_id,
            last_update_id,
            offset_store,
        })
    }

    pub fn from_env(chat_id: i64, offset_store: OffsetStore) -> Result<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        Self::new(bot_token, chat_id, offset_store)
    }

    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && self.chat_id != 0
    }

    /// Highest update id consumed so far (0 before any poll).
    pub fn last_update_id(&self) -> i64 {
        self.last_update_id.load(Ordering::SeqCst)
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }
}

#[async_trait]
impl ChatChannel for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        if !self.is_configured() {
            tracing::debug!("Chat channel not configured, dropping outbound message");
            return Ok(());
        }

        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .context("sendMessage request")?;

        let body: TelegramResponse<serde_json::Value> =
            response.json().await.context("sendMessage response")?;
        if !body.ok {
            return Err(anyhow!(
                "sendMessage rejected: {}",
                body.description.unwrap_or_default()
            ));
        }
        Ok(())
    }

    async fn poll(&self, timeout_secs: u64) -> Result<Vec<ChatUpdate>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }

        let offset = self.last_update_id.load(Ordering::SeqCst) + 1;
        let url = format!(
            "{}?offset={}&timeout={}",
            self.api_url("getUpdates"),
            offset,
            timeout_secs
        );
        let response = self.client.get(&url).send().await.context("getUpdates")?;
        let body: TelegramResponse<Vec<Update>> =
            response.json().await.context("getUpdates response")?;
        if !body.ok {
            return Err(anyhow!(
                "getUpdates rejected: {}",
                body.description.unwrap_or_default()
            ));
        }

        let mut consumed: Vec<ChatUpdate> = Vec::new();
        let mut max_id = self.last_update_id.load(Ordering::SeqCst);
        for update in body.result.unwrap_or_default() {
            max_id = max_id.max(update.update_id);
            let Some(message) = update.message else { continue };
            let Some(text) = message.text else { continue };
            // Only the operator's chat is honoured.
            if message.chat.id != self.chat_id {
                tracing::warn!("Ignoring message from unknown chat {}", message.chat.id);
                continue;
            }
            consumed.push(ChatUpdate {
                update_id: update.update_id,
                chat_id: message.chat.id,
                text,
            });
        }

        // Persisted on every successful poll; restart resumes past this id.
        if max_id > self.last_update_id.swap(max_id, Ordering::SeqCst) {
            self.offset_store.save(max_id)?;
        }
        Ok(consumed)
    }
}
