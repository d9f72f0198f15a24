use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One operator message received from the chat channel.
///
/// `update_id` is monotonically increasing; the poll loop persists the highest
/// id it has consumed so a message is never re-delivered across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUpdate {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: String,
}

/// The chat-channel surface the gateway and loops go through.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Push a message to the operator. Failures are returned, not retried.
    async fn send(&self, text: &str) -> Result<()>;

    /// Long-poll for new operator messages past the persisted offset.
    async fn poll(&self, timeout_secs: u64) -> Result<Vec<ChatUpdate>>;
}
