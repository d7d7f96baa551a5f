//! Progress notifications: plain-text milestones pushed to an external
//! channel.
//!
//! Delivery failures are the caller's problem to swallow — the executor
//! logs and continues, a notification must never abort a swarm.

use async_trait::async_trait;
use serde_json::json;

use crate::errors::SwarmError;

/// Receiver of milestone messages (phase start, task completion/failure,
/// swarm terminal summary).
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), SwarmError>;
}

/// Bot-API notifier: `POST {api_base}/bot{token}/sendMessage` with a chat id.
pub struct BotApiNotifier {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl BotApiNotifier {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    /// Build from `SWARM_BOT_TOKEN`, if set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("SWARM_BOT_TOKEN").ok()?;
        Some(Self::new("https://api.telegram.org", token))
    }
}

#[async_trait]
impl ProgressNotifier for BotApiNotifier {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), SwarmError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        self.http
            .post(&url)
            .json(&json!({ "chat_id": channel, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Deliver if a channel is configured; log and swallow any failure.
pub async fn best_effort(notifier: &dyn ProgressNotifier, channel: Option<&str>, text: &str) {
    let Some(channel) = channel else { return };
    if let Err(e) = notifier.notify(channel, text).await {
        tracing::warn!(channel, error = %e, "notification delivery failed");
    }
}

/// Discards every message. Used for tests and quiet CLI runs.
pub struct NullNotifier;

#[async_trait]
impl ProgressNotifier for NullNotifier {
    async fn notify(&self, _channel: &str, _text: &str) -> Result<(), SwarmError> {
        Ok(())
    }
}
