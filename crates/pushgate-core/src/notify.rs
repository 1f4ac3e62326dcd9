//! Feedback channel used to report blocked (and optionally promoted) runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Errors from posting to the feedback channel.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel responded with status {status}")]
    Status { status: u16 },

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

/// Capability interface for posting a message to a named channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, channel: &str, message: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    channel: &'a str,
    text: &'a str,
}

/// Posts `{"channel": ..., "text": ...}` as JSON to a webhook URL.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pushgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn post(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&WebhookPayload {
                channel,
                text: message,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Writes messages to the log instead of an external channel.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn post(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        info!(event = "notification.logged", channel = %channel, "{message}");
        Ok(())
    }
}
