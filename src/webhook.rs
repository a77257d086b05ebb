//! Webhook target for relayed inbound messages.
//!
//! Delivery is at-most-once: every payload gets a single POST with a fixed
//! timeout, and failures are reported to the caller to log, never retried.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::relay::RelayPayload;

/// Client timeout for a single webhook call.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RelayForwardError {
    #[error("webhook request timed out")]
    Timeout,
    #[error("webhook transport error: {0}")]
    Transport(String),
    #[error("webhook answered with status {0}")]
    Status(u16),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("webhook task failed: {0}")]
    Join(String),
}

/// Destination for relay payloads.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn forward(&self, payload: &RelayPayload) -> Result<(), RelayForwardError>;
}

/// Posts payloads as JSON to the configured URL.
#[derive(Clone)]
pub struct HttpWebhook {
    url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpWebhook {
    /// Create a webhook client. An empty token sends no `Authorization`
    /// header.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_timeout(url, token, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn forward(&self, payload: &RelayPayload) -> Result<(), RelayForwardError> {
        let body = serde_json::to_value(payload)?;
        let agent = self.agent.clone();
        let url = self.url.clone();
        let token = self.token.clone();

        let status = tokio::task::spawn_blocking(move || {
            let mut request = agent.post(&url);
            if let Some(token) = token {
                request = request.set("Authorization", &format!("Bearer {token}"));
            }
            match request.send_json(body) {
                Ok(response) => Ok(response.status()),
                Err(ureq::Error::Status(code, _)) => Err(RelayForwardError::Status(code)),
                Err(ureq::Error::Transport(transport)) if is_timeout(&transport) => {
                    Err(RelayForwardError::Timeout)
                }
                Err(ureq::Error::Transport(transport)) => {
                    Err(RelayForwardError::Transport(transport.to_string()))
                }
            }
        })
        .await
        .map_err(|e| RelayForwardError::Join(e.to_string()))??;

        debug!(status, message_id = %payload.message_id, "webhook accepted payload");
        Ok(())
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
        }
        source = err.source();
    }
    false
}
