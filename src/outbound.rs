//! Outbound gateway: operator send requests to the live session.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::protocol::{OutgoingContent, ProtocolError, ProtocolSession};
use crate::relay::preview;
use crate::state::MessageCounters;
use crate::types::normalize_recipient;

/// Longest text segment sent in one protocol message, in characters.
pub const MAX_CHUNK_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("WhatsApp not connected")]
    NotConnected,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Gives the gateway the live session, but only while it is connected.
pub trait SessionProvider: Send + Sync {
    fn connected_session(&self) -> Option<Arc<dyn ProtocolSession>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text { body: String },
    Image { url: String, caption: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub recipient: String,
    pub content: OutboundContent,
}

/// Split `text` into ordered segments of at most `max_chars` characters.
/// Concatenating the segments gives back `text` exactly.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

pub struct OutboundGateway {
    sessions: Arc<dyn SessionProvider>,
    counters: Arc<MessageCounters>,
}

impl OutboundGateway {
    pub fn new(sessions: Arc<dyn SessionProvider>, counters: Arc<MessageCounters>) -> Self {
        Self { sessions, counters }
    }

    /// Validate and dispatch a request. Text segments are sent one after the
    /// other and the outbound counter moves once per text request. An empty
    /// text sends nothing but still counts. Images are not counted.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<(), OutboundError> {
        let session = self
            .sessions
            .connected_session()
            .ok_or(OutboundError::NotConnected)?;

        if request.recipient.trim().is_empty() {
            return Err(OutboundError::InvalidRequest("recipient is required".into()));
        }
        let jid = normalize_recipient(&request.recipient);

        match &request.content {
            OutboundContent::Text { body } => {
                for segment in chunk_text(body, MAX_CHUNK_CHARS) {
                    session.send(&jid, OutgoingContent::text(segment)).await?;
                }
                self.counters.record_outbound();
                info!(to = %request.recipient, text = %preview(body), "message sent");
            }
            OutboundContent::Image { url, caption } => {
                if url.trim().is_empty() {
                    return Err(OutboundError::InvalidRequest("image_url is required".into()));
                }
                session
                    .send(&jid, OutgoingContent::image(url.as_str(), caption.as_str()))
                    .await?;
                info!(to = %request.recipient, url = %url, "image sent");
            }
        }
        Ok(())
    }

    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<(), OutboundError> {
        self.dispatch(OutboundRequest {
            recipient: recipient.to_string(),
            content: OutboundContent::Text {
                body: text.to_string(),
            },
        })
        .await
    }

    pub async fn send_image(
        &self,
        recipient: &str,
        image_url: &str,
        caption: &str,
    ) -> Result<(), OutboundError> {
        self.dispatch(OutboundRequest {
            recipient: recipient.to_string(),
            content: OutboundContent::Image {
                url: image_url.to_string(),
                caption: caption.to_string(),
            },
        })
        .await
    }
}
