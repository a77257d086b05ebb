//! Protocol module: the seam between the bridge and the messaging network.
//!
//! The network session itself is external. The bridge only sees it through
//! the [`Connector`] and [`ProtocolSession`] traits defined here.

mod message;
mod qr;
mod request;
#[cfg(test)]
pub(crate) mod mock;

pub use message::*;
pub use qr::*;
pub use request::*;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::Credentials;
use crate::types::{MessageKey, ProtocolEvent};

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("session closed")]
    Closed,
    #[error("request failed: {0}")]
    Request(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One live connection to the messaging network.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Send content to a routing identifier.
    async fn send(&self, jid: &str, content: OutgoingContent) -> Result<(), ProtocolError>;

    /// Send read receipts for the given messages.
    async fn mark_read(&self, keys: &[MessageKey]) -> Result<(), ProtocolError>;

    /// React to a message.
    async fn react(&self, key: &MessageKey, emoji: &str) -> Result<(), ProtocolError> {
        self.send(&key.remote_jid, OutgoingContent::reaction(key, emoji))
            .await
    }

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Close the connection without touching the account.
    async fn end(&self);
}

/// A freshly established session plus the stream of events it emits.
pub struct Connection {
    pub session: Arc<dyn ProtocolSession>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Establishes protocol sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credentials: Credentials) -> Result<Connection, ProtocolError>;
}
