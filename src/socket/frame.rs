//! JSON frames exchanged with the protocol endpoint.
//!
//! Client frames are flat objects tagged by `type`. Server frames wrap their
//! payload as `{"type": <event>, "data": <payload>}`, because event payloads
//! such as `messages.upsert` carry a `type` field of their own.

use serde::{Deserialize, Serialize};

use crate::protocol::{OutgoingContent, RequestOutcome};
use crate::store::Credentials;
use crate::types::{ConnectionUpdate, MessageBatch, MessageKey, ProtocolEvent};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// First frame on every connection.
    Init { creds: Credentials },
    Send {
        id: String,
        jid: String,
        content: OutgoingContent,
    },
    Read { id: String, keys: Vec<MessageKey> },
    Logout { id: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),
    #[serde(rename = "messages.upsert")]
    MessagesUpsert(MessageBatch),
    #[serde(rename = "creds.update")]
    CredsUpdate(Credentials),
    #[serde(rename = "result")]
    Result(RequestResult),
}

/// Answer to a request frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestResult {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RequestResult {
    pub fn into_outcome(self) -> RequestOutcome {
        if self.ok {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "request rejected".to_string()))
        }
    }
}

impl ServerFrame {
    /// The event this frame carries, or `None` for request results.
    pub fn into_event(self) -> Option<ProtocolEvent> {
        match self {
            Self::ConnectionUpdate(update) => Some(ProtocolEvent::ConnectionUpdate(update)),
            Self::MessagesUpsert(batch) => Some(ProtocolEvent::MessageBatch(batch)),
            Self::CredsUpdate(creds) => Some(ProtocolEvent::CredsUpdate(creds)),
            Self::Result(_) => None,
        }
    }
}
