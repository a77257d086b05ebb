//! Event types emitted by a live protocol session.
//!
//! The shapes mirror the JSON the protocol endpoint sends, so they derive
//! `Deserialize` directly. Consumers get them through the event channel
//! returned by [`crate::protocol::Connector::connect`].

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::store::Credentials;

/// Connection phase reported by a `connection.update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// Details about why the last connection closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    /// Protocol status code attached to the close, if any.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Human-readable error message.
    #[serde(default)]
    pub message: Option<String>,
}

impl LastDisconnect {
    pub fn reason(&self) -> DisconnectReason {
        DisconnectReason::from_status_code(self.status_code)
    }
}

/// Connection state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<ConnectionPhase>,
    /// Pairing artifact to present to the user.
    #[serde(default)]
    pub qr: Option<String>,
    #[serde(default)]
    pub last_disconnect: Option<LastDisconnect>,
}

impl ConnectionUpdate {
    pub fn phase(phase: ConnectionPhase) -> Self {
        Self {
            connection: Some(phase),
            ..Default::default()
        }
    }

    pub fn pairing(qr: impl Into<String>) -> Self {
        Self {
            qr: Some(qr.into()),
            ..Default::default()
        }
    }

    pub fn closed(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            connection: Some(ConnectionPhase::Close),
            qr: None,
            last_disconnect: Some(LastDisconnect {
                status_code,
                message: Some(message.into()),
            }),
        }
    }
}

/// Reason for disconnection, decoded from the protocol status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Session was unlinked from the phone
    LoggedOut,
    Forbidden,
    /// Connection lost or timed out
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    /// Another client took over the session
    ConnectionReplaced,
    BadSession,
    UnavailableService,
    /// Protocol asks for an immediate reconnect
    RestartRequired,
    /// Unclassified status code
    Unknown(Option<u16>),
}

/// How the session manager reacts to a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    /// Credentials are dead: wipe them, then re-pair.
    ForcedLogout,
    /// Reconnect right away with the same credentials.
    RestartRequired,
    /// Reconnect after a pause with the same credentials.
    Other,
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(403) => Self::Forbidden,
            Some(408) => Self::ConnectionLost,
            Some(411) => Self::MultideviceMismatch,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(503) => Self::UnavailableService,
            Some(515) => Self::RestartRequired,
            other => Self::Unknown(other),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::LoggedOut => Some(401),
            Self::Forbidden => Some(403),
            Self::ConnectionLost => Some(408),
            Self::MultideviceMismatch => Some(411),
            Self::ConnectionClosed => Some(428),
            Self::ConnectionReplaced => Some(440),
            Self::BadSession => Some(500),
            Self::UnavailableService => Some(503),
            Self::RestartRequired => Some(515),
            Self::Unknown(code) => *code,
        }
    }

    pub fn class(&self) -> DisconnectClass {
        match self {
            Self::LoggedOut => DisconnectClass::ForcedLogout,
            Self::RestartRequired => DisconnectClass::RestartRequired,
            _ => DisconnectClass::Other,
        }
    }
}

/// Kind of a message batch. Only `notify` batches carry live traffic;
/// `append` batches are history replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Notify,
    Append,
    #[serde(other)]
    Unknown,
}

/// A batch of raw messages delivered together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBatch {
    #[serde(rename = "type")]
    pub kind: BatchKind,
    #[serde(default, deserialize_with = "deserialize_messages")]
    pub messages: Vec<RawMessage>,
}

impl MessageBatch {
    pub fn is_live(&self) -> bool {
        self.kind == BatchKind::Notify
    }
}

/// Key identifying a message, also used to address read receipts and
/// reactions back at it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptionBody {
    #[serde(default)]
    pub caption: Option<String>,
}

/// Wire shape of a message body: several optional text-bearing fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<TextBody>,
    #[serde(default)]
    pub image_message: Option<CaptionBody>,
    #[serde(default)]
    pub video_message: Option<CaptionBody>,
}

/// Content of a message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Plain text message
    Conversation(String),
    /// Text with link preview, quote or mentions
    ExtendedText(String),
    ImageCaption(String),
    VideoCaption(String),
    /// Anything without relayable text
    Other,
}

impl MessageContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Conversation(text)
            | Self::ExtendedText(text)
            | Self::ImageCaption(text)
            | Self::VideoCaption(text) => Some(text),
            Self::Other => None,
        }
    }
}

impl WireMessage {
    /// Populated content fields in precedence order.
    pub fn contents(&self) -> Vec<MessageContent> {
        let mut contents = Vec::new();
        if let Some(text) = &self.conversation {
            contents.push(MessageContent::Conversation(text.clone()));
        }
        if let Some(text) = self.extended_text_message.as_ref().and_then(|m| m.text.clone()) {
            contents.push(MessageContent::ExtendedText(text));
        }
        if let Some(text) = self.image_message.as_ref().and_then(|m| m.caption.clone()) {
            contents.push(MessageContent::ImageCaption(text));
        }
        if let Some(text) = self.video_message.as_ref().and_then(|m| m.caption.clone()) {
            contents.push(MessageContent::VideoCaption(text));
        }
        if contents.is_empty() {
            contents.push(MessageContent::Other);
        }
        contents
    }
}

/// Return the first non-empty text payload.
pub fn extract_text(contents: &[MessageContent]) -> Option<&str> {
    contents
        .iter()
        .filter_map(MessageContent::text)
        .find(|text| !text.is_empty())
}

/// One message as delivered by the protocol session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<WireMessage>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub message_timestamp: i64,
}

impl RawMessage {
    pub fn text(&self) -> Option<String> {
        let contents = self.message.as_ref()?.contents();
        extract_text(&contents).map(str::to_string)
    }
}

// A message that does not parse is skipped on its own, the rest of the
// batch is kept.
fn deserialize_messages<'de, D>(deserializer: D) -> Result<Vec<RawMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawMessage>(value) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "skipping malformed message");
                None
            }
        })
        .collect())
}

// Timestamps arrive as numbers, decimal strings or 64-bit
// `{low, high, unsigned}` objects.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom("timestamp out of range")),
        serde_json::Value::String(s) => s.parse().map_err(D::Error::custom),
        serde_json::Value::Null => Ok(0),
        serde_json::Value::Object(long) => {
            let half = |name: &str| {
                long.get(name)
                    .and_then(serde_json::Value::as_i64)
                    .ok_or_else(|| D::Error::custom(format!("timestamp is missing `{name}`")))
            };
            let (low, high) = (half("low")?, half("high")?);
            Ok((high << 32) | i64::from(low as u32))
        }
        other => Err(D::Error::custom(format!("unexpected timestamp: {other}"))),
    }
}

/// All events a protocol session can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    ConnectionUpdate(ConnectionUpdate),
    MessageBatch(MessageBatch),
    CredsUpdate(Credentials),
}
