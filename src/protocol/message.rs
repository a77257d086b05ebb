//! Outgoing message content.
//!
//! Serialized as the content object the protocol endpoint expects:
//! `{text}`, `{image: {url}, caption}` or `{react: {text, key}}`.

use serde::Serialize;

use crate::types::MessageKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionBody {
    pub text: String,
    pub key: MessageKey,
}

/// Content of an outgoing protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutgoingContent {
    Text { text: String },
    Image { image: MediaRef, caption: String },
    Reaction { react: ReactionBody },
}

impl OutgoingContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>, caption: impl Into<String>) -> Self {
        Self::Image {
            image: MediaRef { url: url.into() },
            caption: caption.into(),
        }
    }

    pub fn reaction(key: &MessageKey, emoji: impl Into<String>) -> Self {
        Self::Reaction {
            react: ReactionBody {
                text: emoji.into(),
                key: key.clone(),
            },
        }
    }

    /// Text body, if this is a plain text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}
