//! Inbound message relay.
//!
//! Turns live message batches from the protocol session into webhook
//! payloads. Messages within a batch are forwarded one at a time, in the
//! order they arrived.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::protocol::ProtocolSession;
use crate::state::MessageCounters;
use crate::types::{strip_decoration, MessageBatch, MessageKey, RawMessage, JID};
use crate::webhook::WebhookSink;

/// Reaction attached to every relayed message as a receipt for the sender.
pub const ACK_REACTION: &str = "👀";

/// Characters of message text shown in log lines.
pub(crate) const LOG_PREVIEW_CHARS: usize = 80;

pub(crate) fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}

/// A normalized inbound message that qualified for relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender with the server decoration stripped; the participant for groups.
    pub sender_id: String,
    pub is_group: bool,
    pub group_id: Option<String>,
    pub text: String,
    pub source_ref: MessageKey,
    /// Routing identifier of the chat the message arrived in.
    pub remote_target: String,
    pub timestamp: i64,
}

/// Why a raw message was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FromSelf,
    Broadcast,
    NoText,
}

impl InboundMessage {
    pub fn from_raw(raw: &RawMessage) -> Result<Self, SkipReason> {
        let key = &raw.key;
        if key.from_me {
            return Err(SkipReason::FromSelf);
        }

        let chat: JID = key.remote_jid.parse().unwrap_or_default();
        if chat.is_broadcast() {
            return Err(SkipReason::Broadcast);
        }

        let text = raw.text().ok_or(SkipReason::NoText)?;

        let is_group = chat.is_group();
        let chat_id = strip_decoration(&key.remote_jid);
        let (sender_id, group_id) = if is_group {
            let participant = key.participant.as_deref().unwrap_or_default();
            (strip_decoration(participant), Some(chat_id))
        } else {
            (chat_id, None)
        };

        Ok(Self {
            sender_id,
            is_group,
            group_id,
            text,
            source_ref: key.clone(),
            remote_target: key.remote_jid.clone(),
            timestamp: raw.message_timestamp,
        })
    }
}

/// JSON body posted to the webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub from: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub is_group: bool,
    pub group_id: Option<String>,
    pub remote_jid: String,
    pub message_id: String,
    pub timestamp: i64,
}

impl From<&InboundMessage> for RelayPayload {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            from: msg.sender_id.clone(),
            message: msg.text.clone(),
            kind: "text",
            is_group: msg.is_group,
            group_id: msg.group_id.clone(),
            remote_jid: msg.remote_target.clone(),
            message_id: msg.source_ref.id.clone(),
            timestamp: msg.timestamp,
        }
    }
}

/// Filters, acknowledges and forwards inbound messages.
pub struct MessageRelay {
    webhook: Arc<dyn WebhookSink>,
    counters: Arc<MessageCounters>,
}

impl MessageRelay {
    pub fn new(webhook: Arc<dyn WebhookSink>, counters: Arc<MessageCounters>) -> Self {
        Self { webhook, counters }
    }

    /// Relay every qualifying message of a batch. Returns how many were
    /// forwarded (successfully or not).
    pub async fn handle_batch(
        &self,
        session: &Arc<dyn ProtocolSession>,
        batch: MessageBatch,
    ) -> usize {
        if !batch.is_live() {
            debug!(kind = ?batch.kind, count = batch.messages.len(), "skipping non-live batch");
            return 0;
        }

        let mut relayed = 0;
        for raw in &batch.messages {
            let msg = match InboundMessage::from_raw(raw) {
                Ok(msg) => msg,
                Err(reason) => {
                    debug!(?reason, id = %raw.key.id, "skipping message");
                    continue;
                }
            };

            self.counters.record_inbound();
            info!(from = %msg.sender_id, text = %preview(&msg.text), "message received");

            acknowledge(Arc::clone(session), msg.source_ref.clone());

            let payload = RelayPayload::from(&msg);
            if let Err(e) = self.webhook.forward(&payload).await {
                warn!(error = %e, message_id = %payload.message_id, "webhook forward failed, dropping message");
            }
            relayed += 1;
        }
        relayed
    }
}

/// Mark the message read and react to it, off the relay path. Either may
/// fail on its own; failures are only logged.
fn acknowledge(session: Arc<dyn ProtocolSession>, key: MessageKey) {
    tokio::spawn(async move {
        if let Err(e) = session.mark_read(std::slice::from_ref(&key)).await {
            debug!(error = %e, id = %key.id, "mark-read failed");
        }
        if let Err(e) = session.react(&key, ACK_REACTION).await {
            debug!(error = %e, id = %key.id, "ack reaction failed");
        }
    });
}
