//! Test doubles for the protocol seam and the webhook target.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::{Connection, Connector, OutgoingContent, ProtocolError, ProtocolSession};
use crate::relay::RelayPayload;
use crate::store::Credentials;
use crate::types::{MessageKey, ProtocolEvent};
use crate::webhook::{RelayForwardError, WebhookSink};

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default)]
pub struct MockSession {
    pub sent: Mutex<Vec<(String, OutgoingContent)>>,
    pub read: Mutex<Vec<MessageKey>>,
    pub logouts: AtomicUsize,
    pub ended: AtomicBool,
    pub fail_side_effects: AtomicBool,
    pub fail_send: AtomicBool,
}

impl MockSession {
    pub fn sent(&self) -> Vec<(String, OutgoingContent)> {
        self.sent.lock().unwrap().clone()
    }

    /// Text bodies sent, in order.
    pub fn texts(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|(jid, content)| content.as_text().map(|t| (jid, t.to_string())))
            .collect()
    }

    pub fn reactions(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|(jid, content)| match content {
                OutgoingContent::Reaction { react } => Some((jid, react.text)),
                _ => None,
            })
            .collect()
    }

    pub fn read_keys(&self) -> Vec<MessageKey> {
        self.read.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolSession for MockSession {
    async fn send(&self, jid: &str, content: OutgoingContent) -> Result<(), ProtocolError> {
        let is_reaction = matches!(content, OutgoingContent::Reaction { .. });
        if is_reaction && self.fail_side_effects.load(Ordering::SeqCst) {
            return Err(ProtocolError::Request("reaction rejected".into()));
        }
        if !is_reaction && self.fail_send.load(Ordering::SeqCst) {
            return Err(ProtocolError::Request("send rejected".into()));
        }
        self.sent.lock().unwrap().push((jid.to_string(), content));
        Ok(())
    }

    async fn mark_read(&self, keys: &[MessageKey]) -> Result<(), ProtocolError> {
        if self.fail_side_effects.load(Ordering::SeqCst) {
            return Err(ProtocolError::Request("read receipt rejected".into()));
        }
        self.read.lock().unwrap().extend_from_slice(keys);
        Ok(())
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

pub struct MockLink {
    pub session: Arc<MockSession>,
    pub events: mpsc::Sender<ProtocolEvent>,
    pub credentials: Credentials,
}

/// Connector handing out [`MockSession`]s and keeping the event senders.
#[derive(Default)]
pub struct MockConnector {
    links: Mutex<Vec<Arc<MockLink>>>,
    pub fail: AtomicBool,
}

impl MockConnector {
    pub fn connect_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn link(&self, index: usize) -> Arc<MockLink> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<MockLink> {
        let links = self.links.lock().unwrap();
        Arc::clone(links.last().unwrap())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, credentials: Credentials) -> Result<Connection, ProtocolError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connect("endpoint unreachable".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(MockSession::default());
        self.links.lock().unwrap().push(Arc::new(MockLink {
            session: Arc::clone(&session),
            events: tx,
            credentials,
        }));
        Ok(Connection {
            session,
            events: rx,
        })
    }
}

/// Webhook target that records payloads instead of posting them.
#[derive(Debug, Default)]
pub struct RecordingWebhook {
    pub payloads: Mutex<Vec<RelayPayload>>,
    pub fail: AtomicBool,
}

impl RecordingWebhook {
    pub fn payloads(&self) -> Vec<RelayPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSink for RecordingWebhook {
    async fn forward(&self, payload: &RelayPayload) -> Result<(), RelayForwardError> {
        self.payloads.lock().unwrap().push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayForwardError::Timeout);
        }
        Ok(())
    }
}
