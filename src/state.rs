use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Connection state of the bridged account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Waiting for the user to scan the pairing code.
    #[serde(rename = "qr_ready")]
    PairingRequired,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::PairingRequired => "qr_ready",
            Self::Connected => "connected",
        }
    }
}

/// Session bookkeeping owned by the session manager.
///
/// `pairing_artifact` and `pairing_image` are only ever set while the state
/// is [`ConnectionState::PairingRequired`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    state: ConnectionState,
    last_error: Option<String>,
    pairing_artifact: Option<String>,
    pairing_image: Option<String>,
}

impl Session {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pairing_artifact(&self) -> Option<&str> {
        self.pairing_artifact.as_deref()
    }

    pub fn pairing_image(&self) -> Option<&str> {
        self.pairing_image.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Move to `next`, dropping pairing data when leaving the pairing state.
    pub fn transition(&mut self, next: ConnectionState) {
        if next != ConnectionState::PairingRequired {
            self.pairing_artifact = None;
            self.pairing_image = None;
        }
        self.state = next;
    }

    /// Enter the pairing state with a fresh artifact. A previous image is
    /// dropped so it can never belong to a different artifact.
    pub fn set_pairing(&mut self, artifact: impl Into<String>) {
        self.state = ConnectionState::PairingRequired;
        self.pairing_artifact = Some(artifact.into());
        self.pairing_image = None;
        self.last_error = None;
    }

    /// Attach the rendered image, if it still belongs to the current artifact.
    pub fn set_pairing_image(&mut self, artifact: &str, image: String) -> bool {
        if self.pairing_artifact.as_deref() != Some(artifact) {
            return false;
        }
        self.pairing_image = Some(image);
        true
    }

    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Fully open: pairing data and the last error are gone.
    pub fn mark_connected(&mut self) {
        self.transition(ConnectionState::Connected);
        self.last_error = None;
    }
}

/// Inbound/outbound message counters, scoped to the process lifetime.
#[derive(Debug, Default)]
pub struct MessageCounters {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

/// Point-in-time view of [`MessageCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    #[serde(rename = "in")]
    pub inbound: u64,
    #[serde(rename = "out")]
    pub outbound: u64,
}

impl MessageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound(&self) {
        self.outbound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inbound: self.inbound.load(Ordering::Relaxed),
            outbound: self.outbound.load(Ordering::Relaxed),
        }
    }
}
