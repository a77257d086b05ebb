use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:8123/api/webhook/mordomo_ha";
pub const DEFAULT_PORT: u16 = 3781;
pub const DEFAULT_PROTOCOL_ENDPOINT: &str = "ws://127.0.0.1:3782";

/// Runtime configuration of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Directory holding the persisted session credentials.
    pub auth_dir: PathBuf,
    /// URL inbound messages are posted to.
    pub webhook_url: String,
    /// Port of the control API, bound on all interfaces.
    pub port: u16,
    /// Bearer token for the webhook. Empty sends no header.
    pub webhook_token: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// WebSocket URL of the protocol endpoint.
    pub protocol_endpoint: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("./auth"),
            webhook_url: DEFAULT_WEBHOOK_URL.into(),
            port: DEFAULT_PORT,
            webhook_token: String::new(),
            log_level: "warn".into(),
            protocol_endpoint: DEFAULT_PROTOCOL_ENDPOINT.into(),
        }
    }
}

impl BridgeConfig {
    /// Build a config from `MORDOMO_*` variables, as returned by `lookup`.
    /// Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("MORDOMO_AUTH_DIR") {
            config = config.with_auth_dir(dir);
        }
        if let Some(url) = lookup("MORDOMO_WEBHOOK_URL") {
            config = config.with_webhook_url(url);
        }
        if let Some(port) = lookup("MORDOMO_BRIDGE_PORT") {
            config = config.with_port(parse_port(&port));
        }
        if let Some(token) = lookup("MORDOMO_HA_TOKEN") {
            config = config.with_webhook_token(token);
        }
        if let Some(level) = lookup("MORDOMO_LOG_LEVEL") {
            config = config.with_log_level(level);
        }
        if let Some(endpoint) = lookup("MORDOMO_PROTOCOL_ENDPOINT") {
            config = config.with_protocol_endpoint(endpoint);
        }
        config
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_auth_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.auth_dir = dir.into();
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = url.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_webhook_token(mut self, token: impl Into<String>) -> Self {
        self.webhook_token = token.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_protocol_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.protocol_endpoint = endpoint.into();
        self
    }

    /// The webhook token, if one is set.
    pub fn token(&self) -> Option<&str> {
        Some(self.webhook_token.as_str()).filter(|t| !t.is_empty())
    }
}

/// Parse a listen port, falling back to the default on garbage.
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            warn!(value = raw, default = DEFAULT_PORT, "invalid MORDOMO_BRIDGE_PORT, using default");
            DEFAULT_PORT
        }
    }
}
