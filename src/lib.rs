//! mordomo-bridge: WhatsApp Web session bridge for Home Assistant.
//!
//! Keeps one authenticated WhatsApp session alive, relays inbound text
//! messages to a webhook and exposes a small HTTP API for sending messages
//! and checking pairing status.
//!
//! ## Modules
//!
//! - `types` - JIDs and the events emitted by a protocol session
//! - `protocol` - the session seam, outgoing content and pairing codes
//! - `socket` - WebSocket transport to the protocol endpoint
//! - `store` - credential persistence
//! - `session` - connection state machine and reconnect policy
//! - `relay` / `webhook` - inbound message forwarding
//! - `outbound` - operator sends
//! - `api` - HTTP control API
//! - `config` - runtime configuration

pub mod api;
pub mod config;
pub mod outbound;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod socket;
pub mod state;
pub mod store;
pub mod types;
pub mod webhook;

pub use api::{create_router, ApiError, ApiState};
pub use config::BridgeConfig;
pub use outbound::{OutboundError, OutboundGateway, SessionProvider};
pub use protocol::{Connector, ProtocolError, ProtocolSession};
pub use relay::{InboundMessage, MessageRelay, RelayPayload};
pub use session::{ConnectionError, SessionManager};
pub use socket::SidecarConnector;
pub use state::{ConnectionState, MessageCounters, Session};
pub use store::{CredentialStore, Credentials, DirCredentialStore, StoreError};
pub use types::JID;
pub use webhook::{HttpWebhook, RelayForwardError, WebhookSink};
