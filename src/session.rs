//! Session lifecycle: connect, pair, reconnect, log out.
//!
//! [`SessionManager`] owns the only live [`ProtocolSession`] and the
//! [`Session`] bookkeeping. A single driver task performs every (re)connect,
//! so establishing sessions is strictly sequential. Each session's events are
//! pumped by their own task tagged with a generation number; once a newer
//! session exists, anything the old one still emits is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::outbound::SessionProvider;
use crate::protocol::{
    render_pairing_image, render_qr_ascii, Connection, Connector, ProtocolSession,
};
use crate::relay::MessageRelay;
use crate::state::{ConnectionState, Session};
use crate::store::{CredentialStore, StoreError};
use crate::types::{
    ConnectionPhase, ConnectionUpdate, DisconnectClass, DisconnectReason, LastDisconnect,
    ProtocolEvent,
};

/// Pause before re-pairing after the account was logged out remotely.
pub const FORCED_LOGOUT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Pause before reconnecting after any other close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Pause before re-pairing after an operator logout.
pub const LOGOUT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// A closed connection, classified by reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection closed ({reason:?}): {message}")]
pub struct ConnectionError {
    pub reason: DisconnectReason,
    pub message: String,
}

impl From<LastDisconnect> for ConnectionError {
    fn from(last: LastDisconnect) -> Self {
        Self {
            reason: last.reason(),
            message: last.message.unwrap_or_else(|| "Unknown error".to_string()),
        }
    }
}

enum Command {
    Start,
    Shutdown,
}

struct Live {
    generation: u64,
    session: Arc<dyn ProtocolSession>,
    pump: JoinHandle<()>,
}

pub struct SessionManager {
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    relay: Arc<MessageRelay>,
    session: RwLock<Session>,
    live: Mutex<Option<Live>>,
    generation: AtomicU64,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    commands: mpsc::UnboundedSender<Command>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    /// Create the manager and spawn its driver task. Nothing connects until
    /// [`SessionManager::start`] is called.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
        relay: Arc<MessageRelay>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            connector,
            store,
            relay,
            session: RwLock::new(Session::default()),
            live: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnect: Mutex::new(None),
            commands: tx,
        });
        tokio::spawn(Arc::clone(&manager).drive(rx));
        manager
    }

    async fn drive(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Start => self.establish().await,
                Command::Shutdown => break,
            }
        }
        debug!("session driver stopped");
    }

    /// Read-only copy of the session bookkeeping.
    pub fn snapshot(&self) -> Session {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot().state()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.session.write().unwrap_or_else(|e| e.into_inner());
        f(&mut session)
    }

    /// Request a (re)connect as soon as the driver is free.
    pub fn start(&self) {
        self.cancel_reconnect();
        if self.commands.send(Command::Start).is_err() {
            warn!("session driver is gone, start request dropped");
        }
    }

    /// Request a (re)connect after `delay`. Replaces any pending request.
    fn schedule_start(&self, delay: Duration) {
        let commands = self.commands.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::Start);
        });
        if let Some(previous) = lock(&self.reconnect).replace(timer) {
            previous.abort();
        }
        info!(delay_secs = delay.as_secs_f64(), "reconnect scheduled");
    }

    fn cancel_reconnect(&self) {
        if let Some(timer) = lock(&self.reconnect).take() {
            timer.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Detach the live session, if any, so none of its later events are
    /// handled, and return it for the caller to close.
    fn retire(&self) -> Option<Arc<dyn ProtocolSession>> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let live = lock(&self.live).take()?;
        live.pump.abort();
        debug!(generation = live.generation, "retired protocol session");
        Some(live.session)
    }

    async fn establish(self: &Arc<Self>) {
        self.cancel_reconnect();
        self.update(|s| s.transition(ConnectionState::Connecting));

        if let Some(previous) = self.retire() {
            previous.end().await;
        }
        // A logout or shutdown while this attempt is in flight bumps the
        // generation and leaves this attempt stale.
        let expected = self.generation.load(Ordering::SeqCst);

        let credentials = match self.store.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "failed to load credentials");
                if self.is_current(expected) {
                    self.fail_connect(e.to_string());
                }
                return;
            }
        };

        info!(paired = !credentials.is_empty(), "connecting to WhatsApp");
        let connection = match self.connector.connect(credentials).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "failed to establish protocol session");
                if self.is_current(expected) {
                    self.fail_connect(e.to_string());
                }
                return;
            }
        };

        let Connection { session, events } = connection;
        let generation = expected + 1;
        // The slot stays locked until the session is installed, so a
        // concurrent `retire` either fails the swap or detaches this session.
        let installed = {
            let mut live = lock(&self.live);
            let swapped = self
                .generation
                .compare_exchange(expected, generation, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if swapped {
                let pump = tokio::spawn(Arc::clone(self).pump(
                    generation,
                    Arc::clone(&session),
                    events,
                ));
                *live = Some(Live {
                    generation,
                    session: Arc::clone(&session),
                    pump,
                });
            }
            swapped
        };

        if !installed {
            info!("session retired while connecting, discarding it");
            session.end().await;
        }
    }

    fn fail_connect(&self, error: String) {
        self.update(|s| {
            s.set_last_error(error);
            s.transition(ConnectionState::Disconnected);
        });
        self.schedule_start(RECONNECT_DELAY);
    }

    async fn pump(
        self: Arc<Self>,
        generation: u64,
        session: Arc<dyn ProtocolSession>,
        mut events: mpsc::Receiver<ProtocolEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                break;
            }
            match event {
                ProtocolEvent::ConnectionUpdate(update) => {
                    self.handle_connection_update(update).await;
                }
                ProtocolEvent::MessageBatch(batch) => {
                    self.relay.handle_batch(&session, batch).await;
                }
                ProtocolEvent::CredsUpdate(credentials) => {
                    if let Err(e) = self.store.save(&credentials).await {
                        error!(error = %e, "failed to persist credentials");
                    }
                }
            }
        }
        debug!(generation, "protocol event stream ended");
    }

    /// Apply one `connection.update` to the state machine.
    pub async fn handle_connection_update(&self, update: ConnectionUpdate) {
        if let Some(qr) = update.qr {
            self.enter_pairing(qr);
        }

        match update.connection {
            Some(ConnectionPhase::Close) => {
                self.handle_close(update.last_disconnect.unwrap_or_default().into())
                    .await;
            }
            Some(ConnectionPhase::Connecting) => {
                info!("connecting to WhatsApp...");
                self.update(|s| s.transition(ConnectionState::Connecting));
            }
            Some(ConnectionPhase::Open) => {
                self.update(Session::mark_connected);
                info!("WhatsApp connected");
            }
            None => {}
        }
    }

    fn enter_pairing(&self, qr: String) {
        self.update(|s| s.set_pairing(qr.clone()));

        match render_pairing_image(&qr) {
            Ok(image) => {
                self.update(|s| s.set_pairing_image(&qr, image));
            }
            Err(e) => error!(error = %e, "pairing image generation failed"),
        }

        match render_qr_ascii(&qr) {
            Ok(ascii) => info!(
                "scan the QR code with WhatsApp (Settings > Linked Devices > Link a Device)\n{ascii}"
            ),
            Err(e) => debug!(error = %e, "terminal QR rendering failed"),
        }
    }

    async fn handle_close(&self, error: ConnectionError) {
        self.update(|s| s.set_last_error(error.message.clone()));

        match error.reason.class() {
            DisconnectClass::ForcedLogout => {
                warn!(%error, "WhatsApp logged out, clearing credentials");
                self.update(|s| s.transition(ConnectionState::Disconnected));
                if let Err(e) = self.store.wipe().await {
                    error!(error = %e, "failed to wipe credentials");
                }
                self.schedule_start(FORCED_LOGOUT_RECONNECT_DELAY);
            }
            DisconnectClass::RestartRequired => {
                info!("restart required, reconnecting");
                self.update(|s| s.transition(ConnectionState::Connecting));
                self.start();
            }
            DisconnectClass::Other => {
                warn!(
                    code = ?error.reason.status_code(),
                    error = %error.message,
                    "connection closed, reconnecting in {}s",
                    RECONNECT_DELAY.as_secs()
                );
                self.update(|s| s.transition(ConnectionState::Disconnected));
                self.schedule_start(RECONNECT_DELAY);
            }
        }
    }

    /// Unlink the account, wipe credentials and come back ready to pair.
    pub async fn logout(&self) -> Result<(), StoreError> {
        self.cancel_reconnect();
        if let Some(session) = self.retire() {
            if let Err(e) = session.logout().await {
                warn!(error = %e, "protocol logout failed");
            }
            session.end().await;
        }

        self.store.wipe().await?;
        self.update(|s| s.transition(ConnectionState::Disconnected));
        info!("logged out");
        self.schedule_start(LOGOUT_RECONNECT_DELAY);
        Ok(())
    }

    /// Stop reconnecting, close the live session and stop the driver.
    pub async fn shutdown(&self) {
        self.cancel_reconnect();
        if let Some(session) = self.retire() {
            session.end().await;
        }
        self.update(|s| s.transition(ConnectionState::Disconnected));
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl SessionProvider for SessionManager {
    fn connected_session(&self) -> Option<Arc<dyn ProtocolSession>> {
        if !self.snapshot().is_connected() {
            return None;
        }
        lock(&self.live)
            .as_ref()
            .map(|live| Arc::clone(&live.session))
    }
}
