use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use mordomo_bridge::{
    create_router, ApiState, BridgeConfig, DirCredentialStore, HttpWebhook, MessageCounters,
    MessageRelay, OutboundGateway, SessionManager, SidecarConnector,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bridge a WhatsApp Web session to a Home Assistant webhook.
///
/// Every flag falls back to its `MORDOMO_*` environment variable.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Directory holding the session credentials.
    #[arg(long)]
    auth_dir: Option<PathBuf>,

    /// Webhook URL inbound messages are posted to.
    #[arg(long)]
    webhook_url: Option<String>,

    /// Control API port.
    #[arg(long)]
    port: Option<u16>,

    /// Bearer token sent to the webhook.
    #[arg(long)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// WebSocket URL of the protocol endpoint.
    #[arg(long)]
    protocol_endpoint: Option<String>,
}

impl Cli {
    fn apply(self, mut config: BridgeConfig) -> BridgeConfig {
        if let Some(dir) = self.auth_dir {
            config = config.with_auth_dir(dir);
        }
        if let Some(url) = self.webhook_url {
            config = config.with_webhook_url(url);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(token) = self.token {
            config = config.with_webhook_token(token);
        }
        if let Some(level) = self.log_level {
            config = config.with_log_level(level);
        }
        if let Some(endpoint) = self.protocol_endpoint {
            config = config.with_protocol_endpoint(endpoint);
        }
        config
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging comes up first so configuration warnings are visible.
    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("MORDOMO_LOG_LEVEL").ok())
        .unwrap_or_else(|| BridgeConfig::default().log_level);
    init_tracing(&level);

    let config = cli.apply(BridgeConfig::from_env());

    let store = Arc::new(DirCredentialStore::open(config.auth_dir.clone())?);
    let counters = Arc::new(MessageCounters::new());
    let webhook = Arc::new(HttpWebhook::new(
        config.webhook_url.clone(),
        config.token().map(str::to_string),
    ));
    let relay = Arc::new(MessageRelay::new(webhook, Arc::clone(&counters)));
    let connector = Arc::new(SidecarConnector::new(config.protocol_endpoint.clone()));

    let sessions = SessionManager::spawn(connector, store, relay);
    let gateway = Arc::new(OutboundGateway::new(
        sessions.clone(),
        Arc::clone(&counters),
    ));
    let app = create_router(ApiState::new(sessions.clone(), gateway, counters));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    println!("Mordomo WhatsApp bridge");
    println!("  HTTP API:  http://{addr}");
    println!("  Webhook:   {}", config.webhook_url);
    println!("  Auth dir:  {}", config.auth_dir.display());
    println!("  Endpoint:  {}", config.protocol_endpoint);
    info!(%addr, "control API listening");

    sessions.start();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    info!("bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down");
}
