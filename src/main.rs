//! wsbridge - WebSocket to TCP relay for browser clients
//!
//! Serves the bundled web client at `/` and relays `/ws/{server}/{port}`
//! WebSocket connections to TCP services.

mod assets;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wsbridge_policy::{AccessPolicy, OriginAllowList};
use wsbridge_relay::{RelayConfig, RelayServer};

/// wsbridge - Relay browser WebSocket connections to TCP services
#[derive(Parser, Debug)]
#[command(name = "wsbridge")]
#[command(about = "Relay browser WebSocket connections to TCP services")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "WSBRIDGE_LISTEN", default_value = "0.0.0.0")]
    listen: String,

    /// Port to listen on
    #[arg(long, env = "WSBRIDGE_PORT", default_value_t = 9090)]
    port: u16,

    /// Site domain; pages from it and its www. alias may use the relay.
    /// `localhost` is always allowed.
    #[arg(long, env = "WSBRIDGE_DOMAIN")]
    domain: Option<String>,

    /// Additional origin host allowed to use the relay (repeatable)
    #[arg(long = "allow-origin", env = "WSBRIDGE_ALLOW_ORIGIN", value_delimiter = ',')]
    allow_origins: Vec<String>,

    /// Allow relaying to loopback and private addresses (trusted setups only)
    #[arg(long)]
    allow_private_targets: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WSBRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Setup logging; `RUST_LOG` wins over `--log-level` when set.
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn access_policy(cli: &Cli) -> AccessPolicy {
    let origins = cli
        .allow_origins
        .iter()
        .fold(
            OriginAllowList::for_domain(cli.domain.as_deref().unwrap_or_default()),
            |list, host| list.with_host(host),
        );

    AccessPolicy::new(origins).with_private_targets(cli.allow_private_targets)
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    shutdown.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let policy = access_policy(&cli);
    info!("Allowed origins: {:?}", policy.origins().hosts());
    if policy.allows_private_targets() {
        warn!("Relaying to loopback and private addresses is enabled");
    }

    let shutdown = CancellationToken::new();
    let relay = RelayServer::new(RelayConfig::default(), policy, shutdown.clone());

    let router = relay
        .router()
        .fallback(assets::serve_asset)
        .layer(TraceLayer::new_for_http());

    let listener = wsbridge_relay::bind(&cli.listen, cli.port)
        .await
        .context("Failed to start relay listener")?;

    let signals = tokio::spawn(wait_for_signal(shutdown.clone()));

    wsbridge_relay::serve(listener, router, shutdown.clone())
        .await
        .context("Relay server failed")?;

    // Stops the signal task when the server exits for another reason.
    signals.abort();
    info!("wsbridge stopped");
    Ok(())
}
