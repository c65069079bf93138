//! wsgate-server: realtime WebSocket gateway.
//!
//! Accepts long-lived WebSocket connections, tracks their liveness, and
//! routes typed JSON envelopes to registered handlers. Authentication is
//! delegated to a pluggable verifier; domain handlers sit behind the
//! dispatch contract.

mod config;
mod connection;
mod dispatch;
mod domain;
mod handlers;
mod registry;
mod server;
mod sweeper;
mod transport;

use clap::Parser;
use config::GatewayConfig;
use dispatch::HandlerRegistry;
use domain::{register_domain_handlers, StaticDomainService};
use handlers::{register_builtins, SharedTokenVerifier};
use server::Gateway;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// wsgate-server — realtime WebSocket gateway
#[derive(Parser, Debug)]
#[command(name = "wsgate-server", version, about = "Realtime WebSocket gateway")]
struct Cli {
    /// Listen address
    #[arg(long)]
    listen_addr: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.wsgate/config.toml")]
    config: String,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Liveness sweep period in seconds
    #[arg(long)]
    sweep_period: Option<u64>,

    /// Staleness threshold in seconds
    #[arg(long)]
    stale_threshold: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting wsgate-server");

    // Load config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match GatewayConfig::load(
        Some(&config_path),
        cli.listen_addr.as_deref(),
        cli.port,
        cli.max_connections,
        cli.sweep_period,
        cli.stale_threshold,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if config.shared_token.is_none() {
        warn!("no shared token configured — authenticate requests will be rejected");
    }

    // Handler wiring: built-ins plus the domain contract handlers.
    let verifier = Arc::new(SharedTokenVerifier::new(config.shared_token.clone()));
    let mut handlers = HandlerRegistry::new();
    register_builtins(&mut handlers, verifier);
    register_domain_handlers(&mut handlers, Arc::new(StaticDomainService));

    let gateway = Gateway::new(config, handlers);

    // Binding the listener is the one fatal startup step.
    let bound = match gateway.clone().bind().await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    // Run until shutdown signal
    tokio::select! {
        result = bound.run() => {
            if let Err(e) = result {
                error!(error = %e, "gateway error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            gateway.shutdown();
        }
    }

    info!("wsgate-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
