use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bridge_server::config::{
    CallConfig, FileConfig, Profile, ServerConfig, default_config_dir, load_config,
};
use bridge_server::{AppState, router, ws};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Backend for embedded host-application clients")]
struct Args {
    /// Directory holding bridge.toml (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Configuration preset
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (overrides config, 0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_directive = if args.debug {
        "bridge_server=debug,host_bridge=debug,tower_http=debug,info"
    } else {
        "bridge_server=info,host_bridge=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);
    let file_config: FileConfig = load_config(&config_dir, args.profile.as_ref())
        .extract()
        .context("Failed to load configuration")?;

    let mut server_config = ServerConfig::from_file(&file_config.server);
    if let Some(host) = args.host {
        server_config.host = host;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }
    let call_config = CallConfig::from_file(&file_config.calls);
    info!(
        timeout_secs = call_config.timeout.as_secs(),
        retry_attempts = call_config.retry.max_attempts,
        "call settings"
    );

    let addr = format!("{}:{}", server_config.host, server_config.port)
        .parse::<SocketAddr>()
        .context("Invalid listen address")?;
    let heartbeat = server_config.heartbeat_interval;
    let state = AppState::new(server_config, call_config);

    let shutdown = CancellationToken::new();
    if let Some(interval) = heartbeat {
        ws::spawn_heartbeat(state.bridge.clone(), interval, shutdown.clone());
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("Bridge listening on http://{}", actual_addr);
    info!("Embedded clients connect to ws://{}/ws", actual_addr);

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
