use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

use web_terminal::config::{FileConfig, load_config};
use web_terminal::terminal::{TerminalDefaults, TerminalManager};
use web_terminal::{AppState, router};

#[derive(Parser)]
#[command(name = "web-terminal")]
#[command(about = "Shared terminal sessions over WebSocket")]
struct Cli {
    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file (default: ./web-terminal.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "web_terminal=debug,pty_manager=debug,tower_http=debug,info"
    } else {
        "web_terminal=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config: FileConfig = load_config(cli.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!("Starting web terminal");

    let manager = Arc::new(TerminalManager::new(TerminalDefaults::from(
        &config.terminal,
    )));
    let state = AppState::new(manager.clone(), config.socket.heartbeat_interval());
    let app = router(state);

    let addr = config.server.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Web terminal listening on http://{}", actual_addr);
    info!("  WS  /terminal/control       - Terminal control channel");
    info!("  WS  /terminal/connect/{{id}}  - Direct terminal stream");
    info!("  GET /version                - Protocol version");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Stopping terminals...");
    manager.shutdown().await;

    info!("Shutdown complete");
    server_result
}
