//! termgrid-server binary entry point.
//!
//! Serves the container dashboard API, the terminal WebSocket, and the static UI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use termgrid::terminal::TerminalConfig;
use termgrid::{build_router, runtime, AppState};

/// Container dashboard backend with in-browser terminals.
#[derive(Parser, Debug)]
#[command(name = "termgrid-server")]
#[command(about = "Container dashboard backend with in-browser terminals")]
struct Args {
    /// Address to bind
    #[arg(long, env = "BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Directory with the dashboard UI, served under /ui/
    #[arg(long, env = "UI_DIR", default_value = "/ui")]
    ui_dir: PathBuf,

    /// Docker endpoint (unix:///path or tcp://host:port)
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,

    /// Use the in-memory demo runtime instead of Docker
    #[arg(long, env = "TERMGRID_DEMO")]
    demo: bool,

    /// Delay before the shell setup script is sent, in milliseconds
    #[arg(long, env = "TERMGRID_SETTLE_DELAY_MS", default_value = "100")]
    settle_delay_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::default().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;

    info!(
        addr = %addr,
        ui_dir = %args.ui_dir.display(),
        demo = args.demo,
        docker_host = ?args.docker_host,
        "starting termgrid-server"
    );

    let runtime = runtime::select(args.demo, args.docker_host.as_deref()).await;
    let terminal = TerminalConfig {
        settle_delay: Duration::from_millis(args.settle_delay_ms),
        ..TerminalConfig::default()
    };
    let state = AppState::new(runtime, terminal);
    let shutdown = state.shutdown.clone();

    let ui_dir = if args.ui_dir.is_dir() {
        Some(args.ui_dir.clone())
    } else {
        warn!(ui_dir = %args.ui_dir.display(), "ui directory not found, static files disabled");
        None
    };

    let app = build_router(state, ui_dir);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM after cancelling every live session.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
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

    info!("shutdown requested, closing terminal sessions");
    shutdown.cancel();
}
