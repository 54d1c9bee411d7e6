//! iVBScript Daemon - hosts the interpreter session behind JSON-RPC
//!
//! Starts the interpreter, then serves execute/is_complete/history
//! requests from the console or a notebook bridge.

use anyhow::{Context, Result};
use clap::Parser;
use ivbs_common::config::IvbsConfig;
use ivbs_common::kernel::Kernel;
use ivbsd::rpc_server::{self, DaemonState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ivbsd")]
#[command(about = "iVBScript kernel daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (default: $IVBS_CONFIG or <config dir>/ivbscript/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket to listen on (overrides daemon.socket_path)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Serve one session on stdin/stdout instead of a socket
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = IvbsConfig::load(args.config.as_deref())?;

    // Logs go to stderr so --stdio keeps stdout for responses
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("iVBScript daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut kernel = Kernel::from_config(&config);
    kernel.start().context("Failed to start interpreter session")?;
    info!(
        session = kernel.supervisor().session_id().unwrap_or_default(),
        pid = ?kernel.supervisor().pid(),
        "Interpreter session ready"
    );

    let state = DaemonState::new(kernel);
    if args.stdio {
        rpc_server::serve_stdio(Arc::clone(&state)).await?;
    } else {
        let socket = args
            .socket
            .unwrap_or_else(|| config.daemon.effective_socket_path());
        rpc_server::serve_unix(Arc::clone(&state), &socket).await?;
    }

    // Stop the interpreter if no shutdown request did it already
    let kernel = Arc::clone(&state.kernel);
    tokio::task::spawn_blocking(move || match kernel.lock() {
        Ok(mut kernel) => {
            if let Err(e) = kernel.shutdown(false) {
                warn!("Failed to stop interpreter: {}", e);
            }
        }
        Err(_) => warn!("Kernel state poisoned, interpreter left to drop"),
    })
    .await?;

    info!("Shutting down gracefully");
    Ok(())
}
