//! RPC Server - line-delimited JSON-RPC over a Unix socket or stdio

use anyhow::{Context, Result};
use ivbs_common::kernel::Kernel;
use ivbs_shared::rpc::RpcResponse;
use ivbs_shared::IvbsError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::handlers::{self, Followup, Handled};

/// Kernel shared by all connections
pub type SharedKernel = Arc<Mutex<Kernel>>;

/// Daemon state shared across connections
pub struct DaemonState {
    pub kernel: SharedKernel,
    stop: Notify,
}

impl DaemonState {
    pub fn new(kernel: Kernel) -> Arc<Self> {
        Arc::new(Self {
            kernel: Arc::new(Mutex::new(kernel)),
            stop: Notify::new(),
        })
    }
}

/// Serve on a Unix socket until a shutdown request or Ctrl-C.
pub async fn serve_unix(state: Arc<DaemonState>, socket_path: &Path) -> Result<()> {
    use tokio::net::UnixListener;

    if let Some(socket_dir) = socket_path.parent() {
        tokio::fs::create_dir_all(socket_dir)
            .await
            .context("Failed to create socket directory")?;
    }

    // Remove old socket if it exists
    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind Unix socket {}", socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!("RPC server listening on {}", socket_path.display());

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = handle_connection(reader, writer, &state).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            _ = state.stop.notified() => {
                info!("Stopping RPC server");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    let _ = tokio::fs::remove_file(socket_path).await;
    Ok(())
}

/// Serve a single session on stdin/stdout.
pub async fn serve_stdio(state: Arc<DaemonState>) -> Result<()> {
    info!("RPC server reading from stdin");
    tokio::select! {
        result = handle_connection(tokio::io::stdin(), tokio::io::stdout(), &state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

/// Handle one client until it disconnects or the daemon stops.
pub async fn handle_connection<R, W>(reader: R, mut writer: W, state: &DaemonState) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read request")?;

        if bytes_read == 0 {
            // Connection closed
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let handled = process_line(&state.kernel, line.clone()).await;

        let response_json = serde_json::to_string(&handled.response)? + "\n";
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer.flush().await.context("Failed to flush response")?;

        match handled.followup {
            Followup::Continue => {}
            Followup::Stop => {
                state.stop.notify_one();
                break;
            }
            Followup::Teardown => {
                let kernel = Arc::clone(&state.kernel);
                tokio::task::spawn_blocking(move || handlers::terminate(&kernel)).await?;
            }
        }
    }

    Ok(())
}

async fn process_line(kernel: &SharedKernel, line: String) -> Handled {
    let kernel = Arc::clone(kernel);
    match tokio::task::spawn_blocking(move || handlers::handle_line(&kernel, &line)).await {
        Ok(handled) => handled,
        Err(e) => {
            warn!("Request task failed: {}", e);
            let err = IvbsError::Internal(format!("request task failed: {}", e));
            Handled {
                response: RpcResponse::from_error(String::new(), &err),
                followup: Followup::Continue,
            }
        }
    }
}
