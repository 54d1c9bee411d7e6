//! RPC Client - Unix socket client for communicating with ivbsd

use anyhow::{Context, Result};
use ivbs_shared::rpc::{
    ExecuteParams, ExecuteResult, HistoryParams, HistoryResult, IsCompleteParams,
    IsCompleteResult, KernelInfoResult, RpcMethod, RpcRequest, RpcResponse, ShutdownParams,
    ShutdownResult,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;

/// Environment override for the daemon socket
pub const SOCKET_ENV: &str = "IVBSD_SOCKET";

/// RPC Client for communicating with the daemon
pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RpcClient {
    /// Socket path: explicit flag, then `$IVBSD_SOCKET`, then config
    pub fn discover_socket_path(explicit: Option<&Path>, configured: PathBuf) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(path) = std::env::var_os(SOCKET_ENV) {
            return PathBuf::from(path);
        }
        configured
    }

    /// Connect with a few retries, for a daemon that is still starting
    pub async fn connect(path: &Path) -> Result<Self> {
        let max_retries = 5;
        let mut retry_delay = Duration::from_millis(50);

        for attempt in 0..max_retries {
            match UnixStream::connect(path).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Ok(Self {
                        reader: BufReader::new(reader),
                        writer,
                    });
                }
                Err(e) if attempt == max_retries - 1 => {
                    return Err(Self::socket_error_with_hint(path, e));
                }
                Err(_) => {
                    sleep(retry_delay).await;
                    retry_delay = (retry_delay * 2).min(Duration::from_millis(500));
                }
            }
        }

        anyhow::bail!("Failed to connect to daemon at {}. Is ivbsd running?", path.display())
    }

    fn socket_error_with_hint(path: &Path, error: std::io::Error) -> anyhow::Error {
        use std::io::ErrorKind;

        let hint = match error.kind() {
            ErrorKind::NotFound => format!(
                "Socket not found at {}. Is ivbsd running?\nTry: ivbsd --socket {}",
                path.display(),
                path.display()
            ),
            ErrorKind::PermissionDenied => format!(
                "Permission denied on {}. The socket belongs to another user.",
                path.display()
            ),
            ErrorKind::ConnectionRefused => format!(
                "Daemon not responding on {}. Remove the stale socket and restart ivbsd.",
                path.display()
            ),
            _ => format!("Failed to connect to daemon at {}", path.display()),
        };

        anyhow::Error::new(error).context(hint)
    }

    /// Send one request and decode its result
    pub async fn call<P, T>(&mut self, method: RpcMethod, params: Option<&P>) -> Result<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let params = params.map(serde_json::to_value).transpose()?;
        let request = RpcRequest::new(method, params);

        let request_json = serde_json::to_string(&request)? + "\n";
        self.writer
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read response")?;
        if bytes_read == 0 {
            anyhow::bail!("Daemon closed the connection");
        }

        let response: RpcResponse =
            serde_json::from_str(&line).context("Failed to parse response")?;
        if response.id != request.id {
            anyhow::bail!("Response ID mismatch");
        }

        response
            .into_result()
            .with_context(|| format!("{} request failed", method.as_str()))
    }

    pub async fn execute(&mut self, code: &str) -> Result<ExecuteResult> {
        let params = ExecuteParams {
            code: code.to_string(),
            silent: false,
        };
        self.call(RpcMethod::Execute, Some(&params)).await
    }

    pub async fn is_complete(&mut self, code: &str) -> Result<IsCompleteResult> {
        let params = IsCompleteParams {
            code: code.to_string(),
        };
        self.call(RpcMethod::IsComplete, Some(&params)).await
    }

    pub async fn history(&mut self, n: u32) -> Result<HistoryResult> {
        let params = HistoryParams {
            n: Some(n),
            ..HistoryParams::default()
        };
        self.call(RpcMethod::History, Some(&params)).await
    }

    pub async fn shutdown(&mut self, restart: bool) -> Result<ShutdownResult> {
        let params = ShutdownParams { restart };
        self.call(RpcMethod::Shutdown, Some(&params)).await
    }

    pub async fn kernel_info(&mut self) -> Result<KernelInfoResult> {
        self.call::<(), _>(RpcMethod::KernelInfo, None).await
    }
}
