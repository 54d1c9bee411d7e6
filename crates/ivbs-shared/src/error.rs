//! Error types shared across the daemon boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IvbsError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Daemon not running at {0}")]
    DaemonNotRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IvbsError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            IvbsError::Parse(_) => -32700,
            IvbsError::MethodNotFound(_) => -32601,
            IvbsError::InvalidParams(_) => -32602,
            IvbsError::Supervisor(_) => -32001,
            IvbsError::History(_) => -32002,
            IvbsError::DaemonNotRunning(_) => -32000,
            IvbsError::Io(_) => -32603,
            IvbsError::Json(_) => -32700,
            IvbsError::Internal(_) => -32603,
        }
    }
}
