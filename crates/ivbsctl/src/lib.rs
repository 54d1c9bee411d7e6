//! ivbsctl library - console client modules exposed for testing.

pub mod repl;
pub mod rpc_client;
