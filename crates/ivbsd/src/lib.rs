//! ivbsd library - kernel daemon internals exposed for testing.

pub mod handlers;
pub mod rpc_server;
