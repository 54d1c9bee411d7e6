//! Shared types for the iVBScript kernel components.
//!
//! Wire types for the daemon/console protocol, error codes, and the
//! statement completeness analyzer (pure, no I/O).

pub mod completeness;
pub mod error;
pub mod rpc;

pub use completeness::{analyze, Completeness};
pub use error::IvbsError;

/// Implementation name reported in kernel info.
pub const IMPLEMENTATION: &str = "iVBScript";

/// Version of the kernel implementation.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
