//! ivbs_common - iVBScript kernel library
//!
//! Everything between the wire protocol and the external interpreter:
//! configuration, the history store, the file command channel, the
//! process supervisor and the session controller that routes snippets.

pub mod channel;
pub mod config;
pub mod controller;
pub mod history;
pub mod kernel;
pub mod magic;
pub mod shell_exec;
pub mod supervisor;

pub use channel::{ChannelError, ChannelPaths, CommandChannel, Liveness, Response};
pub use config::IvbsConfig;
pub use controller::{Outcome, Route, SessionController};
pub use history::{HistoryError, HistoryRecord, HistoryStore, SessionIdGenerator};
pub use kernel::Kernel;
pub use shell_exec::{ShellOutput, ShellRunner};
pub use supervisor::{Supervisor, SupervisorError};
