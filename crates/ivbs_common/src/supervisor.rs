//! Interpreter session supervisor.
//!
//! Owns the external interpreter process, its command channel and the
//! history store for one session. The child gets the channel paths through
//! its own environment; the daemon's working directory and environment are
//! never touched.

use std::io;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelError, CommandChannel, Liveness, Response};
use crate::config::{InterpreterConfig, IvbsConfig};
use crate::history::{HistoryError, HistoryStore};

/// Interval between exit checks during shutdown
const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("interpreter is already running")]
    AlreadyRunning,

    #[error("interpreter is not running")]
    NotRunning,

    #[error("failed to launch interpreter '{program}': {source}")]
    Spawn { program: String, source: io::Error },

    #[error("interpreter exited before responding (exit code {code:?})")]
    InterpreterExited { code: Option<i32> },

    #[error("interpreter did not respond within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Channel(ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ChannelError> for SupervisorError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::PeerExited(code) => SupervisorError::InterpreterExited { code },
            ChannelError::Timeout(limit) => SupervisorError::Timeout(limit),
            other => SupervisorError::Channel(other),
        }
    }
}

pub struct Supervisor {
    interpreter: InterpreterConfig,
    command_timeout: Option<Duration>,
    channel: CommandChannel,
    history: HistoryStore,
    child: Option<Child>,
}

impl Supervisor {
    pub fn new(interpreter: InterpreterConfig, channel: CommandChannel, history: HistoryStore) -> Self {
        Self {
            interpreter,
            command_timeout: Some(Duration::from_secs(300)),
            channel,
            history,
            child: None,
        }
    }

    pub fn from_config(config: &IvbsConfig) -> Self {
        let history = HistoryStore::new(config.history.effective_path())
            .with_max_attempts(config.history.effective_attempts());
        let channel = CommandChannel::from_config(&config.channel);
        Self::new(config.interpreter.clone(), channel, history)
            .with_command_timeout(config.channel.command_timeout())
    }

    /// Per-command deadline; None waits forever
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    pub fn session_id(&self) -> Option<&str> {
        self.history.session_id()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// True while the child process has not exited
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => probe(child) == Liveness::Alive,
            None => false,
        }
    }

    /// Connect history, prepare the channel and launch the interpreter.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }
        if self.child.is_some() {
            self.release_exited();
        }

        self.history.connect()?;
        if let Err(e) = self.launch() {
            if let Err(de) = self.history.disconnect() {
                warn!("Failed to disconnect history after launch failure: {}", de);
            }
            return Err(e);
        }
        Ok(())
    }

    fn launch(&mut self) -> Result<(), SupervisorError> {
        self.channel.prepare()?;
        let log = self.channel.open_log()?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(&self.interpreter.program);
        command
            .args(&self.interpreter.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        for (key, path) in self.channel.paths().env() {
            command.env(key, path);
        }
        if let Some(dir) = &self.interpreter.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.interpreter.program.clone(),
            source,
        })?;

        info!(
            pid = child.id(),
            session = self.session_id().unwrap_or_default(),
            "Interpreter started: {}",
            self.interpreter.program
        );
        self.child = Some(child);
        Ok(())
    }

    /// Run one snippet and return its error text and stdout delta.
    pub fn submit(&mut self, code: &str) -> Result<Response, SupervisorError> {
        let child = self.child.as_mut().ok_or(SupervisorError::NotRunning)?;
        if probe(child) != Liveness::Alive {
            return Err(SupervisorError::NotRunning);
        }

        let response = self
            .channel
            .round_trip(code, self.command_timeout, || probe(child));

        match response {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(pid = ?self.pid(), "Command failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Disconnect history, ask the interpreter to quit and kill it if it
    /// outlives the grace period.
    pub fn shutdown(&mut self) -> Result<(), SupervisorError> {
        let Some(mut child) = self.child.take() else {
            return Err(SupervisorError::NotRunning);
        };

        match self.history.disconnect() {
            Ok(()) => {}
            Err(HistoryError::NotConnected) => debug!("History was not connected"),
            Err(e) => warn!("Failed to disconnect history: {}", e),
        }

        let token = self.channel.new_token();
        if let Err(e) = self.channel.send(&self.interpreter.quit_command, token.as_deref()) {
            warn!("Failed to send quit command: {}", e);
        }

        let deadline = Instant::now() + self.interpreter.shutdown_grace();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(pid = child.id(), "Interpreter exited: {}", status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to poll interpreter: {}", e);
                    break;
                }
            }
        }

        warn!(pid = child.id(), "Interpreter ignored quit command, killing");
        kill_and_reap(&mut child)?;
        Ok(())
    }

    /// Stop the current session and start a new one.
    pub fn restart(&mut self) -> Result<(), SupervisorError> {
        match self.shutdown() {
            Ok(()) | Err(SupervisorError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start()
    }

    /// Kill the interpreter, close history, signal the parent process and
    /// exit.
    pub fn terminate_app(&mut self) -> ! {
        info!("Terminating on user request");
        if let Some(mut child) = self.child.take() {
            if let Err(e) = kill_and_reap(&mut child) {
                warn!("Failed to kill interpreter: {}", e);
            }
        }
        if self.history.is_connected() {
            if let Err(e) = self.history.disconnect() {
                warn!("Failed to disconnect history: {}", e);
            }
        }
        signal_parent();
        std::process::exit(0)
    }

    /// Drop an exited child and the session it belonged to.
    fn release_exited(&mut self) {
        if let Some(child) = self.child.take() {
            debug!(pid = child.id(), "Releasing exited interpreter");
        }
        if self.history.is_connected() {
            if let Err(e) = self.history.disconnect() {
                warn!("Failed to disconnect history: {}", e);
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if probe(&mut child) == Liveness::Alive {
                debug!(pid = child.id(), "Killing interpreter on drop");
                if let Err(e) = kill_and_reap(&mut child) {
                    warn!("Failed to kill interpreter: {}", e);
                }
            }
        }
    }
}

fn probe(child: &mut Child) -> Liveness {
    match child.try_wait() {
        Ok(Some(status)) => Liveness::Exited(status.code()),
        Ok(None) => Liveness::Alive,
        Err(e) => {
            warn!("Failed to poll interpreter: {}", e);
            Liveness::Exited(None)
        }
    }
}

fn kill_and_reap(child: &mut Child) -> io::Result<()> {
    match child.kill() {
        // Already exited
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
        Err(e) => return Err(e),
        Ok(()) => {}
    }
    child.wait()?;
    Ok(())
}

#[cfg(unix)]
fn signal_parent() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::getppid;

    let parent = getppid();
    if let Err(e) = kill(parent, Signal::SIGTERM) {
        warn!("Failed to signal parent {}: {}", parent, e);
    }
}

#[cfg(not(unix))]
fn signal_parent() {}
