//! Shell pass-through (`!cmd`) execution.
//!
//! The command line is split with POSIX shell quoting rules and run
//! directly, no shell in between. Output is captured in full; a command
//! that outlives the timeout is killed. Failures never propagate as
//! errors: they come back as error text for the console.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between exit checks while a command runs
const WAIT_POLL: Duration = Duration::from_millis(20);

/// How a shell command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShellStatus {
    /// Exit code 0
    Success,
    /// Ran but returned non-zero
    NonZeroExit,
    /// Program not found
    CommandNotFound,
    /// Killed after the timeout
    Timeout,
    /// Empty command or unbalanced quotes
    ParseError,
    /// Any other spawn or wait failure
    OsError,
}

impl ShellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NonZeroExit => "non-zero exit",
            Self::CommandNotFound => "command not found",
            Self::Timeout => "timeout",
            Self::ParseError => "parse error",
            Self::OsError => "OS error",
        }
    }
}

/// Captured result of one shell command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellOutput {
    pub command: String,
    /// Exit code, -1 when the process never ran or was killed
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub status: ShellStatus,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status == ShellStatus::Success
    }

    fn failed(command: &str, status: ShellStatus, stderr: String, start: Instant) -> Self {
        Self {
            command: command.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Split and run `command_line`.
    pub fn run(&self, command_line: &str) -> ShellOutput {
        let start = Instant::now();

        let argv = match shlex::split(command_line) {
            Some(argv) if !argv.is_empty() => argv,
            Some(_) => {
                return ShellOutput::failed(
                    command_line,
                    ShellStatus::ParseError,
                    "empty command".to_string(),
                    start,
                )
            }
            None => {
                return ShellOutput::failed(
                    command_line,
                    ShellStatus::ParseError,
                    format!("cannot parse command line: {}", command_line),
                    start,
                )
            }
        };

        debug!(program = %argv[0], "Running shell command");
        let spawned = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let status = if e.kind() == io::ErrorKind::NotFound {
                    ShellStatus::CommandNotFound
                } else {
                    ShellStatus::OsError
                };
                return ShellOutput::failed(
                    command_line,
                    status,
                    format!("{}: {}", argv[0], e),
                    start,
                );
            }
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit = self.wait(&mut child);
        let stdout = join(stdout);
        let mut stderr = join(stderr);
        let duration_ms = start.elapsed().as_millis() as u64;

        let (exit_code, status) = match exit {
            Ok(Some(0)) => (0, ShellStatus::Success),
            Ok(Some(code)) => (code, ShellStatus::NonZeroExit),
            // Terminated by a signal
            Ok(None) => (-1, ShellStatus::NonZeroExit),
            Err(WaitError::Timeout) => {
                warn!(command = command_line, "Shell command timed out");
                stderr.push_str(&format!(
                    "command timed out after {} seconds\n",
                    self.timeout.as_secs()
                ));
                (-1, ShellStatus::Timeout)
            }
            Err(WaitError::Io(e)) => {
                stderr.push_str(&format!("OS error: {}\n", e));
                (-1, ShellStatus::OsError)
            }
        };

        ShellOutput {
            command: command_line.to_string(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            status,
        }
    }

    fn wait(&self, child: &mut Child) -> Result<Option<i32>, WaitError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
                return Ok(status.code());
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill timed out command: {}", e);
                }
                child.wait().map_err(WaitError::Io)?;
                return Err(WaitError::Timeout);
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

enum WaitError {
    Timeout,
    Io(io::Error),
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!("Pipe read ended early: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
