//! Session controller.
//!
//! Every snippet is recorded in history, classified into a `Route` and
//! dispatched. Whatever goes wrong comes back as error text in the
//! `Outcome`; the session itself keeps going.

use anyhow::Context;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::IvbsConfig;
use crate::magic::{MagicCommand, MAGIC_PREFIX};
use crate::shell_exec::ShellRunner;
use crate::supervisor::Supervisor;

/// Prefix marking a shell pass-through command
pub const SHELL_PREFIX: char = '!';

const TEARDOWN_KEYWORDS: [&str; 4] = ["exit", "exit()", "quit", "quit()"];
const CLEAR_KEYWORDS: [&str; 2] = ["cls", "clear"];

/// Where a snippet goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// End the whole application
    Teardown,
    /// Clear the console
    ClearScreen,
    /// Run a program, text after `!`
    Shell(String),
    /// Magic command, text including `%`
    Magic(String),
    /// Everything else goes to the interpreter unchanged
    Interpreter(String),
}

impl Route {
    pub fn classify(code: &str) -> Route {
        let trimmed = code.trim();
        let lowered = trimmed.to_ascii_lowercase();

        if TEARDOWN_KEYWORDS.contains(&lowered.as_str()) {
            Route::Teardown
        } else if CLEAR_KEYWORDS.contains(&lowered.as_str()) {
            Route::ClearScreen
        } else if let Some(command) = trimmed.strip_prefix(SHELL_PREFIX) {
            Route::Shell(command.trim().to_string())
        } else if trimmed.starts_with(MAGIC_PREFIX) {
            Route::Magic(trimmed.to_string())
        } else {
            Route::Interpreter(code.to_string())
        }
    }
}

/// Result of one snippet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub stdout: String,
    pub stderr: String,
    /// The interpreter session failed to run the snippet
    pub failed: bool,
    pub clear_screen: bool,
    pub teardown: bool,
    /// The interpreter session was restarted
    pub reset: bool,
}

impl Outcome {
    fn output(stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            ..Self::default()
        }
    }

    fn error_text(text: impl Into<String>) -> Self {
        let mut stderr = text.into();
        if !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        Self::output(String::new(), stderr)
    }

    /// Render an error with its cause chain
    fn failure(err: anyhow::Error) -> Self {
        Self {
            failed: true,
            ..Self::error_text(format!("{:?}", err))
        }
    }
}

pub struct SessionController {
    supervisor: Supervisor,
    shell: ShellRunner,
    paste_command: String,
}

impl SessionController {
    pub fn new(supervisor: Supervisor, shell: ShellRunner, paste_command: impl Into<String>) -> Self {
        Self {
            supervisor,
            shell,
            paste_command: paste_command.into(),
        }
    }

    pub fn from_config(config: &IvbsConfig) -> Self {
        Self::new(
            Supervisor::from_config(config),
            ShellRunner::new(config.shell.timeout()),
            config.magic.paste_command.clone(),
        )
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Record, classify and run one snippet.
    pub fn handle(&mut self, line: i64, code: &str) -> Outcome {
        self.record(line, code);

        match Route::classify(code) {
            Route::Teardown => Outcome {
                teardown: true,
                ..Outcome::default()
            },
            Route::ClearScreen => Outcome {
                clear_screen: true,
                ..Outcome::default()
            },
            Route::Shell(command) => {
                let out = self.shell.run(&command);
                Outcome::output(out.stdout, out.stderr)
            }
            Route::Magic(text) => self.run_magic(&text),
            Route::Interpreter(code) => self.submit(&code),
        }
    }

    fn record(&mut self, line: i64, code: &str) {
        if let Err(e) = self.supervisor.history_mut().append(line, code) {
            warn!(line, "Failed to record history: {}", e);
        }
    }

    fn submit(&mut self, code: &str) -> Outcome {
        match self.supervisor.submit(code) {
            Ok(response) => Outcome::output(response.stdout, response.stderr),
            Err(e) => Outcome::failure(anyhow::Error::new(e).context("Failed to run snippet")),
        }
    }

    fn run_magic(&mut self, text: &str) -> Outcome {
        let command = match MagicCommand::parse(text) {
            Ok(command) => command,
            Err(e) => return Outcome::error_text(e.to_string()),
        };
        debug!(magic = command.name(), "Running magic command");

        match command {
            MagicCommand::Load(path) => match read_source(&path) {
                Ok(source) => self.submit(&source),
                Err(e) => Outcome::error_text(format!("{:?}", e)),
            },
            MagicCommand::Reset => match self.supervisor.restart() {
                Ok(()) => {
                    info!(session = self.supervisor.session_id().unwrap_or_default(), "Session reset");
                    Outcome {
                        reset: true,
                        ..Outcome::default()
                    }
                }
                Err(e) => Outcome::failure(anyhow::Error::new(e).context("Failed to reset session")),
            },
            MagicCommand::Paste => {
                let out = self.shell.run(&self.paste_command);
                if !out.success() {
                    return Outcome::error_text(format!(
                        "cannot read clipboard ({}): {}",
                        out.status.as_str(),
                        out.stderr.trim_end()
                    ));
                }
                self.submit(&out.stdout)
            }
        }
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to load {}", path.display()))
}
