//! iVBScript configuration.
//!
//! Loaded from TOML. Lookup order: explicit path, `$IVBS_CONFIG`, then
//! `<config dir>/ivbscript/config.toml`. A missing file yields defaults;
//! every field has its own default so partial files are fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment override for the config file location
pub const CONFIG_ENV: &str = "IVBS_CONFIG";

const CONFIG_DIR: &str = "ivbscript";
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IvbsConfig {
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub magic: MagicConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// External interpreter process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Interpreter executable
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments passed to the interpreter
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory for the interpreter process (inherits when unset)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Command that makes the interpreter exit on its own
    #[serde(default = "default_quit_command")]
    pub quit_command: String,

    /// Seconds to wait after the quit command before killing (valid: 0-60)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_program() -> String {
    "cscript.exe".to_string()
}

fn default_args() -> Vec<String> {
    vec!["//nologo".to_string(), "interpreter.vbs".to_string()]
}

fn default_quit_command() -> String {
    "WScript.Quit".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            quit_command: default_quit_command(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl InterpreterConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs.min(60))
    }
}

/// Command channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Directory holding the transport files
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,

    /// Longest sleep between response checks (valid: 10-5000 ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Deadline for one command; 0 waits forever
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Tag commands with a token the interpreter must echo back
    #[serde(default = "default_handshake")]
    pub handshake: bool,
}

fn default_poll_interval() -> u64 {
    500
}

fn default_command_timeout() -> u64 {
    300
}

fn default_handshake() -> bool {
    true
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            poll_interval_ms: default_poll_interval(),
            command_timeout_secs: default_command_timeout(),
            handshake: default_handshake(),
        }
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(10, 5000))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Configured runtime directory, or `<data dir>/ivbscript/runtime_data`
    pub fn effective_runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(CONFIG_DIR)
                .join("runtime_data")
        })
    }
}

/// History store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SQLite file; `:memory:` keeps history in memory only
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Session id candidates tried before giving up (valid: 1-100)
    #[serde(default = "default_session_attempts")]
    pub max_session_id_attempts: u32,
}

fn default_session_attempts() -> u32 {
    15
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_session_id_attempts: default_session_attempts(),
        }
    }
}

impl HistoryConfig {
    /// Configured path, or `~/.ivbscript_history.db`
    pub fn effective_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".ivbscript_history.db")
        })
    }

    pub fn effective_attempts(&self) -> u32 {
        self.max_session_id_attempts.clamp(1, 100)
    }
}

/// Shell-escape (`!cmd`) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Seconds before a shell command is killed (valid: 1-3600)
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,
}

fn default_shell_timeout() -> u64 {
    15
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shell_timeout(),
        }
    }
}

impl ShellConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(1, 3600))
    }
}

/// Magic command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagicConfig {
    /// Command printing the clipboard on stdout, used by `%paste`
    #[serde(default = "default_paste_command")]
    pub paste_command: String,
}

fn default_paste_command() -> String {
    if cfg!(windows) {
        "powershell -NoProfile -Command Get-Clipboard".to_string()
    } else if cfg!(target_os = "macos") {
        "pbpaste".to_string()
    } else {
        "xclip -selection clipboard -o".to_string()
    }
}

impl Default for MagicConfig {
    fn default() -> Self {
        Self {
            paste_command: default_paste_command(),
        }
    }
}

/// Daemon settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

impl DaemonConfig {
    /// Configured socket, or `<runtime dir>/ivbscript/ivbsd.sock`
    pub fn effective_socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(CONFIG_DIR)
                .join("ivbsd.sock")
        })
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IvbsConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Resolve the config file: explicit path, then env, then default
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(Self::default_path)
    }

    /// Load configuration. A missing file is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::resolve_path(explicit) {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
