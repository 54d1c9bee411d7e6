//! File command channel.
//!
//! One outstanding request at a time, carried through files in a runtime
//! directory:
//! - command file: replaced atomically on each submission
//! - response file: its appearance signals completion, contents are the
//!   interpreter's error text; deleted as soon as it is read
//! - stdout log: append-only, read incrementally through a byte cursor
//!
//! With the handshake enabled each command starts with a `'#ivbs <token>`
//! comment line that the interpreter echoes as the first response line, so
//! a leftover response from an earlier command is never mistaken for the
//! current one.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::ChannelConfig;

/// Child environment variable naming the command file
pub const CMD_PATH_ENV: &str = "IVBS_CMD_PATH";
/// Child environment variable naming the response file
pub const RET_PATH_ENV: &str = "IVBS_RET_PATH";
/// Child environment variable naming the interpreter's debug log
pub const DEBUG_PATH_ENV: &str = "IVBS_DEBUG_PATH";

/// Header line prefix carrying the handshake token
pub const TOKEN_PREFIX: &str = "'#ivbs ";

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("interpreter exited before responding (exit code {0:?})")]
    PeerExited(Option<i32>),
}

/// Process state reported by the waiter's liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Exited(Option<i32>),
}

/// Result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Stdout log delta since the previous read
    pub stdout: String,
    /// Response file contents (interpreter error text)
    pub stderr: String,
}

/// Transport file locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    pub command: PathBuf,
    pub response: PathBuf,
    pub stdout_log: PathBuf,
    pub debug_log: PathBuf,
}

impl ChannelPaths {
    /// `<stem>.input`, `<stem>.stderr`, `<stem>.stdout` and `<stem>.log` in `dir`
    pub fn in_dir(dir: &Path, stem: &str) -> Self {
        Self {
            command: dir.join(format!("{stem}.input")),
            response: dir.join(format!("{stem}.stderr")),
            stdout_log: dir.join(format!("{stem}.stdout")),
            debug_log: dir.join(format!("{stem}.log")),
        }
    }

    /// Files named after the current process id
    pub fn for_current_process(dir: &Path) -> Self {
        Self::in_dir(dir, &std::process::id().to_string())
    }

    /// Environment the interpreter needs to find the channel
    pub fn env(&self) -> [(&'static str, &Path); 3] {
        [
            (CMD_PATH_ENV, self.command.as_path()),
            (RET_PATH_ENV, self.response.as_path()),
            (DEBUG_PATH_ENV, self.debug_log.as_path()),
        ]
    }

    fn command_tmp(&self) -> PathBuf {
        let mut name = self.command.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

pub struct CommandChannel {
    dir: PathBuf,
    paths: ChannelPaths,
    poll_interval: Duration,
    handshake: bool,
    stdout_cursor: u64,
}

impl CommandChannel {
    pub fn new(dir: impl Into<PathBuf>, paths: ChannelPaths) -> Self {
        Self {
            dir: dir.into(),
            paths,
            poll_interval: Duration::from_millis(500),
            handshake: true,
            stdout_cursor: 0,
        }
    }

    /// Channel in the configured runtime directory, files named by pid
    pub fn from_config(config: &ChannelConfig) -> Self {
        let dir = config.effective_runtime_dir();
        let paths = ChannelPaths::for_current_process(&dir);
        Self::new(dir, paths)
            .with_poll_interval(config.poll_interval())
            .with_handshake(config.handshake)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_handshake(mut self, enabled: bool) -> Self {
        self.handshake = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> &ChannelPaths {
        &self.paths
    }

    pub fn handshake(&self) -> bool {
        self.handshake
    }

    /// Create the runtime directory, clear leftover command and response
    /// files, truncate the stdout log and rewind the cursor.
    pub fn prepare(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        for stale in [
            self.paths.command.clone(),
            self.paths.command_tmp(),
            self.paths.response.clone(),
        ] {
            remove_if_exists(&stale)?;
        }
        File::create(&self.paths.stdout_log)?;
        self.stdout_cursor = 0;
        debug!("Channel prepared in {}", self.dir.display());
        Ok(())
    }

    /// Append handle on the stdout log, for the child's stdout and stderr
    pub fn open_log(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.stdout_log)
    }

    /// Fresh token for the next command, or None in legacy mode
    pub fn new_token(&self) -> Option<String> {
        self.handshake.then(|| uuid::Uuid::new_v4().to_string())
    }

    /// Write one command. Any stale response is removed first and the
    /// command file only appears once fully written.
    pub fn send(&self, code: &str, token: Option<&str>) -> io::Result<()> {
        remove_if_exists(&self.paths.response)?;

        let body = code
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .lines()
            .collect::<Vec<_>>()
            .join("\n");
        let contents = match token {
            Some(token) => format!("{TOKEN_PREFIX}{token}\n{body}"),
            None => body,
        };

        let tmp = self.paths.command_tmp();
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.paths.command)?;
        trace!(bytes = code.len(), "Command written");
        Ok(())
    }

    /// Consume the response file if present. A response whose header does
    /// not carry `token` is deleted and reported as absent.
    pub fn take_response(&self, token: Option<&str>) -> io::Result<Option<String>> {
        let contents = match fs::read(&self.paths.response) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        remove_if_exists(&self.paths.response)?;

        let Some(token) = token else {
            return Ok(Some(contents));
        };

        let (header, rest) = contents.split_once('\n').unwrap_or((contents.as_str(), ""));
        match header.trim_end().strip_prefix(TOKEN_PREFIX) {
            Some(found) if found == token => Ok(Some(rest.to_string())),
            found => {
                warn!(expected = token, found = ?found, "Discarding stale response");
                Ok(None)
            }
        }
    }

    /// Block until the response for `token` arrives, the peer exits or
    /// `timeout` passes. `None` waits forever.
    pub fn await_response<F>(
        &self,
        token: Option<&str>,
        timeout: Option<Duration>,
        mut liveness: F,
    ) -> Result<String, ChannelError>
    where
        F: FnMut() -> Liveness,
    {
        let watch = self.watch();
        let deadline = timeout.map(|t| (t, Instant::now() + t));

        loop {
            if let Some(text) = self.take_response(token)? {
                return Ok(text);
            }

            if let Liveness::Exited(code) = liveness() {
                // The answer may have landed just before the exit
                if let Some(text) = self.take_response(token)? {
                    return Ok(text);
                }
                return Err(ChannelError::PeerExited(code));
            }

            let wait = match deadline {
                Some((limit, at)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(ChannelError::Timeout(limit));
                    }
                    (at - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };

            match &watch {
                Some((_watcher, events)) => match events.recv_timeout(wait) {
                    Ok(()) => while events.try_recv().is_ok() {},
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
                },
                None => thread::sleep(wait),
            }
        }
    }

    /// New stdout log bytes since the previous read
    pub fn read_stdout(&mut self) -> io::Result<String> {
        let mut file = match File::open(&self.paths.stdout_log) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e),
        };

        if file.metadata()?.len() < self.stdout_cursor {
            warn!("Stdout log shrank, rewinding");
            self.stdout_cursor = 0;
        }

        file.seek(SeekFrom::Start(self.stdout_cursor))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.stdout_cursor += buf.len() as u64;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn stdout_cursor(&self) -> u64 {
        self.stdout_cursor
    }

    /// Send `code`, wait for its response and collect the stdout delta.
    pub fn round_trip<F>(
        &mut self,
        code: &str,
        timeout: Option<Duration>,
        liveness: F,
    ) -> Result<Response, ChannelError>
    where
        F: FnMut() -> Liveness,
    {
        let token = self.new_token();
        self.send(code, token.as_deref())?;
        let stderr = self.await_response(token.as_deref(), timeout, liveness)?;
        let stdout = self.read_stdout()?;
        Ok(Response { stdout, stderr })
    }

    fn watch(&self) -> Option<(RecommendedWatcher, Receiver<()>)> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(_) => {
                let _ = tx.send(());
            }
            Err(e) => warn!("Watch error: {:?}", e),
        });

        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                debug!("File watcher unavailable, polling: {}", e);
                return None;
            }
        };
        if let Err(e) = watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
            debug!("Cannot watch {}, polling: {}", self.dir.display(), e);
            return None;
        }
        Some((watcher, rx))
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn channel(dir: &TempDir) -> CommandChannel {
        let paths = ChannelPaths::in_dir(dir.path(), "test");
        CommandChannel::new(dir.path(), paths)
    }

    #[test]
    fn test_paths_follow_pid_naming() {
        let paths = ChannelPaths::in_dir(Path::new("/run/x"), "42");
        assert_eq!(paths.command, PathBuf::from("/run/x/42.input"));
        assert_eq!(paths.response, PathBuf::from("/run/x/42.stderr"));
        assert_eq!(paths.stdout_log, PathBuf::from("/run/x/42.stdout"));
        assert_eq!(paths.debug_log, PathBuf::from("/run/x/42.log"));
        assert_eq!(paths.command_tmp(), PathBuf::from("/run/x/42.input.tmp"));
    }

    #[test]
    fn test_send_normalizes_newlines_and_prefixes_token() {
        let dir = TempDir::new().unwrap();
        let mut ch = channel(&dir);
        ch.prepare().unwrap();

        ch.send("a = 1\r\nb = 2", Some("tok")).unwrap();
        let written = fs::read_to_string(&ch.paths().command).unwrap();
        assert_eq!(written, "'#ivbs tok\na = 1\nb = 2");
        assert!(!ch.paths().command_tmp().exists());
    }

    #[test]
    fn test_send_splits_lone_carriage_returns_and_drops_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let mut ch = channel(&dir);
        ch.prepare().unwrap();

        ch.send("a = 1\rb = 2\r\n\nc = 3\n", None).unwrap();
        let written = fs::read_to_string(&ch.paths().command).unwrap();
        assert_eq!(written, "a = 1\nb = 2\n\nc = 3");
    }

    #[test]
    fn test_send_removes_stale_response() {
        let dir = TempDir::new().unwrap();
        let mut ch = channel(&dir);
        ch.prepare().unwrap();

        fs::write(&ch.paths().response, "old").unwrap();
        ch.send("x", None).unwrap();
        assert!(!ch.paths().response.exists());
    }

    #[test]
    fn test_prepare_truncates_log_and_rewinds() {
        let dir = TempDir::new().unwrap();
        let mut ch = channel(&dir);
        ch.prepare().unwrap();
        fs::write(&ch.paths().stdout_log, "hello").unwrap();
        assert_eq!(ch.read_stdout().unwrap(), "hello");
        assert_eq!(ch.stdout_cursor(), 5);

        ch.prepare().unwrap();
        assert_eq!(ch.stdout_cursor(), 0);
        assert_eq!(fs::metadata(&ch.paths().stdout_log).unwrap().len(), 0);
    }

    #[test]
    fn test_missing_header_is_stale() {
        let dir = TempDir::new().unwrap();
        let ch = channel(&dir);
        fs::write(&ch.paths().response, "no header").unwrap();

        assert_eq!(ch.take_response(Some("tok")).unwrap(), None);
        assert!(!ch.paths().response.exists());
    }

    #[test]
    fn test_header_with_crlf_is_accepted() {
        let dir = TempDir::new().unwrap();
        let ch = channel(&dir);
        fs::write(&ch.paths().response, "'#ivbs tok\r\nboom").unwrap();

        assert_eq!(ch.take_response(Some("tok")).unwrap(), Some("boom".to_string()));
    }
}
