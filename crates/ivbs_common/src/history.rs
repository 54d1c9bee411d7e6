//! Session history store.
//!
//! Append-only SQLite log of every snippet a session ran. Each connection
//! claims a session id that does not appear in the table yet; line numbers
//! come from the caller and are unique per session.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Path that selects a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Default number of session id candidates tried on connect
pub const DEFAULT_SESSION_ID_ATTEMPTS: u32 = 15;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history store is already connected")]
    AlreadyConnected,

    #[error("history store is not connected")]
    NotConnected,

    #[error("no unused session id after {attempts} attempts")]
    SessionIdExhausted { attempts: u32 },

    #[error("line {line} already recorded for session {session}")]
    DuplicateLine { session: String, line: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One executed snippet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub session_id: String,
    pub line: i64,
    pub source: String,
}

impl HistoryRecord {
    pub fn into_tuple(self) -> (String, i64, String) {
        (self.session_id, self.line, self.source)
    }
}

/// Source of candidate session ids
pub trait SessionIdGenerator: Send {
    fn next_id(&mut self) -> String;
}

/// Random UUIDv4 session ids
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl SessionIdGenerator for UuidGenerator {
    fn next_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

struct Connected {
    conn: Connection,
    session_id: String,
}

pub struct HistoryStore {
    path: PathBuf,
    max_attempts: u32,
    generator: Box<dyn SessionIdGenerator>,
    state: Option<Connected>,
}

impl HistoryStore {
    /// Store at `path` with UUIDv4 session ids. Nothing is opened until
    /// `connect`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_generator(path, Box::new(UuidGenerator))
    }

    pub fn with_generator(path: impl Into<PathBuf>, generator: Box<dyn SessionIdGenerator>) -> Self {
        Self {
            path: path.into(),
            max_attempts: DEFAULT_SESSION_ID_ATTEMPTS,
            generator,
            state: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }

    /// Session id claimed by the current connection
    pub fn session_id(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.session_id.as_str())
    }

    /// Open the database, create the schema and claim a fresh session id.
    pub fn connect(&mut self) -> Result<&str, HistoryError> {
        if self.state.is_some() {
            return Err(HistoryError::AlreadyConnected);
        }

        let conn = self.open()?;
        initialize_schema(&conn)?;

        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.next_id();
            if !session_exists(&conn, &candidate)? {
                info!(session = %candidate, attempt, "History session started");
                let state = self.state.insert(Connected {
                    conn,
                    session_id: candidate,
                });
                return Ok(&state.session_id);
            }
            debug!(session = %candidate, attempt, "Session id already in use");
        }

        if let Err((_, e)) = conn.close() {
            warn!("Failed to close history database: {}", e);
        }
        Err(HistoryError::SessionIdExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Record one snippet for the current session.
    pub fn append(&mut self, line: i64, source: &str) -> Result<(), HistoryError> {
        let state = self.state.as_ref().ok_or(HistoryError::NotConnected)?;
        let inserted = state.conn.execute(
            "INSERT INTO history (session_id, line, source) VALUES (?1, ?2, ?3)",
            params![state.session_id, line, source],
        );
        match inserted {
            Ok(_) => {
                debug!(session = %state.session_id, line, "History appended");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(HistoryError::DuplicateLine {
                session: state.session_id.clone(),
                line,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Up to `n` records, sessions in the order they started, lines ascending.
    pub fn tail(&self, n: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let state = self.state.as_ref().ok_or(HistoryError::NotConnected)?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);

        let mut stmt = state.conn.prepare(
            "SELECT h.session_id, h.line, h.source
             FROM history h
             JOIN (SELECT session_id, MIN(id) AS first_id
                   FROM history GROUP BY session_id) s
               ON s.session_id = h.session_id
             ORDER BY s.first_id, h.line
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(HistoryRecord {
                session_id: row.get(0)?,
                line: row.get(1)?,
                source: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Close the connection and forget the session id.
    pub fn disconnect(&mut self) -> Result<(), HistoryError> {
        let state = self.state.take().ok_or(HistoryError::NotConnected)?;
        info!(session = %state.session_id, "History session closed");
        state.conn.close().map_err(|(_, e)| HistoryError::Storage(e))
    }

    fn open(&self) -> Result<Connection, HistoryError> {
        if self.path.as_os_str() == IN_MEMORY {
            return Ok(Connection::open_in_memory()?);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        debug!("Opening history database at {}", self.path.display());
        let conn = Connection::open(&self.path)?;
        // WAL keeps earlier sessions readable if the process dies mid-write
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("History database journal mode is {}", mode);
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("path", &self.path)
            .field("max_attempts", &self.max_attempts)
            .field("session_id", &self.session_id())
            .finish()
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), HistoryError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            line INTEGER NOT NULL,
            source TEXT NOT NULL,
            UNIQUE(session_id, line)
        )",
        [],
    )?;
    Ok(())
}

fn session_exists(conn: &Connection, session_id: &str) -> Result<bool, HistoryError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM history WHERE session_id = ?1 LIMIT 1",
            params![session_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
