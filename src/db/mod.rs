//! SQLite storage shared by the session backend and the persistent chunk store
use rusqlite::{Connection, Result};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod chunks;
pub mod models;
pub mod sessions;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    created_at DATETIME NOT NULL,
    expires_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp DATETIME NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq);

CREATE TABLE IF NOT EXISTS chunks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    title TEXT,
    url TEXT,
    published_date TEXT,
    indexed_at DATETIME NOT NULL
);
"#;

/// Lock wait bound for a contended database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// A wrapper around a SQLite connection initialized with the application schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))
    }
}

/// Helper to serialize a float32 vector into little-endian bytes
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`]. Trailing bytes that do not form a full
/// float are ignored.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
