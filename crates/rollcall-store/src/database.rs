//! SQLite connection setup shared by the enrollment store and attendance log.

use crate::error::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One connection, shared by every repository over the same database.
pub type SharedConnection = Arc<Mutex<Connection>>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enrollments (
    identity_id   TEXT PRIMARY KEY NOT NULL,
    model_version TEXT,
    dimension     INTEGER NOT NULL,
    embedding     BLOB NOT NULL,
    enrolled_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    event_id    TEXT PRIMARY KEY NOT NULL,
    identity_id TEXT NOT NULL,
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    latitude    REAL NOT NULL,
    longitude   REAL NOT NULL,
    distance    REAL NOT NULL,
    UNIQUE (identity_id, date)
);
";

/// Open (creating if needed) the database at `path` and apply the schema.
pub fn open(path: &Path) -> Result<SharedConnection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let con = Connection::open(path)?;
    let mode: String =
        con.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
    setup(con)
}

// for testing and ephemeral daemons
pub fn open_in_memory() -> Result<SharedConnection, StoreError> {
    setup(Connection::open_in_memory()?)
}

fn setup(con: Connection) -> Result<SharedConnection, StoreError> {
    con.busy_timeout(Duration::from_secs(5))?;
    con.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(con)))
}
