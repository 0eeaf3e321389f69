use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity is already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("identity id must be a non-empty string without surrounding whitespace: {0:?}")]
    InvalidIdentity(String),
    #[error("attendance already marked for {identity} on {date}")]
    AlreadyMarked { identity: String, date: NaiveDate },
    #[error("invalid geotag: {0}")]
    InvalidGeotag(String),
    #[error("stored embedding for {identity} is corrupt: {reason}")]
    CorruptEmbedding { identity: String, reason: String },
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// True when `err` is SQLite rejecting a row for a PRIMARY KEY or UNIQUE
/// constraint.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
