//! Enrolled reference embeddings.
//!
//! Enrollment is write-once: the `identity_id` primary key is the only
//! arbiter of duplicates, so two concurrent enrollments of the same identity
//! resolve to exactly one stored record.

use crate::codec;
use crate::database::SharedConnection;
use crate::error::{is_constraint_violation, StoreError};
use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, EnrollmentRecord, Gallery};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::MutexGuard;

/// Persistent mapping from identity to reference embedding.
pub trait EnrollmentStore: Send + Sync {
    /// Every enrolled embedding, keyed by identity. Batch mode.
    fn load_all(&self) -> Result<Gallery, StoreError>;

    /// One identity's record. Targeted mode.
    fn load(&self, identity: &str) -> Result<Option<EnrollmentRecord>, StoreError>;

    /// Create the record for `identity`; fails with
    /// [`StoreError::DuplicateIdentity`] if one already exists, leaving it
    /// untouched.
    fn save(&self, identity: &str, embedding: &Embedding) -> Result<EnrollmentRecord, StoreError>;

    /// All records ordered by identity.
    fn list(&self) -> Result<Vec<EnrollmentRecord>, StoreError>;

    /// Delete an identity's record. `false` if it was not enrolled.
    fn remove(&self, identity: &str) -> Result<bool, StoreError>;
}

/// Row as stored, before the embedding BLOB is checked.
struct StoredRow {
    identity_id: String,
    model_version: Option<String>,
    dimension: i64,
    embedding: Vec<u8>,
    enrolled_at: DateTime<Utc>,
}

impl StoredRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let enrolled_at: String = row.get(4)?;
        let enrolled_at = DateTime::parse_from_rfc3339(&enrolled_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?
            .with_timezone(&Utc);
        Ok(Self {
            identity_id: row.get(0)?,
            model_version: row.get(1)?,
            dimension: row.get(2)?,
            embedding: row.get(3)?,
            enrolled_at,
        })
    }

    fn into_record(self) -> Result<EnrollmentRecord, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptEmbedding {
            identity: self.identity_id.clone(),
            reason,
        };
        let dimension = usize::try_from(self.dimension)
            .map_err(|_| corrupt(format!("negative dimension {}", self.dimension)))?;
        let values = codec::decode(&self.embedding, dimension).ok_or_else(|| {
            corrupt(format!(
                "{} bytes cannot hold {dimension} f32 values",
                self.embedding.len()
            ))
        })?;

        Ok(EnrollmentRecord {
            identity_id: self.identity_id,
            embedding: Embedding::new(values, self.model_version),
            enrolled_at: self.enrolled_at,
        })
    }
}

const SELECT_RECORD: &str =
    "SELECT identity_id, model_version, dimension, embedding, enrolled_at FROM enrollments";

/// [`EnrollmentStore`] over the `enrollments` table.
#[derive(Debug, Clone)]
pub struct SqliteEnrollmentStore {
    con: SharedConnection,
}

impl SqliteEnrollmentStore {
    pub fn new(con: SharedConnection) -> Self {
        Self { con }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.con.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let con = self.lock()?;
        let mut stmt = con.prepare(&format!("{SELECT_RECORD} ORDER BY identity_id ASC"))?;
        let rows = stmt
            .query_map([], StoredRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Identities are opaque, but must be non-empty and carry no edge whitespace.
pub fn validate_identity(identity: &str) -> Result<(), StoreError> {
    if identity.is_empty() || identity.trim() != identity {
        return Err(StoreError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

impl EnrollmentStore for SqliteEnrollmentStore {
    fn load_all(&self) -> Result<Gallery, StoreError> {
        let mut gallery = Gallery::new();
        for row in self.query_rows()? {
            match row.into_record() {
                Ok(record) => {
                    gallery.insert(record.identity_id, record.embedding);
                }
                Err(e) => tracing::warn!(error = %e, "skipping unreadable enrollment"),
            }
        }
        Ok(gallery)
    }

    fn load(&self, identity: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let con = self.lock()?;
        let row = con
            .query_row(
                &format!("{SELECT_RECORD} WHERE identity_id = ?1"),
                [identity],
                StoredRow::from_row,
            )
            .optional()?;
        drop(con);
        row.map(StoredRow::into_record).transpose()
    }

    fn save(&self, identity: &str, embedding: &Embedding) -> Result<EnrollmentRecord, StoreError> {
        validate_identity(identity)?;

        let record = EnrollmentRecord {
            identity_id: identity.to_string(),
            embedding: embedding.clone(),
            enrolled_at: Utc::now(),
        };

        let mut con = self.lock()?;
        let tx = con.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO enrollments (identity_id, model_version, dimension, embedding, enrolled_at)
            VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity,
                embedding.model_version,
                embedding.dimension() as i64,
                codec::encode(&embedding.values),
                record.enrolled_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => tx.commit()?,
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::DuplicateIdentity(identity.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            identity,
            dimension = embedding.dimension(),
            model = embedding.model_version.as_deref().unwrap_or("unknown"),
            "enrollment saved"
        );
        Ok(record)
    }

    fn list(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        self.query_rows()?
            .into_iter()
            .map(StoredRow::into_record)
            .collect()
    }

    fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        let con = self.lock()?;
        let removed = con.execute("DELETE FROM enrollments WHERE identity_id = ?1", [identity])?;
        if removed > 0 {
            tracing::info!(identity, "enrollment removed");
        }
        Ok(removed > 0)
    }
}
