//! Rollcall storage: enrolled reference embeddings, reference-image
//! directories and the attendance log, all backed by SQLite.

pub mod attendance;
mod codec;
pub mod database;
pub mod enrollment;
pub mod error;
pub mod reference;

pub use attendance::{AttendanceEvent, AttendanceLog, Geotag};
pub use database::SharedConnection;
pub use enrollment::{validate_identity, EnrollmentStore, SqliteEnrollmentStore};
pub use error::StoreError;
pub use reference::{ImportSummary, ReferenceDirectory, ReferenceName};
