use crate::service::{AttendanceService, Probe, ServiceError};
use rollcall_store::Geotag;
use serde::Serialize;
use uuid::Uuid;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// Typed D-Bus errors, named `org.rollcall.Attendance1.Error.<Variant>`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.rollcall.Attendance1.Error")]
pub enum AttendanceError {
    #[zbus(error)]
    ZBus(zbus::Error),
    Decode(String),
    Shape(String),
    Transport(String),
    ImageTooLarge(String),
    Extraction(String),
    ExtractionTimeout(String),
    NoFaceDetected(String),
    DuplicateIdentity(String),
    InvalidIdentity(String),
    DimensionMismatch(String),
    InvalidEmbedding(String),
    AlreadyMarked(String),
    InvalidGeotag(String),
    InvalidEventId(String),
    Storage(String),
    EngineUnavailable(String),
    Internal(String),
}

impl From<ServiceError> for AttendanceError {
    fn from(e: ServiceError) -> Self {
        let message = e.to_string();
        match e {
            ServiceError::Decode(_) => Self::Decode(message),
            ServiceError::Shape(_) => Self::Shape(message),
            ServiceError::Transport(_) => Self::Transport(message),
            ServiceError::ImageTooLarge { .. } => Self::ImageTooLarge(message),
            ServiceError::Extraction(_) => Self::Extraction(message),
            ServiceError::ExtractionTimeout(_) => Self::ExtractionTimeout(message),
            ServiceError::NoFaceDetected => Self::NoFaceDetected(message),
            ServiceError::DuplicateIdentity(_) => Self::DuplicateIdentity(message),
            ServiceError::InvalidIdentity(_) => Self::InvalidIdentity(message),
            ServiceError::DimensionMismatch { .. } => Self::DimensionMismatch(message),
            ServiceError::InvalidEmbedding => Self::InvalidEmbedding(message),
            ServiceError::AlreadyMarked { .. } => Self::AlreadyMarked(message),
            ServiceError::InvalidGeotag(_) => Self::InvalidGeotag(message),
            ServiceError::InvalidEventId(_) => Self::InvalidEventId(message),
            ServiceError::Storage(_) => Self::Storage(message),
            ServiceError::EngineUnavailable(_) => Self::EngineUnavailable(message),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AttendanceError> {
    serde_json::to_string(value).map_err(|e| AttendanceError::Internal(e.to_string()))
}

/// D-Bus embeddings travel as `ad`.
fn embedding_probe(values: Vec<f64>) -> Probe {
    Probe::Embedding(values.into_iter().map(|v| v as f32).collect())
}

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceInterface {
    service: AttendanceService,
}

impl AttendanceInterface {
    pub fn new(service: AttendanceService) -> Self {
        Self { service }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Enroll `identity` from an image (raw bytes or a data URL).
    async fn enroll(&self, identity: &str, image: Vec<u8>) -> Result<String, AttendanceError> {
        tracing::info!(identity, bytes = image.len(), "enroll requested");
        let record = self.service.enroll(identity, Probe::Image(image)).await?;
        to_json(&crate::service::EnrollmentSummary::from(&record))
    }

    /// Enroll `identity` from a precomputed embedding.
    async fn enroll_embedding(
        &self,
        identity: &str,
        embedding: Vec<f64>,
    ) -> Result<String, AttendanceError> {
        tracing::info!(identity, dimension = embedding.len(), "enroll_embedding requested");
        let record = self
            .service
            .enroll(identity, embedding_probe(embedding))
            .await?;
        to_json(&crate::service::EnrollmentSummary::from(&record))
    }

    /// Verify that the face in `image` belongs to `identity`. Returns a JSON
    /// match result; "no match" is a result, not an error.
    async fn verify(&self, identity: &str, image: Vec<u8>) -> Result<String, AttendanceError> {
        tracing::info!(identity, bytes = image.len(), "verify requested");
        let result = self
            .service
            .verify_identity(identity, Probe::Image(image))
            .await?;
        to_json(&result)
    }

    async fn verify_embedding(
        &self,
        identity: &str,
        embedding: Vec<f64>,
    ) -> Result<String, AttendanceError> {
        tracing::info!(identity, dimension = embedding.len(), "verify_embedding requested");
        let result = self
            .service
            .verify_identity(identity, embedding_probe(embedding))
            .await?;
        to_json(&result)
    }

    /// Verify the face and record today's attendance at the given location.
    async fn mark_attendance(
        &self,
        identity: &str,
        image: Vec<u8>,
        latitude: f64,
        longitude: f64,
    ) -> Result<String, AttendanceError> {
        tracing::info!(identity, bytes = image.len(), "mark_attendance requested");
        let outcome = self
            .service
            .mark_attendance(
                identity,
                Probe::Image(image),
                Geotag {
                    latitude,
                    longitude,
                },
            )
            .await?;
        to_json(&outcome)
    }

    async fn list_enrolled(&self) -> Result<String, AttendanceError> {
        to_json(&self.service.list_enrolled().await?)
    }

    async fn remove_enrollment(&self, identity: &str) -> Result<bool, AttendanceError> {
        tracing::info!(identity, "remove_enrollment requested");
        Ok(self.service.remove_enrollment(identity).await?)
    }

    /// Delete one attendance event by its id; `false` if it does not exist.
    async fn delete_attendance(&self, event_id: &str) -> Result<bool, AttendanceError> {
        tracing::info!(event_id, "delete_attendance requested");
        let event_id = Uuid::parse_str(event_id)
            .map_err(|_| ServiceError::InvalidEventId(event_id.to_string()))?;
        Ok(self.service.delete_attendance(event_id).await?)
    }

    /// Attendance events for `identity`, or for everyone when it is empty.
    async fn attendance_history(&self, identity: &str) -> Result<String, AttendanceError> {
        let identity = Some(identity).filter(|id| !id.is_empty());
        to_json(&self.service.attendance_history(identity).await?)
    }

    async fn status(&self) -> Result<String, AttendanceError> {
        to_json(&self.service.status().await?)
    }
}
