//! Verification, enrollment and attendance on top of the extraction engine
//! and the SQLite stores.

use crate::config::MatchScope;
use crate::engine::{EngineError, EngineHandle};
use chrono::{DateTime, Local, NaiveDate, Utc};
use rollcall_core::transport::{decode_data_url, is_data_url, TransportError};
use rollcall_core::{
    Embedding, EnrollmentRecord, EuclideanMatcher, Gallery, MatchResult, Matcher, NormalizeError,
};
use rollcall_store::{
    validate_identity, AttendanceEvent, AttendanceLog, EnrollmentStore, Geotag, StoreError,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// What a caller presents as "the face": an uploaded image (raw bytes or a
/// `data:` URL) or an embedding computed elsewhere by the same model.
#[derive(Debug, Clone)]
pub enum Probe {
    Image(Vec<u8>),
    Embedding(Vec<f32>),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image has an unusable shape: {0}")]
    Shape(String),
    #[error("image payload: {0}")]
    Transport(#[from] TransportError),
    #[error("image is {size} bytes, limit is {limit}")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("descriptor extraction failed: {0}")]
    Extraction(String),
    #[error("descriptor extraction did not finish within {0:?}")]
    ExtractionTimeout(Duration),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("identity is already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),
    #[error("embedding has {actual} components, model produces {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding contains non-finite values")]
    InvalidEmbedding,
    #[error("attendance already marked for {identity} on {date}")]
    AlreadyMarked { identity: String, date: NaiveDate },
    #[error("invalid geotag: {0}")]
    InvalidGeotag(String),
    #[error("invalid attendance event id: {0:?}")]
    InvalidEventId(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("extraction engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdentity(id) => Self::DuplicateIdentity(id),
            StoreError::InvalidIdentity(id) => Self::InvalidIdentity(id),
            StoreError::AlreadyMarked { identity, date } => Self::AlreadyMarked { identity, date },
            StoreError::InvalidGeotag(reason) => Self::InvalidGeotag(reason),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::TooLarge { size, limit } => Self::ImageTooLarge { size, limit },
            EngineError::Normalize(NormalizeError::Decode(e)) => Self::Decode(e.to_string()),
            EngineError::Normalize(other) => Self::Shape(other.to_string()),
            EngineError::Extraction(e) => Self::Extraction(e.to_string()),
            EngineError::Timeout(d) => Self::ExtractionTimeout(d),
            other @ (EngineError::Busy | EngineError::ChannelClosed | EngineError::Spawn(_)) => {
                Self::EngineUnavailable(other.to_string())
            }
        }
    }
}

/// Result of an attendance attempt that got as far as matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarkOutcome {
    Marked { event: AttendanceEvent },
    NotRecognized { result: MatchResult },
}

/// Enrollment as reported to clients; the embedding itself stays in the daemon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentSummary {
    pub identity_id: String,
    pub model_version: Option<String>,
    pub dimension: usize,
    pub enrolled_at: DateTime<Utc>,
}

impl From<&EnrollmentRecord> for EnrollmentSummary {
    fn from(record: &EnrollmentRecord) -> Self {
        Self {
            identity_id: record.identity_id.clone(),
            model_version: record.embedding.model_version.clone(),
            dimension: record.embedding.dimension(),
            enrolled_at: record.enrolled_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub model_version: String,
    pub dimension: usize,
    pub tolerance: f32,
    pub match_scope: &'static str,
    pub workers: usize,
    pub enrolled: usize,
}

pub struct AttendanceService {
    engine: EngineHandle,
    store: Arc<dyn EnrollmentStore>,
    attendance: AttendanceLog,
    matcher: EuclideanMatcher,
    tolerance: f32,
    scope: MatchScope,
    clock: fn() -> DateTime<Local>,
}

impl AttendanceService {
    /// `tolerance` overrides the model's calibrated tolerance when set.
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn EnrollmentStore>,
        attendance: AttendanceLog,
        tolerance: Option<f32>,
        scope: MatchScope,
    ) -> Self {
        let tolerance = tolerance.unwrap_or(engine.profile().tolerance);
        tracing::info!(tolerance, scope = scope.as_str(), "attendance service configured");
        Self {
            engine,
            store,
            attendance,
            matcher: EuclideanMatcher,
            tolerance,
            scope,
            clock: Local::now,
        }
    }

    /// Does the probe's face belong to `claimed`?
    ///
    /// Only a match against `claimed` counts: a face closer to some other
    /// enrolled identity is reported as no match. An unenrolled `claimed`
    /// identity is also no match.
    pub async fn verify_identity(
        &self,
        claimed: &str,
        probe: Probe,
    ) -> Result<MatchResult, ServiceError> {
        let candidates = self.candidates(probe).await?;
        let gallery = self.gallery_for(claimed).await?;

        let result = candidates
            .iter()
            .map(|c| {
                self.matcher
                    .compare(c, &gallery, self.tolerance)
                    .bind_to(claimed)
            })
            .reduce(|best, next| {
                let better = (next.matched && !best.matched)
                    || (next.matched == best.matched && next.distance < best.distance);
                if better {
                    next
                } else {
                    best
                }
            })
            .ok_or(ServiceError::NoFaceDetected)?;

        tracing::info!(
            claimed,
            matched = result.matched,
            distance = result.distance,
            faces = candidates.len(),
            "verification complete"
        );
        Ok(result)
    }

    /// Enroll `identity` from the probe's best-detected face.
    pub async fn enroll(
        &self,
        identity: &str,
        probe: Probe,
    ) -> Result<EnrollmentRecord, ServiceError> {
        validate_identity(identity)?;
        let id = identity.to_string();
        let store = self.store.clone();
        if blocking(move || store.load(&id)).await?.is_some() {
            return Err(ServiceError::DuplicateIdentity(identity.to_string()));
        }

        let embedding = self
            .candidates(probe)
            .await?
            .into_iter()
            .next()
            .ok_or(ServiceError::NoFaceDetected)?;

        let id = identity.to_string();
        let store = self.store.clone();
        // the primary key decides concurrent enrollments of one identity
        let record = blocking(move || store.save(&id, &embedding)).await?;
        Ok(record)
    }

    /// Verify the probe against `identity` and record today's attendance.
    ///
    /// Rejects an invalid geotag or an identity already marked today before
    /// any extraction happens.
    pub async fn mark_attendance(
        &self,
        identity: &str,
        probe: Probe,
        geotag: Geotag,
    ) -> Result<MarkOutcome, ServiceError> {
        let geotag = Geotag::new(geotag.latitude, geotag.longitude)?;
        let now = (self.clock)();
        let today = now.date_naive();

        let id = identity.to_string();
        let log = self.attendance.clone();
        if blocking(move || log.already_marked(&id, today)).await? {
            tracing::info!(identity, date = %today, "attendance already marked");
            return Err(ServiceError::AlreadyMarked {
                identity: identity.to_string(),
                date: today,
            });
        }

        let result = self.verify_identity(identity, probe).await?;
        if !result.matched {
            tracing::info!(
                identity,
                distance = result.distance,
                "attendance refused: face not recognized"
            );
            return Ok(MarkOutcome::NotRecognized { result });
        }

        let id = identity.to_string();
        let log = self.attendance.clone();
        let distance = result.distance;
        let event = blocking(move || log.mark(&id, geotag, distance, now)).await?;
        Ok(MarkOutcome::Marked { event })
    }

    pub async fn list_enrolled(&self) -> Result<Vec<EnrollmentSummary>, ServiceError> {
        let store = self.store.clone();
        let records = blocking(move || store.list()).await?;
        Ok(records.iter().map(EnrollmentSummary::from).collect())
    }

    /// Administrative removal; attendance history is kept.
    pub async fn remove_enrollment(&self, identity: &str) -> Result<bool, ServiceError> {
        let id = identity.to_string();
        let store = self.store.clone();
        blocking(move || store.remove(&id)).await
    }

    /// Administrative removal of one attendance event. `false` if no such
    /// event exists.
    pub async fn delete_attendance(&self, event_id: Uuid) -> Result<bool, ServiceError> {
        let log = self.attendance.clone();
        blocking(move || log.delete(event_id)).await
    }

    /// One identity's events, or every event when `identity` is `None`;
    /// newest first.
    pub async fn attendance_history(
        &self,
        identity: Option<&str>,
    ) -> Result<Vec<AttendanceEvent>, ServiceError> {
        let log = self.attendance.clone();
        match identity {
            Some(id) => {
                let id = id.to_string();
                blocking(move || log.history(&id)).await
            }
            None => blocking(move || log.all()).await,
        }
    }

    pub async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        let store = self.store.clone();
        let enrolled = blocking(move || store.list()).await?.len();
        let profile = self.engine.profile();
        Ok(ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            model_version: profile.model_version.clone(),
            dimension: profile.dimension,
            tolerance: self.tolerance,
            match_scope: self.scope.as_str(),
            workers: self.engine.workers(),
            enrolled,
        })
    }

    /// Candidate embeddings for a probe, best detection first. Never empty.
    async fn candidates(&self, probe: Probe) -> Result<Vec<Embedding>, ServiceError> {
        let profile = self.engine.profile();
        match probe {
            Probe::Embedding(values) => {
                if values.len() != profile.dimension {
                    return Err(ServiceError::DimensionMismatch {
                        expected: profile.dimension,
                        actual: values.len(),
                    });
                }
                let embedding = Embedding::new(values, Some(profile.model_version.clone()));
                if !embedding.is_finite() {
                    return Err(ServiceError::InvalidEmbedding);
                }
                Ok(vec![embedding])
            }
            Probe::Image(bytes) => {
                let bytes = if is_data_url(&bytes) {
                    let limit = self.engine.max_image_bytes();
                    let payload = bytes
                        .iter()
                        .position(|&b| b == b',')
                        .map_or(bytes.len(), |comma| bytes.len() - comma - 1);
                    if payload > limit.saturating_mul(4) / 3 + 4 {
                        return Err(ServiceError::ImageTooLarge {
                            size: payload,
                            limit,
                        });
                    }
                    decode_data_url(&String::from_utf8_lossy(&bytes))?
                } else {
                    bytes
                };
                let faces = self.engine.extract(bytes).await?;
                if faces.is_empty() {
                    return Err(ServiceError::NoFaceDetected);
                }
                Ok(faces)
            }
        }
    }

    /// Enrolled embeddings a claim about `claimed` is checked against.
    async fn gallery_for(&self, claimed: &str) -> Result<Gallery, ServiceError> {
        let store = self.store.clone();
        let gallery = match self.scope {
            MatchScope::Claimed => {
                let id = claimed.to_string();
                blocking(move || store.load(&id))
                    .await?
                    .map(|record| Gallery::from([(record.identity_id, record.embedding)]))
                    .unwrap_or_default()
            }
            MatchScope::Gallery => blocking(move || store.load_all()).await?,
        };
        if !gallery.contains_key(claimed) {
            tracing::warn!(claimed, "verification against an identity that is not enrolled");
        }
        Ok(gallery)
    }
}

/// Run a store operation on the blocking pool.
async fn blocking<T, F>(op: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| ServiceError::Storage(format!("storage task failed: {e}")))?
        .map_err(ServiceError::from)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::testing::{self, MeanColour};
    use crate::engine::{spawn_engine, EngineConfig};
    use chrono::TimeZone;
    use rollcall_store::{database, SqliteEnrollmentStore};

    pub(crate) fn service_with(scope: MatchScope, engine: EngineConfig) -> AttendanceService {
        let con = database::open_in_memory().unwrap();
        let engine = spawn_engine(engine, |_| Ok(MeanColour::new())).unwrap();
        let mut service = AttendanceService::new(
            engine,
            Arc::new(SqliteEnrollmentStore::new(con.clone())),
            AttendanceLog::new(con),
            None,
            scope,
        );
        service.clock = || {
            Local
                .with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
                .earliest()
                .unwrap()
        };
        service
    }

    pub(crate) fn service(scope: MatchScope) -> AttendanceService {
        service_with(scope, testing::config(2, Duration::from_secs(5)))
    }

    fn image(colour: [u8; 3]) -> Probe {
        Probe::Image(testing::png(colour))
    }

    fn campus() -> Geotag {
        Geotag::new(12.9716, 77.5946).unwrap()
    }

    /// A enrolled red, B green, C blue.
    async fn enroll_abc(service: &AttendanceService) {
        service.enroll("A", image([255, 0, 0])).await.unwrap();
        service.enroll("B", image([0, 255, 0])).await.unwrap();
        service.enroll("C", image([0, 0, 255])).await.unwrap();
    }

    #[tokio::test]
    async fn verify_accepts_claimed_identity_face() {
        for scope in [MatchScope::Claimed, MatchScope::Gallery] {
            let service = service(scope);
            enroll_abc(&service).await;

            // slightly off-red: distance 10/255 from A
            let result = service.verify_identity("A", image([245, 0, 0])).await.unwrap();
            assert!(result.matched, "{scope:?}");
            assert_eq!(result.identity.as_deref(), Some("A"));
            assert!(result.distance < testing::TOLERANCE);
        }
    }

    #[tokio::test]
    async fn verify_rejects_face_of_another_identity() {
        for scope in [MatchScope::Claimed, MatchScope::Gallery] {
            let service = service(scope);
            enroll_abc(&service).await;

            // B's face, claiming to be A
            let result = service.verify_identity("A", image([0, 250, 0])).await.unwrap();
            assert!(!result.matched, "{scope:?}");
            assert_eq!(result.identity, None);
        }
    }

    #[tokio::test]
    async fn verify_rejects_unknown_face() {
        let service = service(MatchScope::Gallery);
        enroll_abc(&service).await;

        let result = service.verify_identity("A", image([128, 128, 128])).await.unwrap();
        assert!(!result.matched);
        assert!(result.distance >= testing::TOLERANCE);
    }

    #[tokio::test]
    async fn verify_against_unenrolled_identity_is_no_match() {
        let service = service(MatchScope::Claimed);
        let result = service.verify_identity("Z", image([255, 0, 0])).await.unwrap();
        assert!(!result.matched);
        assert_eq!(result.distance, f32::INFINITY);
    }

    #[tokio::test]
    async fn verify_without_face_is_an_error() {
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;
        let err = service.verify_identity("A", image([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
    }

    #[tokio::test]
    async fn undecodable_upload_is_a_decode_error() {
        let service = service(MatchScope::Claimed);
        let err = service
            .verify_identity("A", Probe::Image(b"GIF89a but not really".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)), "{err}");
    }

    #[tokio::test]
    async fn data_url_upload_is_accepted() {
        use base64::Engine as _;
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;

        let url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(testing::png([255, 0, 0]))
        );
        let result = service
            .verify_identity("A", Probe::Image(url.into_bytes()))
            .await
            .unwrap();
        assert!(result.matched);
    }

    #[tokio::test]
    async fn malformed_data_url_is_a_transport_error() {
        let service = service(MatchScope::Claimed);
        let err = service
            .verify_identity("A", Probe::Image(b"data:image/png;base64,@@@".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn embedding_probe_is_validated() {
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;

        let err = service
            .verify_identity("A", Probe::Embedding(vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = service
            .verify_identity("A", Probe::Embedding(vec![1.0, f32::NAN, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidEmbedding));

        let result = service
            .verify_identity("A", Probe::Embedding(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert!(result.matched);
        assert!(result.distance < 1e-6);
    }

    #[tokio::test]
    async fn enroll_twice_is_duplicate_and_keeps_first() {
        let service = service(MatchScope::Claimed);
        service.enroll("A", image([255, 0, 0])).await.unwrap();

        let err = service.enroll("A", image([0, 255, 0])).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentity(ref id) if id == "A"));

        assert!(service.verify_identity("A", image([255, 0, 0])).await.unwrap().matched);
    }

    #[tokio::test]
    async fn concurrent_enrollment_stores_one_record() {
        let service = Arc::new(service(MatchScope::Claimed));
        let attempts = (0..4).map(|i| {
            let service = service.clone();
            tokio::spawn(async move { service.enroll("A", image([255, 40 * i, 0])).await })
        });
        let mut ok = 0;
        for handle in attempts.collect::<Vec<_>>() {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ServiceError::DuplicateIdentity(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(service.list_enrolled().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enroll_rejects_faceless_image() {
        let service = service(MatchScope::Claimed);
        let err = service.enroll("A", image([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
        assert!(service.list_enrolled().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enroll_rejects_blank_identity() {
        let service = service(MatchScope::Claimed);
        let err = service.enroll("", image([255, 0, 0])).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidIdentity(_)));
    }

    #[tokio::test]
    async fn enroll_checks_identity_before_extraction() {
        let service = service(MatchScope::Claimed);
        // undecodable image: the identity check must fire first
        let err = service
            .enroll(" A", Probe::Image(b"junk".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidIdentity(ref id) if id == " A"), "{err}");
    }

    #[tokio::test]
    async fn oversized_data_url_is_refused_before_decoding() {
        let mut engine = testing::config(1, Duration::from_secs(5));
        engine.max_image_bytes = 64;
        let service = service_with(MatchScope::Claimed, engine);

        // not valid base64, so decoding first would report a transport error
        let url = format!("data:image/png;base64,{}", "@".repeat(200));
        let err = service
            .verify_identity("A", Probe::Image(url.into_bytes()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::ImageTooLarge { size: 200, limit: 64 }),
            "{err}"
        );

        // a payload within the encoded allowance still reaches the decoder
        let url = format!("data:image/png;base64,{}", "@".repeat(80));
        let err = service
            .verify_identity("A", Probe::Image(url.into_bytes()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn deleted_attendance_can_be_marked_again() {
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;

        let event = match service
            .mark_attendance("A", image([255, 0, 0]), campus())
            .await
            .unwrap()
        {
            MarkOutcome::Marked { event } => event,
            other => panic!("expected attendance to be marked, got {other:?}"),
        };

        assert!(service.delete_attendance(event.event_id).await.unwrap());
        assert!(!service.delete_attendance(event.event_id).await.unwrap());
        assert!(service.attendance_history(Some("A")).await.unwrap().is_empty());

        let outcome = service
            .mark_attendance("A", image([255, 0, 0]), campus())
            .await
            .unwrap();
        assert!(matches!(outcome, MarkOutcome::Marked { .. }));
    }

    #[tokio::test]
    async fn mark_attendance_once_per_day() {
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;

        let outcome = service
            .mark_attendance("A", image([250, 0, 0]), campus())
            .await
            .unwrap();
        let event = match outcome {
            MarkOutcome::Marked { event } => event,
            other => panic!("expected attendance to be marked, got {other:?}"),
        };
        assert_eq!(event.identity_id, "A");
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert_eq!(event.geotag, campus());

        let err = service
            .mark_attendance("A", image([250, 0, 0]), campus())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyMarked { .. }));
        assert_eq!(service.attendance_history(Some("A")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_attendance_with_wrong_face_records_nothing() {
        let service = service(MatchScope::Gallery);
        enroll_abc(&service).await;

        let outcome = service
            .mark_attendance("A", image([0, 0, 250]), campus())
            .await
            .unwrap();
        assert!(matches!(outcome, MarkOutcome::NotRecognized { ref result } if !result.matched));
        assert!(service.attendance_history(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_attendance_rejects_bad_geotag_before_extraction() {
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;

        let bogus = Geotag {
            latitude: 91.0,
            longitude: 0.0,
        };
        // undecodable image: the geotag check must fire first
        let err = service
            .mark_attendance("A", Probe::Image(b"junk".to_vec()), bogus)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidGeotag(_)), "{err}");
    }

    #[tokio::test]
    async fn removal_keeps_history_and_frees_identity() {
        let service = service(MatchScope::Claimed);
        enroll_abc(&service).await;
        service
            .mark_attendance("A", image([255, 0, 0]), campus())
            .await
            .unwrap();

        assert!(service.remove_enrollment("A").await.unwrap());
        assert!(!service.remove_enrollment("A").await.unwrap());
        assert_eq!(service.attendance_history(Some("A")).await.unwrap().len(), 1);
        assert!(!service.verify_identity("A", image([255, 0, 0])).await.unwrap().matched);

        service.enroll("A", image([255, 0, 0])).await.unwrap();
        assert!(service.verify_identity("A", image([255, 0, 0])).await.unwrap().matched);
    }

    #[tokio::test]
    async fn status_reports_model_and_enrollment_count() {
        let service = service(MatchScope::Gallery);
        enroll_abc(&service).await;

        let status = service.status().await.unwrap();
        assert_eq!(status.model_version, "stub");
        assert_eq!(status.dimension, testing::DIMENSION);
        assert_eq!(status.tolerance, testing::TOLERANCE);
        assert_eq!(status.match_scope, "gallery");
        assert_eq!(status.workers, 2);
        assert_eq!(status.enrolled, 3);
    }

    #[tokio::test]
    async fn extraction_timeout_is_reported() {
        let con = database::open_in_memory().unwrap();
        let engine = spawn_engine(testing::config(1, Duration::from_millis(20)), |_| {
            Ok(MeanColour::slow(Duration::from_millis(300)))
        })
        .unwrap();
        let service = AttendanceService::new(
            engine,
            Arc::new(SqliteEnrollmentStore::new(con.clone())),
            AttendanceLog::new(con),
            None,
            MatchScope::Claimed,
        );

        let err = service.enroll("A", image([255, 0, 0])).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExtractionTimeout(_)), "{err}");
    }
}
