//! Descriptor extraction seam: pixel buffer in, face embeddings out.
//!
//! Anything that can locate faces and describe them with fixed-length vectors
//! can sit behind [`DescriptorExtractor`]; the matcher and stores never see
//! model types.

use crate::detector::{self, DetectorError, FaceDetector};
use crate::normalize::PixelBuffer;
use crate::recognizer::{self, FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Upper bound on faces described per image.
const MAX_FACES: usize = 8;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("extractor failed: {0}")]
    Backend(String),
}

/// Identity of the embedding model and the scale its distances live on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_version: String,
    pub dimension: usize,
    /// Calibrated Euclidean match tolerance for this model.
    pub tolerance: f32,
}

/// Computes one embedding per detected face.
///
/// Implementations must be deterministic for a given buffer and model, and
/// return faces best-detection-first. No faces is `Ok(vec![])`.
pub trait DescriptorExtractor: Send {
    fn profile(&self) -> &ModelProfile;

    fn extract(&mut self, image: &PixelBuffer) -> Result<Vec<Embedding>, ExtractionError>;
}

/// SCRFD detection + ArcFace recognition, both via ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    profile: ModelProfile,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractionError> {
        let detector = FaceDetector::load(&model_dir.join(detector::MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(recognizer::MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
            profile: ModelProfile {
                model_version: recognizer::MODEL_VERSION.to_string(),
                dimension: recognizer::EMBEDDING_DIM,
                tolerance: recognizer::TOLERANCE,
            },
        })
    }
}

impl DescriptorExtractor for OnnxExtractor {
    fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    fn extract(&mut self, image: &PixelBuffer) -> Result<Vec<Embedding>, ExtractionError> {
        let faces = self.detector.detect(image)?;

        let mut embeddings = Vec::with_capacity(faces.len().min(MAX_FACES));
        for face in faces.iter().take(MAX_FACES) {
            match self.recognizer.extract(image, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks) => {
                    tracing::debug!(
                        confidence = face.confidence,
                        "skipping face without usable landmarks"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            detected = faces.len(),
            described = embeddings.len(),
            "extracted face embeddings"
        );
        Ok(embeddings)
    }
}
