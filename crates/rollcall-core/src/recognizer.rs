//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional, L2-normalized embeddings from aligned RGB face
//! crops using the w600k_r50 model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::normalize::PixelBuffer;
use crate::types::{BoundingBox, Embedding};
use ndarray::{Array3, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// File name of the recognition model inside the model directory.
pub const MODEL_FILE: &str = "w600k_r50.onnx";
pub const MODEL_VERSION: &str = "w600k_r50";
pub const EMBEDDING_DIM: usize = 512;

/// Euclidean tolerance for unit-length w600k_r50 embeddings.
///
/// `d = sqrt(2 − 2·cos)`, so 1.10 corresponds to cosine similarity ≈ 0.395.
pub const TOLERANCE: f32 = 1.10;

const MEAN: f32 = 127.5;
const STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected recognition model output: {0}")]
    BadOutput(String),
    #[error("face has no landmarks; detector must supply them for alignment")]
    NoLandmarks,
    #[error("face landmarks are degenerate")]
    DegenerateLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Align the detected face and compute its embedding.
    pub fn extract(
        &mut self,
        image: &PixelBuffer,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let crop =
            alignment::align_face(image, landmarks).ok_or(RecognizerError::DegenerateLandmarks)?;

        let input = Self::preprocess(&crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::BadOutput(format!("embedding tensor: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::BadOutput(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(
            l2_normalize(raw.to_vec()),
            Some(MODEL_VERSION.to_string()),
        ))
    }

    /// Convert a 112×112×3 RGB crop into a normalized NCHW tensor.
    fn preprocess(crop: &Array3<u8>) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));
        for ((y, x, c), &value) in crop.indexed_iter() {
            tensor[[0, c, y, x]] = (value as f32 - MEAN) / STD;
        }
        tensor
    }
}

/// Scale to unit length; a zero vector is returned unchanged.
fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|v| v / norm).collect()
    } else {
        values
    }
}
