use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Intersection-over-Union with another box, 0.0 when either is degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let inter_h =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Fixed-length face descriptor. Only meaningful under a distance metric and
/// only comparable with descriptors from the same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean (L2) distance. Both embeddings must share a dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An identity's reference embedding, created once at enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub identity_id: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

/// Outcome of comparing one candidate embedding against enrolled embeddings.
///
/// "No match" is a regular value here, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Matched identity; always `None` when `matched` is false.
    pub identity: Option<String>,
    /// Distance to the nearest comparable enrolled embedding (`inf` when none).
    pub distance: f32,
    pub matched: bool,
}

impl MatchResult {
    pub fn matched(identity: impl Into<String>, distance: f32) -> Self {
        Self {
            identity: Some(identity.into()),
            distance,
            matched: true,
        }
    }

    pub fn no_match(distance: f32) -> Self {
        Self {
            identity: None,
            distance,
            matched: false,
        }
    }

    /// Require that a positive match names `claimed`. A match against any
    /// other identity becomes a no-match, however close it was.
    pub fn bind_to(self, claimed: &str) -> Self {
        match self.identity.as_deref() {
            Some(identity) if self.matched && identity == claimed => self,
            _ => Self::no_match(self.distance),
        }
    }
}
