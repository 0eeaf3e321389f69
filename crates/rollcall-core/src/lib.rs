//! rollcall-core: face identity pipeline for attendance verification.
//!
//! Normalizes uploaded images to RGB, extracts face embeddings (SCRFD
//! detection + ArcFace recognition via ONNX Runtime) and matches them against
//! enrolled embeddings by Euclidean distance.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod normalize;
pub mod recognizer;
pub mod transport;
pub mod types;

pub use detector::FaceDetector;
pub use extractor::{DescriptorExtractor, ExtractionError, ModelProfile, OnnxExtractor};
pub use matcher::{EuclideanMatcher, Gallery, Matcher, DEFAULT_TOLERANCE};
pub use normalize::{normalize, NormalizeError, PixelBuffer};
pub use recognizer::FaceRecognizer;
pub use transport::{decode_data_url, TransportError};
pub use types::{BoundingBox, Embedding, EnrollmentRecord, MatchResult};
