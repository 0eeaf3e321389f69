//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB buffer into a square input, decodes the three
//! anchor-free stride heads and suppresses overlapping boxes with NMS.

use crate::normalize::PixelBuffer;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// File name of the detection model inside the model directory.
pub const MODEL_FILE: &str = "det_10g.onnx";

const INPUT_SIZE: usize = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected detection model output: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting the source into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_width: usize,
    scaled_height: usize,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as usize).clamp(1, target);
        let scaled_height = ((height as f32 * scale).round() as usize).clamp(1, target);
        Self {
            scale,
            pad_x: (target - scaled_width) as f32 / 2.0,
            pad_y: (target - scaled_height) as f32 / 2.0,
            scaled_width,
            scaled_height,
        }
    }

    /// Model-input coordinates back to source-image coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions of the score, bbox and keypoint heads for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHeads {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [StrideHeads; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 9 {
            return Err(DetectorError::BadOutput(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                output_names.len()
            )));
        }

        let heads = discover_heads(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?heads,
            "loaded SCRFD model"
        );

        Ok(Self { session, heads })
    }

    /// Detect faces, best confidence first. An image without faces yields an
    /// empty list.
    pub fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (heads, &stride) in self.heads.iter().zip(STRIDES.iter()) {
            let (_, scores) = outputs[heads.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[heads.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[heads.kps]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let faces = nms(candidates, NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection finished");
        Ok(faces)
    }
}

/// Resize (bilinear) and pad the buffer into a normalized 1×3×640×640 tensor.
///
/// Padding holds 0.0, the normalized value of the mean.
fn letterbox_tensor(image: &PixelBuffer) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), INPUT_SIZE);
    let x_start = letterbox.pad_x.floor() as usize;
    let y_start = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..letterbox.scaled_height {
        let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
        for x in 0..letterbox.scaled_width {
            let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
            let rgb = image.sample_clamped(src_x, src_y);
            for (channel, value) in rgb.iter().enumerate() {
                tensor[[0, channel, y_start + y, x_start + x]] = (value - MEAN) / STD;
            }
        }
    }

    (tensor, letterbox)
}

/// Map output heads to strides by name (`score_8`, `bbox_16`, ...), falling
/// back to the common positional export order.
fn discover_heads(names: &[String]) -> [StrideHeads; 3] {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let named: Option<Vec<StrideHeads>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideHeads {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => [
            StrideHeads { score: 0, bbox: 3, kps: 6 },
            StrideHeads { score: 1, bbox: 4, kps: 7 },
            StrideHeads { score: 2, bbox: 5, kps: 8 },
        ],
    }
}

/// Decode the anchors of one stride that clear the confidence threshold.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE / stride;
    let anchors = grid_w * (INPUT_SIZE / stride) * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let confidence = *scores.get(idx)?;
            if confidence <= CONFIDENCE_THRESHOLD {
                return None;
            }

            let cell = idx / ANCHORS_PER_CELL;
            let anchor_x = (cell % grid_w) as f32 * step;
            let anchor_y = (cell / grid_w) as f32 * step;

            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|points| {
                std::array::from_fn(|i| {
                    letterbox.unmap(
                        anchor_x + points[i * 2] * step,
                        anchor_y + points[i * 2 + 1] * step,
                    )
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(detections, NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_separate_faces_and_handles_empty() {
        let detections = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.6),
            make_bbox(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        let kept = nms(detections, NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.8).abs() < 1e-6);
        assert!(nms(vec![], NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn letterbox_unmap_inverts_forward_mapping() {
        let letterbox = Letterbox::fit(320, 240, INPUT_SIZE);
        assert_eq!(letterbox.scaled_width, 640);
        assert_eq!(letterbox.scaled_height, 480);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 80.0);

        let (x, y) = letterbox.unmap(100.0 * letterbox.scale + letterbox.pad_x, 50.0 * letterbox.scale + letterbox.pad_y);
        assert!((x - 100.0).abs() < 0.01, "x = {x}");
        assert!((y - 50.0).abs() < 0.01, "y = {y}");
    }

    #[test]
    fn letterbox_tensor_normalizes_content_and_zeroes_padding() {
        let image = PixelBuffer::from_raw(64, 32, vec![128u8; 64 * 32 * 3]).unwrap();
        let (tensor, letterbox) = letterbox_tensor(&image);

        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert_eq!(letterbox.pad_y, 160.0);

        let expected = (128.0 - MEAN) / STD;
        for channel in 0..3 {
            assert!((tensor[[0, channel, 320, 320]] - expected).abs() < 1e-6);
            assert_eq!(tensor[[0, channel, 10, 320]], 0.0);
        }
    }

    #[test]
    fn letterbox_tensor_keeps_channel_order() {
        let mut data = Vec::with_capacity(16 * 16 * 3);
        for _ in 0..16 * 16 {
            data.extend_from_slice(&[255, 0, 128]);
        }
        let image = PixelBuffer::from_raw(16, 16, data).unwrap();
        let (tensor, _) = letterbox_tensor(&image);

        assert!((tensor[[0, 0, 100, 100]] - (255.0 - MEAN) / STD).abs() < 1e-5);
        assert!((tensor[[0, 1, 100, 100]] - (0.0 - MEAN) / STD).abs() < 1e-5);
        assert!((tensor[[0, 2, 100, 100]] - (128.0 - MEAN) / STD).abs() < 1e-5);
    }

    #[test]
    fn letterbox_tensor_is_bit_identical_across_calls() {
        let data = (0..97 * 61 * 3).map(|i| (i * 31 % 251) as u8).collect();
        let image = PixelBuffer::from_raw(97, 61, data).unwrap();

        let (first, _) = letterbox_tensor(&image);
        let (second, _) = letterbox_tensor(&image);
        assert!(first.iter().zip(second.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn decode_stride_maps_anchor_to_source_coordinates() {
        let stride = 32;
        let grid_w = INPUT_SIZE / stride;
        let anchors = grid_w * grid_w * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Second anchor of cell (x=3, y=2).
        let idx = (2 * grid_w + 3) * ANCHORS_PER_CELL + 1;
        scores[idx] = 0.93;

        let letterbox = Letterbox::fit(INPUT_SIZE, INPUT_SIZE, INPUT_SIZE);
        let faces = decode_stride(&scores, &bboxes, &kps, stride, &letterbox);

        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert!((face.x - 64.0).abs() < 1e-4);
        assert!((face.y - 32.0).abs() < 1e-4);
        assert!((face.width - 64.0).abs() < 1e-4);
        assert!((face.height - 64.0).abs() < 1e-4);
        assert_eq!(face.landmarks.map(|l| l[0]), Some((96.0, 64.0)));
    }

    #[test]
    fn decode_stride_ignores_scores_at_threshold() {
        let stride = 32;
        let anchors = (INPUT_SIZE / stride).pow(2) * ANCHORS_PER_CELL;
        let scores = vec![CONFIDENCE_THRESHOLD; anchors];
        let letterbox = Letterbox::fit(INPUT_SIZE, INPUT_SIZE, INPUT_SIZE);

        let faces = decode_stride(&scores, &vec![0.0; anchors * 4], &[], stride, &letterbox);
        assert!(faces.is_empty());
    }

    #[test]
    fn decode_stride_without_keypoints_has_no_landmarks() {
        let stride = 32;
        let anchors = (INPUT_SIZE / stride).pow(2) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.9;
        let letterbox = Letterbox::fit(INPUT_SIZE, INPUT_SIZE, INPUT_SIZE);

        let faces = decode_stride(&scores, &vec![1.0; anchors * 4], &[], stride, &letterbox);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn discover_heads_by_name_in_any_order() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let heads = discover_heads(&names);
        assert_eq!(heads[0], StrideHeads { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], StrideHeads { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn discover_heads_falls_back_to_positions() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        let heads = discover_heads(&names);
        assert_eq!(heads[1], StrideHeads { score: 1, bbox: 4, kps: 7 });
    }
}
