//! Face alignment via a least-squares similarity transform.
//!
//! Maps the five detected landmarks onto the ArcFace reference positions and
//! resamples the face into a 112×112 RGB crop.

use crate::normalize::{PixelBuffer, CHANNELS};
use ndarray::Array3;

/// Side length of the aligned crop.
pub const ALIGNED_SIZE: usize = 112;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// `(x, y) -> (a·x − b·y + tx, b·x + a·y + ty)`: uniform scale, rotation, translation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit from `src` onto `dst` (no reflection).
    /// `None` when the source points are collapsed onto one spot.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let (src_cx, src_cy) = centroid(src);
        let (dst_cx, dst_cy) = centroid(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut spread = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - src_cx, sy - src_cy);
            let (dx, dy) = (dx - dst_cx, dy - dst_cy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            spread += sx * sx + sy * sy;
        }
        if spread < 1e-6 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dst_cx - (a * src_cx - b * src_cy),
            ty: dst_cy - (b * src_cx + a * src_cy),
        })
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

fn centroid(points: &[(f32, f32); 5]) -> (f32, f32) {
    let (sum_x, sum_y) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
    let n = points.len() as f32;
    (sum_x / n, sum_y / n)
}

/// Bilinear sample with black outside the image.
fn sample_or_black(image: &PixelBuffer, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let px = |dx: i64, dy: i64| image.get(x0 + dx, y0 + dy).unwrap_or([0, 0, 0]);
    let (tl, tr, bl, br) = (px(0, 0), px(1, 0), px(0, 1), px(1, 1));

    std::array::from_fn(|c| {
        tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + tr[c] as f32 * fx * (1.0 - fy)
            + bl[c] as f32 * (1.0 - fx) * fy
            + br[c] as f32 * fx * fy
    })
}

/// Align a detected face to a canonical 112×112×3 crop.
///
/// Returns `None` for degenerate landmarks (all points coincide).
pub fn align_face(image: &PixelBuffer, landmarks: &[(f32, f32); 5]) -> Option<Array3<u8>> {
    let to_reference = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?;
    let to_source = to_reference.inverse()?;

    let mut crop = Array3::<u8>::zeros((ALIGNED_SIZE, ALIGNED_SIZE, CHANNELS));
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = to_source.apply(ox as f32, oy as f32);
            let rgb = sample_or_black(image, sx, sy);
            for (c, value) in rgb.iter().enumerate() {
                crop[[oy, ox, c]] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    Some(crop)
}
