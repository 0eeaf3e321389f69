//! Image normalization: encoded bytes in, canonical RGB pixel buffer out.
//!
//! The container format is sniffed from the bytes themselves. Every color mode
//! the `image` crate decodes (grayscale, indexed, RGBA, 16-bit, CMYK JPEG) is
//! converted once to 8-bit R,G,B; alpha is discarded.

use ndarray::{Array3, ArrayView3};
use thiserror::Error;

/// Channels per pixel in a [`PixelBuffer`], in R,G,B order.
pub const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("pixel buffer has shape {shape:?}, expected (H, W, 3) with H, W > 0")]
    Shape { shape: Vec<usize> },
    #[error("pixel data has {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Decoded image of shape (height, width, 3), `u8` samples, channel order R,G,B.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pixels: Array3<u8>,
}

impl PixelBuffer {
    /// Wrap an (H, W, 3) array, rejecting any other shape.
    pub fn from_array(pixels: Array3<u8>) -> Result<Self, NormalizeError> {
        let shape = pixels.shape();
        if shape[0] == 0 || shape[1] == 0 || shape[2] != CHANNELS {
            return Err(NormalizeError::Shape {
                shape: shape.to_vec(),
            });
        }
        Ok(Self { pixels })
    }

    /// Build from packed row-major RGB bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, NormalizeError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(NormalizeError::BufferLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        let pixels = Array3::from_shape_vec((height as usize, width as usize, CHANNELS), data)
            .map_err(|_| NormalizeError::Shape {
                shape: vec![height as usize, width as usize, CHANNELS],
            })?;
        Self::from_array(pixels)
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    /// (H, W, 3)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height(), self.width(), CHANNELS)
    }

    pub fn view(&self) -> ArrayView3<'_, u8> {
        self.pixels.view()
    }

    /// RGB triple at integer coordinates, `None` outside the image.
    pub fn get(&self, x: i64, y: i64) -> Option<[u8; 3]> {
        if x < 0 || y < 0 || x as usize >= self.width() || y as usize >= self.height() {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        Some([
            self.pixels[[y, x, 0]],
            self.pixels[[y, x, 1]],
            self.pixels[[y, x, 2]],
        ])
    }

    /// Bilinear sample at sub-pixel coordinates, clamping to the border.
    pub fn sample_clamped(&self, x: f32, y: f32) -> [f32; 3] {
        let max_x = self.width() - 1;
        let max_y = self.height() - 1;
        let x0 = (x.floor().max(0.0) as usize).min(max_x);
        let y0 = (y.floor().max(0.0) as usize).min(max_y);
        let x1 = (x0 + 1).min(max_x);
        let y1 = (y0 + 1).min(max_y);
        let fx = (x - x.floor()).clamp(0.0, 1.0);
        let fy = (y - y.floor()).clamp(0.0, 1.0);

        std::array::from_fn(|c| {
            let tl = self.pixels[[y0, x0, c]] as f32;
            let tr = self.pixels[[y0, x1, c]] as f32;
            let bl = self.pixels[[y1, x0, c]] as f32;
            let br = self.pixels[[y1, x1, c]] as f32;
            tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
        })
    }
}

/// Decode arbitrary image bytes into a [`PixelBuffer`].
///
/// Fails with [`NormalizeError::Decode`] on corrupt, truncated or unrecognized
/// input; a partially decoded image is never returned.
pub fn normalize(bytes: &[u8]) -> Result<PixelBuffer, NormalizeError> {
    let decoded = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        bytes = bytes.len(),
        "decoded image"
    );

    let rgb = decoded.into_rgb8();
    let (width, height) = rgb.dimensions();
    PixelBuffer::from_raw(width, height, rgb.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn gradient_rgba(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 3 % 256) as u8, 90])
        })
    }

    #[test]
    fn rgba_png_drops_alpha_and_keeps_channel_order() {
        let bytes = encode(DynamicImage::ImageRgba8(gradient_rgba(24, 16)), ImageFormat::Png);
        let buffer = normalize(&bytes).unwrap();

        assert_eq!(buffer.shape(), (16, 24, 3));
        assert_eq!(buffer.get(5, 3), Some([35, 33, 24]));
    }

    #[test]
    fn grayscale_jpeg_expands_to_three_equal_channels() {
        let gray = GrayImage::from_pixel(32, 20, Luma([140]));
        let bytes = encode(DynamicImage::ImageLuma8(gray), ImageFormat::Jpeg);
        let buffer = normalize(&bytes).unwrap();

        assert_eq!(buffer.shape(), (20, 32, 3));
        let [r, g, b] = buffer.get(10, 10).unwrap();
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert!((r as i32 - 140).abs() <= 2, "r = {r}");
    }

    #[test]
    fn grayscale_png_expands_to_three_equal_channels() {
        let gray = GrayImage::from_fn(5, 3, |x, y| Luma([(x * 40 + y) as u8]));
        let bytes = encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png);
        let buffer = normalize(&bytes).unwrap();

        assert_eq!(buffer.shape(), (3, 5, 3));
        assert_eq!(buffer.get(4, 2), Some([162, 162, 162]));
        assert_eq!(buffer.get(0, 0), Some([0, 0, 0]));
    }

    #[test]
    fn indexed_png_expands_palette_to_rgb() {
        let palette = [[200u8, 30, 10], [5, 100, 250]];
        let indices = [0u8, 1, 0, 1, 0, 1];

        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, 3, 2);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_palette(palette.concat());
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&indices).unwrap();
            writer.finish().unwrap();
        }
        let buffer = normalize(&bytes).unwrap();

        assert_eq!(buffer.shape(), (2, 3, 3));
        for (i, &index) in indices.iter().enumerate() {
            let (x, y) = ((i % 3) as i64, (i / 3) as i64);
            assert_eq!(buffer.get(x, y), Some(palette[index as usize]), "pixel ({x}, {y})");
        }
    }

    #[test]
    fn sixteen_bit_png_reduced_to_eight_bit() {
        let deep: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(8, 8, Luma([u16::MAX]));
        let bytes = encode(DynamicImage::ImageLuma16(deep), ImageFormat::Png);
        let buffer = normalize(&bytes).unwrap();

        assert_eq!(buffer.shape(), (8, 8, 3));
        assert_eq!(buffer.get(0, 0), Some([255, 255, 255]));
    }

    #[test]
    fn truncated_png_is_decode_error() {
        let bytes = encode(DynamicImage::ImageRgba8(gradient_rgba(64, 64)), ImageFormat::Png);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(normalize(truncated), Err(NormalizeError::Decode(_))));
    }

    #[test]
    fn garbage_and_empty_input_are_decode_errors() {
        assert!(matches!(normalize(b"definitely not an image"), Err(NormalizeError::Decode(_))));
        assert!(matches!(normalize(&[]), Err(NormalizeError::Decode(_))));
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        let err = PixelBuffer::from_raw(4, 4, vec![0u8; 4 * 4 * 4]).unwrap_err();
        assert!(matches!(err, NormalizeError::BufferLength { expected: 48, actual: 64, .. }));
    }

    #[test]
    fn from_array_rejects_bad_shapes() {
        let four_channel = Array3::<u8>::zeros((4, 4, 4));
        assert!(matches!(PixelBuffer::from_array(four_channel), Err(NormalizeError::Shape { .. })));

        let empty = Array3::<u8>::zeros((0, 4, 3));
        assert!(matches!(PixelBuffer::from_array(empty), Err(NormalizeError::Shape { .. })));
    }

    #[test]
    fn get_outside_bounds_is_none() {
        let buffer = PixelBuffer::from_raw(2, 2, vec![9u8; 12]).unwrap();
        assert_eq!(buffer.get(1, 1), Some([9, 9, 9]));
        assert_eq!(buffer.get(2, 0), None);
        assert_eq!(buffer.get(-1, 0), None);
    }

    #[test]
    fn sample_clamped_interpolates_between_columns() {
        // Two columns: black then white.
        let data = vec![0, 0, 0, 255, 255, 255];
        let buffer = PixelBuffer::from_raw(2, 1, data).unwrap();

        let mid = buffer.sample_clamped(0.5, 0.0);
        assert!((mid[0] - 127.5).abs() < 1e-3);
        let beyond = buffer.sample_clamped(10.0, -3.0);
        assert_eq!(beyond, [255.0, 255.0, 255.0]);
    }
}
