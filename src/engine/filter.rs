//! Per-frame color transform applied while re-encoding

use image::RgbaImage;
use tracing::debug;

use crate::engine::parser::ParsedColor;
use crate::error::{ExportError, ExportResult};

/// Factor bounds for brightness, contrast and saturation (0% to 400%)
const FACTOR_RANGE: (f32, f32) = (0.0, 4.0);

// ITU-R BT.709 luma weights
const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Color parameters as multiplicative factors plus a hue rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorParams {
    /// 1.0 = 100%
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Degrees, unclamped
    pub hue_degrees: f32,
}

impl ColorParams {
    /// Factors are clamped to [0, 4]
    pub fn new(brightness: f32, contrast: f32, saturation: f32, hue_degrees: f32) -> Self {
        let clamp = |v: f32| {
            if v.is_finite() {
                v.clamp(FACTOR_RANGE.0, FACTOR_RANGE.1)
            } else {
                1.0
            }
        };
        Self {
            brightness: clamp(brightness),
            contrast: clamp(contrast),
            saturation: clamp(saturation),
            hue_degrees: if hue_degrees.is_finite() { hue_degrees } else { 0.0 },
        }
    }

    /// Brightness offsets become factors around 100%
    pub fn from_parsed(color: &ParsedColor) -> Self {
        Self::new(
            (1.0 + color.brightness) as f32,
            color.contrast as f32,
            color.saturation as f32,
            color.hue as f32,
        )
    }

    pub fn is_identity(&self) -> bool {
        self.brightness == 1.0
            && self.contrast == 1.0
            && self.saturation == 1.0
            && self.hue_degrees.rem_euclid(360.0) == 0.0
    }
}

type Matrix = [[f32; 3]; 3];

fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

fn saturation_matrix(s: f32) -> Matrix {
    let mut m = [[0.0; 3]; 3];
    for (r, row) in m.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            let identity = if r == c { 1.0 } else { 0.0 };
            *cell = LUMA[c] * (1.0 - s) + identity * s;
        }
    }
    m
}

/// Luma-preserving hue rotation
fn hue_matrix(degrees: f32) -> Matrix {
    let (sin, cos) = degrees.to_radians().sin_cos();
    [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ]
}

/// Pure color transform with a lazily sized output surface
///
/// Brightness scales, contrast pivots around mid-gray, then saturation and
/// hue rotate in linear RGB. The surface is reallocated only when the input
/// dimensions change; alpha passes through untouched.
pub struct FrameFilter {
    params: ColorParams,
    matrix: Matrix,
    offset: f32,
    surface: Option<RgbaImage>,
    allocations: usize,
}

impl FrameFilter {
    pub fn new(params: ColorParams) -> Self {
        // Saturation and hue rows sum to one, so the contrast offset
        // passes through them unchanged
        let chroma = multiply(&hue_matrix(params.hue_degrees), &saturation_matrix(params.saturation));
        let gain = params.brightness * params.contrast;
        let mut matrix = chroma;
        for row in matrix.iter_mut() {
            for cell in row.iter_mut() {
                *cell *= gain;
            }
        }

        Self {
            params,
            matrix,
            offset: 0.5 * (1.0 - params.contrast),
            surface: None,
            allocations: 0,
        }
    }

    pub fn params(&self) -> ColorParams {
        self.params
    }

    /// Number of surface (re)allocations so far
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Transform one RGBA frame; the returned surface is reused by the next call
    pub fn apply(&mut self, width: u32, height: u32, rgba: &[u8]) -> ExportResult<&RgbaImage> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(ExportError::Failed {
                message: format!(
                    "Frame of {} bytes does not match {}x{} RGBA ({} bytes)",
                    rgba.len(),
                    width,
                    height,
                    expected
                ),
            });
        }

        let needs_alloc = self
            .surface
            .as_ref()
            .map_or(true, |s| s.dimensions() != (width, height));
        if needs_alloc {
            debug!("Allocating {}x{} filter surface", width, height);
            self.surface = Some(RgbaImage::new(width, height));
            self.allocations += 1;
        }

        let matrix = self.matrix;
        let offset = self.offset;
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| ExportError::Failed {
                message: "Filter surface missing".to_string(),
            })?;

        for (src, dst) in rgba.chunks_exact(4).zip(surface.chunks_exact_mut(4)) {
            let rgb = [
                src[0] as f32 / 255.0,
                src[1] as f32 / 255.0,
                src[2] as f32 / 255.0,
            ];
            for (channel, row) in matrix.iter().enumerate() {
                let value = row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2] + offset;
                dst[channel] = to_u8(value);
            }
            dst[3] = src[3];
        }

        Ok(&*surface)
    }
}

#[inline(always)]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(filter: &mut FrameFilter, rgba: [u8; 4]) -> [u8; 4] {
        let out = filter.apply(1, 1, &rgba).unwrap();
        out.get_pixel(0, 0).0
    }

    #[test]
    fn test_identity_is_lossless() {
        let params = ColorParams::new(1.0, 1.0, 1.0, 0.0);
        assert!(params.is_identity());
        let mut filter = FrameFilter::new(params);
        assert_eq!(pixel(&mut filter, [12, 200, 99, 77]), [12, 200, 99, 77]);
    }

    #[test]
    fn test_zero_saturation_is_gray() {
        let mut filter = FrameFilter::new(ColorParams::new(1.0, 1.0, 0.0, 0.0));
        let [r, g, b, a] = pixel(&mut filter, [255, 0, 0, 255]);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(r, 54); // 0.2126 * 255
        assert_eq!(a, 255);
    }

    #[test]
    fn test_brightness_and_contrast() {
        let mut brighter = FrameFilter::new(ColorParams::new(2.0, 1.0, 1.0, 0.0));
        assert_eq!(pixel(&mut brighter, [50, 100, 200, 255]), [100, 200, 255, 255]);

        let mut flat = FrameFilter::new(ColorParams::new(1.0, 0.0, 1.0, 0.0));
        assert_eq!(pixel(&mut flat, [0, 90, 255, 10]), [128, 128, 128, 10]);
    }

    #[test]
    fn test_factors_are_clamped() {
        let params = ColorParams::new(9.0, -3.0, f32::NAN, 720.0);
        assert_eq!(params.brightness, 4.0);
        assert_eq!(params.contrast, 0.0);
        assert_eq!(params.saturation, 1.0);
        assert!(ColorParams::new(1.0, 1.0, 1.0, 720.0).is_identity());
    }

    #[test]
    fn test_surface_allocated_per_dimension_change() {
        let mut filter = FrameFilter::new(ColorParams::new(1.2, 1.0, 1.0, 30.0));
        let small = vec![128u8; 4 * 4 * 4];
        let large = vec![128u8; 8 * 8 * 4];

        filter.apply(4, 4, &small).unwrap();
        filter.apply(4, 4, &small).unwrap();
        assert_eq!(filter.allocations(), 1);
        filter.apply(8, 8, &large).unwrap();
        filter.apply(8, 8, &large).unwrap();
        assert_eq!(filter.allocations(), 2);
    }

    #[test]
    fn test_rejects_short_frames() {
        let mut filter = FrameFilter::new(ColorParams::new(1.0, 1.1, 1.0, 0.0));
        assert!(filter.apply(2, 2, &[0u8; 8]).is_err());
    }
}
