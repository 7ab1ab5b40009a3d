//! Streaming animated GIF writer over RGBA frames
//!
//! Each frame gets its own quantized palette, the loop repeats forever and
//! every frame shares one delay derived from the output rate.

use gif::{Encoder, EncodingError, Frame, Repeat};
use tracing::debug;

use crate::domain::model::GifOptions;
use crate::domain::rules;
use crate::error::{ExportError, ExportResult};

fn encoding_failed(err: EncodingError) -> ExportError {
    ExportError::Failed {
        message: format!("GIF encoding failed: {}", err),
    }
}

/// In-memory GIF encoder fed one RGBA frame at a time
pub struct GifWriter {
    encoder: Encoder<Vec<u8>>,
    width: u16,
    height: u16,
    /// Centiseconds
    delay: u16,
    speed: i32,
    scratch: Vec<u8>,
    frames: u64,
}

impl GifWriter {
    /// `speed` is clamped to the quantizer's 1..=30 range
    pub fn new(width: u32, height: u32, fps: f64, speed: u32) -> ExportResult<Self> {
        let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(ExportError::Failed {
                    message: format!("GIF frames cannot be {}x{}", width, height),
                })
            }
        };
        let (min, max) = GifOptions::SPEED_RANGE;

        let mut encoder = Encoder::new(Vec::new(), w, h, &[]).map_err(encoding_failed)?;
        encoder.set_repeat(Repeat::Infinite).map_err(encoding_failed)?;

        Ok(Self {
            encoder,
            width: w,
            height: h,
            delay: rules::gif_frame_delay(fps),
            speed: speed.clamp(min, max) as i32,
            scratch: Vec::new(),
            frames: 0,
        })
    }

    pub fn push(&mut self, rgba: &[u8]) -> ExportResult<()> {
        let expected = self.width as usize * self.height as usize * 4;
        if rgba.len() != expected {
            return Err(ExportError::Failed {
                message: format!(
                    "GIF frame has {} bytes, expected {} for {}x{}",
                    rgba.len(),
                    expected,
                    self.width,
                    self.height
                ),
            });
        }

        // Quantization rewrites the pixels in place
        self.scratch.clear();
        self.scratch.extend_from_slice(rgba);
        let mut frame = Frame::from_rgba_speed(self.width, self.height, &mut self.scratch, self.speed);
        frame.delay = self.delay;
        self.encoder.write_frame(&frame).map_err(encoding_failed)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Write the trailer and hand back the file bytes
    pub fn finish(self) -> ExportResult<Vec<u8>> {
        if self.frames == 0 {
            return Err(ExportError::Failed {
                message: "no frames were decoded for the GIF".to_string(),
            });
        }
        debug!(
            "GIF finished: {} frames at {}x{}, {}cs per frame",
            self.frames, self.width, self.height, self.delay
        );
        Ok(self.encoder.into_inner()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: usize, height: usize, rgb: [u8; 3]) -> Vec<u8> {
        (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect()
    }

    #[test]
    fn test_frames_loop_with_rate_delay() {
        let mut writer = GifWriter::new(4, 2, 12.0, 10).unwrap();
        writer.push(&solid(4, 2, [255, 0, 0])).unwrap();
        writer.push(&solid(4, 2, [0, 0, 255])).unwrap();
        let bytes = writer.finish().unwrap();

        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(bytes.last(), Some(&0x3b));
        // NETSCAPE2.0 extension carries the loop count
        assert!(bytes.windows(11).any(|w| w == b"NETSCAPE2.0"));

        let mut decoder = gif::DecodeOptions::new().read_info(bytes.as_slice()).unwrap();
        assert_eq!((decoder.width(), decoder.height()), (4, 2));
        let mut delays = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            delays.push(frame.delay);
        }
        assert_eq!(delays, vec![8, 8]);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(GifWriter::new(0, 10, 10.0, 10).is_err());
        assert!(GifWriter::new(70_000, 10, 10.0, 10).is_err());

        let mut writer = GifWriter::new(2, 2, 10.0, 10).unwrap();
        assert!(writer.push(&[0; 12]).is_err());
        assert_eq!(writer.frames(), 0);
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_speed_is_clamped() {
        let mut writer = GifWriter::new(1, 1, 10.0, 99).unwrap();
        assert_eq!(writer.speed, 30);
        writer.push(&[10, 20, 30, 255]).unwrap();
        assert!(writer.finish().is_ok());
    }
}
