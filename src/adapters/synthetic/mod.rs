//! In-process backend generating frames instead of decoding files
//!
//! Output is deterministic for a given job, which makes it suitable for
//! tests and dry runs of the whole pipeline. GIF jobs produce a real GIF
//! of the generated frames; everything else gets a small tagged payload.

use async_trait::async_trait;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::domain::model::*;
use crate::engine::controller::ConversionJob;
use crate::engine::filter::FrameFilter;
use crate::engine::gif_writer::GifWriter;
use crate::error::{ExportError, ExportResult};
use crate::ports::{MediaBackend, ProgressSample, ProgressSink};

const MAGIC: &[u8] = b"CBSYN1";
const MAX_FRAMES: u64 = 3_000;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How a synthetic conversion behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyntheticBehavior {
    #[default]
    Complete,
    /// Fail when this frame index is reached
    FailAt(u64),
    /// Never report a start; wait until cancelled
    HangBeforeStart,
    /// Report a start, then make no progress until cancelled
    StallAfterStart,
    /// Stay unresponsive, cancellation included, for the delay; then start
    StartAfter(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    sources: HashMap<String, SourceMedia>,
    behavior: SyntheticBehavior,
    frame_delay: Duration,
    extract_delay: Duration,
    subtitle_passthrough: bool,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            subtitle_passthrough: true,
            ..Self::default()
        }
    }

    /// Register a probed description for an input name
    pub fn with_source(mut self, input: &str, media: SourceMedia) -> Self {
        self.sources.insert(input.to_string(), media);
        self
    }

    pub fn with_behavior(mut self, behavior: SyntheticBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Sleep between generated frames
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Delay before subtitle cues are returned
    pub fn with_extract_delay(mut self, delay: Duration) -> Self {
        self.extract_delay = delay;
        self
    }

    pub fn with_subtitle_passthrough(mut self, enabled: bool) -> Self {
        self.subtitle_passthrough = enabled;
        self
    }

    /// Clip used for inputs without a registered description
    pub fn default_media(input: &str) -> SourceMedia {
        SourceMedia::new(
            input,
            10.0,
            vec![
                StreamDescriptor::video(0, "h264", 64, 36, 30.0),
                StreamDescriptor::audio(1, "aac", 48_000, 2)
                    .with_language("eng")
                    .as_default(),
                StreamDescriptor::subtitle(2, "subrip").with_language("eng"),
            ],
        )
    }

    fn wait_for_cancel(&self, sink: &dyn ProgressSink) -> ExportError {
        while !sink.is_cancelled() {
            thread::sleep(POLL_INTERVAL);
        }
        ExportError::Failed {
            message: "cancelled".to_string(),
        }
    }

    /// Output geometry: the source size unless a positive resize is requested
    fn geometry(job: &ConversionJob) -> (u32, u32) {
        let source = job
            .source
            .primary_video()
            .and_then(|s| s.width.zip(s.height))
            .unwrap_or((64, 36));
        match job.settings.filters.resize {
            Some(resize) if resize.width > 0 && resize.height > 0 => {
                (resize.width as u32, resize.height as u32)
            }
            _ => source,
        }
    }
}

/// Gradient frame, shifted per frame index
fn generate_frame(width: u32, height: u32, index: u64) -> Vec<u8> {
    let mut frame = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            frame.push((x * 255 / width.max(1)) as u8);
            frame.push((y * 255 / height.max(1)) as u8);
            frame.push((index.wrapping_mul(7) % 256) as u8);
            frame.push(255);
        }
    }
    frame
}

/// FNV-1a, folded over every output frame
fn fold_checksum(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn probe(&self, input: &str) -> ExportResult<SourceMedia> {
        Ok(self
            .sources
            .get(input)
            .cloned()
            .unwrap_or_else(|| Self::default_media(input)))
    }

    async fn extract_subtitles(&self, input: &str, track: usize) -> ExportResult<Vec<SubtitleCue>> {
        if !self.extract_delay.is_zero() {
            tokio::time::sleep(self.extract_delay).await;
        }

        let media = self.probe(input).await?;
        match media.stream(track) {
            Some(stream) if stream.kind == MediaKind::Subtitle => Ok((0..3)
                .map(|n| SubtitleCue {
                    start: n as f64 * 2.0,
                    end: n as f64 * 2.0 + 1.5,
                    text: format!("Line {} of track {}", n + 1, track),
                })
                .collect()),
            _ => Err(ExportError::backend(format!(
                "Track {} of {} is not a subtitle track",
                track, input
            ))),
        }
    }

    fn convert(
        &self,
        job: &ConversionJob,
        sink: &dyn ProgressSink,
        mut filter: Option<&mut FrameFilter>,
    ) -> ExportResult<Vec<u8>> {
        match self.behavior {
            SyntheticBehavior::HangBeforeStart => return Err(self.wait_for_cancel(sink)),
            SyntheticBehavior::StartAfter(delay) => thread::sleep(delay),
            _ => {}
        }
        sink.started();
        if self.behavior == SyntheticBehavior::StallAfterStart {
            return Err(self.wait_for_cancel(sink));
        }

        let fps = job
            .settings
            .filters
            .frame_rate()
            .or_else(|| job.source.frame_rate())
            .unwrap_or(30.0);
        let frames = ((job.expected_duration * fps).ceil() as u64).clamp(1, MAX_FRAMES);
        let (width, height) = Self::geometry(job);
        debug!("Synthetic job {}: {} frames at {}x{}", job.id, frames, width, height);

        let mut gif = if job.settings.container.is_animation() {
            let speed = job.settings.video.quality.unwrap_or(GifOptions::default().speed);
            Some(GifWriter::new(width, height, fps, speed)?)
        } else {
            None
        };

        let mut checksum: u64 = 0xcbf2_9ce4_8422_2325;
        for index in 0..frames {
            if self.behavior == SyntheticBehavior::FailAt(index) {
                return Err(ExportError::Failed {
                    message: format!("synthetic encoder failure at frame {}", index),
                });
            }

            let frame = generate_frame(width, height, index);
            let out: &[u8] = match filter.as_deref_mut() {
                Some(filter) => filter.apply(width, height, &frame)?.as_raw(),
                None => &frame,
            };
            checksum = fold_checksum(checksum, out);
            if let Some(gif) = gif.as_mut() {
                gif.push(out)?;
            }

            sink.report(ProgressSample {
                fraction: (index + 1) as f64 / frames as f64,
                frames: Some(index + 1),
            });
            // A late start still reports its first frame before seeing the cancel
            if sink.is_cancelled() {
                return Err(ExportError::Failed {
                    message: "cancelled".to_string(),
                });
            }
            if !self.frame_delay.is_zero() {
                thread::sleep(self.frame_delay);
            }
        }

        if let Some(gif) = gif {
            return gif.finish();
        }

        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(MAGIC);
        payload.extend_from_slice(job.settings.container.extension().as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(&frames.to_le_bytes());
        payload.extend_from_slice(&width.to_le_bytes());
        payload.extend_from_slice(&height.to_le_bytes());
        payload.extend_from_slice(&checksum.to_le_bytes());
        for track in job.tracks.iter().filter(|t| t.keep) {
            payload.extend_from_slice(&(track.index as u32).to_le_bytes());
        }
        Ok(payload)
    }

    fn supports_subtitle_passthrough(&self) -> bool {
        self.subtitle_passthrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_falls_back_to_default_media() {
        let backend = SyntheticBackend::new();
        let media = backend.probe("anything.mp4").await.unwrap();
        assert_eq!(media.name, "anything.mp4");
        assert_eq!(media.streams.len(), 3);
    }

    #[tokio::test]
    async fn test_extract_subtitles_requires_subtitle_track() {
        let backend = SyntheticBackend::new();
        let cues = backend.extract_subtitles("a.mkv", 2).await.unwrap();
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].text, "Line 1 of track 2");
        assert!(backend.extract_subtitles("a.mkv", 1).await.is_err());
    }

    #[test]
    fn test_frames_are_deterministic() {
        assert_eq!(generate_frame(4, 2, 3), generate_frame(4, 2, 3));
        assert_ne!(generate_frame(4, 2, 3), generate_frame(4, 2, 4));
        assert_eq!(generate_frame(4, 2, 0).len(), 32);
    }
}
