// Ports - Interface definitions (contracts)

use async_trait::async_trait;

use crate::domain::model::*;
use crate::engine::controller::ConversionJob;
use crate::engine::filter::FrameFilter;
use crate::error::ExportResult;

/// Raw progress report from a backend
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressSample {
    /// Completed share of the job, not yet clamped
    pub fraction: f64,
    /// Frames written so far, when the backend counts them
    pub frames: Option<u64>,
}

/// Receives backend progress during a blocking conversion
pub trait ProgressSink: Send + Sync {
    /// Decoding has begun; repeated calls are ignored
    fn started(&self);

    fn report(&self, sample: ProgressSample);

    /// Polled between frames; a cancelled job should stop promptly
    fn is_cancelled(&self) -> bool;
}

/// Port for probing and converting media
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Probe source tracks and duration
    async fn probe(&self, input: &str) -> ExportResult<SourceMedia>;

    /// Decode one subtitle track into timed cues
    async fn extract_subtitles(&self, input: &str, track: usize) -> ExportResult<Vec<SubtitleCue>>;

    /// Run one conversion to completion and return the output bytes.
    ///
    /// Blocking; called on the blocking pool. `filter` is present only when
    /// the job needs per-frame color grading.
    fn convert(
        &self,
        job: &ConversionJob,
        sink: &dyn ProgressSink,
        filter: Option<&mut FrameFilter>,
    ) -> ExportResult<Vec<u8>>;

    /// Whether subtitle tracks can be carried into the output
    fn supports_subtitle_passthrough(&self) -> bool;
}
