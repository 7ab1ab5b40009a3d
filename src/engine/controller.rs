//! Execution controller: resolves, validates and runs one conversion job

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::model::{MediaKind, SourceMedia, VideoCodec};
use crate::domain::rules;
use crate::engine::filter::{ColorParams, FrameFilter};
use crate::engine::parser::ParsedSettings;
use crate::error::{ExportError, ExportResult, TrackIssue};
use crate::ports::{MediaBackend, ProgressSink};

/// Lifecycle of a conversion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Done)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Keep/discard verdict for one source track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackDecision {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub keep: bool,
    pub reason: String,
}

impl TrackDecision {
    fn keep(index: usize, kind: MediaKind, codec: &str, reason: &str) -> Self {
        Self {
            index,
            kind,
            codec: codec.to_string(),
            keep: true,
            reason: reason.to_string(),
        }
    }

    fn discard(index: usize, kind: MediaKind, codec: &str, reason: &str) -> Self {
        Self {
            keep: false,
            ..Self::keep(index, kind, codec, reason)
        }
    }
}

/// One conversion bound to its parsed settings and track decisions
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub id: u64,
    pub input: String,
    pub output_name: String,
    pub settings: ParsedSettings,
    pub source: SourceMedia,
    pub tracks: Vec<TrackDecision>,
    /// Clip duration in seconds the progress fraction is measured against
    pub expected_duration: f64,
    state: JobState,
}

impl ConversionJob {
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to the next state; illegal transitions are ignored
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.can_transition_to(next) {
            debug!("Job {}: {} -> {}", self.id, self.state, next);
            self.state = next;
            true
        } else {
            warn!("Job {}: ignoring transition {} -> {}", self.id, self.state, next);
            false
        }
    }

    pub fn kept_tracks(&self, kind: MediaKind) -> impl Iterator<Item = &TrackDecision> {
        self.tracks.iter().filter(move |t| t.keep && t.kind == kind)
    }

    pub fn primary_video(&self) -> Option<&TrackDecision> {
        self.kept_tracks(MediaKind::Video).next()
    }

    /// Color grading applies only when the video is re-encoded
    pub fn color_params(&self) -> Option<ColorParams> {
        if !self.settings.video.force_transcode {
            return None;
        }
        self.settings
            .filters
            .color
            .map(|color| ColorParams::from_parsed(&color))
            .filter(|params| !params.is_identity())
    }
}

/// Drives jobs through the backend; one job at a time
pub struct ExecutionController {
    backend: Arc<dyn MediaBackend>,
}

impl ExecutionController {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Resolve tracks and validate; fails fast with every issue found
    pub fn prepare(
        &self,
        id: u64,
        input: &str,
        output_name: &str,
        settings: ParsedSettings,
        source: SourceMedia,
        expected_duration: Option<f64>,
    ) -> ExportResult<ConversionJob> {
        let tracks = self.resolve_tracks(&settings, &source);
        let issues = self.validate(&settings, &source, &tracks);
        if !issues.is_empty() {
            for issue in &issues {
                warn!("Job {}: {}", id, issue);
            }
            return Err(ExportError::Validation { issues });
        }

        let expected_duration = expected_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .or(settings.trim_duration)
            .unwrap_or_else(|| (source.duration - settings.trim_start.unwrap_or(0.0)).max(0.0));

        Ok(ConversionJob {
            id,
            input: input.to_string(),
            output_name: output_name.to_string(),
            settings,
            source,
            tracks,
            expected_duration,
            state: JobState::Pending,
        })
    }

    /// Per-track keep/discard, decided independently for each track
    pub fn resolve_tracks(&self, settings: &ParsedSettings, source: &SourceMedia) -> Vec<TrackDecision> {
        let primary = source.primary_video().map(|s| s.index);
        let passthrough = self.backend.supports_subtitle_passthrough();

        source
            .streams
            .iter()
            .map(|stream| {
                let (index, kind, codec) = (stream.index, stream.kind, stream.codec.as_str());
                let explicit = settings.track_ids.contains(&index);
                match kind {
                    MediaKind::Video if Some(index) == primary => {
                        TrackDecision::keep(index, kind, codec, "primary video")
                    }
                    MediaKind::Video => TrackDecision::discard(index, kind, codec, "secondary video"),
                    MediaKind::Audio if settings.include_all_audio => {
                        TrackDecision::keep(index, kind, codec, "all audio requested")
                    }
                    MediaKind::Audio if explicit => {
                        TrackDecision::keep(index, kind, codec, "explicitly selected")
                    }
                    MediaKind::Audio => TrackDecision::discard(index, kind, codec, "not selected"),
                    MediaKind::Subtitle if !(settings.include_all_subtitles || explicit) => {
                        TrackDecision::discard(index, kind, codec, "not selected")
                    }
                    MediaKind::Subtitle if !passthrough => TrackDecision::discard(
                        index,
                        kind,
                        codec,
                        "subtitle passthrough not supported",
                    ),
                    MediaKind::Subtitle => {
                        TrackDecision::keep(index, kind, codec, "subtitle selected")
                    }
                    MediaKind::Other => TrackDecision::discard(index, kind, codec, "unsupported track type"),
                }
            })
            .collect()
    }

    /// Re-check the plan without trusting the planning side
    pub fn validate(
        &self,
        settings: &ParsedSettings,
        source: &SourceMedia,
        tracks: &[TrackDecision],
    ) -> Vec<TrackIssue> {
        let mut issues = Vec::new();
        let container = settings.container;

        for index in &settings.track_ids {
            match source.stream(*index) {
                None => issues.push(TrackIssue::track(*index, "references no source track")),
                Some(stream) if stream.kind == MediaKind::Video => {
                    if source.primary_video().map(|p| p.index) != Some(*index) {
                        issues.push(TrackIssue::track(
                            *index,
                            "only the primary video track can be exported",
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        // Copy keeps the source codec; otherwise the named encoder decides
        let video_codec = if settings.video.copy {
            source.primary_video().map(|s| s.codec.clone())
        } else {
            settings.video.codec.clone()
        };
        if container.is_animation() {
            if settings.video.copy || video_codec.as_deref() != Some("gif") {
                issues.push(TrackIssue {
                    track: source.primary_video().map(|s| s.index),
                    reason: format!("{} output needs the gif encoder", container),
                });
            }
            for decision in tracks.iter().filter(|t| t.keep && t.kind != MediaKind::Video) {
                issues.push(TrackIssue::track(
                    decision.index,
                    format!("{} cannot carry {:?} tracks", container, decision.kind),
                ));
            }
        } else if video_codec.as_deref() == Some("gif") {
            issues.push(TrackIssue::plan(format!("the gif encoder cannot write {}", container)));
        }

        if let Some(codec) = video_codec {
            if let Ok(codec) = VideoCodec::parse(&codec) {
                if !rules::codec_supports_container(codec, container) {
                    let track = source.primary_video().map(|s| s.index);
                    issues.push(TrackIssue {
                        track,
                        reason: format!("video codec {} is not allowed in {}", codec, container),
                    });
                }
            }
        }

        if settings.audio.copy {
            for decision in tracks.iter().filter(|t| t.keep && t.kind == MediaKind::Audio) {
                if !rules::audio_codec_allowed_in_container(&decision.codec, container) {
                    issues.push(TrackIssue::track(
                        decision.index,
                        format!("audio codec {} cannot be copied into {}", decision.codec, container),
                    ));
                }
            }
        }

        if !tracks.iter().any(|t| t.keep) {
            issues.push(TrackIssue::plan("every track was discarded"));
        }

        issues
    }

    /// Run a prepared job to a terminal state. Blocking.
    pub fn run(&self, job: &mut ConversionJob, sink: &dyn ProgressSink) -> ExportResult<Vec<u8>> {
        if sink.is_cancelled() {
            job.transition(JobState::Cancelled);
            return Err(ExportError::Failed {
                message: "cancelled before start".to_string(),
            });
        }
        job.transition(JobState::Running);

        let mut filter = job.color_params().map(FrameFilter::new);
        info!(
            "Job {}: converting {} -> {} via {} (color filter: {})",
            job.id,
            job.input,
            job.output_name,
            self.backend.name(),
            filter.is_some()
        );

        let result = self.backend.convert(job, sink, filter.as_mut());

        match &result {
            Ok(bytes) => {
                job.transition(JobState::Done);
                info!("Job {}: produced {} bytes", job.id, bytes.len());
            }
            Err(_) if sink.is_cancelled() => {
                job.transition(JobState::Cancelled);
                info!("Job {}: cancelled", job.id);
            }
            Err(e) => {
                job.transition(JobState::Failed);
                error!("Job {}: {}", job.id, e);
            }
        }
        result
    }
}
