//! Export planning: settings in, directive sequence out

use serde::Serialize;
use std::fmt;

use crate::domain::model::{AudioCodec, Container, MediaKind, VideoCodec};
use crate::protocol::DirectiveSequence;

pub mod builder;
pub mod compiler;
pub mod presets;

pub use compiler::PlanCompiler;

/// Result of compiling one export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPlan {
    /// Sequence sent across the execution boundary
    pub directives: DirectiveSequence,
    /// Informational; never sent across the boundary
    pub output: OutputDescriptor,
    /// Compatibility downgrades applied while compiling
    pub warnings: Vec<PlanWarning>,
    /// Effective clip duration in seconds
    pub expected_duration: f64,
    pub video_copy: bool,
    /// `None` when no audio track is exported
    pub audio_copy: Option<bool>,
}

impl CompiledPlan {
    pub fn tokens(&self) -> Vec<String> {
        self.directives.to_tokens()
    }
}

/// What the export will produce
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDescriptor {
    pub file_name: String,
    pub container: Container,
    pub extension: String,
    pub mime_type: String,
    pub includes_audio: bool,
    pub includes_subtitles: bool,
    pub video_stream: usize,
    pub audio_streams: Vec<usize>,
    pub subtitle_streams: Vec<usize>,
}

/// Compatibility downgrade recorded by the compiler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum PlanWarning {
    /// Stream copy was requested but filters require re-encoding
    CopyOverriddenByFilters,
    /// Source video codec cannot be copied into the container
    VideoCopyIncompatible { codec: String, container: Container },
    VideoCodecIncompatible {
        requested: VideoCodec,
        container: Container,
        fallback: VideoCodec,
    },
    QpUnsupported { codec: VideoCodec, crf: u8 },
    AudioCodecIncompatible {
        requested: AudioCodec,
        container: Container,
        fallback: AudioCodec,
    },
    /// Audio copy was requested but a source codec differs from the target
    /// or is not allowed in the container
    AudioReencodeForced {
        codecs: Vec<String>,
        container: Container,
        target: AudioCodec,
    },
    BitmapSubtitleSkipped {
        index: usize,
        codec: String,
        container: Container,
    },
    SelectedTrackMissing { kind: MediaKind, index: usize },
    /// Selected tracks the container has no room for
    TracksDropped {
        kind: MediaKind,
        count: usize,
        container: Container,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanWarning::CopyOverriddenByFilters => {
                write!(f, "Video filters are active, re-encoding instead of stream copy")
            }
            PlanWarning::VideoCopyIncompatible { codec, container } => write!(
                f,
                "Source video codec {} cannot be copied into {}, re-encoding",
                codec, container
            ),
            PlanWarning::VideoCodecIncompatible {
                requested,
                container,
                fallback,
            } => write!(
                f,
                "Video codec {} is not supported in {}, using {}",
                requested, container, fallback
            ),
            PlanWarning::QpUnsupported { codec, crf } => write!(
                f,
                "Codec {} does not support QP rate control, using CRF {}",
                codec, crf
            ),
            PlanWarning::AudioCodecIncompatible {
                requested,
                container,
                fallback,
            } => write!(
                f,
                "Audio codec {} is not allowed in {}, using {}",
                requested, container, fallback
            ),
            PlanWarning::AudioReencodeForced {
                codecs,
                container,
                target,
            } => write!(
                f,
                "Audio codec(s) {} cannot be copied as {} into {}, re-encoding despite no-reencode",
                codecs.join(", "),
                target,
                container
            ),
            PlanWarning::BitmapSubtitleSkipped {
                index,
                codec,
                container,
            } => write!(
                f,
                "Skipping bitmap subtitle track {} ({}): not supported in {}",
                index, codec, container
            ),
            PlanWarning::TracksDropped {
                kind,
                count,
                container,
            } => write!(
                f,
                "Dropping {} selected {:?} track(s): {} holds video only",
                count, kind, container
            ),
            PlanWarning::SelectedTrackMissing { kind, index } => {
                write!(f, "Selected {:?} track {} does not exist", kind, index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_json_keeps_variant_fields() {
        let warning = PlanWarning::SelectedTrackMissing {
            kind: MediaKind::Audio,
            index: 4,
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"warning": "selected_track_missing", "kind": "audio", "index": 4})
        );

        let json = serde_json::to_value(PlanWarning::CopyOverriddenByFilters).unwrap();
        assert_eq!(json, serde_json::json!({"warning": "copy_overridden_by_filters"}));
    }
}
