//! Named export presets

use serde::Serialize;

use crate::domain::errors::DomainError;
use crate::domain::model::{RateControl, VideoCodec};

/// A preset replaces codec, rate control and speed, and may carry a filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EncoderPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub codec: VideoCodec,
    pub rate_control: RateControl,
    pub speed: Option<&'static str>,
    /// Filter expression placed ahead of user filters
    pub filter: Option<&'static str>,
}

pub const PRESETS: &[EncoderPreset] = &[
    EncoderPreset {
        name: "web",
        description: "H.264 at 720p for browsers and chat apps",
        codec: VideoCodec::H264,
        rate_control: RateControl::Crf(23),
        speed: Some("fast"),
        filter: Some("scale=-2:720"),
    },
    EncoderPreset {
        name: "archive",
        description: "High quality HEVC at source resolution",
        codec: VideoCodec::Hevc,
        rate_control: RateControl::Crf(18),
        speed: Some("slow"),
        filter: None,
    },
    EncoderPreset {
        name: "social",
        description: "Constant 30 fps H.264 at 4.5 Mbps",
        codec: VideoCodec::H264,
        rate_control: RateControl::Bitrate(4500),
        speed: Some("medium"),
        filter: Some("fps=30"),
    },
    EncoderPreset {
        name: "tiny",
        description: "Small VP9 file at 480p",
        codec: VideoCodec::Vp9,
        rate_control: RateControl::Crf(40),
        speed: None,
        filter: Some("scale=-2:480"),
    },
];

/// Look up a preset by name, case-insensitively
pub fn find_preset(name: &str) -> Result<&'static EncoderPreset, DomainError> {
    let wanted = name.trim();
    PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| DomainError::UnknownPreset(wanted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_preset() {
        assert_eq!(find_preset("Web").unwrap().codec, VideoCodec::H264);
        assert_eq!(find_preset("tiny").unwrap().filter, Some("scale=-2:480"));
        assert_eq!(
            find_preset("vhs"),
            Err(DomainError::UnknownPreset("vhs".to_string()))
        );
    }
}
