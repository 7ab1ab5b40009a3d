// Domain rules - Compatibility tables and numeric policies

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::domain::model::*;

/// Smallest target video bitrate ever emitted
pub const MIN_VIDEO_BITRATE_KBPS: u32 = 150;
/// Smallest rate-control buffer ever emitted
pub const MIN_BUFFER_KBPS: u32 = 300;
/// Peak-to-target ratio in bitrate mode
pub const MAXRATE_FACTOR: f64 = 1.25;
/// Audio bitrate bounds
pub const AUDIO_BITRATE_RANGE_KBPS: (u32, u32) = (32, 512);
/// Frame rate assumed when the source does not report one
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

const BITMAP_SUBTITLE_CODECS: &[&str] = &[
    "hdmv_pgs_subtitle",
    "pgssub",
    "dvd_subtitle",
    "dvdsub",
    "dvb_subtitle",
    "dvbsub",
    "xsub",
];

/// Process-wide codec/container membership sets
#[derive(Debug)]
pub struct CompatibilityTable {
    video_containers: HashMap<VideoCodec, HashSet<Container>>,
    rate_control: HashMap<VideoCodec, HashSet<RateControlMode>>,
    audio_allow_lists: HashMap<Container, HashSet<&'static str>>,
}

impl CompatibilityTable {
    /// The shared table, built on first use
    pub fn global() -> &'static CompatibilityTable {
        static TABLE: OnceLock<CompatibilityTable> = OnceLock::new();
        TABLE.get_or_init(Self::build)
    }

    fn build() -> Self {
        use Container::*;
        use RateControlMode::*;

        let video_containers = HashMap::from([
            (VideoCodec::H264, HashSet::from([Mp4, Mov, Mkv])),
            (VideoCodec::Hevc, HashSet::from([Mp4, Mov, Mkv])),
            (VideoCodec::Vp9, HashSet::from([Mp4, Mkv, Webm])),
            (VideoCodec::Av1, HashSet::from([Mp4, Mkv, Webm])),
        ]);

        let rate_control = HashMap::from([
            (VideoCodec::H264, HashSet::from([Crf, Bitrate, Qp])),
            (VideoCodec::Hevc, HashSet::from([Crf, Bitrate, Qp])),
            (VideoCodec::Vp9, HashSet::from([Crf, Bitrate])),
            (VideoCodec::Av1, HashSet::from([Crf, Bitrate])),
        ]);

        // Matroska is deliberately absent: it accepts any audio codec
        let audio_allow_lists = HashMap::from([
            (
                Mp4,
                HashSet::from(["aac", "mp3", "ac3", "eac3", "opus", "flac", "alac"]),
            ),
            (
                Mov,
                HashSet::from(["aac", "mp3", "ac3", "eac3", "alac", "pcm_s16le", "pcm_s24le"]),
            ),
            (Webm, HashSet::from(["opus", "vorbis"])),
            (Gif, HashSet::new()),
        ]);

        Self {
            video_containers,
            rate_control,
            audio_allow_lists,
        }
    }

    pub fn codec_supports_container(&self, codec: VideoCodec, container: Container) -> bool {
        self.video_containers
            .get(&codec)
            .is_some_and(|set| set.contains(&container))
    }

    pub fn codec_supports_rate_control(&self, codec: VideoCodec, mode: RateControlMode) -> bool {
        self.rate_control
            .get(&codec)
            .is_some_and(|set| set.contains(&mode))
    }

    pub fn audio_codec_allowed_in_container(&self, codec: &str, container: Container) -> bool {
        match self.audio_allow_lists.get(&container) {
            Some(allowed) => allowed.contains(normalize_audio_codec(codec).as_str()),
            None => true,
        }
    }
}

/// Map probe/encoder spellings onto the names used in allow-lists
fn normalize_audio_codec(codec: &str) -> String {
    let lower = codec.trim().to_lowercase();
    match lower.as_str() {
        "libopus" => "opus".to_string(),
        "libvorbis" => "vorbis".to_string(),
        "libmp3lame" | "mp3float" => "mp3".to_string(),
        "mp4a" | "aac_latm" => "aac".to_string(),
        _ => lower,
    }
}

pub fn codec_supports_container(codec: VideoCodec, container: Container) -> bool {
    CompatibilityTable::global().codec_supports_container(codec, container)
}

pub fn codec_supports_rate_control(codec: VideoCodec, mode: RateControlMode) -> bool {
    CompatibilityTable::global().codec_supports_rate_control(codec, mode)
}

/// Containers missing from the allow-list table are permissive
pub fn audio_codec_allowed_in_container(codec: &str, container: Container) -> bool {
    CompatibilityTable::global().audio_codec_allowed_in_container(codec, container)
}

/// Whether two audio codec spellings name the same codec
pub fn same_audio_codec(a: &str, b: &str) -> bool {
    normalize_audio_codec(a) == normalize_audio_codec(b)
}

/// Codec chosen when the requested one cannot live in the container
pub fn default_video_codec(container: Container) -> VideoCodec {
    match container {
        Container::Webm => VideoCodec::Vp9,
        _ => VideoCodec::H264,
    }
}

pub fn default_audio_codec(container: Container) -> AudioCodec {
    match container {
        Container::Webm => AudioCodec::Opus,
        _ => AudioCodec::Aac,
    }
}

/// Inclusive CRF range accepted by the codec's encoder
pub fn crf_range(codec: VideoCodec) -> (u8, u8) {
    match codec {
        VideoCodec::H264 | VideoCodec::Hevc => (0, 51),
        VideoCodec::Vp9 | VideoCodec::Av1 => (0, 63),
    }
}

pub fn default_crf(codec: VideoCodec) -> u8 {
    match codec {
        VideoCodec::H264 => 23,
        VideoCodec::Hevc => 31,
        VideoCodec::Vp9 => 32,
        VideoCodec::Av1 => 35,
    }
}

pub fn clamp_crf(codec: VideoCodec, value: u8) -> u8 {
    let (min, max) = crf_range(codec);
    value.clamp(min, max)
}

pub fn is_bitmap_subtitle(codec: &str) -> bool {
    BITMAP_SUBTITLE_CODECS.contains(&codec.trim().to_lowercase().as_str())
}

/// Only Matroska carries bitmap subtitles; the ISO-BMFF family and WebM
/// hold text tracks only
pub fn container_accepts_bitmap_subtitles(container: Container) -> bool {
    container == Container::Mkv
}

/// Output codec for text subtitles in each container; `None` for GIF
pub fn subtitle_codec_for(container: Container) -> Option<&'static str> {
    match container {
        Container::Mp4 | Container::Mov => Some("mov_text"),
        Container::Mkv => Some("ass"),
        Container::Webm => Some("webvtt"),
        Container::Gif => None,
    }
}

/// Subtitle codec directive for a set of kept tracks. Bitmap tracks
/// cannot be converted to text, so any bitmap track means stream copy.
pub fn subtitle_codec_for_tracks<'a>(
    container: Container,
    codecs: impl IntoIterator<Item = &'a str>,
) -> Option<&'static str> {
    let text = subtitle_codec_for(container)?;
    if codecs.into_iter().any(is_bitmap_subtitle) {
        Some("copy")
    } else {
        Some(text)
    }
}

/// Frame delay in GIF centiseconds for an output rate
pub fn gif_frame_delay(fps: f64) -> u16 {
    if !fps.is_finite() || fps <= 0.0 {
        return 10;
    }
    (100.0 / fps).round().clamp(2.0, u16::MAX as f64) as u16
}

/// Derived rate-control numbers for bitrate mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateBudget {
    pub target_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
}

impl BitrateBudget {
    /// target ≥ 150k, maxrate = max(target, 1.25 × target), bufsize = max(2 × target, 300k)
    pub fn for_target(requested_kbps: u32) -> Self {
        let target = requested_kbps.max(MIN_VIDEO_BITRATE_KBPS);
        let maxrate = ((target as f64 * MAXRATE_FACTOR).round() as u32).max(target);
        let bufsize = target.saturating_mul(2).max(MIN_BUFFER_KBPS);
        Self {
            target_kbps: target,
            maxrate_kbps: maxrate,
            bufsize_kbps: bufsize,
        }
    }
}

pub fn clamp_audio_bitrate(kbps: u32) -> u32 {
    let (min, max) = AUDIO_BITRATE_RANGE_KBPS;
    kbps.clamp(min, max)
}

/// Shortest trim window the source can express: one frame
pub fn min_trim_duration(frame_rate: Option<f64>) -> f64 {
    let fps = frame_rate
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(FALLBACK_FRAME_RATE);
    1.0 / fps
}

/// Deviation below which a trim is treated as a no-op
pub fn trim_epsilon(min_trim: f64) -> f64 {
    (min_trim / 2.0).max(0.01)
}

#[cfg(test)]
mod tests;
