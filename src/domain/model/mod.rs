// Domain models - Core types and data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::domain::errors::DomainError;

/// Time specification with precision - represents time in seconds with fractional precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TimeSpec {
    pub seconds: f64,
}

impl TimeSpec {
    /// Create a new TimeSpec from seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    /// Parse time string in seconds, MM:SS.ms or HH:MM:SS.ms form
    pub fn parse(time_str: &str) -> Result<Self, DomainError> {
        let trimmed = time_str.trim();

        if let Ok(seconds) = trimmed.parse::<f64>() {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(DomainError::BadArgs("Time cannot be negative".to_string()));
            }
            return Ok(Self::from_seconds(seconds));
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        let (hours, minutes, seconds_part) = match parts.as_slice() {
            [m, s] => (0, Self::parse_unit(m, "minutes")?, *s),
            [h, m, s] => {
                let minutes = Self::parse_unit(m, "minutes")?;
                if minutes >= 60 {
                    return Err(DomainError::BadArgs("Minutes must be less than 60".to_string()));
                }
                (Self::parse_unit(h, "hours")?, minutes, *s)
            }
            _ => {
                return Err(DomainError::BadArgs(format!(
                    "Invalid time format '{}'. Supported formats: seconds, MM:SS.ms, HH:MM:SS.ms",
                    trimmed
                )))
            }
        };

        let seconds = seconds_part
            .parse::<f64>()
            .map_err(|_| DomainError::BadArgs("Invalid seconds format".to_string()))?;
        if !(0.0..60.0).contains(&seconds) {
            return Err(DomainError::BadArgs("Seconds must be less than 60".to_string()));
        }

        Ok(Self::from_seconds(
            hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds,
        ))
    }

    fn parse_unit(value: &str, name: &str) -> Result<u32, DomainError> {
        value
            .parse::<u32>()
            .map_err(|_| DomainError::BadArgs(format!("Invalid {} format", name)))
    }

    /// Format as HH:MM:SS.mmm (hours omitted when zero)
    pub fn format_hms(&self) -> String {
        let total_ms = (self.seconds * 1000.0).round() as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let seconds = (total_ms % 60_000) / 1000;
        let millis = total_ms % 1000;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
        } else {
            format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
        }
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_hms())
    }
}

/// Output container families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mov,
    Mkv,
    Webm,
    /// Animated GIF; video only
    Gif,
}

impl Container {
    /// Video containers; GIF is kept out since it carries no audio or subtitles
    pub const ALL: [Container; 4] = [Container::Mp4, Container::Mov, Container::Mkv, Container::Webm];

    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
            Container::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Mov => "video/quicktime",
            Container::Mkv => "video/x-matroska",
            Container::Webm => "video/webm",
            Container::Gif => "image/gif",
        }
    }

    pub fn is_animation(&self) -> bool {
        *self == Container::Gif
    }

    /// Parse container name or extension
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "mp4" | "m4v" => Ok(Container::Mp4),
            "mov" | "quicktime" => Ok(Container::Mov),
            "mkv" | "matroska" => Ok(Container::Mkv),
            "webm" => Ok(Container::Webm),
            "gif" => Ok(Container::Gif),
            other => Err(DomainError::BadArgs(format!(
                "Unknown container '{}'. Valid containers: mp4, mov, mkv, webm, gif",
                other
            ))),
        }
    }

    /// Container implied by an output file name, if its extension is known
    pub fn from_file_name(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| Self::parse(ext).ok())
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Target video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Vp9, VideoCodec::Av1];

    /// Codec family name as reported by probing
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }

    /// Encoder name used on the directive wire
    pub fn encoder_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Av1 => "libsvtav1",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "h264" | "avc" | "libx264" => Ok(VideoCodec::H264),
            "hevc" | "h265" | "libx265" => Ok(VideoCodec::Hevc),
            "vp9" | "libvpx-vp9" => Ok(VideoCodec::Vp9),
            "av1" | "libsvtav1" | "libaom-av1" => Ok(VideoCodec::Av1),
            other => Err(DomainError::UnsupportedCodec(other.to_string())),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target audio codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Mp3,
    Vorbis,
    Flac,
}

impl AudioCodec {
    pub fn name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "opus",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Flac => "flac",
        }
    }

    pub fn encoder_name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Vorbis => "libvorbis",
            AudioCodec::Flac => "flac",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "aac" => Ok(AudioCodec::Aac),
            "opus" | "libopus" => Ok(AudioCodec::Opus),
            "mp3" | "libmp3lame" => Ok(AudioCodec::Mp3),
            "vorbis" | "libvorbis" => Ok(AudioCodec::Vorbis),
            "flac" => Ok(AudioCodec::Flac),
            other => Err(DomainError::UnsupportedCodec(other.to_string())),
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rate-control mode without its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControlMode {
    Crf,
    Bitrate,
    Qp,
}

impl fmt::Display for RateControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateControlMode::Crf => f.write_str("crf"),
            RateControlMode::Bitrate => f.write_str("bitrate"),
            RateControlMode::Qp => f.write_str("qp"),
        }
    }
}

/// Rate-control mode with its numeric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum RateControl {
    /// Constant rate factor
    Crf(u8),
    /// Target bitrate in kbps
    Bitrate(u32),
    /// Constant quantizer
    Qp(u8),
}

impl RateControl {
    pub fn mode(&self) -> RateControlMode {
        match self {
            RateControl::Crf(_) => RateControlMode::Crf,
            RateControl::Bitrate(_) => RateControlMode::Bitrate,
            RateControl::Qp(_) => RateControlMode::Qp,
        }
    }
}

/// How a resize maps the source frame onto the target box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the box exactly, ignoring aspect ratio
    #[default]
    Stretch,
    /// Fit within the box, keeping aspect ratio
    Contain,
    /// Cover the box, keeping aspect ratio and cropping overflow
    Cover,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub fit: FitMode,
}

impl Resize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fit: FitMode::Stretch,
        }
    }

    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = fit;
        self
    }
}

/// Color adjustments; identity is brightness 0, contrast 1, saturation 1, hue 0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorAdjustments {
    /// Additive offset in [-1, 1]
    pub brightness: f64,
    /// Multiplier, 1.0 = unchanged
    pub contrast: f64,
    /// Multiplier, 0.0 = grayscale
    pub saturation: f64,
    /// Rotation in degrees
    pub hue: f64,
}

impl Default for ColorAdjustments {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            hue: 0.0,
        }
    }
}

impl ColorAdjustments {
    const EPSILON: f64 = 1e-6;

    pub fn is_identity(&self) -> bool {
        self.brightness.abs() < Self::EPSILON
            && (self.contrast - 1.0).abs() < Self::EPSILON
            && (self.saturation - 1.0).abs() < Self::EPSILON
            && self.hue.abs() < Self::EPSILON
    }

    fn validate(&self) -> Result<(), DomainError> {
        let values = [self.brightness, self.contrast, self.saturation, self.hue];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DomainError::InvalidSettings(
                "Color adjustments must be finite numbers".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.brightness) {
            return Err(DomainError::InvalidSettings(format!(
                "Brightness {} outside [-1, 1]",
                self.brightness
            )));
        }
        if self.contrast < 0.0 || self.saturation < 0.0 {
            return Err(DomainError::InvalidSettings(
                "Contrast and saturation cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether every track of a type is exported or a single selected one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackExportMode {
    #[default]
    All,
    Single,
}

/// Track export choice for one media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSelection {
    pub mode: TrackExportMode,
    /// Source stream index used in `Single` mode; `None` exports no track
    pub selected: Option<usize>,
}

impl TrackSelection {
    pub fn all() -> Self {
        Self {
            mode: TrackExportMode::All,
            selected: None,
        }
    }

    pub fn single(index: usize) -> Self {
        Self {
            mode: TrackExportMode::Single,
            selected: Some(index),
        }
    }

    pub fn none() -> Self {
        Self {
            mode: TrackExportMode::Single,
            selected: None,
        }
    }
}

/// Animated GIF output knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GifOptions {
    /// Output frame rate, 1..=50
    pub fps: u32,
    /// Palette quantization speed, 1 (best) ..= 30 (fastest)
    pub speed: u32,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self { fps: 10, speed: 10 }
    }
}

impl GifOptions {
    pub const FPS_RANGE: (u32, u32) = (1, 50);
    pub const SPEED_RANGE: (u32, u32) = (1, 30);

    pub fn validate(&self) -> Result<(), DomainError> {
        let (min_fps, max_fps) = Self::FPS_RANGE;
        if !(min_fps..=max_fps).contains(&self.fps) {
            return Err(DomainError::InvalidSettings(format!(
                "GIF frame rate {} is outside {}..={}",
                self.fps, min_fps, max_fps
            )));
        }
        let (min_speed, max_speed) = Self::SPEED_RANGE;
        if !(min_speed..=max_speed).contains(&self.speed) {
            return Err(DomainError::InvalidSettings(format!(
                "GIF speed {} is outside {}..={}",
                self.speed, min_speed, max_speed
            )));
        }
        Ok(())
    }
}

/// User-facing export intent, immutable for the duration of one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub trim_start: f64,
    pub trim_end: f64,
    pub container: Container,
    pub video_codec: VideoCodec,
    pub rate_control: RateControl,
    /// Encoder speed preset (`ultrafast` .. `veryslow`)
    pub speed: Option<String>,
    /// Named export preset; overrides codec, rate control and speed
    pub preset: Option<String>,
    pub resize: Option<Resize>,
    pub color: ColorAdjustments,
    pub audio_codec: AudioCodec,
    pub audio_bitrate_kbps: u32,
    pub video_no_reencode: bool,
    pub audio_no_reencode: bool,
    pub audio_tracks: TrackSelection,
    pub subtitle_tracks: TrackSelection,
    /// Only read when the container is GIF
    pub gif: GifOptions,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            trim_start: 0.0,
            trim_end: 0.0,
            container: Container::Mp4,
            video_codec: VideoCodec::H264,
            rate_control: RateControl::Crf(23),
            speed: None,
            preset: None,
            resize: None,
            color: ColorAdjustments::default(),
            audio_codec: AudioCodec::Aac,
            audio_bitrate_kbps: 128,
            video_no_reencode: false,
            audio_no_reencode: false,
            audio_tracks: TrackSelection::all(),
            subtitle_tracks: TrackSelection::none(),
            gif: GifOptions::default(),
        }
    }
}

impl ExportSettings {
    /// Settings that export the whole clip of the given duration
    pub fn for_duration(duration: f64) -> Self {
        Self {
            trim_end: duration,
            ..Self::default()
        }
    }

    /// Whether any resize or color filter is active
    pub fn has_filters(&self) -> bool {
        self.resize.is_some() || !self.color.is_identity()
    }

    /// Validate numeric ranges
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.trim_start.is_finite() || !self.trim_end.is_finite() {
            return Err(DomainError::InvalidSettings(
                "Trim window must be finite".to_string(),
            ));
        }
        if self.trim_start < 0.0 {
            return Err(DomainError::InvalidSettings(
                "Trim start cannot be negative".to_string(),
            ));
        }
        // A non-positive end means "to the end of the source"
        if self.trim_end > 0.0 && self.trim_end < self.trim_start {
            return Err(DomainError::InvalidSettings(format!(
                "Trim end ({:.3}s) is before trim start ({:.3}s)",
                self.trim_end, self.trim_start
            )));
        }
        if let Some(resize) = &self.resize {
            if resize.width == 0 || resize.height == 0 {
                return Err(DomainError::InvalidSettings(
                    "Resize dimensions cannot be zero".to_string(),
                ));
            }
        }
        match self.rate_control {
            RateControl::Bitrate(0) => {
                return Err(DomainError::InvalidSettings(
                    "Target bitrate cannot be zero".to_string(),
                ))
            }
            RateControl::Crf(value) | RateControl::Qp(value) if value > 63 => {
                return Err(DomainError::InvalidSettings(format!(
                    "Quality value {} exceeds 63",
                    value
                )))
            }
            _ => {}
        }
        if self.container.is_animation() {
            self.gif.validate()?;
        }
        self.color.validate()
    }
}

/// Media type of a probed track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// Probed source track facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
}

impl StreamDescriptor {
    fn new(index: usize, kind: MediaKind, codec: &str) -> Self {
        Self {
            index,
            kind,
            codec: codec.to_lowercase(),
            width: None,
            height: None,
            frame_rate: None,
            sample_rate: None,
            channels: None,
            language: None,
            title: None,
            is_default: false,
            is_forced: false,
            bit_rate: None,
        }
    }

    pub fn video(index: usize, codec: &str, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
            ..Self::new(index, MediaKind::Video, codec)
        }
    }

    pub fn audio(index: usize, codec: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            ..Self::new(index, MediaKind::Audio, codec)
        }
    }

    pub fn subtitle(index: usize, codec: &str) -> Self {
        Self::new(index, MediaKind::Subtitle, codec)
    }

    pub fn other(index: usize, codec: &str) -> Self {
        Self::new(index, MediaKind::Other, codec)
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn as_forced(mut self) -> Self {
        self.is_forced = true;
        self
    }
}

/// Probed source clip: file name, duration and tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMedia {
    pub name: String,
    pub duration: f64,
    pub streams: Vec<StreamDescriptor>,
}

impl SourceMedia {
    pub fn new(name: impl Into<String>, duration: f64, streams: Vec<StreamDescriptor>) -> Self {
        Self {
            name: name.into(),
            duration,
            streams,
        }
    }

    /// First video track, the one always exported
    pub fn primary_video(&self) -> Option<&StreamDescriptor> {
        self.streams_of(MediaKind::Video).next()
    }

    pub fn streams_of(&self, kind: MediaKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn stream(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// Frame rate of the primary video track, if known
    pub fn frame_rate(&self) -> Option<f64> {
        self.primary_video()
            .and_then(|s| s.frame_rate)
            .filter(|fps| fps.is_finite() && *fps > 0.0)
    }

    /// File stem used to derive output names
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("export")
    }
}

/// One timed subtitle line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub text: String,
}

#[cfg(test)]
mod tests;
