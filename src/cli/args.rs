//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::domain::model::{FitMode, GifOptions, Resize};

/// Where the source description comes from
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Input media file
    #[arg(short, long)]
    pub input: Option<String>,

    /// JSON file describing the source tracks, used instead of probing
    #[arg(long)]
    pub streams: Option<PathBuf>,

    /// Use the in-process synthetic backend instead of ffmpeg
    #[arg(long)]
    pub synthetic: bool,
}

/// Export settings: a settings file plus flag overrides
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Settings file (JSON, or YAML when named .yaml/.yml)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Trim start (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub start: Option<String>,

    /// Trim end (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub end: Option<String>,

    /// Output container (mp4, mov, mkv, webm, gif)
    #[arg(long)]
    pub container: Option<String>,

    /// Video codec (h264, hevc, vp9, av1)
    #[arg(long)]
    pub codec: Option<String>,

    /// Constant Rate Factor (0-63)
    #[arg(long, value_parser = crf_in_range, conflicts_with_all = ["bitrate", "qp"])]
    pub crf: Option<u8>,

    /// Target video bitrate in kbps
    #[arg(long, conflicts_with = "qp")]
    pub bitrate: Option<u32>,

    /// Constant quantizer (0-63)
    #[arg(long, value_parser = crf_in_range)]
    pub qp: Option<u8>,

    /// Encoder speed (ultrafast .. veryslow)
    #[arg(long)]
    pub speed: Option<String>,

    /// Named preset, see `clipbridge presets`
    #[arg(long)]
    pub preset: Option<String>,

    /// Resize to WIDTHxHEIGHT
    #[arg(long, value_parser = parse_resize)]
    pub resize: Option<Resize>,

    /// How the resize fits the frame
    #[arg(long, value_enum, requires = "resize")]
    pub fit: Option<FitArg>,

    /// Brightness offset in [-1, 1]
    #[arg(long, allow_hyphen_values = true)]
    pub brightness: Option<f64>,

    /// Contrast multiplier
    #[arg(long)]
    pub contrast: Option<f64>,

    /// Saturation multiplier
    #[arg(long)]
    pub saturation: Option<f64>,

    /// Hue rotation in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub hue: Option<f64>,

    /// Audio codec (aac, opus, mp3, flac)
    #[arg(long)]
    pub audio_codec: Option<String>,

    /// Audio bitrate in kbps
    #[arg(long)]
    pub audio_bitrate: Option<u32>,

    /// Stream-copy the video instead of re-encoding
    #[arg(long)]
    pub video_copy: bool,

    /// Stream-copy audio instead of re-encoding
    #[arg(long)]
    pub audio_copy: bool,

    /// Export only this audio track (source stream index)
    #[arg(long, conflicts_with = "no_audio")]
    pub audio_track: Option<usize>,

    /// Drop all audio
    #[arg(long)]
    pub no_audio: bool,

    /// Export this subtitle track (source stream index)
    #[arg(long, conflicts_with = "all_subtitles")]
    pub subtitle_track: Option<usize>,

    /// Export every subtitle track
    #[arg(long)]
    pub all_subtitles: bool,

    /// Start from the default audio and forced subtitle tracks
    #[arg(long)]
    pub auto_tracks: bool,

    /// Encoder thread count
    #[arg(long)]
    pub threads: Option<u32>,

    /// GIF frame rate (1-50)
    #[arg(long, value_parser = gif_fps_in_range)]
    pub gif_fps: Option<u32>,

    /// GIF palette speed, 1 is best quality and 30 fastest
    #[arg(long, value_parser = gif_speed_in_range)]
    pub gif_speed: Option<u32>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitArg {
    Stretch,
    Contain,
    Cover,
}

impl From<FitArg> for FitMode {
    fn from(fit: FitArg) -> Self {
        match fit {
            FitArg::Stretch => FitMode::Stretch,
            FitArg::Contain => FitMode::Contain,
            FitArg::Cover => FitMode::Cover,
        }
    }
}

/// Arguments for the compile command
#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Print the directive tokens on one line instead of the JSON plan
    #[arg(long)]
    pub tokens: bool,
}

/// Arguments for the parse command
#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Output file name; its extension selects the container
    #[arg(short, long)]
    pub output_name: String,

    /// Directive tokens, as produced by `compile --tokens`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub tokens: Vec<String>,
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Output file path (default: the planned file name)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite an existing output file
    #[arg(long)]
    pub force: bool,

    /// Report progress as JSON lines on stdout
    #[arg(long)]
    pub json: bool,

    /// Start timeout in milliseconds, overriding the configuration
    #[arg(long)]
    pub start_timeout_ms: Option<u64>,
}

/// Arguments for the subtitles command
#[derive(Args, Debug)]
pub struct SubtitlesArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Subtitle track (source stream index)
    #[arg(short, long)]
    pub track: usize,
}

/// Arguments for the presets command
#[derive(Args, Debug)]
pub struct PresetsArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

fn crf_in_range(s: &str) -> Result<u8, String> {
    clap_num::number_range(s, 0, 63)
}

fn gif_fps_in_range(s: &str) -> Result<u32, String> {
    let (min, max) = GifOptions::FPS_RANGE;
    clap_num::number_range(s, min, max)
}

fn gif_speed_in_range(s: &str) -> Result<u32, String> {
    let (min, max) = GifOptions::SPEED_RANGE;
    clap_num::number_range(s, min, max)
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_resize(s: &str) -> Result<Resize, String> {
    let (width, height) = s
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width: u32 = width.trim().parse().map_err(|_| format!("invalid width '{}'", width))?;
    let height: u32 = height.trim().parse().map_err(|_| format!("invalid height '{}'", height))?;
    if width == 0 || height == 0 {
        return Err("resize dimensions must be positive".to_string());
    }
    Ok(Resize::new(width, height))
}
