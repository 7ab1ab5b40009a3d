//! Directive parser: rebuilds structured settings from a directive sequence
//!
//! The parser walks the lexed sequence left to right and never fails.
//! Directives it does not understand are remembered in `ignored` and
//! otherwise skipped.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::domain::model::{Container, FitMode, RateControlMode};
use crate::protocol::{CodecValue, Directive, DirectiveSequence, MapTarget};

/// Video side of the parsed settings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedVideo {
    /// Encoder name; `None` when copying or unspecified
    pub codec: Option<String>,
    pub copy: bool,
    pub force_transcode: bool,
    pub bitrate_kbps: Option<u32>,
    pub maxrate_kbps: Option<u32>,
    pub bufsize_kbps: Option<u32>,
    pub crf: Option<u32>,
    pub qp: Option<u32>,
    pub preset: Option<String>,
    /// `-q:v`; GIF quantization speed
    pub quality: Option<u32>,
}

impl ParsedVideo {
    /// Rate-control mode the encoder will run in
    pub fn rate_control(&self) -> Option<RateControlMode> {
        if self.qp.is_some() {
            Some(RateControlMode::Qp)
        } else if self.crf.is_some() {
            Some(RateControlMode::Crf)
        } else if self.bitrate_kbps.is_some() {
            Some(RateControlMode::Bitrate)
        } else {
            None
        }
    }
}

/// Audio side of the parsed settings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedAudio {
    pub codec: Option<String>,
    pub copy: bool,
    pub force_transcode: bool,
    pub bitrate_kbps: Option<u32>,
}

/// Target box of a `scale=` expression; negative sides keep aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParsedResize {
    pub width: i32,
    pub height: i32,
    pub fit: FitMode,
}

/// Values of an `eq=` expression
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParsedColor {
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub hue: f64,
}

impl Default for ParsedColor {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            hue: 0.0,
        }
    }
}

impl ParsedColor {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Filters recovered from `-vf`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedFilters {
    /// Every expression in order, including ones the parser only passes through
    pub chain: Vec<String>,
    /// Last geometry expression
    pub resize: Option<ParsedResize>,
    pub color: Option<ParsedColor>,
}

impl ParsedFilters {
    /// Chain without color expressions, for backends that color-grade per frame
    pub fn geometry_chain(&self) -> Vec<String> {
        self.chain
            .iter()
            .filter(|expr| !expr.starts_with("eq="))
            .cloned()
            .collect()
    }

    /// Output rate forced by the last `fps=` expression
    pub fn frame_rate(&self) -> Option<f64> {
        self.chain
            .iter()
            .rev()
            .find_map(|expr| expr.strip_prefix("fps=").and_then(parse_fps))
    }
}

/// Settings reconstructed on the execution side
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSettings {
    pub container: Container,
    pub trim_start: Option<f64>,
    pub trim_duration: Option<f64>,
    pub video: ParsedVideo,
    pub audio: ParsedAudio,
    pub subtitle_codec: Option<String>,
    pub filters: ParsedFilters,
    pub include_primary_video: bool,
    pub include_all_audio: bool,
    pub include_all_subtitles: bool,
    /// Explicit `0:<index>` mappings
    pub track_ids: BTreeSet<usize>,
    pub threads: Option<u32>,
    /// Raw tokens of directives that were skipped
    pub ignored: Vec<String>,
}

impl ParsedSettings {
    /// Deterministic JSON rendering
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectiveParser;

impl DirectiveParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse wire tokens; the container comes from the output name
    pub fn parse<S: AsRef<str>>(&self, tokens: &[S], output_name: &str) -> ParsedSettings {
        let sequence = DirectiveSequence::from_tokens(tokens);
        self.parse_sequence(&sequence, output_name)
    }

    pub fn parse_sequence(&self, sequence: &DirectiveSequence, output_name: &str) -> ParsedSettings {
        let mut parsed = ParsedSettings {
            container: Container::from_file_name(output_name).unwrap_or(Container::Mp4),
            ..ParsedSettings::default()
        };

        for directive in sequence.iter() {
            self.apply(&mut parsed, directive);
        }

        // A stream cannot be both copied and filtered
        if parsed.video.force_transcode {
            parsed.video.copy = false;
        }
        if parsed.audio.force_transcode {
            parsed.audio.copy = false;
        }

        debug!(
            "Parsed {} directives (video copy {}, audio copy {}, {} ignored)",
            sequence.len(),
            parsed.video.copy,
            parsed.audio.copy,
            parsed.ignored.len()
        );
        parsed
    }

    fn apply(&self, parsed: &mut ParsedSettings, directive: &Directive) {
        match directive {
            Directive::TrimStart(seconds) => parsed.trim_start = Some(*seconds),
            Directive::TrimDuration(seconds) => parsed.trim_duration = Some(*seconds),
            Directive::VideoCodec(CodecValue::Copy) => {
                parsed.video.copy = true;
                parsed.video.codec = None;
            }
            Directive::VideoCodec(CodecValue::Named(name)) => {
                parsed.video.codec = Some(name.clone());
                parsed.video.copy = false;
                parsed.video.force_transcode = true;
            }
            Directive::AudioCodec(CodecValue::Copy) => {
                parsed.audio.copy = true;
                parsed.audio.codec = None;
            }
            Directive::AudioCodec(CodecValue::Named(name)) => {
                parsed.audio.codec = Some(name.clone());
                parsed.audio.copy = false;
                parsed.audio.force_transcode = true;
            }
            Directive::SubtitleCodec(name) => parsed.subtitle_codec = Some(name.clone()),
            Directive::VideoBitrate(rate) => {
                parsed.video.bitrate_kbps = Some(rate.kbps);
                parsed.video.force_transcode = true;
            }
            Directive::AudioBitrate(rate) => {
                parsed.audio.bitrate_kbps = Some(rate.kbps);
                parsed.audio.force_transcode = true;
            }
            Directive::MaxRate(rate) => parsed.video.maxrate_kbps = Some(rate.kbps),
            Directive::BufSize(rate) => parsed.video.bufsize_kbps = Some(rate.kbps),
            Directive::Qp(value) => {
                parsed.video.qp = Some(*value);
                parsed.video.crf = None;
            }
            Directive::Crf(value) => {
                parsed.video.crf = Some(*value);
                parsed.video.qp = None;
            }
            Directive::Preset(name) => parsed.video.preset = Some(name.clone()),
            Directive::VideoFilter(chain) => self.apply_filter_chain(parsed, chain),
            Directive::Map(target) => match target {
                MapTarget::PrimaryVideo => parsed.include_primary_video = true,
                MapTarget::AllAudio => parsed.include_all_audio = true,
                MapTarget::AllSubtitles => parsed.include_all_subtitles = true,
                MapTarget::Track(index) => {
                    parsed.track_ids.insert(*index);
                }
            },
            Directive::Threads(count) => parsed.threads = Some(*count),
            Directive::Quality(value) => parsed.video.quality = Some(*value),
            Directive::Unknown(tokens) => {
                debug!("Ignoring directive {:?}", tokens);
                parsed.ignored.extend(tokens.iter().cloned());
            }
        }
    }

    fn apply_filter_chain(&self, parsed: &mut ParsedSettings, chain: &str) {
        let expressions: Vec<&str> = chain
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();

        let mut i = 0;
        while i < expressions.len() {
            let expr = expressions[i];
            parsed.filters.chain.push(expr.to_string());

            if let Some(args) = expr.strip_prefix("scale=") {
                if let Some(mut resize) = parse_scale(args) {
                    // `increase` followed by a matching crop means cover
                    if resize.fit == FitMode::Cover {
                        let crop = expressions.get(i + 1).and_then(|e| e.strip_prefix("crop="));
                        match crop.and_then(parse_dimensions) {
                            Some(dims) if dims == (resize.width, resize.height) => {
                                parsed.filters.chain.push(expressions[i + 1].to_string());
                                i += 1;
                            }
                            _ => resize.fit = FitMode::Stretch,
                        }
                    }
                    parsed.filters.resize = Some(resize);
                    parsed.video.force_transcode = true;
                }
            } else if let Some(args) = expr.strip_prefix("eq=") {
                if let Some(color) = parse_eq(args) {
                    parsed.filters.color = Some(color);
                    parsed.video.force_transcode = true;
                }
            } else {
                // Preset-authored expressions still require decoding
                parsed.video.force_transcode = true;
            }
            i += 1;
        }
    }
}

/// `30`, `30000/1001`, `fps=25:round=down` or a named rate
fn parse_fps(args: &str) -> Option<f64> {
    let first = args.split(':').next()?.trim();
    let value = first.strip_prefix("fps=").unwrap_or(first);
    let rate = match value {
        "ntsc" => 30000.0 / 1001.0,
        "pal" => 25.0,
        "film" => 24.0,
        _ => match value.split_once('/') {
            Some((num, den)) => num.trim().parse::<f64>().ok()? / den.trim().parse::<f64>().ok()?,
            None => value.parse().ok()?,
        },
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_dimensions(args: &str) -> Option<(i32, i32)> {
    let mut parts = args.split(':');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    Some((width, height))
}

fn parse_scale(args: &str) -> Option<ParsedResize> {
    let (width, height) = parse_dimensions(args)?;
    let constraint = args
        .split(':')
        .skip(2)
        .find_map(|opt| opt.strip_prefix("force_original_aspect_ratio="));

    let fit = match constraint {
        None => FitMode::Stretch,
        Some("decrease") => FitMode::Contain,
        Some("increase") => FitMode::Cover,
        Some(_) => FitMode::Stretch,
    };
    Some(ParsedResize { width, height, fit })
}

fn parse_eq(args: &str) -> Option<ParsedColor> {
    let mut color = ParsedColor::default();
    let mut recognized = false;

    for pair in args.split(':') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        match key.trim() {
            "brightness" => color.brightness = value,
            "contrast" => color.contrast = value,
            "saturation" => color.saturation = value,
            "hue" => color.hue = value,
            _ => continue,
        }
        recognized = true;
    }

    recognized.then_some(color)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str, output: &str) -> ParsedSettings {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        DirectiveParser::new().parse(&tokens, output)
    }

    #[test]
    fn test_fps_expression_sets_frame_rate() {
        let parsed = parse("-c:v libx264 -vf fps=30,scale=-2:720,eq=saturation=1.5", "x.mp4");
        assert_eq!(parsed.filters.frame_rate(), Some(30.0));
        assert_eq!(parsed.filters.geometry_chain(), ["fps=30", "scale=-2:720"]);

        let ntsc = parse("-vf fps=fps=30000/1001:round=down", "x.mp4");
        assert!((ntsc.filters.frame_rate().unwrap() - 29.97).abs() < 0.01);

        assert_eq!(parse("-vf scale=640:360", "x.mp4").filters.frame_rate(), None);
        assert_eq!(parse("-vf fps=0/0", "x.mp4").filters.frame_rate(), None);
    }

    #[test]
    fn test_gif_sequence() {
        let parsed = parse(
            "-ss 1.000 -t 2.000 -c:v gif -vf fps=12,scale=480:-2 -q:v 8 -map 0:v:0",
            "clip_export.gif",
        );
        assert_eq!(parsed.container, Container::Gif);
        assert_eq!(parsed.video.codec.as_deref(), Some("gif"));
        assert_eq!(parsed.video.quality, Some(8));
        assert_eq!(parsed.video.rate_control(), None);
        assert_eq!(parsed.filters.frame_rate(), Some(12.0));
        assert!(parsed.video.force_transcode);
        assert!(!parsed.include_all_audio);
    }

    #[test]
    fn test_copy_sequence() {
        let parsed = parse("-c:v copy -c:a copy -map 0:v:0 -map 0:a?", "clip_export.mkv");
        assert_eq!(parsed.container, Container::Mkv);
        assert!(parsed.video.copy);
        assert!(!parsed.video.force_transcode);
        assert!(parsed.audio.copy);
        assert!(parsed.include_primary_video);
        assert!(parsed.include_all_audio);
        assert!(!parsed.include_all_subtitles);
        assert_eq!(parsed.trim_start, None);
    }

    #[test]
    fn test_filters_force_transcode() {
        let parsed = parse("-ss 2.000 -t 6.500 -c:v copy -vf scale=640:360", "x.mp4");
        assert_eq!(parsed.trim_start, Some(2.0));
        assert_eq!(parsed.trim_duration, Some(6.5));
        assert!(parsed.video.force_transcode);
        assert!(!parsed.video.copy);
        assert_eq!(
            parsed.filters.resize,
            Some(ParsedResize {
                width: 640,
                height: 360,
                fit: FitMode::Stretch
            })
        );
    }

    #[test]
    fn test_fit_modes() {
        let contain = parse("-vf scale=1280:720:force_original_aspect_ratio=decrease", "x.mp4");
        assert_eq!(contain.filters.resize.unwrap().fit, FitMode::Contain);

        let cover = parse(
            "-vf scale=1280:720:force_original_aspect_ratio=increase,crop=1280:720",
            "x.mp4",
        );
        assert_eq!(cover.filters.resize.unwrap().fit, FitMode::Cover);
        assert_eq!(cover.filters.chain.len(), 2);

        let preset = parse("-vf scale=-2:720", "x.mp4");
        assert_eq!(preset.filters.resize.unwrap().width, -2);
    }

    #[test]
    fn test_eq_keys_any_order() {
        let parsed = parse("-vf eq=hue=45:brightness=-0.2:bogus=1", "x.webm");
        let color = parsed.filters.color.unwrap();
        assert_eq!(color.brightness, -0.2);
        assert_eq!(color.hue, 45.0);
        assert_eq!(color.contrast, 1.0);
        assert_eq!(parsed.filters.geometry_chain(), Vec::<String>::new());
    }

    #[test]
    fn test_rate_control_and_bitrates() {
        let parsed = parse("-c:v libx264 -b:v 800k -maxrate 1000k -bufsize 1600k", "x.mp4");
        assert_eq!(parsed.video.rate_control(), Some(RateControlMode::Bitrate));
        assert_eq!(parsed.video.maxrate_kbps, Some(1000));

        let parsed = parse("-c:v libvpx-vp9 -crf 30", "x.webm");
        assert_eq!(parsed.video.rate_control(), Some(RateControlMode::Crf));
        assert_eq!(parsed.video.codec.as_deref(), Some("libvpx-vp9"));
    }

    #[test]
    fn test_malformed_and_unknown_are_ignored() {
        let parsed = parse("-crf high -tune film -map 0:3 -map 0:1 -map 0:3 -threads", "noext");
        assert_eq!(parsed.container, Container::Mp4);
        assert_eq!(parsed.video.crf, None);
        assert_eq!(parsed.track_ids.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(parsed.ignored, vec!["-crf", "high", "-tune", "film", "-threads"]);
    }

    #[test]
    fn test_json_is_reproducible() {
        let line = "-ss 1.000 -t 2.000 -c:v libx264 -crf 20 -vf eq=saturation=1.5 -map 0:v:0 -map 0:4";
        let first = parse(line, "a.mov").to_json().unwrap();
        let second = parse(line, "a.mov").to_json().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("\"track_ids\":[4]"));
    }
}
