//! Directive vocabulary shared by both sides of the execution boundary
//!
//! A directive sequence is a flat list of flag tokens, each followed by its
//! value. Tokens are lexed into a tagged [`Directive`]; anything the lexer
//! does not understand becomes [`Directive::Unknown`] and is carried along
//! rather than rejected, so either side can learn new flags first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Flags with a defined meaning on the wire
pub const KNOWN_FLAGS: &[&str] = &[
    "-ss", "-t", "-c:v", "-c:a", "-c:s", "-b:v", "-b:a", "-maxrate", "-bufsize", "-qp", "-crf",
    "-preset", "-vf", "-map", "-threads", "-q:v",
];

/// Format seconds with exactly three decimals
pub fn format_seconds(seconds: f64) -> String {
    format!("{:.3}", seconds)
}

/// Codec value of a `-c:*` directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecValue {
    Copy,
    Named(String),
}

impl CodecValue {
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value.eq_ignore_ascii_case("copy") {
            Some(CodecValue::Copy)
        } else {
            Some(CodecValue::Named(value.to_lowercase()))
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, CodecValue::Copy)
    }
}

impl fmt::Display for CodecValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecValue::Copy => f.write_str("copy"),
            CodecValue::Named(name) => f.write_str(name),
        }
    }
}

/// Bitrate carried as whole kilobits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bitrate {
    pub kbps: u32,
}

impl Bitrate {
    pub fn from_kbps(kbps: u32) -> Self {
        Self { kbps }
    }

    /// Parse `<number>[k|m|g]`; a bare number is bits per second
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        let (number, multiplier_kbps) = match value.chars().last()? {
            'k' | 'K' => (&value[..value.len() - 1], 1.0),
            'm' | 'M' => (&value[..value.len() - 1], 1_000.0),
            'g' | 'G' => (&value[..value.len() - 1], 1_000_000.0),
            _ => (value, 0.001),
        };

        let number: f64 = number.parse().ok()?;
        if !number.is_finite() || number <= 0.0 {
            return None;
        }
        let kbps = (number * multiplier_kbps).round();
        if kbps < 1.0 || kbps > u32::MAX as f64 {
            return None;
        }
        Some(Self { kbps: kbps as u32 })
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k", self.kbps)
    }
}

/// Stream selection of a `-map` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapTarget {
    /// `0:v:0`
    PrimaryVideo,
    /// `0:a?`
    AllAudio,
    /// `0:s?`
    AllSubtitles,
    /// `0:<index>`
    Track(usize),
}

impl MapTarget {
    fn parse(value: &str) -> Option<Self> {
        // A leading '-' is a negative mapping, which the wire never uses
        let spec = value.trim().strip_prefix("0:")?;
        match spec {
            "v:0" | "v" => Some(MapTarget::PrimaryVideo),
            "a?" | "a" => Some(MapTarget::AllAudio),
            "s?" | "s" => Some(MapTarget::AllSubtitles),
            index => index.parse().ok().map(MapTarget::Track),
        }
    }
}

impl fmt::Display for MapTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapTarget::PrimaryVideo => f.write_str("0:v:0"),
            MapTarget::AllAudio => f.write_str("0:a?"),
            MapTarget::AllSubtitles => f.write_str("0:s?"),
            MapTarget::Track(index) => write!(f, "0:{}", index),
        }
    }
}

/// One flag with its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", content = "value", rename_all = "snake_case")]
pub enum Directive {
    TrimStart(f64),
    TrimDuration(f64),
    VideoCodec(CodecValue),
    AudioCodec(CodecValue),
    SubtitleCodec(String),
    VideoBitrate(Bitrate),
    AudioBitrate(Bitrate),
    MaxRate(Bitrate),
    BufSize(Bitrate),
    Qp(u32),
    Crf(u32),
    Preset(String),
    VideoFilter(String),
    Map(MapTarget),
    Threads(u32),
    /// Encoder-specific quality knob; GIF uses it for quantization speed
    Quality(u32),
    /// Tokens the lexer could not interpret; kept verbatim
    Unknown(Vec<String>),
}

impl Directive {
    /// Wire flag of this directive
    pub fn flag(&self) -> &str {
        match self {
            Directive::TrimStart(_) => "-ss",
            Directive::TrimDuration(_) => "-t",
            Directive::VideoCodec(_) => "-c:v",
            Directive::AudioCodec(_) => "-c:a",
            Directive::SubtitleCodec(_) => "-c:s",
            Directive::VideoBitrate(_) => "-b:v",
            Directive::AudioBitrate(_) => "-b:a",
            Directive::MaxRate(_) => "-maxrate",
            Directive::BufSize(_) => "-bufsize",
            Directive::Qp(_) => "-qp",
            Directive::Crf(_) => "-crf",
            Directive::Preset(_) => "-preset",
            Directive::VideoFilter(_) => "-vf",
            Directive::Map(_) => "-map",
            Directive::Threads(_) => "-threads",
            Directive::Quality(_) => "-q:v",
            Directive::Unknown(tokens) => tokens.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Wire value of this directive
    pub fn value(&self) -> Option<String> {
        let value = match self {
            Directive::TrimStart(s) | Directive::TrimDuration(s) => format_seconds(*s),
            Directive::VideoCodec(codec) | Directive::AudioCodec(codec) => codec.to_string(),
            Directive::SubtitleCodec(codec) => codec.clone(),
            Directive::VideoBitrate(rate)
            | Directive::AudioBitrate(rate)
            | Directive::MaxRate(rate)
            | Directive::BufSize(rate) => rate.to_string(),
            Directive::Qp(value)
            | Directive::Crf(value)
            | Directive::Threads(value)
            | Directive::Quality(value) => value.to_string(),
            Directive::Preset(name) => name.clone(),
            Directive::VideoFilter(chain) => chain.clone(),
            Directive::Map(target) => target.to_string(),
            Directive::Unknown(tokens) => return tokens.get(1).cloned(),
        };
        Some(value)
    }

    fn push_tokens(&self, out: &mut Vec<String>) {
        if let Directive::Unknown(tokens) = self {
            out.extend(tokens.iter().cloned());
            return;
        }
        out.push(self.flag().to_string());
        if let Some(value) = self.value() {
            out.push(value);
        }
    }

    /// Interpret a known flag with its value; `None` if the value is malformed
    fn from_pair(flag: &str, value: &str) -> Option<Self> {
        let directive = match flag {
            "-ss" => Directive::TrimStart(parse_seconds(value)?),
            "-t" => Directive::TrimDuration(parse_seconds(value)?),
            "-c:v" => Directive::VideoCodec(CodecValue::parse(value)?),
            "-c:a" => Directive::AudioCodec(CodecValue::parse(value)?),
            "-c:s" => Directive::SubtitleCodec(non_empty(value)?),
            "-b:v" => Directive::VideoBitrate(Bitrate::parse(value)?),
            "-b:a" => Directive::AudioBitrate(Bitrate::parse(value)?),
            "-maxrate" => Directive::MaxRate(Bitrate::parse(value)?),
            "-bufsize" => Directive::BufSize(Bitrate::parse(value)?),
            "-qp" => Directive::Qp(value.trim().parse().ok()?),
            "-crf" => Directive::Crf(value.trim().parse().ok()?),
            "-preset" => Directive::Preset(non_empty(value)?),
            "-vf" => Directive::VideoFilter(non_empty(value)?),
            "-map" => Directive::Map(MapTarget::parse(value)?),
            "-threads" => Directive::Threads(value.trim().parse().ok()?),
            "-q:v" => Directive::Quality(value.trim().parse().ok()?),
            _ => return None,
        };
        Some(directive)
    }
}

fn parse_seconds(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn is_known_flag(token: &str) -> bool {
    KNOWN_FLAGS.contains(&token)
}

/// Ordered, immutable directive list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectiveSequence {
    directives: Vec<Directive>,
}

impl DirectiveSequence {
    pub fn new(directives: Vec<Directive>) -> Self {
        Self { directives }
    }

    /// Lex wire tokens; never fails
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let mut directives = Vec::new();
        let mut pos = 0;

        while pos < tokens.len() {
            let token = tokens[pos].as_ref();
            let next = tokens.get(pos + 1).map(|t| t.as_ref());

            if is_known_flag(token) {
                match next {
                    Some(value) if !is_known_flag(value) => {
                        let directive = Directive::from_pair(token, value).unwrap_or_else(|| {
                            Directive::Unknown(vec![token.to_string(), value.to_string()])
                        });
                        directives.push(directive);
                        pos += 2;
                    }
                    _ => {
                        // Flag without a value
                        directives.push(Directive::Unknown(vec![token.to_string()]));
                        pos += 1;
                    }
                }
                continue;
            }

            let mut unknown = vec![token.to_string()];
            pos += 1;
            if token.starts_with('-') {
                if let Some(value) = next.filter(|v| !v.starts_with('-')) {
                    unknown.push(value.to_string());
                    pos += 1;
                }
            }
            directives.push(Directive::Unknown(unknown));
        }

        Self { directives }
    }

    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.directives.len() * 2);
        for directive in &self.directives {
            directive.push_tokens(&mut tokens);
        }
        tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn as_slice(&self) -> &[Directive] {
        &self.directives
    }

    pub fn into_inner(self) -> Vec<Directive> {
        self.directives
    }

    /// Whether any directive carries this flag
    pub fn has_flag(&self, flag: &str) -> bool {
        self.directives.iter().any(|d| d.flag() == flag)
    }

    /// Value of the first directive carrying this flag
    pub fn value_of(&self, flag: &str) -> Option<String> {
        self.directives
            .iter()
            .find(|d| d.flag() == flag)
            .and_then(Directive::value)
    }
}

impl fmt::Display for DirectiveSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tokens().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_seconds_always_three_decimals() {
        assert_eq!(format_seconds(2.0), "2.000");
        assert_eq!(format_seconds(6.5), "6.500");
        assert_eq!(format_seconds(1.0 / 3.0), "0.333");
    }

    #[test]
    fn test_bitrate_suffixes() {
        assert_eq!(Bitrate::parse("4500k"), Some(Bitrate::from_kbps(4500)));
        assert_eq!(Bitrate::parse("2.5M"), Some(Bitrate::from_kbps(2500)));
        assert_eq!(Bitrate::parse("1g"), Some(Bitrate::from_kbps(1_000_000)));
        assert_eq!(Bitrate::parse("128000"), Some(Bitrate::from_kbps(128)));
        assert_eq!(Bitrate::parse("fast"), None);
        assert_eq!(Bitrate::parse("-5k"), None);
        assert_eq!(Bitrate::from_kbps(192).to_string(), "192k");
    }

    #[test]
    fn test_map_targets() {
        assert_eq!(MapTarget::parse("0:v:0"), Some(MapTarget::PrimaryVideo));
        assert_eq!(MapTarget::parse("0:a?"), Some(MapTarget::AllAudio));
        assert_eq!(MapTarget::parse("0:s?"), Some(MapTarget::AllSubtitles));
        assert_eq!(MapTarget::parse("0:7"), Some(MapTarget::Track(7)));
        assert_eq!(MapTarget::parse("1:3"), None);
        assert_eq!(MapTarget::parse("0:x"), None);
    }

    #[test]
    fn test_lexes_known_directives() {
        let seq = DirectiveSequence::from_tokens(&tokens("-ss 2.000 -c:v copy -map 0:v:0"));
        assert_eq!(
            seq.as_slice(),
            &[
                Directive::TrimStart(2.0),
                Directive::VideoCodec(CodecValue::Copy),
                Directive::Map(MapTarget::PrimaryVideo),
            ]
        );
    }

    #[test]
    fn test_unknown_and_malformed_tokens_are_kept() {
        let seq = DirectiveSequence::from_tokens(&tokens("-tune film -crf abc stray -map 0:v:0 -t"));
        assert_eq!(
            seq.as_slice(),
            &[
                Directive::Unknown(tokens("-tune film")),
                Directive::Unknown(tokens("-crf abc")),
                Directive::Unknown(tokens("stray")),
                Directive::Map(MapTarget::PrimaryVideo),
                Directive::Unknown(tokens("-t")),
            ]
        );
    }

    #[test]
    fn test_known_flag_is_never_swallowed_as_value() {
        let seq = DirectiveSequence::from_tokens(&tokens("-ss -c:v libx264"));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.as_slice()[1], Directive::VideoCodec(CodecValue::Named("libx264".into())));
    }

    #[test]
    fn test_tokens_survive_relexing() {
        let line = "-ss 1.500 -t 3.000 -c:v libx264 -b:v 800k -maxrate 1000k -bufsize 1600k -map 0:2";
        let seq = DirectiveSequence::from_tokens(&tokens(line));
        assert_eq!(seq.to_string(), line);
        assert_eq!(seq.value_of("-bufsize").as_deref(), Some("1600k"));
        assert!(!seq.has_flag("-crf"));
    }

    #[test]
    fn test_gif_directives() {
        let seq = DirectiveSequence::from_tokens(&tokens("-c:v gif -q:v 10 -q:v fast"));
        assert_eq!(
            seq.as_slice(),
            &[
                Directive::VideoCodec(CodecValue::Named("gif".into())),
                Directive::Quality(10),
                Directive::Unknown(tokens("-q:v fast")),
            ]
        );
    }
}
