//! Plan compiler: export settings plus probed tracks to a directive sequence

use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::{self, BitrateBudget};
use crate::error::ExportResult;
use crate::planner::builder::DirectiveBuilder;
use crate::planner::presets::find_preset;
use crate::planner::{CompiledPlan, OutputDescriptor, PlanWarning};
use crate::protocol::{Bitrate, CodecValue, Directive, MapTarget};
use crate::streams::{SelectedTracks, StreamMapper};

/// Format a filter number with at most three decimals
fn format_decimal(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Geometry filter expression for a resize
pub fn scale_filter(resize: &Resize) -> String {
    let (w, h) = (resize.width, resize.height);
    match resize.fit {
        FitMode::Stretch => format!("scale={}:{}", w, h),
        FitMode::Contain => format!("scale={}:{}:force_original_aspect_ratio=decrease", w, h),
        FitMode::Cover => format!(
            "scale={}:{}:force_original_aspect_ratio=increase,crop={}:{}",
            w, h, w, h
        ),
    }
}

/// Color filter expression; `None` when every value is identity
pub fn eq_filter(color: &ColorAdjustments) -> Option<String> {
    if color.is_identity() {
        return None;
    }

    let identity = ColorAdjustments::default();
    let keys = [
        ("brightness", color.brightness, identity.brightness),
        ("contrast", color.contrast, identity.contrast),
        ("saturation", color.saturation, identity.saturation),
        ("hue", color.hue, identity.hue),
    ];

    let parts: Vec<String> = keys
        .iter()
        .filter(|(_, value, neutral)| format_decimal(*value) != format_decimal(*neutral))
        .map(|(key, value, _)| format!("{}={}", key, format_decimal(*value)))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(format!("eq={}", parts.join(":")))
    }
}

/// Trim window resolved against the source
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrimWindow {
    start: f64,
    duration: f64,
    emit: bool,
}

/// Turns export settings into a compiled plan
#[derive(Debug, Clone, Default)]
pub struct PlanCompiler {
    mapper: StreamMapper,
    threads: Option<u32>,
}

impl PlanCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `-threads` with this value
    pub fn with_threads(mut self, threads: Option<u32>) -> Self {
        self.threads = threads.filter(|t| *t > 0);
        self
    }

    /// Compile settings against probed source metadata
    pub fn compile(&self, settings: &ExportSettings, source: &SourceMedia) -> ExportResult<CompiledPlan> {
        settings.validate()?;

        let primary = source.primary_video().ok_or_else(|| {
            DomainError::InvalidSettings(format!("Source {} has no video track", source.name))
        })?;

        info!(
            "Compiling export of {} to {} ({} tracks)",
            source.name,
            settings.container,
            source.streams.len()
        );

        let container = settings.container;
        let mut warnings = Vec::new();
        let trim = self.resolve_trim(settings, source);

        let preset = settings.preset.as_deref().map(find_preset).transpose()?;
        if container.is_animation() {
            let preset_filter = preset.and_then(|p| p.filter);
            return Ok(self.compile_gif(settings, source, primary, trim, preset_filter, warnings));
        }

        let (mut codec, requested_rate, speed) = match preset {
            Some(preset) => {
                debug!("Using preset {}", preset.name);
                (
                    preset.codec,
                    preset.rate_control,
                    preset.speed.map(str::to_string),
                )
            }
            None => (settings.video_codec, settings.rate_control, settings.speed.clone()),
        };

        if !rules::codec_supports_container(codec, container) {
            let fallback = rules::default_video_codec(container);
            warnings.push(PlanWarning::VideoCodecIncompatible {
                requested: codec,
                container,
                fallback,
            });
            codec = fallback;
        }

        let filter_chain = Self::filter_chain(preset.and_then(|p| p.filter), settings);
        let video_copy = self.resolve_video_copy(settings, primary, filter_chain.is_some(), &mut warnings);

        let mut builder = DirectiveBuilder::new().when(trim.emit, |b| {
            b.push(Directive::TrimStart(trim.start))
                .push(Directive::TrimDuration(trim.duration))
        });

        builder = if video_copy {
            builder.push(Directive::VideoCodec(CodecValue::Copy))
        } else {
            let rate = Self::resolve_rate_control(codec, requested_rate, &mut warnings);
            builder
                .push(Directive::VideoCodec(CodecValue::Named(codec.encoder_name().to_string())))
                .push_opt(speed.map(Directive::Preset))
                .extend(Self::rate_directives(rate))
                .push_opt(filter_chain.map(Directive::VideoFilter))
        };

        let audio = self.mapper.select(source, &settings.audio_tracks, MediaKind::Audio);
        Self::note_missing(&audio, MediaKind::Audio, &mut warnings);
        let audio_copy = if audio.is_empty() {
            None
        } else {
            let (directives, copy) = Self::audio_directives(settings, source, &audio, &mut warnings);
            builder = builder.extend(directives);
            Some(copy)
        };

        let subtitles = self.mapper.select(source, &settings.subtitle_tracks, MediaKind::Subtitle);
        Self::note_missing(&subtitles, MediaKind::Subtitle, &mut warnings);
        let (subtitle_indices, subtitle_wildcard) =
            Self::filter_subtitles(source, &subtitles, container, &mut warnings);

        builder = builder
            .when(!subtitle_indices.is_empty(), |b| {
                let codecs = subtitle_indices
                    .iter()
                    .filter_map(|index| source.stream(*index))
                    .map(|s| s.codec.as_str());
                b.push_opt(
                    rules::subtitle_codec_for_tracks(container, codecs)
                        .map(|codec| Directive::SubtitleCodec(codec.to_string())),
                )
            })
            .push_opt(self.threads.map(Directive::Threads));

        // Mapping always comes last
        builder = builder
            .push(Directive::Map(MapTarget::PrimaryVideo))
            .extend(Self::map_directives(&audio.indices, audio.wildcard, MapTarget::AllAudio))
            .extend(Self::map_directives(
                &subtitle_indices,
                subtitle_wildcard,
                MapTarget::AllSubtitles,
            ));

        let directives = builder.build();
        for warning in &warnings {
            warn!("{}", warning);
        }
        info!("Compiled directives: {}", directives);

        let output = OutputDescriptor {
            file_name: format!("{}_export.{}", source.stem(), container.extension()),
            container,
            extension: container.extension().to_string(),
            mime_type: container.mime_type().to_string(),
            includes_audio: !audio.is_empty(),
            includes_subtitles: !subtitle_indices.is_empty(),
            video_stream: primary.index,
            audio_streams: audio.indices.clone(),
            subtitle_streams: subtitle_indices,
        };

        Ok(CompiledPlan {
            directives,
            output,
            warnings,
            expected_duration: trim.duration,
            video_copy,
            audio_copy,
        })
    }

    /// GIF plan: trim, frame-rate reduction and the filter chain on the
    /// primary video only
    fn compile_gif(
        &self,
        settings: &ExportSettings,
        source: &SourceMedia,
        primary: &StreamDescriptor,
        trim: TrimWindow,
        preset_filter: Option<&str>,
        mut warnings: Vec<PlanWarning>,
    ) -> CompiledPlan {
        let container = settings.container;
        if settings.video_no_reencode {
            warnings.push(PlanWarning::VideoCopyIncompatible {
                codec: primary.codec.clone(),
                container,
            });
        }

        let selections = [
            (MediaKind::Audio, &settings.audio_tracks),
            (MediaKind::Subtitle, &settings.subtitle_tracks),
        ];
        for (kind, selection) in selections {
            let selected = self.mapper.select(source, selection, kind);
            if !selected.is_empty() {
                warnings.push(PlanWarning::TracksDropped {
                    kind,
                    count: selected.indices.len(),
                    container,
                });
            }
        }

        let chain = std::iter::once(format!("fps={}", settings.gif.fps))
            .chain(Self::filter_chain(preset_filter, settings))
            .collect::<Vec<_>>()
            .join(",");

        let directives = DirectiveBuilder::new()
            .when(trim.emit, |b| {
                b.push(Directive::TrimStart(trim.start))
                    .push(Directive::TrimDuration(trim.duration))
            })
            .push(Directive::VideoCodec(CodecValue::Named("gif".to_string())))
            .push(Directive::VideoFilter(chain))
            .push(Directive::Quality(settings.gif.speed))
            .push_opt(self.threads.map(Directive::Threads))
            .push(Directive::Map(MapTarget::PrimaryVideo))
            .build();

        for warning in &warnings {
            warn!("{}", warning);
        }
        info!("Compiled directives: {}", directives);

        CompiledPlan {
            directives,
            output: OutputDescriptor {
                file_name: format!("{}_export.{}", source.stem(), container.extension()),
                container,
                extension: container.extension().to_string(),
                mime_type: container.mime_type().to_string(),
                includes_audio: false,
                includes_subtitles: false,
                video_stream: primary.index,
                audio_streams: Vec::new(),
                subtitle_streams: Vec::new(),
            },
            warnings,
            expected_duration: trim.duration,
            video_copy: false,
            audio_copy: None,
        }
    }

    fn resolve_trim(&self, settings: &ExportSettings, source: &SourceMedia) -> TrimWindow {
        let min_trim = rules::min_trim_duration(source.frame_rate());
        let epsilon = rules::trim_epsilon(min_trim);
        let known_duration = (source.duration.is_finite() && source.duration > 0.0)
            .then_some(source.duration);

        let requested_end = (settings.trim_end > 0.0).then_some(settings.trim_end);
        let (start, end) = match known_duration {
            Some(duration) => {
                let start = settings.trim_start.clamp(0.0, duration);
                let end = requested_end.unwrap_or(duration).min(duration);
                (start, end)
            }
            None => (settings.trim_start, requested_end.unwrap_or(settings.trim_start)),
        };

        let duration = (end - start).max(min_trim);
        let emit = match known_duration {
            Some(full) => start > epsilon || (full - end) > epsilon,
            None => start > epsilon || requested_end.is_some(),
        };

        debug!(
            "Trim window start={:.3} duration={:.3} (epsilon {:.3}, emit {})",
            start, duration, epsilon, emit
        );
        TrimWindow {
            start,
            duration,
            emit,
        }
    }

    /// Preset filter first, then resize, then color, as one chain
    fn filter_chain(preset_filter: Option<&str>, settings: &ExportSettings) -> Option<String> {
        let parts: Vec<String> = preset_filter
            .map(str::to_string)
            .into_iter()
            .chain(settings.resize.as_ref().map(scale_filter))
            .chain(eq_filter(&settings.color))
            .collect();

        (!parts.is_empty()).then(|| parts.join(","))
    }

    fn resolve_video_copy(
        &self,
        settings: &ExportSettings,
        primary: &StreamDescriptor,
        has_filters: bool,
        warnings: &mut Vec<PlanWarning>,
    ) -> bool {
        if !settings.video_no_reencode {
            return false;
        }
        if has_filters {
            warnings.push(PlanWarning::CopyOverriddenByFilters);
            return false;
        }
        // Codecs outside the table cannot be checked and are copied as-is
        if let Ok(source_codec) = VideoCodec::parse(&primary.codec) {
            if !rules::codec_supports_container(source_codec, settings.container) {
                warnings.push(PlanWarning::VideoCopyIncompatible {
                    codec: primary.codec.clone(),
                    container: settings.container,
                });
                return false;
            }
        }
        true
    }

    fn resolve_rate_control(
        codec: VideoCodec,
        requested: RateControl,
        warnings: &mut Vec<PlanWarning>,
    ) -> RateControl {
        match requested {
            RateControl::Qp(value)
                if !rules::codec_supports_rate_control(codec, RateControlMode::Qp) =>
            {
                let crf = rules::clamp_crf(codec, value);
                warnings.push(PlanWarning::QpUnsupported { codec, crf });
                RateControl::Crf(crf)
            }
            RateControl::Crf(value) => RateControl::Crf(rules::clamp_crf(codec, value)),
            other => other,
        }
    }

    fn rate_directives(rate: RateControl) -> Vec<Directive> {
        match rate {
            RateControl::Crf(value) => vec![Directive::Crf(value as u32)],
            RateControl::Qp(value) => vec![Directive::Qp(value as u32)],
            RateControl::Bitrate(kbps) => {
                let budget = BitrateBudget::for_target(kbps);
                vec![
                    Directive::VideoBitrate(Bitrate::from_kbps(budget.target_kbps)),
                    Directive::MaxRate(Bitrate::from_kbps(budget.maxrate_kbps)),
                    Directive::BufSize(Bitrate::from_kbps(budget.bufsize_kbps)),
                ]
            }
        }
    }

    /// Audio codec block; copy needs no-reencode and every selected source
    /// codec both equal to the target and allowed in the container
    fn audio_directives(
        settings: &ExportSettings,
        source: &SourceMedia,
        audio: &SelectedTracks,
        warnings: &mut Vec<PlanWarning>,
    ) -> (Vec<Directive>, bool) {
        let container = settings.container;

        let requested = settings.audio_codec;
        let codec = if rules::audio_codec_allowed_in_container(requested.name(), container) {
            requested
        } else {
            rules::default_audio_codec(container)
        };

        if settings.audio_no_reencode {
            let blocked: Vec<String> = audio
                .indices
                .iter()
                .filter_map(|index| source.stream(*index))
                .filter(|s| {
                    !rules::audio_codec_allowed_in_container(&s.codec, container)
                        || !rules::same_audio_codec(&s.codec, codec.name())
                })
                .map(|s| s.codec.clone())
                .collect();

            if blocked.is_empty() {
                return (vec![Directive::AudioCodec(CodecValue::Copy)], true);
            }
            warnings.push(PlanWarning::AudioReencodeForced {
                codecs: blocked,
                container,
                target: codec,
            });
        }

        if codec != requested {
            warnings.push(PlanWarning::AudioCodecIncompatible {
                requested,
                container,
                fallback: codec,
            });
        }

        let bitrate = rules::clamp_audio_bitrate(settings.audio_bitrate_kbps);
        (
            vec![
                Directive::AudioCodec(CodecValue::Named(codec.encoder_name().to_string())),
                Directive::AudioBitrate(Bitrate::from_kbps(bitrate)),
            ],
            false,
        )
    }

    /// Drop bitmap tracks the container cannot carry; a wildcard survives
    /// only when nothing was dropped
    fn filter_subtitles(
        source: &SourceMedia,
        subtitles: &SelectedTracks,
        container: Container,
        warnings: &mut Vec<PlanWarning>,
    ) -> (Vec<usize>, bool) {
        let mut kept = Vec::with_capacity(subtitles.indices.len());
        let mut skipped = false;

        for index in &subtitles.indices {
            let codec = source
                .stream(*index)
                .map(|s| s.codec.as_str())
                .unwrap_or_default();
            if rules::is_bitmap_subtitle(codec) && !rules::container_accepts_bitmap_subtitles(container) {
                warnings.push(PlanWarning::BitmapSubtitleSkipped {
                    index: *index,
                    codec: codec.to_string(),
                    container,
                });
                skipped = true;
            } else {
                kept.push(*index);
            }
        }

        (kept, subtitles.wildcard && !skipped)
    }

    fn map_directives(indices: &[usize], wildcard: bool, all: MapTarget) -> Vec<Directive> {
        if indices.is_empty() {
            Vec::new()
        } else if wildcard {
            vec![Directive::Map(all)]
        } else {
            indices
                .iter()
                .map(|index| Directive::Map(MapTarget::Track(*index)))
                .collect()
        }
    }

    fn note_missing(selected: &SelectedTracks, kind: MediaKind, warnings: &mut Vec<PlanWarning>) {
        if let Some(index) = selected.missing {
            warnings.push(PlanWarning::SelectedTrackMissing { kind, index });
        }
    }
}
