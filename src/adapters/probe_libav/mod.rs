// Probe LibAV adapter - in-process media analysis through ffmpeg-next

use ffmpeg_next::format::stream::Disposition;
use ffmpeg_next::media::Type;
use std::sync::Once;
use tracing::debug;

use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::FALLBACK_FRAME_RATE;
use crate::error::{ExportError, ExportResult};

static INIT: Once = Once::new();

fn probe_error(input: &str, e: impl std::fmt::Display) -> ExportError {
    ExportError::Domain(DomainError::ProbeFail(format!("{}: {}", input, e)))
}

/// In-process prober backed by the libav libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeLibavAdapter;

impl ProbeLibavAdapter {
    pub fn new() -> Self {
        INIT.call_once(|| {
            if let Err(e) = ffmpeg_next::init() {
                tracing::error!("Failed to initialize libav: {}", e);
            }
        });
        Self
    }

    /// Probe tracks and duration without spawning ffprobe. Blocking.
    pub fn probe(&self, input: &str) -> ExportResult<SourceMedia> {
        probe(input)
    }
}

fn probe(input: &str) -> ExportResult<SourceMedia> {
    let context = ffmpeg_next::format::input(&input).map_err(|e| probe_error(input, e))?;
    // Container duration is in AV_TIME_BASE (microsecond) units
    let duration = match context.duration() {
        d if d > 0 => d as f64 / 1_000_000.0,
        _ => 0.0,
    };

    let mut streams = Vec::new();
    for stream in context.streams() {
        let parameters = stream.parameters();
        let codec = parameters.id().name().to_string();
        let index = stream.index();

        let mut descriptor = match parameters.medium() {
            Type::Video => {
                let decoder = ffmpeg_next::codec::context::Context::from_parameters(parameters)
                    .and_then(|c| c.decoder().video())
                    .map_err(|e| probe_error(input, e))?;
                let rate = f64::from(stream.avg_frame_rate());
                let fps = if rate.is_finite() && rate > 0.0 { rate } else { FALLBACK_FRAME_RATE };
                StreamDescriptor::video(index, &codec, decoder.width(), decoder.height(), fps)
            }
            Type::Audio => {
                let decoder = ffmpeg_next::codec::context::Context::from_parameters(parameters)
                    .and_then(|c| c.decoder().audio())
                    .map_err(|e| probe_error(input, e))?;
                StreamDescriptor::audio(index, &codec, decoder.rate(), decoder.ch_layout().channels() as u32)
            }
            Type::Subtitle => StreamDescriptor::subtitle(index, &codec),
            _ => StreamDescriptor::other(index, &codec),
        };

        let metadata = stream.metadata();
        if let Some(language) = metadata.get("language") {
            descriptor = descriptor.with_language(language);
        }
        if let Some(title) = metadata.get("title") {
            descriptor = descriptor.with_title(title);
        }
        let disposition = stream.disposition();
        if disposition.contains(Disposition::DEFAULT) {
            descriptor = descriptor.as_default();
        }
        if disposition.contains(Disposition::FORCED) {
            descriptor = descriptor.as_forced();
        }
        streams.push(descriptor);
    }

    debug!("libav probed {} streams in {}", streams.len(), input);
    Ok(SourceMedia::new(input, duration, streams))
}
