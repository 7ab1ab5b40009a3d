//! FFmpeg execution adapter
//!
//! Probes through `ffprobe -print_format json` and converts through the
//! `ffmpeg` executable. Without a color filter one process does the whole
//! job and reports through `-progress pipe:1`. With a filter, a decode
//! process pipes RGBA frames through the [`FrameFilter`] into an encode
//! process, and progress is counted in frames. GIF output reuses the
//! decode half and quantizes frames in-process.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};

use crate::adapters::toml_config::FfmpegConfig;
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::FALLBACK_FRAME_RATE;
use crate::engine::controller::ConversionJob;
use crate::engine::filter::FrameFilter;
use crate::engine::gif_writer::GifWriter;
use crate::engine::parser::{ParsedResize, ParsedSettings};
use crate::error::{ExportError, ExportResult};
use crate::ports::{MediaBackend, ProgressSample, ProgressSink};
use crate::protocol::directive::format_seconds;

/// Backend driving the ffmpeg and ffprobe executables
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &FfmpegConfig) -> Self {
        Self::new(config.ffmpeg.clone(), config.ffprobe.clone())
    }

    /// `-ss`/`-i` for the source, seeking on input
    fn source_args(job: &ConversionJob) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(start) = job.settings.trim_start {
            args.extend(["-ss".to_string(), format_seconds(start)]);
        }
        args.extend(["-i".to_string(), job.input.clone()]);
        args
    }

    fn duration_args(job: &ConversionJob) -> Vec<String> {
        job.settings
            .trim_duration
            .map(|d| vec!["-t".to_string(), format_seconds(d)])
            .unwrap_or_default()
    }

    /// Single process: source in, container out
    fn convert_direct(&self, job: &ConversionJob, sink: &dyn ProgressSink, output: &Path) -> ExportResult<()> {
        let mut args = base_args();
        args.push("-y".to_string());
        args.extend(Self::source_args(job));
        args.extend(Self::duration_args(job));
        for track in job.tracks.iter().filter(|t| t.keep) {
            args.extend(["-map".to_string(), format!("0:{}", track.index)]);
        }
        let chain = job.settings.filters.geometry_chain();
        if !chain.is_empty() && !job.settings.video.copy {
            args.extend(["-vf".to_string(), chain.join(",")]);
        }
        args.extend(encode_args(&job.settings));
        args.extend(["-progress", "pipe:1", "-nostats"].map(String::from));
        args.push(output.to_string_lossy().into_owned());

        debug!("Job {}: ffmpeg {}", job.id, args.join(" "));
        let mut child = self.spawn(&args, Stdio::null())?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;
        let expected = job.expected_duration;

        let (cancelled, errors) = thread::scope(|scope| {
            let errors = scope.spawn(move || drain(stderr));

            let mut state = ProgressState::default();
            let mut cancelled = false;
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if sink.is_cancelled() {
                    cancelled = true;
                    let _ = child.kill();
                    break;
                }
                let Some((key, value)) = line.split_once('=') else {
                    continue;
                };
                if state.update(key.trim(), value.trim()) {
                    sink.started();
                    sink.report(ProgressSample {
                        fraction: state.fraction(expected),
                        frames: state.frame,
                    });
                }
            }
            (cancelled, errors.join().unwrap_or_default())
        });

        let status = child.wait()?;
        if cancelled {
            return Err(cancelled_error());
        }
        if !status.success() {
            return Err(process_failure("ffmpeg", &errors, status.code()));
        }
        Ok(())
    }

    /// Primary video index and the exact size of frames leaving the decoder
    fn frame_geometry(job: &ConversionJob) -> ExportResult<(usize, (u32, u32))> {
        let video = job.primary_video().ok_or_else(|| ExportError::Failed {
            message: "frame decoding needs a video track".to_string(),
        })?;
        let source_size = job
            .source
            .stream(video.index)
            .and_then(|s| s.width.zip(s.height))
            .ok_or_else(|| ExportError::Failed {
                message: "source video dimensions are unknown".to_string(),
            })?;
        Ok((
            video.index,
            filtered_geometry(job.settings.filters.resize, source_size),
        ))
    }

    /// Decode process writing raw RGBA frames of a fixed size to stdout
    fn decode_args(job: &ConversionJob, video_index: usize, (width, height): (u32, u32)) -> Vec<String> {
        let mut chain = job.settings.filters.geometry_chain();
        chain.push(format!("scale={}:{}", width, height));

        let mut args = base_args();
        args.extend(Self::source_args(job));
        args.extend(Self::duration_args(job));
        args.extend(["-map".to_string(), format!("0:{}", video_index)]);
        args.extend(["-vf".to_string(), chain.join(",")]);
        args.extend(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"].map(String::from));
        args
    }

    /// Decode to RGBA, grade every frame, encode
    fn convert_filtered(
        &self,
        job: &ConversionJob,
        sink: &dyn ProgressSink,
        filter: &mut FrameFilter,
        output: &Path,
    ) -> ExportResult<()> {
        let (video_index, (width, height)) = Self::frame_geometry(job)?;
        let fps = output_frame_rate(&job.settings, &job.source);
        let decode = Self::decode_args(job, video_index, (width, height));

        let mut encode = base_args();
        encode.push("-y".to_string());
        encode.extend(["-f", "rawvideo", "-pix_fmt", "rgba"].map(String::from));
        encode.extend(["-s".to_string(), format!("{}x{}", width, height)]);
        encode.extend(["-r".to_string(), format!("{}", fps)]);
        encode.extend(["-i", "pipe:0"].map(String::from));
        encode.extend(Self::source_args(job));
        encode.extend(Self::duration_args(job));
        encode.extend(["-map", "0:v:0"].map(String::from));
        for track in job.tracks.iter().filter(|t| t.keep && t.kind != MediaKind::Video) {
            encode.extend(["-map".to_string(), format!("1:{}", track.index)]);
        }
        encode.extend(encode_args(&job.settings));
        encode.push(output.to_string_lossy().into_owned());

        debug!("Job {}: decode ffmpeg {}", job.id, decode.join(" "));
        debug!("Job {}: encode ffmpeg {}", job.id, encode.join(" "));
        let mut decoder = self.spawn(&decode, Stdio::null())?;
        let mut encoder = match self.spawn(&encode, Stdio::piped()) {
            Ok(child) => child,
            Err(e) => {
                let _ = decoder.kill();
                let _ = decoder.wait();
                return Err(e);
            }
        };

        let mut frames_in = take_pipe(decoder.stdout.take(), "decoder stdout")?;
        let decoder_err = take_pipe(decoder.stderr.take(), "decoder stderr")?;
        let mut encoder_in = take_pipe(encoder.stdin.take(), "encoder stdin")?;
        let encoder_err = take_pipe(encoder.stderr.take(), "encoder stderr")?;
        let expected_frames = (job.expected_duration * fps).ceil().max(1.0);

        let (pumped, decoder_log, encoder_log) = thread::scope(|scope| {
            let decoder_log = scope.spawn(move || drain(decoder_err));
            let encoder_log = scope.spawn(move || drain(encoder_err));
            // The closure owns the encoder's stdin; dropping it ends the input
            let pumped = pump(
                &mut frames_in,
                Some(filter),
                sink,
                (width, height),
                expected_frames,
                move |frame| Ok(encoder_in.write_all(frame)?),
            );
            if !matches!(pumped, Ok(PumpEnd::Finished(_))) {
                let _ = decoder.kill();
                let _ = encoder.kill();
            }
            (
                pumped,
                decoder_log.join().unwrap_or_default(),
                encoder_log.join().unwrap_or_default(),
            )
        });

        let decoder_status = decoder.wait()?;
        let encoder_status = encoder.wait()?;
        match pumped {
            Ok(PumpEnd::Cancelled) => Err(cancelled_error()),
            Err(e) => {
                warn!("Job {}: frame pipeline failed: {}", job.id, e);
                Err(process_failure("ffmpeg encoder", &encoder_log, encoder_status.code()))
            }
            Ok(PumpEnd::Finished(frames)) => {
                if !decoder_status.success() {
                    return Err(process_failure("ffmpeg decoder", &decoder_log, decoder_status.code()));
                }
                if !encoder_status.success() {
                    return Err(process_failure("ffmpeg encoder", &encoder_log, encoder_status.code()));
                }
                info!("Job {}: graded {} frames at {}x{}", job.id, frames, width, height);
                Ok(())
            }
        }
    }

    /// Decode to RGBA, optionally grade, and quantize into an animated GIF
    fn convert_gif(
        &self,
        job: &ConversionJob,
        sink: &dyn ProgressSink,
        filter: Option<&mut FrameFilter>,
    ) -> ExportResult<Vec<u8>> {
        let (video_index, (width, height)) = Self::frame_geometry(job)?;
        let fps = output_frame_rate(&job.settings, &job.source);
        let decode = Self::decode_args(job, video_index, (width, height));
        let speed = job.settings.video.quality.unwrap_or(GifOptions::default().speed);
        let mut writer = GifWriter::new(width, height, fps, speed)?;

        debug!("Job {}: decode ffmpeg {}", job.id, decode.join(" "));
        let mut decoder = self.spawn(&decode, Stdio::null())?;
        let mut frames_in = take_pipe(decoder.stdout.take(), "decoder stdout")?;
        let decoder_err = take_pipe(decoder.stderr.take(), "decoder stderr")?;
        let expected_frames = (job.expected_duration * fps).ceil().max(1.0);

        let (pumped, decoder_log) = thread::scope(|scope| {
            let decoder_log = scope.spawn(move || drain(decoder_err));
            let pumped = pump(
                &mut frames_in,
                filter,
                sink,
                (width, height),
                expected_frames,
                |frame| writer.push(frame),
            );
            if !matches!(pumped, Ok(PumpEnd::Finished(_))) {
                let _ = decoder.kill();
            }
            (pumped, decoder_log.join().unwrap_or_default())
        });

        let decoder_status = decoder.wait()?;
        match pumped? {
            PumpEnd::Cancelled => Err(cancelled_error()),
            PumpEnd::Finished(frames) => {
                if !decoder_status.success() {
                    return Err(process_failure("ffmpeg decoder", &decoder_log, decoder_status.code()));
                }
                info!("Job {}: quantized {} GIF frames at {}x{}", job.id, frames, width, height);
                writer.finish()
            }
        }
    }

    #[cfg_attr(feature = "libav", allow(dead_code))]
    async fn probe_ffprobe(&self, input: &str) -> ExportResult<SourceMedia> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(input)
            .output()
            .await
            .map_err(|e| ExportError::backend(format!("failed to run {}: {}", self.ffprobe.display(), e)))?;

        if !output.status.success() {
            return Err(ExportError::Domain(DomainError::ProbeFail(format!(
                "ffprobe failed for '{}': {}",
                input,
                String::from_utf8_lossy(&output.stderr).trim()
            ))));
        }
        parse_probe_output(input, &output.stdout)
    }

    fn spawn(&self, args: &[String], stdin: Stdio) -> ExportResult<Child> {
        Command::new(&self.ffmpeg)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::backend(format!("failed to run {}: {}", self.ffmpeg.display(), e)))
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe(&self, input: &str) -> ExportResult<SourceMedia> {
        #[cfg(feature = "libav")]
        {
            let input = input.to_string();
            tokio::task::spawn_blocking(move || crate::adapters::probe_libav::ProbeLibavAdapter::new().probe(&input))
                .await
                .map_err(|e| ExportError::backend(format!("probe task failed: {}", e)))?
        }
        #[cfg(not(feature = "libav"))]
        {
            self.probe_ffprobe(input).await
        }
    }

    async fn extract_subtitles(&self, input: &str, track: usize) -> ExportResult<Vec<SubtitleCue>> {
        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-v", "error", "-i"])
            .arg(input)
            .args(["-map".to_string(), format!("0:{}", track)])
            .args(["-f", "srt", "pipe:1"])
            .output()
            .await
            .map_err(|e| ExportError::backend(format!("failed to run {}: {}", self.ffmpeg.display(), e)))?;

        if !output.status.success() {
            return Err(ExportError::backend(format!(
                "subtitle extraction failed for track {}: {}",
                track,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_srt(&String::from_utf8_lossy(&output.stdout)))
    }

    fn convert(
        &self,
        job: &ConversionJob,
        sink: &dyn ProgressSink,
        filter: Option<&mut FrameFilter>,
    ) -> ExportResult<Vec<u8>> {
        if job.settings.container.is_animation() {
            let bytes = self.convert_gif(job, sink, filter)?;
            if sink.is_cancelled() {
                return Err(cancelled_error());
            }
            return Ok(bytes);
        }

        let output = tempfile::Builder::new()
            .prefix("clipbridge-")
            .suffix(&format!(".{}", job.settings.container.extension()))
            .tempfile()?;

        match filter {
            Some(filter) => self.convert_filtered(job, sink, filter, output.path())?,
            None => self.convert_direct(job, sink, output.path())?,
        }
        if sink.is_cancelled() {
            return Err(cancelled_error());
        }

        let bytes = std::fs::read(output.path())?;
        debug!("Job {}: read {} bytes from {}", job.id, bytes.len(), output.path().display());
        Ok(bytes)
    }

    fn supports_subtitle_passthrough(&self) -> bool {
        true
    }
}

fn base_args() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-v", "error"].map(String::from).to_vec()
}

/// Codec, rate-control and thread flags rebuilt from parsed settings
fn encode_args(settings: &ParsedSettings) -> Vec<String> {
    let mut args = Vec::new();
    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };

    let video = &settings.video;
    if video.copy {
        push("-c:v", "copy".to_string());
    } else {
        if let Some(codec) = &video.codec {
            push("-c:v", codec.clone());
        }
        if let Some(preset) = &video.preset {
            push("-preset", preset.clone());
        }
        if let Some(kbps) = video.bitrate_kbps {
            push("-b:v", format!("{}k", kbps));
        }
        if let Some(kbps) = video.maxrate_kbps {
            push("-maxrate", format!("{}k", kbps));
        }
        if let Some(kbps) = video.bufsize_kbps {
            push("-bufsize", format!("{}k", kbps));
        }
        if let Some(crf) = video.crf {
            push("-crf", crf.to_string());
        }
        if let Some(qp) = video.qp {
            push("-qp", qp.to_string());
        }
    }

    let audio = &settings.audio;
    if audio.copy {
        push("-c:a", "copy".to_string());
    } else {
        if let Some(codec) = &audio.codec {
            push("-c:a", codec.clone());
        }
        if let Some(kbps) = audio.bitrate_kbps {
            push("-b:a", format!("{}k", kbps));
        }
    }

    if let Some(codec) = &settings.subtitle_codec {
        push("-c:s", codec.clone());
    }
    if let Some(threads) = settings.threads {
        push("-threads", threads.to_string());
    }
    args
}

/// Rate of the frames leaving the decode chain; an `fps=` expression wins
/// over the source rate
fn output_frame_rate(settings: &ParsedSettings, source: &SourceMedia) -> f64 {
    settings
        .filters
        .frame_rate()
        .or_else(|| source.frame_rate())
        .unwrap_or(FALLBACK_FRAME_RATE)
}

fn round_even(value: f64) -> u32 {
    (((value / 2.0).round() * 2.0) as u32).max(2)
}

/// Exact frame size after the geometry chain
fn filtered_geometry(resize: Option<ParsedResize>, source: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let Some(resize) = resize else {
        return source;
    };

    match (resize.width > 0, resize.height > 0) {
        (true, true) => {
            let (w, h) = (resize.width as f64, resize.height as f64);
            match resize.fit {
                FitMode::Contain => {
                    let scale = (w / sw).min(h / sh);
                    (round_even(sw * scale), round_even(sh * scale))
                }
                FitMode::Stretch | FitMode::Cover => (resize.width as u32, resize.height as u32),
            }
        }
        (true, false) => {
            let w = resize.width as f64;
            (resize.width as u32, round_even(sh * w / sw))
        }
        (false, true) => {
            let h = resize.height as f64;
            (round_even(sw * h / sh), resize.height as u32)
        }
        (false, false) => source,
    }
}

enum PumpEnd {
    Finished(u64),
    Cancelled,
}

/// Move frames from the decoder through the optional filter into `emit`
fn pump(
    frames_in: &mut impl Read,
    mut filter: Option<&mut FrameFilter>,
    sink: &dyn ProgressSink,
    (width, height): (u32, u32),
    expected_frames: f64,
    mut emit: impl FnMut(&[u8]) -> ExportResult<()>,
) -> ExportResult<PumpEnd> {
    let mut frame = vec![0u8; width as usize * height as usize * 4];
    let mut frames = 0u64;

    loop {
        if sink.is_cancelled() {
            return Ok(PumpEnd::Cancelled);
        }
        if !read_frame(frames_in, &mut frame)? {
            break;
        }
        if frames == 0 {
            sink.started();
        }

        let out: &[u8] = match filter.as_deref_mut() {
            Some(filter) => filter.apply(width, height, &frame)?.as_raw(),
            None => &frame,
        };
        emit(out)?;
        frames += 1;
        sink.report(ProgressSample {
            fraction: frames as f64 / expected_frames,
            frames: Some(frames),
        });
    }

    Ok(PumpEnd::Finished(frames))
}

/// Fill `frame` completely; `false` at end of stream
fn read_frame(reader: &mut impl Read, frame: &mut [u8]) -> ExportResult<bool> {
    let mut filled = 0;
    while filled < frame.len() {
        match reader.read(&mut frame[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    debug!("Dropping truncated trailing frame ({} bytes)", filled);
                }
                return Ok(false);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> ExportResult<T> {
    pipe.ok_or_else(|| ExportError::backend(format!("ffmpeg {} was not captured", name)))
}

fn drain(mut reader: impl Read) -> String {
    let mut text = String::new();
    let _ = reader.read_to_string(&mut text);
    text
}

fn cancelled_error() -> ExportError {
    ExportError::Failed {
        message: "cancelled".to_string(),
    }
}

fn process_failure(what: &str, stderr: &str, code: Option<i32>) -> ExportError {
    let message = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match code {
            Some(code) => format!("{} exited with status {}", what, code),
            None => format!("{} was terminated", what),
        });
    ExportError::Failed { message }
}

/// Key/value state of ffmpeg's `-progress` output
#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    frame: Option<u64>,
    ended: bool,
}

impl ProgressState {
    /// Returns true when a progress block is complete
    fn update(&mut self, key: &str, value: &str) -> bool {
        match key {
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = Some(frame);
                }
            }
            // Both are microseconds despite the name
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.ended = value == "end";
                return true;
            }
            _ => {}
        }
        false
    }

    fn fraction(&self, expected_duration: f64) -> f64 {
        if self.ended {
            1.0
        } else if expected_duration > 0.0 {
            self.out_time_secs / expected_duration
        } else {
            0.0
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bit_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    disposition: HashMap<String, i64>,
}

/// `30000/1001` or `25`; zero denominators yield `None`
fn parse_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_probe_output(input: &str, json: &[u8]) -> ExportResult<SourceMedia> {
    let probed: ProbeOutput = serde_json::from_slice(json)?;

    let mut duration = probed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let mut streams = Vec::with_capacity(probed.streams.len());
    for stream in probed.streams {
        let codec = stream.codec_name.as_deref().unwrap_or("unknown");
        let mut descriptor = match stream.codec_type.as_deref() {
            Some("video") => {
                let fps = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_rate)
                    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
                    .unwrap_or(FALLBACK_FRAME_RATE);
                StreamDescriptor::video(
                    stream.index,
                    codec,
                    stream.width.unwrap_or(0),
                    stream.height.unwrap_or(0),
                    fps,
                )
            }
            Some("audio") => StreamDescriptor::audio(
                stream.index,
                codec,
                stream
                    .sample_rate
                    .as_deref()
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(0),
                stream.channels.unwrap_or(0),
            ),
            Some("subtitle") => StreamDescriptor::subtitle(stream.index, codec),
            _ => StreamDescriptor::other(stream.index, codec),
        };

        if let Some(language) = stream.tags.get("language") {
            descriptor = descriptor.with_language(language);
        }
        if let Some(title) = stream.tags.get("title") {
            descriptor = descriptor.with_title(title);
        }
        if let Some(bit_rate) = stream.bit_rate.as_deref().and_then(|b| b.parse().ok()) {
            descriptor = descriptor.with_bit_rate(bit_rate);
        }
        if stream.disposition.get("default").copied().unwrap_or(0) != 0 {
            descriptor = descriptor.as_default();
        }
        if stream.disposition.get("forced").copied().unwrap_or(0) != 0 {
            descriptor = descriptor.as_forced();
        }
        if duration.is_none() {
            duration = stream.duration.as_deref().and_then(|d| d.parse().ok());
        }
        streams.push(descriptor);
    }

    Ok(SourceMedia::new(input, duration.unwrap_or(0.0), streams))
}

/// `HH:MM:SS,mmm` (a dot is accepted in place of the comma)
fn parse_srt_time(value: &str) -> Option<f64> {
    let value = value.trim().replace(',', ".");
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse SubRip text into cues, skipping malformed blocks
pub fn parse_srt(text: &str) -> Vec<SubtitleCue> {
    let normalized = text.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().skip_while(|l| !l.contains("-->"));
        let Some(timing) = lines.next() else {
            continue;
        };
        let Some((start, end)) = timing.split_once("-->") else {
            continue;
        };
        // Position hints may follow the end time
        let end = end.split_whitespace().next().unwrap_or("");
        let (Some(start), Some(end)) = (parse_srt_time(start), parse_srt_time(end)) else {
            continue;
        };

        let text = lines.collect::<Vec<_>>().join("\n");
        cues.push(SubtitleCue { start, end, text });
    }
    cues
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001",
             "disposition": {"default": 1, "forced": 0}},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "sample_rate": "48000",
             "channels": 2, "bit_rate": "128000", "tags": {"language": "eng", "title": "Stereo"},
             "disposition": {"default": 1}},
            {"index": 2, "codec_type": "subtitle", "codec_name": "hdmv_pgs_subtitle",
             "tags": {"language": "fre"}, "disposition": {"forced": 1}},
            {"index": 3, "codec_type": "attachment", "codec_name": "ttf"}
        ],
        "format": {"duration": "12.480000"}
    }"#;

    #[test]
    fn test_probe_output_parsing() {
        let media = parse_probe_output("movie.mkv", PROBE_JSON.as_bytes()).unwrap();
        assert_eq!(media.duration, 12.48);
        assert_eq!(media.streams.len(), 4);

        let video = media.primary_video().unwrap();
        assert!((video.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert!(video.is_default);

        let audio = media.stream(1).unwrap();
        assert_eq!(audio.sample_rate, Some(48_000));
        assert_eq!(audio.language.as_deref(), Some("eng"));
        assert_eq!(audio.bit_rate, Some(128_000));

        let subtitle = media.stream(2).unwrap();
        assert_eq!(subtitle.kind, MediaKind::Subtitle);
        assert!(subtitle.is_forced);
        assert_eq!(media.stream(3).unwrap().kind, MediaKind::Other);
    }

    #[test]
    fn test_rate_parsing() {
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("50/2"), Some(25.0));
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn test_srt_parsing() {
        let srt = "1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\nworld\r\n\r\n\
                   2\r\n00:01:00,250 --> 00:01:01,000 X1:10 X2:20\r\nSecond\r\n\r\n\
                   3\r\nbroken --> line\r\nIgnored\r\n";
        let cues = parse_srt(srt);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start, 1.0);
        assert_eq!(cues[0].end, 2.5);
        assert_eq!(cues[0].text, "Hello\nworld");
        assert_eq!(cues[1].start, 60.25);
        assert_eq!(cues[1].text, "Second");
    }

    #[test]
    fn test_progress_blocks() {
        let mut state = ProgressState::default();
        assert!(!state.update("frame", "48"));
        assert!(!state.update("out_time_us", "2000000"));
        assert!(state.update("progress", "continue"));
        assert_eq!(state.frame, Some(48));
        assert_eq!(state.fraction(4.0), 0.5);

        state.update("progress", "end");
        assert_eq!(state.fraction(4.0), 1.0);
    }

    #[test]
    fn test_filtered_geometry() {
        let resize = |width, height, fit| Some(ParsedResize { width, height, fit });
        assert_eq!(filtered_geometry(None, (1920, 1080)), (1920, 1080));
        assert_eq!(filtered_geometry(resize(640, 360, FitMode::Stretch), (1920, 1080)), (640, 360));
        assert_eq!(filtered_geometry(resize(640, 640, FitMode::Contain), (1920, 1080)), (640, 360));
        assert_eq!(filtered_geometry(resize(500, 500, FitMode::Cover), (1920, 1080)), (500, 500));
        assert_eq!(filtered_geometry(resize(1280, -2, FitMode::Stretch), (1920, 1080)), (1280, 720));
    }

    #[test]
    fn test_filtered_rate_follows_fps_expression() {
        let source = SourceMedia::new("talk.mp4", 8.0, vec![StreamDescriptor::video(0, "h264", 1280, 720, 25.0)]);
        let parser = crate::engine::parser::DirectiveParser::new();

        let social = parser.parse(&["-c:v", "libx264", "-vf", "fps=30,eq=saturation=1.5"], "out.mp4");
        assert_eq!(output_frame_rate(&social, &source), 30.0);

        let graded = parser.parse(&["-c:v", "libx264", "-vf", "eq=saturation=1.5"], "out.mp4");
        assert_eq!(output_frame_rate(&graded, &source), 25.0);
    }

    #[test]
    fn test_gif_decode_args_scale_to_frame_size() {
        use crate::adapters::synthetic::SyntheticBackend;
        use crate::engine::controller::ExecutionController;
        use std::sync::Arc;

        let source = SourceMedia::new("talk.mp4", 8.0, vec![StreamDescriptor::video(0, "h264", 1280, 720, 25.0)]);
        let settings = crate::engine::parser::DirectiveParser::new().parse(
            &["-ss", "1.000", "-t", "2.000", "-c:v", "gif", "-vf", "fps=10,scale=320:-2", "-q:v", "5", "-map", "0:v:0"],
            "talk_export.gif",
        );
        let controller = ExecutionController::new(Arc::new(SyntheticBackend::new()));
        let job = controller
            .prepare(1, "talk.mp4", "talk_export.gif", settings, source, None)
            .unwrap();

        let (index, size) = FfmpegBackend::frame_geometry(&job).unwrap();
        assert_eq!((index, size), (0, (320, 180)));
        assert_eq!(output_frame_rate(&job.settings, &job.source), 10.0);
        assert_eq!(
            FfmpegBackend::decode_args(&job, index, size).join(" "),
            "-hide_banner -nostdin -v error -ss 1.000 -i talk.mp4 -t 2.000 -map 0:0 \
             -vf fps=10,scale=320:-2,scale=320:180 -f rawvideo -pix_fmt rgba pipe:1"
        );
    }

    #[test]
    fn test_pump_feeds_whole_frames_to_gif() {
        use crate::engine::progress::ProgressTracker;

        // Two 2x1 frames and a truncated third
        let mut raw: Vec<u8> = Vec::new();
        raw.extend([255, 0, 0, 255, 0, 255, 0, 255]);
        raw.extend([0, 0, 255, 255, 255, 255, 255, 255]);
        raw.extend([1, 2, 3]);

        let tracker = ProgressTracker::new(0.2);
        let mut writer = GifWriter::new(2, 1, 10.0, 10).unwrap();
        let end = pump(&mut raw.as_slice(), None, &tracker, (2, 1), 2.0, |frame| writer.push(frame)).unwrap();

        assert!(matches!(end, PumpEnd::Finished(2)));
        assert!(tracker.has_started());
        assert_eq!(tracker.snapshot().fraction, 1.0);
        assert_eq!(writer.frames(), 2);
        assert!(writer.finish().unwrap().starts_with(b"GIF89a"));
    }

    #[test]
    fn test_encode_args_from_parsed_settings() {
        let settings = crate::engine::parser::DirectiveParser::new().parse(
            &["-c:v", "libx264", "-preset", "fast", "-crf", "20", "-c:a", "copy", "-threads", "4"],
            "out.mp4",
        );
        assert_eq!(
            encode_args(&settings).join(" "),
            "-c:v libx264 -preset fast -crf 20 -c:a copy -threads 4"
        );
    }

    #[test]
    fn test_process_failure_uses_last_stderr_line() {
        let err = process_failure("ffmpeg", "warning\nUnknown encoder 'x'\n\n", Some(1));
        assert_eq!(err.to_string(), "Conversion failed: Unknown encoder 'x'");
        let err = process_failure("ffmpeg", "", Some(3));
        assert_eq!(err.to_string(), "Conversion failed: ffmpeg exited with status 3");
    }
}
