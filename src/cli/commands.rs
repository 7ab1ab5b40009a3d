//! Command implementations

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::adapters::synthetic::SyntheticBackend;
use crate::adapters::toml_config::AppConfig;
use crate::adapters::FfmpegBackend;
use crate::cli::args::{
    CheckArgs, CompileArgs, ExportArgs, ParseArgs, PresetsArgs, SettingsArgs, SourceArgs,
    SubtitlesArgs,
};
use crate::domain::model::{
    AudioCodec, ColorAdjustments, Container, ExportSettings, RateControl, SourceMedia, TimeSpec,
    TrackSelection, VideoCodec,
};
use crate::engine::{DirectiveParser, ExecutionController, ProgressUpdate};
use crate::planner::presets::{find_preset, PRESETS};
use crate::planner::{CompiledPlan, PlanCompiler};
use crate::ports::MediaBackend;
use crate::session::{ExportObserver, ExportOutcome, ExportSession};
use crate::streams::mapper::StreamMapper;

/// Execute the compile command
pub async fn compile(args: CompileArgs, config: &AppConfig) -> Result<()> {
    let backend = select_backend(&args.source, config)?;
    let (_, source) = load_source(&args.source, backend.as_ref()).await?;
    let plan = compile_plan(&args.settings, &source, config)?;

    if args.tokens {
        println!("{}", plan.tokens().join(" "));
    } else {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }
    Ok(())
}

/// Execute the parse command
pub fn parse(args: ParseArgs) -> Result<()> {
    let parsed = DirectiveParser::new().parse(&args.tokens, &args.output_name);
    for token in &parsed.ignored {
        warn!("Ignored directive token: {}", token);
    }
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

/// Execute the check command: compile, parse back and validate without converting
pub async fn check(args: CheckArgs, config: &AppConfig) -> Result<()> {
    let backend = select_backend(&args.source, config)?;
    let (_, source) = load_source(&args.source, backend.as_ref()).await?;
    let plan = compile_plan(&args.settings, &source, config)?;

    let parsed = DirectiveParser::new().parse_sequence(&plan.directives, &plan.output.file_name);
    let controller = ExecutionController::new(backend);
    let tracks = controller.resolve_tracks(&parsed, &source);
    let issues = controller.validate(&parsed, &source, &tracks);

    if args.json {
        let report = json!({
            "output": plan.output,
            "warnings": plan.warnings,
            "tracks": tracks,
            "issues": issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Output: {} ({})", plan.output.file_name, plan.output.mime_type);
        println!("Duration: {}", TimeSpec::from_seconds(plan.expected_duration).format_hms());
        for warning in &plan.warnings {
            println!("Warning: {}", warning);
        }
        for track in &tracks {
            println!(
                "  #{:<2} {:<9} {:<10} {:<7} {}",
                track.index,
                format!("{:?}", track.kind).to_lowercase(),
                track.codec,
                if track.keep { "keep" } else { "discard" },
                track.reason
            );
        }
        for issue in &issues {
            println!("Issue: {}", issue);
        }
    }

    if !issues.is_empty() {
        bail!("Plan failed validation with {} issue(s)", issues.len());
    }
    info!("Plan is consistent");
    Ok(())
}

/// Execute the export command
pub async fn export(args: ExportArgs, config: &AppConfig) -> Result<()> {
    let backend = select_backend(&args.source, config)?;
    let (input, source) = load_source(&args.source, backend.as_ref()).await?;
    let settings = args.settings.resolve(&source, config.encoder.default_preset.as_deref())?;

    let mut session_config = config.session_config();
    if let Some(timeout) = args.start_timeout_ms {
        session_config.start_timeout = Duration::from_millis(timeout);
    }
    if args.settings.threads.is_some() {
        session_config.threads = args.settings.threads;
    }
    let session = ExportSession::new(backend, session_config);
    let plan = session.compile(&settings, &source)?;
    for warning in &plan.warnings {
        warn!("{}", warning);
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| plan.output.file_name.clone().into());
    if output.exists() && !args.force {
        bail!("Output file already exists: {} (use --force)", output.display());
    }

    let cancel = session.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling export");
            cancel.cancel();
        }
    });

    let observer: Box<dyn ExportObserver> = if args.json {
        Box::new(JsonObserver)
    } else {
        Box::new(ConsoleObserver)
    };
    let outcome = session.run_plan(&input, &plan, observer.as_ref()).await;
    interrupt.abort();

    match outcome? {
        ExportOutcome::Completed(artifact) => {
            std::fs::write(&output, &artifact.bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            if args.json {
                println!(
                    "{}",
                    json!({
                        "event": "done",
                        "at": Utc::now(),
                        "artifact": artifact,
                        "path": output,
                        "size": artifact.bytes.len(),
                    })
                );
            } else {
                eprintln!();
                println!("Wrote {} ({} bytes)", output.display(), artifact.bytes.len());
            }
            info!("Export completed: {}", output.display());
            Ok(())
        }
        ExportOutcome::Cancelled => {
            if args.json {
                println!("{}", json!({ "event": "cancelled", "at": Utc::now() }));
            }
            Err(anyhow!("Export cancelled"))
        }
    }
}

/// Execute the subtitles command
pub async fn subtitles(args: SubtitlesArgs, config: &AppConfig) -> Result<()> {
    let backend = select_backend(&args.source, config)?;
    let (input, _) = load_source(&args.source, backend.as_ref()).await?;
    let session = ExportSession::new(backend, config.session_config());

    let cues = session.preview_subtitles(&input, args.track).await?;
    info!("Extracted {} cues from track {}", cues.len(), args.track);
    println!("{}", serde_json::to_string_pretty(&cues)?);
    Ok(())
}

/// Execute the presets command
pub fn presets(args: PresetsArgs) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(PRESETS)?);
        return Ok(());
    }
    for preset in PRESETS {
        println!("{:<8} {}", preset.name, preset.description);
    }
    Ok(())
}

impl SettingsArgs {
    /// Settings file (or whole-clip defaults) with flag overrides applied
    pub fn resolve(&self, source: &SourceMedia, default_preset: Option<&str>) -> Result<ExportSettings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let mut loaded = load_settings(path)?;
                if loaded.trim_end <= 0.0 {
                    loaded.trim_end = source.duration;
                }
                loaded
            }
            None => ExportSettings::for_duration(source.duration),
        };

        if self.auto_tracks {
            let (audio, subtitles) = StreamMapper::new().initial_track_selections(source);
            settings.audio_tracks = audio;
            settings.subtitle_tracks = subtitles;
        }

        if let Some(start) = &self.start {
            settings.trim_start = TimeSpec::parse(start)
                .map_err(|e| anyhow!("Invalid start time '{}': {}", start, e))?
                .seconds;
        }
        if let Some(end) = &self.end {
            settings.trim_end = TimeSpec::parse(end)
                .map_err(|e| anyhow!("Invalid end time '{}': {}", end, e))?
                .seconds;
        }
        if let Some(container) = &self.container {
            settings.container = Container::parse(container)?;
        }
        if let Some(codec) = &self.codec {
            settings.video_codec = VideoCodec::parse(codec)?;
        }
        if let Some(crf) = self.crf {
            settings.rate_control = RateControl::Crf(crf);
        } else if let Some(kbps) = self.bitrate {
            settings.rate_control = RateControl::Bitrate(kbps);
        } else if let Some(qp) = self.qp {
            settings.rate_control = RateControl::Qp(qp);
        }
        if let Some(speed) = &self.speed {
            settings.speed = Some(speed.clone());
        }
        if let Some(fps) = self.gif_fps {
            settings.gif.fps = fps;
        }
        if let Some(speed) = self.gif_speed {
            settings.gif.speed = speed;
        }

        let preset = self.preset.as_deref().or(settings.preset.as_deref()).or(default_preset);
        if let Some(name) = preset {
            settings.preset = Some(find_preset(name)?.name.to_string());
        }

        if let Some(resize) = self.resize {
            settings.resize = Some(resize.with_fit(self.fit.map(Into::into).unwrap_or_default()));
        }
        settings.color = ColorAdjustments {
            brightness: self.brightness.unwrap_or(settings.color.brightness),
            contrast: self.contrast.unwrap_or(settings.color.contrast),
            saturation: self.saturation.unwrap_or(settings.color.saturation),
            hue: self.hue.unwrap_or(settings.color.hue),
        };

        if let Some(codec) = &self.audio_codec {
            settings.audio_codec = AudioCodec::parse(codec)?;
        }
        if let Some(kbps) = self.audio_bitrate {
            settings.audio_bitrate_kbps = kbps;
        }
        settings.video_no_reencode |= self.video_copy;
        settings.audio_no_reencode |= self.audio_copy;

        if self.no_audio {
            settings.audio_tracks = TrackSelection::none();
        } else if let Some(index) = self.audio_track {
            settings.audio_tracks = TrackSelection::single(index);
        }
        if self.all_subtitles {
            settings.subtitle_tracks = TrackSelection::all();
        } else if let Some(index) = self.subtitle_track {
            settings.subtitle_tracks = TrackSelection::single(index);
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Read export settings from JSON or YAML
pub fn load_settings(path: &Path) -> Result<ExportSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let settings = if yaml {
        serde_yaml::from_str(&text)
            .with_context(|| format!("Invalid YAML settings in {}", path.display()))?
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON settings in {}", path.display()))?
    };
    Ok(settings)
}

fn compile_plan(args: &SettingsArgs, source: &SourceMedia, config: &AppConfig) -> Result<CompiledPlan> {
    let settings = args.resolve(source, config.encoder.default_preset.as_deref())?;
    let threads = args.threads.unwrap_or_else(|| config.encoder.effective_threads());
    let plan = PlanCompiler::new().with_threads(Some(threads)).compile(&settings, source)?;
    for warning in &plan.warnings {
        warn!("{}", warning);
    }
    info!(
        "Compiled {} directives for {}",
        plan.directives.len(),
        plan.output.file_name
    );
    Ok(plan)
}

fn select_backend(args: &SourceArgs, config: &AppConfig) -> Result<Arc<dyn MediaBackend>> {
    if !args.synthetic {
        return Ok(Arc::new(FfmpegBackend::from_config(&config.ffmpeg)));
    }

    let mut backend = SyntheticBackend::new();
    if let Some(path) = &args.streams {
        let media = read_streams(path)?;
        let input = args.input.clone().unwrap_or_else(|| media.name.clone());
        backend = backend.with_source(&input, media);
    }
    Ok(Arc::new(backend))
}

/// Input name plus its track description, from a streams file or a probe
async fn load_source(args: &SourceArgs, backend: &dyn MediaBackend) -> Result<(String, SourceMedia)> {
    if let Some(path) = &args.streams {
        let media = read_streams(path)?;
        let input = args.input.clone().unwrap_or_else(|| media.name.clone());
        return Ok((input, media));
    }

    let input = args
        .input
        .clone()
        .ok_or_else(|| anyhow!("Either --input or --streams is required"))?;
    if !args.synthetic && !Path::new(&input).exists() {
        bail!("Input file does not exist: {}", input);
    }
    let media = backend
        .probe(&input)
        .await
        .with_context(|| format!("Failed to probe {}", input))?;
    info!(
        "Probed {} via {}: {} streams, {:.2}s",
        input,
        backend.name(),
        media.streams.len(),
        media.duration
    );
    Ok((input, media))
}

fn read_streams(path: &Path) -> Result<SourceMedia> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read streams file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid streams file {}", path.display()))
}

/// Single-line progress on stderr
struct ConsoleObserver;

impl ExportObserver for ConsoleObserver {
    fn on_started(&self, job_id: u64) {
        info!("Job {} started", job_id);
    }

    fn on_progress(&self, _job_id: u64, progress: &ProgressUpdate) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\r{:5.1}%  {}",
            progress.fraction * 100.0,
            TimeSpec::from_seconds(progress.media_time).format_hms()
        );
        if let Some(speed) = progress.speed {
            let _ = write!(stderr, "  {:.2}x", speed);
        }
        let _ = stderr.flush();
    }
}

/// Timestamped JSON lines on stdout
struct JsonObserver;

impl ExportObserver for JsonObserver {
    fn on_started(&self, job_id: u64) {
        println!("{}", json!({ "event": "started", "job_id": job_id, "at": Utc::now() }));
    }

    fn on_progress(&self, job_id: u64, progress: &ProgressUpdate) {
        println!(
            "{}",
            json!({ "event": "progress", "job_id": job_id, "at": Utc::now(), "progress": progress })
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{FitMode, GifOptions, StreamDescriptor};
    use std::io::Write as _;

    fn source() -> SourceMedia {
        SourceMedia::new(
            "talk.mp4",
            12.0,
            vec![
                StreamDescriptor::video(0, "h264", 1920, 1080, 30.0),
                StreamDescriptor::audio(1, "aac", 48000, 2),
                StreamDescriptor::audio(2, "aac", 48000, 2).as_default(),
                StreamDescriptor::subtitle(3, "subrip").as_forced(),
            ],
        )
    }

    #[test]
    fn test_resolve_defaults_to_whole_clip() {
        let settings = SettingsArgs::default().resolve(&source(), None).unwrap();
        assert_eq!(settings.trim_start, 0.0);
        assert_eq!(settings.trim_end, 12.0);
        assert_eq!(settings.audio_tracks, TrackSelection::all());
    }

    #[test]
    fn test_resolve_flag_overrides() {
        let args = SettingsArgs {
            start: Some("00:02".to_string()),
            end: Some("7.5".to_string()),
            container: Some("mkv".to_string()),
            crf: Some(30),
            resize: Some(crate::domain::model::Resize::new(640, 360)),
            fit: Some(crate::cli::args::FitArg::Contain),
            brightness: Some(-0.2),
            auto_tracks: true,
            ..SettingsArgs::default()
        };
        let settings = args.resolve(&source(), Some("web")).unwrap();

        assert_eq!(settings.trim_start, 2.0);
        assert_eq!(settings.trim_end, 7.5);
        assert_eq!(settings.container, Container::Mkv);
        assert_eq!(settings.rate_control, RateControl::Crf(30));
        assert_eq!(settings.resize.unwrap().fit, FitMode::Contain);
        assert_eq!(settings.color.brightness, -0.2);
        assert_eq!(settings.preset.as_deref(), Some("web"));
        assert_eq!(settings.audio_tracks, TrackSelection::single(2));
        assert_eq!(settings.subtitle_tracks, TrackSelection::single(3));
    }

    #[test]
    fn test_resolve_gif_options() {
        let args = SettingsArgs {
            container: Some("gif".to_string()),
            gif_fps: Some(15),
            gif_speed: Some(4),
            ..SettingsArgs::default()
        };
        let settings = args.resolve(&source(), None).unwrap();
        assert_eq!(settings.container, Container::Gif);
        assert_eq!(settings.gif, GifOptions { fps: 15, speed: 4 });
    }

    #[test]
    fn test_unknown_preset_is_rejected() {
        let args = SettingsArgs {
            preset: Some("potato".to_string()),
            ..SettingsArgs::default()
        };
        assert!(args.resolve(&source(), None).is_err());
    }

    #[test]
    fn test_load_yaml_settings() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "trim_start: 1.0\ntrim_end: 4.0\ncontainer: webm\nvideo_codec: vp9").unwrap();

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.trim_end, 4.0);
        assert_eq!(settings.container, Container::Webm);
        assert_eq!(settings.video_codec, VideoCodec::Vp9);
        assert_eq!(settings.audio_bitrate_kbps, 128);
    }

    #[test]
    fn test_load_json_settings_without_end_uses_duration() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"trim_start": 3.0, "audio_no_reencode": true}}"#).unwrap();

        let args = SettingsArgs {
            settings: Some(file.path().to_path_buf()),
            ..SettingsArgs::default()
        };
        let settings = args.resolve(&source(), None).unwrap();
        assert_eq!(settings.trim_start, 3.0);
        assert_eq!(settings.trim_end, 12.0);
        assert!(settings.audio_no_reencode);
    }
}
