// Unit tests for domain models

use super::*;

#[test]
fn test_time_spec_parse_seconds() {
    let time = TimeSpec::parse("123.456").unwrap();
    assert_eq!(time.seconds, 123.456);
}

#[test]
fn test_time_spec_parse_mm_ss() {
    let time = TimeSpec::parse("01:30.5").unwrap();
    assert_eq!(time.seconds, 90.5);
}

#[test]
fn test_time_spec_parse_hh_mm_ss() {
    let time = TimeSpec::parse("01:02:03.5").unwrap();
    assert_eq!(time.seconds, 3723.5);
}

#[test]
fn test_time_spec_parse_invalid() {
    assert!(TimeSpec::parse("invalid").is_err());
    assert!(TimeSpec::parse("00:60").is_err());
    assert!(TimeSpec::parse("01:60:00").is_err());
    assert!(TimeSpec::parse("-10").is_err());
}

#[test]
fn test_time_spec_display() {
    assert_eq!(TimeSpec::from_seconds(3723.456).to_string(), "01:02:03.456");
    assert_eq!(TimeSpec::from_seconds(123.456).to_string(), "02:03.456");
}

#[test]
fn test_container_parse_and_mime() {
    assert_eq!(Container::parse(".MKV").unwrap(), Container::Mkv);
    assert_eq!(Container::parse("matroska").unwrap(), Container::Mkv);
    assert!(Container::parse("avi").is_err());
    assert_eq!(Container::Webm.mime_type(), "video/webm");
    assert_eq!(Container::Mov.mime_type(), "video/quicktime");
    assert_eq!(Container::parse("GIF").unwrap(), Container::Gif);
    assert_eq!(Container::Gif.mime_type(), "image/gif");
    assert!(Container::Gif.is_animation());
}

#[test]
fn test_container_from_file_name() {
    assert_eq!(Container::from_file_name("clip_export.webm"), Some(Container::Webm));
    assert_eq!(Container::from_file_name("clip.avi"), None);
    assert_eq!(Container::from_file_name("no_extension"), None);
}

#[test]
fn test_codec_names_accept_encoder_aliases() {
    assert_eq!(VideoCodec::parse("libx265").unwrap(), VideoCodec::Hevc);
    assert_eq!(VideoCodec::parse("AV1").unwrap(), VideoCodec::Av1);
    assert_eq!(AudioCodec::parse("libopus").unwrap(), AudioCodec::Opus);
    assert_eq!(
        AudioCodec::parse("dts"),
        Err(DomainError::UnsupportedCodec("dts".to_string()))
    );
}

#[test]
fn test_color_identity() {
    assert!(ColorAdjustments::default().is_identity());
    let warmer = ColorAdjustments {
        hue: 12.0,
        ..ColorAdjustments::default()
    };
    assert!(!warmer.is_identity());
}

#[test]
fn test_settings_has_filters() {
    let mut settings = ExportSettings::for_duration(10.0);
    assert!(!settings.has_filters());
    settings.resize = Some(Resize::new(640, 360));
    assert!(settings.has_filters());
}

#[test]
fn test_settings_validation() {
    let mut settings = ExportSettings::for_duration(10.0);
    assert!(settings.validate().is_ok());

    settings.trim_start = 8.0;
    settings.trim_end = 4.0;
    assert!(matches!(settings.validate(), Err(DomainError::InvalidSettings(_))));

    let mut settings = ExportSettings::for_duration(10.0);
    settings.color.brightness = 2.0;
    assert!(settings.validate().is_err());

    let mut settings = ExportSettings::for_duration(10.0);
    settings.rate_control = RateControl::Bitrate(0);
    assert!(settings.validate().is_err());
}

#[test]
fn test_open_trim_end_accepts_any_start() {
    let mut settings = ExportSettings::default();
    settings.trim_start = 2.0;
    settings.trim_end = 0.0;
    assert!(settings.validate().is_ok());

    settings.trim_end = -1.0;
    assert!(settings.validate().is_ok());
}

#[test]
fn test_settings_deserialize_with_defaults() {
    let json = r#"{
        "trim_end": 12.5,
        "container": "webm",
        "rate_control": { "mode": "qp", "value": 20 },
        "resize": { "width": 640, "height": 360 }
    }"#;
    let settings: ExportSettings = serde_json::from_str(json).unwrap();
    assert_eq!(settings.container, Container::Webm);
    assert_eq!(settings.rate_control, RateControl::Qp(20));
    assert_eq!(settings.resize.unwrap().fit, FitMode::Stretch);
    assert_eq!(settings.audio_tracks, TrackSelection::all());
    assert_eq!(settings.subtitle_tracks, TrackSelection::none());
}

#[test]
fn test_gif_options_only_checked_for_gif() {
    let json = r#"{ "trim_end": 3.0, "container": "gif", "gif": { "fps": 24 } }"#;
    let mut settings: ExportSettings = serde_json::from_str(json).unwrap();
    assert_eq!(settings.gif, GifOptions { fps: 24, speed: 10 });
    assert!(settings.validate().is_ok());

    settings.gif.speed = 31;
    assert!(matches!(settings.validate(), Err(DomainError::InvalidSettings(_))));

    settings.container = Container::Mp4;
    assert!(settings.validate().is_ok());
}

#[test]
fn test_source_media_lookup() {
    let media = SourceMedia::new(
        "/videos/holiday.mov",
        20.0,
        vec![
            StreamDescriptor::video(0, "h264", 1920, 1080, 25.0),
            StreamDescriptor::audio(1, "aac", 48000, 2),
            StreamDescriptor::video(2, "mjpeg", 320, 240, 1.0),
        ],
    );
    assert_eq!(media.primary_video().unwrap().index, 0);
    assert_eq!(media.frame_rate(), Some(25.0));
    assert_eq!(media.stem(), "holiday");
    assert_eq!(media.streams_of(MediaKind::Video).count(), 2);
    assert!(media.stream(5).is_none());
}
