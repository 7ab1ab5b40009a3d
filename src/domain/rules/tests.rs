// Unit tests for compatibility rules

use super::*;

#[test]
fn test_codec_container_matrix() {
    assert!(codec_supports_container(VideoCodec::H264, Container::Mp4));
    assert!(codec_supports_container(VideoCodec::Hevc, Container::Mkv));
    assert!(!codec_supports_container(VideoCodec::H264, Container::Webm));
    assert!(codec_supports_container(VideoCodec::Vp9, Container::Webm));
    assert!(!codec_supports_container(VideoCodec::Av1, Container::Mov));
}

#[test]
fn test_qp_only_on_two_codec_families() {
    let qp_capable: Vec<VideoCodec> = VideoCodec::ALL
        .into_iter()
        .filter(|codec| codec_supports_rate_control(*codec, RateControlMode::Qp))
        .collect();
    assert_eq!(qp_capable, vec![VideoCodec::H264, VideoCodec::Hevc]);

    for codec in VideoCodec::ALL {
        assert!(codec_supports_rate_control(codec, RateControlMode::Crf));
        assert!(codec_supports_rate_control(codec, RateControlMode::Bitrate));
    }
}

#[test]
fn test_audio_allow_lists() {
    assert!(audio_codec_allowed_in_container("aac", Container::Mp4));
    assert!(!audio_codec_allowed_in_container("dts", Container::Mp4));
    assert!(audio_codec_allowed_in_container("pcm_s16le", Container::Mov));
    assert!(!audio_codec_allowed_in_container("opus", Container::Mov));
    assert!(audio_codec_allowed_in_container("libopus", Container::Webm));
    assert!(!audio_codec_allowed_in_container("aac", Container::Webm));
}

#[test]
fn test_unlisted_container_is_permissive() {
    for codec in ["dts", "truehd", "pcm_s32le", "aac"] {
        assert!(audio_codec_allowed_in_container(codec, Container::Mkv));
    }
}

#[test]
fn test_defaults_are_mutually_compatible() {
    for container in Container::ALL {
        assert!(codec_supports_container(default_video_codec(container), container));
        assert!(audio_codec_allowed_in_container(
            default_audio_codec(container).name(),
            container
        ));
    }
}

#[test]
fn test_bitrate_budget_clamps() {
    let low = BitrateBudget::for_target(100);
    assert_eq!(low.target_kbps, 150);
    assert_eq!(low.maxrate_kbps, 188);
    assert_eq!(low.bufsize_kbps, 300);

    let normal = BitrateBudget::for_target(4000);
    assert_eq!(normal.maxrate_kbps, 5000);
    assert_eq!(normal.bufsize_kbps, 8000);
}

#[test]
fn test_subtitle_rules() {
    assert!(is_bitmap_subtitle("hdmv_pgs_subtitle"));
    assert!(!is_bitmap_subtitle("subrip"));
    assert!(!container_accepts_bitmap_subtitles(Container::Mp4));
    assert!(!container_accepts_bitmap_subtitles(Container::Mov));
    assert!(container_accepts_bitmap_subtitles(Container::Mkv));
    assert!(!container_accepts_bitmap_subtitles(Container::Webm));
    assert_eq!(subtitle_codec_for(Container::Mp4), Some("mov_text"));
    assert_eq!(subtitle_codec_for(Container::Mkv), Some("ass"));
    assert_eq!(subtitle_codec_for(Container::Webm), Some("webvtt"));
    assert_eq!(subtitle_codec_for(Container::Gif), None);
}

#[test]
fn test_trim_thresholds() {
    assert!((min_trim_duration(Some(25.0)) - 0.04).abs() < 1e-9);
    assert!((min_trim_duration(None) - 1.0 / 30.0).abs() < 1e-9);
    assert!((trim_epsilon(0.04) - 0.02).abs() < 1e-9);
    assert_eq!(trim_epsilon(0.004), 0.01);
}

#[test]
fn test_crf_clamping() {
    assert_eq!(clamp_crf(VideoCodec::H264, 60), 51);
    assert_eq!(clamp_crf(VideoCodec::Vp9, 60), 60);
    assert_eq!(clamp_audio_bitrate(8), 32);
    assert_eq!(clamp_audio_bitrate(1000), 512);
}

#[test]
fn test_bitmap_tracks_switch_subtitles_to_copy() {
    assert_eq!(subtitle_codec_for_tracks(Container::Mkv, ["subrip", "ass"]), Some("ass"));
    assert_eq!(
        subtitle_codec_for_tracks(Container::Mkv, ["hdmv_pgs_subtitle", "subrip"]),
        Some("copy")
    );
    assert_eq!(subtitle_codec_for_tracks(Container::Webm, ["webvtt"]), Some("webvtt"));
    assert_eq!(subtitle_codec_for_tracks(Container::Gif, ["hdmv_pgs_subtitle"]), None);
}

#[test]
fn test_gif_rules() {
    assert!(!Container::ALL.contains(&Container::Gif));
    assert!(!audio_codec_allowed_in_container("aac", Container::Gif));
    assert!(!container_accepts_bitmap_subtitles(Container::Gif));
    for codec in [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Vp9, VideoCodec::Av1] {
        assert!(!codec_supports_container(codec, Container::Gif));
    }

    assert_eq!(gif_frame_delay(10.0), 10);
    assert_eq!(gif_frame_delay(15.0), 7);
    assert_eq!(gif_frame_delay(50.0), 2);
    // 2cs is the floor
    assert_eq!(gif_frame_delay(100.0), 2);
    assert_eq!(gif_frame_delay(0.0), 10);
}
