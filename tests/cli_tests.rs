//! Smoke tests for the clipbridge binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use clipbridge::domain::model::{SourceMedia, StreamDescriptor};

/// Binary run from an empty directory so no config file is picked up
fn clipbridge(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clipbridge").unwrap();
    cmd.current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("CLIPBRIDGE_CONFIG")
        .env("RUST_LOG", "warn");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

#[test]
fn test_presets_are_listed() {
    let dir = TempDir::new().unwrap();
    let stdout = stdout_of(clipbridge(&dir).arg("presets"));
    for name in ["web", "archive", "social", "tiny"] {
        assert!(stdout.contains(name), "{}", stdout);
    }
}

#[test]
fn test_compile_prints_tokens() {
    let dir = TempDir::new().unwrap();
    let stdout = stdout_of(clipbridge(&dir).args([
        "compile", "--synthetic", "-i", "talk.mp4", "--start", "2", "--end", "00:05", "--tokens",
    ]));

    assert!(stdout.contains("-ss 2.000 -t 3.000"), "{}", stdout);
    assert!(stdout.contains("-c:v libx264"), "{}", stdout);
}

#[test]
fn test_parse_reads_container_from_output_name() {
    let dir = TempDir::new().unwrap();
    let stdout = stdout_of(clipbridge(&dir).args([
        "parse", "-o", "clip.webm", "--", "-c:v", "libvpx-vp9", "-crf", "31", "-future", "x",
    ]));

    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["container"], "webm");
    assert_eq!(parsed["video"]["codec"], "libvpx-vp9");
    assert_eq!(parsed["video"]["crf"], 31);
    assert_eq!(parsed["ignored"], serde_json::json!(["-future", "x"]));
}

#[test]
fn test_check_reports_track_decisions() {
    let dir = TempDir::new().unwrap();
    let media = SourceMedia::new(
        "interview.mov",
        30.0,
        vec![
            StreamDescriptor::video(0, "h264", 1920, 1080, 25.0),
            StreamDescriptor::audio(1, "aac", 48000, 2),
            StreamDescriptor::other(2, "bin_data"),
        ],
    );
    let streams = dir.path().join("streams.json");
    std::fs::write(&streams, serde_json::to_string(&media).unwrap()).unwrap();

    let stdout = stdout_of(clipbridge(&dir).args(["check", "--synthetic", "--json", "--streams"]).arg(&streams));

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["output"]["file_name"], "interview_export.mp4");
    assert_eq!(report["tracks"][0]["keep"], true);
    assert_eq!(report["tracks"][2]["keep"], false);
    assert_eq!(report["issues"], serde_json::json!([]));
}

#[test]
fn test_export_writes_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.mkv");

    clipbridge(&dir)
        .args(["export", "--synthetic", "-i", "talk.mp4", "--end", "1", "--container", "mkv", "-o"])
        .arg(&output)
        .assert()
        .success();

    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"CBSYN1mkv"));

    // A second run refuses to overwrite
    clipbridge(&dir)
        .args(["export", "--synthetic", "-i", "talk.mp4", "--end", "1", "--container", "mkv", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_out_of_range_crf_is_rejected() {
    let dir = TempDir::new().unwrap();
    clipbridge(&dir)
        .args(["compile", "--synthetic", "-i", "talk.mp4", "--crf", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--crf"));
}

#[test]
fn test_export_gif() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("loop.gif");

    clipbridge(&dir)
        .args([
            "export", "--synthetic", "-i", "talk.mp4", "--end", "1", "--container", "gif", "--gif-fps", "5", "-o",
        ])
        .arg(&output)
        .assert()
        .success();

    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
}

#[test]
fn test_out_of_range_gif_speed_is_rejected() {
    let dir = TempDir::new().unwrap();
    clipbridge(&dir)
        .args(["compile", "--synthetic", "-i", "talk.mp4", "--container", "gif", "--gif-speed", "31"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--gif-speed"));
}
