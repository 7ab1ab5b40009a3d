//! Start-timeout watchdog for one export
//!
//! The watchdog is a plain state machine; the session owns the timer and
//! calls [`Watchdog::expire`] when the deadline passes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::planner::CompiledPlan;

/// State captured when a job is force-cancelled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticSnapshot {
    pub job_id: u64,
    pub captured_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,
    pub started: bool,
    pub last_fraction: f64,
    pub frames: Option<u64>,
    pub output_name: String,
    pub directives: Vec<String>,
    /// Source track indices the plan maps
    pub tracks: Vec<usize>,
}

/// What an expired deadline means for the job
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogVerdict {
    /// Never started and never progressed: cancel it
    HardCancel(DiagnosticSnapshot),
    /// Started but no progress yet; keep waiting
    StallWarning,
    /// Making progress
    Healthy,
}

#[derive(Debug)]
pub struct Watchdog {
    job_id: u64,
    timeout: Duration,
    armed_at: Instant,
    started: bool,
    last_fraction: f64,
    frames: Option<u64>,
    fired: bool,
    cleared: bool,
    output_name: String,
    directives: Vec<String>,
    tracks: Vec<usize>,
}

impl Watchdog {
    /// Arm a watchdog for a job that was just submitted
    pub fn arm(job_id: u64, timeout: Duration, plan: &CompiledPlan) -> Self {
        let output = &plan.output;
        let mut tracks = vec![output.video_stream];
        tracks.extend(&output.audio_streams);
        tracks.extend(&output.subtitle_streams);

        Self {
            job_id,
            timeout,
            armed_at: Instant::now(),
            started: false,
            last_fraction: 0.0,
            frames: None,
            fired: false,
            cleared: false,
            output_name: output.file_name.clone(),
            directives: plan.tokens(),
            tracks,
        }
    }

    /// When the timer should fire; `None` once fired or cleared
    pub fn deadline(&self) -> Option<Instant> {
        (!self.fired && !self.cleared).then(|| self.armed_at + self.timeout)
    }

    pub fn observe_started(&mut self) {
        self.started = true;
    }

    pub fn observe_progress(&mut self, fraction: f64, frames: Option<u64>) {
        if fraction.is_finite() && fraction > self.last_fraction {
            self.last_fraction = fraction;
        }
        if frames.is_some() {
            self.frames = frames;
        }
    }

    /// Disarm on any terminal path
    pub fn clear(&mut self) {
        self.cleared = true;
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Evaluate the deadline; yields a verdict at most once per job
    pub fn expire(&mut self) -> Option<WatchdogVerdict> {
        if self.fired || self.cleared {
            return None;
        }
        self.fired = true;

        let verdict = if !self.started && self.last_fraction <= 0.0 {
            let snapshot = self.snapshot();
            error!(
                "Job {} did not start within {} ms; cancelling. Diagnostics: {}",
                self.job_id,
                snapshot.timeout_ms,
                serde_json::to_string(&snapshot).unwrap_or_else(|_| format!("{:?}", snapshot))
            );
            WatchdogVerdict::HardCancel(snapshot)
        } else if self.last_fraction <= 0.0 {
            warn!(
                "Job {} started but has made no progress after {} ms",
                self.job_id,
                self.timeout.as_millis()
            );
            WatchdogVerdict::StallWarning
        } else {
            WatchdogVerdict::Healthy
        };
        Some(verdict)
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            job_id: self.job_id,
            captured_at: Utc::now(),
            elapsed_ms: self.armed_at.elapsed().as_millis() as u64,
            timeout_ms: self.timeout.as_millis() as u64,
            started: self.started,
            last_fraction: self.last_fraction,
            frames: self.frames,
            output_name: self.output_name.clone(),
            directives: self.directives.clone(),
            tracks: self.tracks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ExportSettings, SourceMedia, StreamDescriptor};
    use crate::planner::PlanCompiler;

    fn plan() -> CompiledPlan {
        let source = SourceMedia::new(
            "clip.mp4",
            10.0,
            vec![
                StreamDescriptor::video(0, "h264", 1280, 720, 25.0),
                StreamDescriptor::audio(1, "aac", 48_000, 2),
            ],
        );
        PlanCompiler::new()
            .compile(&ExportSettings::for_duration(10.0), &source)
            .unwrap()
    }

    #[test]
    fn test_hard_cancel_when_nothing_happened() {
        let mut dog = Watchdog::arm(3, Duration::from_millis(50), &plan());
        assert!(dog.deadline().is_some());

        match dog.expire() {
            Some(WatchdogVerdict::HardCancel(snapshot)) => {
                assert_eq!(snapshot.job_id, 3);
                assert!(!snapshot.started);
                assert_eq!(snapshot.timeout_ms, 50);
                assert_eq!(snapshot.tracks[0], 0);
                assert!(!snapshot.directives.is_empty());
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_fires_once() {
        let mut dog = Watchdog::arm(1, Duration::from_millis(10), &plan());
        assert!(dog.expire().is_some());
        assert!(dog.has_fired());
        assert!(dog.expire().is_none());
        assert!(dog.deadline().is_none());
    }

    #[test]
    fn test_started_without_progress_only_warns() {
        let mut dog = Watchdog::arm(1, Duration::from_millis(10), &plan());
        dog.observe_started();
        assert_eq!(dog.expire(), Some(WatchdogVerdict::StallWarning));
    }

    #[test]
    fn test_positive_progress_counts_as_alive() {
        let mut dog = Watchdog::arm(1, Duration::from_millis(10), &plan());
        dog.observe_progress(0.0, None);
        dog.observe_progress(0.2, Some(12));
        assert_eq!(dog.expire(), Some(WatchdogVerdict::Healthy));
        assert_eq!(dog.snapshot().frames, Some(12));
    }

    #[test]
    fn test_cleared_never_fires() {
        let mut dog = Watchdog::arm(1, Duration::ZERO, &plan());
        dog.clear();
        assert!(dog.deadline().is_none());
        assert!(dog.expire().is_none());
    }
}
