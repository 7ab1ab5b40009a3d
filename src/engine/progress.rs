//! Progress tracking for a running conversion

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ports::{ProgressSample, ProgressSink};

/// Receives tracked progress; implemented by whoever relays it
pub trait ProgressCallback: Send + Sync {
    /// Called once when the backend starts decoding
    fn on_started(&self);

    /// Called for each accepted progress update
    fn on_progress(&self, update: &ProgressUpdate);

    /// Check if the job should be cancelled
    fn should_cancel(&self) -> bool;
}

/// Progress as presented to the client
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Completed share in [0, 1], never decreasing
    pub fraction: f64,
    /// Estimated output position in seconds
    pub media_time: f64,
    pub frames: Option<u64>,
    /// Frames per wall-clock second
    pub fps: Option<f64>,
    /// Media seconds per wall-clock second
    pub speed: Option<f64>,
}

/// Thread-safe tracker turning raw backend samples into client updates
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<ProgressTrackerInner>>,
    callbacks: Arc<Mutex<Vec<Arc<dyn ProgressCallback>>>>,
}

struct ProgressTrackerInner {
    latest: ProgressUpdate,
    expected_duration: f64,
    start_time: Instant,
    last_emit: Option<Instant>,
    update_interval: Duration,
    started: bool,
    cancelled: bool,
}

impl ProgressTracker {
    /// Create a tracker for a clip of the expected duration in seconds
    pub fn new(expected_duration: f64) -> Self {
        let expected_duration = if expected_duration.is_finite() && expected_duration > 0.0 {
            expected_duration
        } else {
            0.0
        };

        let inner = ProgressTrackerInner {
            latest: ProgressUpdate::default(),
            expected_duration,
            start_time: Instant::now(),
            last_emit: None,
            update_interval: Duration::from_millis(100), // Update at most 10 times per second
            started: false,
            cancelled: false,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a progress callback
    pub fn add_callback(&self, callback: Arc<dyn ProgressCallback>) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// Set the minimum spacing between forwarded updates
    pub fn set_update_interval(&self, interval: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.update_interval = interval;
        }
    }

    /// Cancel the tracked job
    pub fn cancel(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.cancelled = true;
        }
    }

    /// Latest accepted update
    pub fn snapshot(&self) -> ProgressUpdate {
        self.inner
            .lock()
            .map(|inner| inner.latest)
            .unwrap_or_default()
    }

    pub fn has_started(&self) -> bool {
        self.inner.lock().map(|inner| inner.started).unwrap_or(false)
    }

    /// Fold a sample into the tracked state; returns the update to forward, if any
    fn accept(&self, sample: ProgressSample) -> Option<ProgressUpdate> {
        let mut inner = self.inner.lock().ok()?;

        let fraction = if sample.fraction.is_finite() {
            sample.fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        // Never move backwards
        let fraction = fraction.max(inner.latest.fraction);

        let now = Instant::now();
        let elapsed = now.duration_since(inner.start_time).as_secs_f64();
        let media_time = fraction * inner.expected_duration;
        let frames = sample.frames.or(inner.latest.frames);

        let (fps, speed) = if elapsed > 0.0 {
            (
                frames.map(|f| f as f64 / elapsed),
                (inner.expected_duration > 0.0).then(|| media_time / elapsed),
            )
        } else {
            (None, None)
        };

        inner.latest = ProgressUpdate {
            fraction,
            media_time,
            frames,
            fps,
            speed,
        };

        let due = match inner.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= inner.update_interval,
        };
        if due || fraction >= 1.0 {
            inner.last_emit = Some(now);
            Some(inner.latest)
        } else {
            None
        }
    }

    /// Notify all callbacks
    fn notify_callbacks<F>(&self, f: F)
    where
        F: Fn(&dyn ProgressCallback),
    {
        if let Ok(callbacks) = self.callbacks.lock() {
            for callback in callbacks.iter() {
                f(callback.as_ref());
            }
        }
    }
}

impl ProgressSink for ProgressTracker {
    fn started(&self) {
        let first = match self.inner.lock() {
            Ok(mut inner) => {
                let first = !inner.started;
                inner.started = true;
                first
            }
            Err(_) => false,
        };
        if first {
            self.notify_callbacks(|cb| cb.on_started());
        }
    }

    fn report(&self, sample: ProgressSample) {
        if let Some(update) = self.accept(sample) {
            self.notify_callbacks(|cb| cb.on_progress(&update));
        }
    }

    fn is_cancelled(&self) -> bool {
        if let Ok(inner) = self.inner.lock() {
            if inner.cancelled {
                return true;
            }
        }

        // Check callbacks for cancellation
        if let Ok(callbacks) = self.callbacks.lock() {
            for callback in callbacks.iter() {
                if callback.should_cancel() {
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        started: AtomicUsize,
        updates: Mutex<Vec<ProgressUpdate>>,
        cancel: AtomicBool,
    }

    impl ProgressCallback for Recorder {
        fn on_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_progress(&self, update: &ProgressUpdate) {
            self.updates.lock().unwrap().push(*update);
        }

        fn should_cancel(&self) -> bool {
            self.cancel.load(Ordering::SeqCst)
        }
    }

    fn tracker_with_recorder(duration: f64) -> (ProgressTracker, Arc<Recorder>) {
        let tracker = ProgressTracker::new(duration);
        tracker.set_update_interval(Duration::ZERO);
        let recorder = Arc::new(Recorder::default());
        tracker.add_callback(recorder.clone());
        (tracker, recorder)
    }

    #[test]
    fn test_fraction_is_clamped_and_monotonic() {
        let (tracker, recorder) = tracker_with_recorder(10.0);
        for fraction in [0.2, 0.1, 1.7, -3.0] {
            tracker.report(ProgressSample {
                fraction,
                frames: None,
            });
        }

        let fractions: Vec<f64> = recorder
            .updates
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.fraction)
            .collect();
        assert_eq!(fractions, vec![0.2, 0.2, 1.0, 1.0]);
    }

    #[test]
    fn test_media_time_derives_from_fraction() {
        let (tracker, _) = tracker_with_recorder(8.0);
        tracker.report(ProgressSample {
            fraction: 0.25,
            frames: Some(50),
        });
        let update = tracker.snapshot();
        assert_eq!(update.media_time, 2.0);
        assert_eq!(update.frames, Some(50));
    }

    #[test]
    fn test_started_notifies_once() {
        let (tracker, recorder) = tracker_with_recorder(1.0);
        tracker.started();
        tracker.started();
        assert!(tracker.has_started());
        assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_throttles_but_always_emits_completion() {
        let tracker = ProgressTracker::new(4.0);
        tracker.set_update_interval(Duration::from_secs(60));
        let recorder = Arc::new(Recorder::default());
        tracker.add_callback(recorder.clone());

        for fraction in [0.1, 0.2, 0.3, 1.0] {
            tracker.report(ProgressSample {
                fraction,
                frames: None,
            });
        }
        let updates = recorder.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].fraction, 1.0);
    }

    #[test]
    fn test_cancellation_sources() {
        let (tracker, recorder) = tracker_with_recorder(1.0);
        assert!(!tracker.is_cancelled());
        recorder.cancel.store(true, Ordering::SeqCst);
        assert!(tracker.is_cancelled());

        let other = ProgressTracker::new(1.0);
        other.cancel();
        assert!(other.is_cancelled());
    }
}
