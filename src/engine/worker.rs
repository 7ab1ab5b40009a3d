//! Execution context: an isolated task reached only through messages
//!
//! The context owns the backend, the directive parser and the controller.
//! Callers see nothing but the request and event channels; the directive
//! tokens inside a `Transcode` request are the whole contract.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::engine::controller::ExecutionController;
use crate::engine::parser::DirectiveParser;
use crate::engine::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::error::{ExportError, ExportResult};
use crate::ports::MediaBackend;
use crate::protocol::messages::{mime_for_output, BUSY_MESSAGE};
use crate::protocol::{WorkerEvent, WorkerRequest};

/// Channels and task of a running execution context
pub struct ContextHandle {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl ContextHandle {
    /// Stop the request loop; a conversion already on the blocking pool
    /// stops at its next frame once the event receiver is gone
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<WorkerRequest>,
        mpsc::UnboundedReceiver<WorkerEvent>,
        JoinHandle<()>,
    ) {
        (self.requests, self.events, self.task)
    }
}

/// Message-driven wrapper around the execution controller
pub struct ExecutionContext {
    backend: Arc<dyn MediaBackend>,
    parser: DirectiveParser,
    progress_interval: Duration,
    busy: AtomicBool,
}

impl ExecutionContext {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            parser: DirectiveParser::new(),
            progress_interval: Duration::from_millis(100),
            busy: AtomicBool::new(false),
        }
    }

    /// Minimum spacing between progress events
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Start the request loop on the current runtime
    pub fn spawn(self) -> ContextHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let context = Arc::new(self);
        let task = tokio::spawn(context.run(request_rx, event_tx));

        ContextHandle {
            requests: request_tx,
            events: event_rx,
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        info!("Execution context started ({} backend)", self.backend.name());
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.dispatch(request, &events, &mut tasks),
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Execution task ended abnormally: {}", e);
                    }
                }
            }
        }

        // Let running work finish sending its terminal events
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Execution task ended abnormally: {}", e);
            }
        }
        info!("Execution context stopped");
    }

    fn dispatch(
        self: &Arc<Self>,
        request: WorkerRequest,
        events: &mpsc::UnboundedSender<WorkerEvent>,
        tasks: &mut JoinSet<()>,
    ) {
        match request {
            WorkerRequest::Transcode {
                job_id,
                input,
                directives,
                output_name,
                expected_duration,
            } => {
                if self.busy.swap(true, Ordering::SeqCst) {
                    warn!("Rejecting job {}: a conversion is already running", job_id);
                    let _ = events.send(WorkerEvent::Error {
                        job_id,
                        message: BUSY_MESSAGE.to_string(),
                        issues: Vec::new(),
                    });
                    return;
                }

                let context = Arc::clone(self);
                let events = events.clone();
                tasks.spawn(async move {
                    let result = context
                        .transcode(job_id, &input, &directives, &output_name, expected_duration, &events)
                        .await;
                    // Cleared before the terminal event so a follow-up job is accepted
                    context.busy.store(false, Ordering::SeqCst);

                    let event = match result {
                        Ok(bytes) => WorkerEvent::Done {
                            job_id,
                            mime_type: mime_for_output(&output_name).to_string(),
                            output_name,
                            bytes,
                        },
                        Err(e) => {
                            let issues = match &e {
                                ExportError::Validation { issues } => issues.clone(),
                                _ => Vec::new(),
                            };
                            WorkerEvent::Error {
                                job_id,
                                message: e.to_string(),
                                issues,
                            }
                        }
                    };
                    let _ = events.send(event);
                });
            }
            WorkerRequest::ExtractSubtitles {
                request_id,
                input,
                track,
            } => {
                let backend = Arc::clone(&self.backend);
                let events = events.clone();
                tasks.spawn(async move {
                    debug!("Extracting subtitle track {} of {} (request {})", track, input, request_id);
                    let event = match backend.extract_subtitles(&input, track).await {
                        Ok(cues) => WorkerEvent::SubtitleCues { request_id, cues },
                        Err(e) => WorkerEvent::SubtitleError {
                            request_id,
                            message: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                });
            }
        }
    }

    /// Probe, parse, prepare and run one job
    async fn transcode(
        &self,
        job_id: u64,
        input: &str,
        directives: &[String],
        output_name: &str,
        expected_duration: Option<f64>,
        events: &mpsc::UnboundedSender<WorkerEvent>,
    ) -> ExportResult<Vec<u8>> {
        let source = self.backend.probe(input).await?;
        let settings = self.parser.parse(directives, output_name);
        if !settings.ignored.is_empty() {
            debug!("Job {}: ignored tokens {:?}", job_id, settings.ignored);
        }

        let controller = ExecutionController::new(Arc::clone(&self.backend));
        let mut job = controller.prepare(job_id, input, output_name, settings, source, expected_duration)?;

        let tracker = ProgressTracker::new(job.expected_duration);
        tracker.set_update_interval(self.progress_interval);
        tracker.add_callback(Arc::new(EventRelay {
            job_id,
            events: events.clone(),
        }));

        tokio::task::spawn_blocking(move || controller.run(&mut job, &tracker))
            .await
            .map_err(|e| ExportError::Failed {
                message: format!("conversion task failed: {}", e),
            })?
    }
}

/// Turns tracker callbacks into boundary events
struct EventRelay {
    job_id: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl ProgressCallback for EventRelay {
    fn on_started(&self) {
        let _ = self.events.send(WorkerEvent::Started { job_id: self.job_id });
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        let _ = self.events.send(WorkerEvent::Progress {
            job_id: self.job_id,
            fraction: update.fraction,
            media_time: update.media_time,
            frames: update.frames,
            fps: update.fps,
            speed: update.speed,
            at: Utc::now(),
        });
    }

    fn should_cancel(&self) -> bool {
        // Nobody is listening once the context is torn down
        self.events.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::synthetic::{SyntheticBackend, SyntheticBehavior};

    fn transcode(job_id: u64, directives: &[&str]) -> WorkerRequest {
        WorkerRequest::Transcode {
            job_id,
            input: "clip.mkv".to_string(),
            directives: directives.iter().map(|s| s.to_string()).collect(),
            output_name: "clip_export.mkv".to_string(),
            expected_duration: None,
        }
    }

    async fn until_terminal(handle: &mut ContextHandle) -> Vec<WorkerEvent> {
        let mut seen = Vec::new();
        while let Some(event) = handle.events.recv().await {
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_transcode_emits_started_progress_done() {
        let mut handle = ExecutionContext::new(Arc::new(SyntheticBackend::new()))
            .with_progress_interval(Duration::ZERO)
            .spawn();
        handle
            .requests
            .send(transcode(1, &["-c:v", "copy", "-map", "0:v:0", "-map", "0:a?"]))
            .unwrap();

        let events = until_terminal(&mut handle).await;
        assert!(matches!(events.first(), Some(WorkerEvent::Started { job_id: 1 })));
        assert!(events.iter().any(|e| matches!(e, WorkerEvent::Progress { .. })));
        match events.last() {
            Some(WorkerEvent::Done {
                output_name,
                mime_type,
                bytes,
                ..
            }) => {
                assert_eq!(output_name, "clip_export.mkv");
                assert_eq!(mime_type, "video/x-matroska");
                assert!(!bytes.is_empty());
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_transcode_is_rejected_as_busy() {
        let backend = SyntheticBackend::new().with_behavior(SyntheticBehavior::StallAfterStart);
        let mut handle = ExecutionContext::new(Arc::new(backend)).spawn();
        handle.requests.send(transcode(1, &["-map", "0:v:0"])).unwrap();

        let started = handle.events.recv().await;
        assert!(matches!(started, Some(WorkerEvent::Started { job_id: 1 })));

        handle.requests.send(transcode(2, &["-map", "0:v:0"])).unwrap();
        match handle.events.recv().await {
            Some(WorkerEvent::Error { job_id, message, .. }) => {
                assert_eq!(job_id, 2);
                assert_eq!(message, BUSY_MESSAGE);
            }
            other => panic!("expected busy rejection, got {:?}", other),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn test_validation_failure_carries_issues() {
        let mut handle = ExecutionContext::new(Arc::new(SyntheticBackend::new())).spawn();
        handle
            .requests
            .send(transcode(4, &["-map", "0:v:0", "-map", "0:42"]))
            .unwrap();

        match until_terminal(&mut handle).await.pop() {
            Some(WorkerEvent::Error { issues, .. }) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].track, Some(42));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subtitle_extraction_reply() {
        let mut handle = ExecutionContext::new(Arc::new(SyntheticBackend::new())).spawn();
        handle
            .requests
            .send(WorkerRequest::ExtractSubtitles {
                request_id: 5,
                input: "clip.mkv".to_string(),
                track: 2,
            })
            .unwrap();

        match handle.events.recv().await {
            Some(WorkerEvent::SubtitleCues { request_id, cues }) => {
                assert_eq!(request_id, 5);
                assert_eq!(cues.len(), 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
