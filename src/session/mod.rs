//! Client side of the execution boundary
//!
//! An [`ExportSession`] compiles settings into a directive sequence, hands it
//! to an execution context and waits for the outcome. It owns the watchdog,
//! the cancellation generation and the preview gate. The execution context
//! is replaced wholesale on cancellation or timeout.

pub mod preview;
pub mod watchdog;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::model::{ExportSettings, SourceMedia, SubtitleCue};
use crate::engine::progress::ProgressUpdate;
use crate::engine::worker::ExecutionContext;
use crate::error::{ExportError, ExportResult};
use crate::planner::{CompiledPlan, PlanCompiler, PlanWarning};
use crate::ports::MediaBackend;
use crate::protocol::messages::BUSY_MESSAGE;
use crate::protocol::{WorkerEvent, WorkerRequest};

pub use preview::PreviewGate;
pub use watchdog::{DiagnosticSnapshot, Watchdog, WatchdogVerdict};

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Time a job gets to report a start or positive progress
    pub start_timeout: Duration,
    /// Minimum spacing between progress events
    pub progress_interval: Duration,
    pub threads: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(100),
            threads: None,
        }
    }
}

/// Receives relayed job events while an export runs
pub trait ExportObserver: Send + Sync {
    fn on_started(&self, _job_id: u64) {}

    fn on_progress(&self, _job_id: u64, _progress: &ProgressUpdate) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ExportObserver for NoopObserver {}

/// Finished export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportArtifact {
    pub job_id: u64,
    pub file_name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub warnings: Vec<PlanWarning>,
}

/// Non-error terminal states of an export
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed(ExportArtifact),
    /// Cancellation is deliberate and not reported as an error
    Cancelled,
}

/// Cancels whatever export is current at the time of the call
#[derive(Clone)]
pub struct CancelHandle {
    generation: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Cancellation requested, generation now {}", generation);
        self.notify.notify_one();
    }
}

struct Link {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    worker: JoinHandle<()>,
    router: JoinHandle<()>,
}

impl Link {
    fn shutdown(&self) {
        self.router.abort();
        self.worker.abort();
    }
}

pub struct ExportSession {
    backend: Arc<dyn MediaBackend>,
    config: SessionConfig,
    compiler: PlanCompiler,
    generation: Arc<AtomicU64>,
    cancel_notify: Arc<Notify>,
    link: Mutex<Link>,
    job_events: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkerEvent>>,
    previews: Arc<PreviewGate<Vec<SubtitleCue>>>,
}

impl ExportSession {
    /// Must be called inside a tokio runtime
    pub fn new(backend: Arc<dyn MediaBackend>, config: SessionConfig) -> Self {
        let previews = Arc::new(PreviewGate::new());
        let (link, job_events) = connect(&backend, &config, &previews);

        Self {
            backend,
            compiler: PlanCompiler::new().with_threads(config.threads),
            config,
            generation: Arc::new(AtomicU64::new(0)),
            cancel_notify: Arc::new(Notify::new()),
            link: Mutex::new(link),
            job_events: tokio::sync::Mutex::new(job_events),
            previews,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            generation: Arc::clone(&self.generation),
            notify: Arc::clone(&self.cancel_notify),
        }
    }

    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Whether an export is waiting on the execution context
    pub fn is_exporting(&self) -> bool {
        self.job_events.try_lock().is_err()
    }

    pub fn compile(&self, settings: &ExportSettings, source: &SourceMedia) -> ExportResult<CompiledPlan> {
        self.compiler.compile(settings, source)
    }

    /// Compile and run one export
    pub async fn export(
        &self,
        input: &str,
        settings: &ExportSettings,
        source: &SourceMedia,
        observer: &dyn ExportObserver,
    ) -> ExportResult<ExportOutcome> {
        let plan = self.compile(settings, source)?;
        self.run_plan(input, &plan, observer).await
    }

    /// Send a compiled plan across the boundary and wait for its outcome
    pub async fn run_plan(
        &self,
        input: &str,
        plan: &CompiledPlan,
        observer: &dyn ExportObserver,
    ) -> ExportResult<ExportOutcome> {
        let mut events = self.job_events.try_lock().map_err(|_| ExportError::Busy)?;

        let job_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        while let Ok(stale) = events.try_recv() {
            debug!("Discarding stale event {:?}", stale.job_id());
        }

        self.send(WorkerRequest::Transcode {
            job_id,
            input: input.to_string(),
            directives: plan.tokens(),
            output_name: plan.output.file_name.clone(),
            expected_duration: Some(plan.expected_duration),
        })?;
        info!("Job {}: submitted {} -> {}", job_id, input, plan.output.file_name);

        let mut watchdog = Watchdog::arm(job_id, self.config.start_timeout, plan);

        loop {
            let deadline = watchdog.deadline();
            tokio::select! {
                _ = self.cancel_notify.notified() => {
                    if self.generation.load(Ordering::SeqCst) != job_id {
                        watchdog.clear();
                        self.respawn(&mut events);
                        info!("Job {}: cancelled", job_id);
                        return Ok(ExportOutcome::Cancelled);
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                    if let Some(WatchdogVerdict::HardCancel(_)) = watchdog.expire() {
                        // Supersede the hung job so nothing it emits is processed
                        self.generation.fetch_add(1, Ordering::SeqCst);
                        self.respawn(&mut events);
                        return Err(ExportError::Timeout {
                            timeout_ms: self.config.start_timeout.as_millis() as u64,
                        });
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        watchdog.clear();
                        self.respawn(&mut events);
                        return Err(ExportError::ContextClosed);
                    };
                    if event.job_id() != Some(job_id) {
                        debug!("Job {}: dropping event for job {:?}", job_id, event.job_id());
                        continue;
                    }
                    if self.generation.load(Ordering::SeqCst) != job_id {
                        // Cancelled; the notify branch finishes up
                        continue;
                    }

                    match event {
                        WorkerEvent::Started { .. } => {
                            watchdog.observe_started();
                            observer.on_started(job_id);
                        }
                        WorkerEvent::Progress { fraction, media_time, frames, fps, speed, .. } => {
                            watchdog.observe_progress(fraction, frames);
                            observer.on_progress(job_id, &ProgressUpdate { fraction, media_time, frames, fps, speed });
                        }
                        WorkerEvent::Done { output_name, mime_type, bytes, .. } => {
                            watchdog.clear();
                            info!("Job {}: completed {} ({} bytes)", job_id, output_name, bytes.len());
                            return Ok(ExportOutcome::Completed(ExportArtifact {
                                job_id,
                                file_name: output_name,
                                mime_type,
                                bytes,
                                warnings: plan.warnings.clone(),
                            }));
                        }
                        WorkerEvent::Error { message, issues, .. } => {
                            watchdog.clear();
                            warn!("Job {}: {}", job_id, message);
                            return Err(if message == BUSY_MESSAGE {
                                ExportError::Busy
                            } else if !issues.is_empty() {
                                ExportError::Validation { issues }
                            } else {
                                ExportError::Failed { message }
                            });
                        }
                        WorkerEvent::SubtitleCues { .. } | WorkerEvent::SubtitleError { .. } => {}
                    }
                }
            }
        }
    }

    /// Extract subtitle cues for previewing; a newer call supersedes this one
    pub async fn preview_subtitles(&self, input: &str, track: usize) -> ExportResult<Vec<SubtitleCue>> {
        let (request_id, reply) = self.previews.begin();
        self.send(WorkerRequest::ExtractSubtitles {
            request_id,
            input: input.to_string(),
            track,
        })?;
        reply.await.map_err(|_| ExportError::ContextClosed)?
    }

    fn send(&self, request: WorkerRequest) -> ExportResult<()> {
        let link = self.link.lock().map_err(|_| ExportError::ContextClosed)?;
        link.requests.send(request).map_err(|_| ExportError::ContextClosed)
    }

    /// Tear down the execution context and start a fresh one
    fn respawn(&self, events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        let (link, job_events) = connect(&self.backend, &self.config, &self.previews);
        if let Ok(mut current) = self.link.lock() {
            current.shutdown();
            *current = link;
        }
        *events = job_events;
        self.previews.abandon(ExportError::ContextClosed);
        info!("Execution context replaced");
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        if let Ok(link) = self.link.lock() {
            link.shutdown();
        }
    }
}

/// Spawn an execution context plus the task splitting its events
fn connect(
    backend: &Arc<dyn MediaBackend>,
    config: &SessionConfig,
    previews: &Arc<PreviewGate<Vec<SubtitleCue>>>,
) -> (Link, mpsc::UnboundedReceiver<WorkerEvent>) {
    let handle = ExecutionContext::new(Arc::clone(backend))
        .with_progress_interval(config.progress_interval)
        .spawn();
    let (requests, events, worker) = handle.into_parts();
    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let router = tokio::spawn(route(events, job_tx, Arc::clone(previews)));

    (
        Link {
            requests,
            worker,
            router,
        },
        job_rx,
    )
}

async fn route(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    jobs: mpsc::UnboundedSender<WorkerEvent>,
    previews: Arc<PreviewGate<Vec<SubtitleCue>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::SubtitleCues { request_id, cues } => {
                previews.complete(request_id, cues);
            }
            WorkerEvent::SubtitleError { request_id, message } => {
                previews.fail(request_id, ExportError::backend(message));
            }
            other => {
                if jobs.send(other).is_err() {
                    break;
                }
            }
        }
    }
}
