use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::stats::{SessionState, SessionStats};
use crate::engine::{
    description, EventReceiver, MediaEngine, MediaPipeline, PipelineEvent, PipelineState,
};
use crate::error::{is_transport_message, CamvaultError, EngineError, Result};
use crate::naming::{Segment, SegmentNaming, StreamKind};

/// A continuously rotating recording of one camera stream
pub struct RecordingSession {
    inner: Arc<Inner>,

    /// Cancellation token and handle of the recording task
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the session handle and its recording task
struct Inner {
    config: SessionConfig,
    engine: Arc<dyn MediaEngine>,
    naming: SegmentNaming,
    is_running: AtomicBool,
    status: Mutex<Status>,
}

#[derive(Default)]
struct Status {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    current_segment: Option<Segment>,
    next_rotation_at: Option<DateTime<Utc>>,
    /// `captured_at` of the most recent segment, kept across restarts
    last_captured_at: Option<i64>,
    segments_started: usize,
    rotations: usize,
    transport_errors: usize,
    pipeline_errors: usize,
    rotation_failures: usize,
    last_error: Option<String>,
}

/// The capture pipeline currently writing a segment
struct ActiveSegment {
    pipeline: Arc<dyn MediaPipeline>,
    events: EventReceiver,
    segment: Segment,
}

enum Wake {
    Stop,
    Rotate,
}

impl RecordingSession {
    pub fn new(config: SessionConfig, engine: Arc<dyn MediaEngine>, naming: SegmentNaming) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                engine,
                naming,
                is_running: AtomicBool::new(false),
                status: Mutex::new(Status::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.inner.config.camera_id
    }

    pub fn stream_kind(&self) -> StreamKind {
        self.inner.config.stream_kind
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// Open the first segment and spawn the recording task.
    ///
    /// Fails if the capture pipeline cannot be built or does not reach
    /// PLAYING within the start timeout; the session is then back in `Idle`
    /// and may be started again.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;

        if self.is_running() {
            warn!(
                camera = %self.camera_id(),
                stream = %self.stream_kind(),
                "Recording already started"
            );
            return Ok(());
        }

        // A previous run that ended on its own still has a finished handle
        if let Some(old) = worker.take() {
            old.cancel.cancel();
            let _ = old.handle.await;
        }

        info!(
            camera = %self.camera_id(),
            stream = %self.stream_kind(),
            "Starting recording session"
        );
        self.inner.set_state(SessionState::Starting).await;

        let previous = self.inner.status.lock().await.last_captured_at;
        let active = match self.inner.open_segment(previous).await {
            Ok(active) => active,
            Err(e) => {
                error!(
                    camera = %self.camera_id(),
                    stream = %self.stream_kind(),
                    "Failed to start recording: {}", e
                );
                let mut status = self.inner.status.lock().await;
                status.state = SessionState::Idle;
                status.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        {
            let mut status = self.inner.status.lock().await;
            status.state = SessionState::Recording;
            status.started_at = Some(Utc::now());
        }
        self.inner.is_running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&self.inner), active, cancel.clone()));
        *worker = Some(Worker { cancel, handle });

        Ok(())
    }

    /// Stop recording and wait for the recording task to release its
    /// pipeline. Idempotent.
    pub async fn stop(&self) -> SessionStats {
        {
            let mut worker = self.worker.lock().await;
            match worker.take() {
                Some(worker) => {
                    info!(
                        camera = %self.camera_id(),
                        stream = %self.stream_kind(),
                        "Stopping recording session"
                    );
                    worker.cancel.cancel();
                    if let Err(e) = worker.handle.await {
                        error!("Recording task panicked: {}", e);
                    }
                }
                None => debug!(
                    camera = %self.camera_id(),
                    stream = %self.stream_kind(),
                    "Recording not active"
                ),
            }
        }

        self.inner.finish().await;
        self.get_stats().await
    }

    /// Get current session statistics
    pub async fn get_stats(&self) -> SessionStats {
        let status = self.inner.status.lock().await;
        let duration_secs = status
            .started_at
            .filter(|_| self.is_running())
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            camera_id: self.inner.config.camera_id.clone(),
            stream_kind: self.inner.config.stream_kind,
            state: status.state,
            is_running: self.is_running(),
            started_at: status.started_at,
            duration_secs,
            current_segment: status.current_segment.clone(),
            next_rotation_at: status.next_rotation_at,
            segments_started: status.segments_started,
            rotations: status.rotations,
            transport_errors: status.transport_errors,
            pipeline_errors: status.pipeline_errors,
            rotation_failures: status.rotation_failures,
            last_error: status.last_error.clone(),
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

impl Inner {
    async fn set_state(&self, state: SessionState) {
        self.status.lock().await.state = state;
    }

    /// Mark the session stopped
    async fn finish(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        let mut status = self.status.lock().await;
        status.state = SessionState::Idle;
        status.current_segment = None;
        status.next_rotation_at = None;
    }

    /// Abandon the session after a failed rotation
    async fn give_up(&self, err: CamvaultError) {
        error!("{}; session stopped", err);
        self.finish().await;
        let mut status = self.status.lock().await;
        status.rotation_failures += 1;
        status.last_error = Some(err.to_string());
    }

    fn rotation_failure(&self, reason: String) -> CamvaultError {
        CamvaultError::RotationFailure {
            camera: self.config.camera_id.clone(),
            stream: self.config.stream_kind,
            reason,
        }
    }

    /// Build a capture pipeline for a new segment and bring it to PLAYING
    async fn open_segment(&self, previous: Option<i64>) -> Result<ActiveSegment> {
        let camera = &self.config.camera_id;
        let kind = self.config.stream_kind;

        let now = Utc::now();
        let captured_at = match previous {
            Some(prev) if now.timestamp() <= prev => prev + 1,
            _ => now.timestamp(),
        };
        let time = Utc.timestamp_opt(captured_at, 0).single().unwrap_or(now);
        let path = self.naming.path_for(camera, kind, &time);

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CamvaultError::io(dir, e))?;
        }

        let description = description::capture(
            &self.config.url,
            self.config.codec,
            self.config.settings.container,
            &path,
        );
        let pipeline = self.engine.build(&description).map_err(|e| {
            CamvaultError::Configuration(format!("capture pipeline for {}/{}: {}", camera, kind, e))
        })?;
        let events = match pipeline.subscribe() {
            Ok(events) => events,
            Err(e) => {
                pipeline.detach();
                let _ = pipeline.set_state(PipelineState::Null);
                return Err(e.into());
            }
        };

        if let Err(e) = self.bring_up(pipeline.as_ref()).await {
            pipeline.detach();
            let _ = pipeline.set_state(PipelineState::Null);
            return Err(self.rotation_failure(e.to_string()));
        }

        let segment = Segment {
            camera_id: camera.clone(),
            stream_kind: kind,
            captured_at,
            path,
        };
        info!(camera = %camera, stream = %kind, path = ?segment.path, "Recording segment");

        {
            let mut status = self.status.lock().await;
            status.current_segment = Some(segment.clone());
            status.last_captured_at = Some(captured_at);
            status.segments_started += 1;
        }

        Ok(ActiveSegment {
            pipeline,
            events,
            segment,
        })
    }

    async fn bring_up(&self, pipeline: &dyn MediaPipeline) -> std::result::Result<(), EngineError> {
        pipeline.set_state(PipelineState::Playing)?;
        pipeline
            .wait_for_state(PipelineState::Playing, self.config.settings.start_timeout)
            .await
    }

    /// Detach events, then drive the pipeline to NULL within the stop timeout
    async fn close_segment(&self, active: ActiveSegment) -> std::result::Result<(), EngineError> {
        let ActiveSegment {
            pipeline,
            events,
            segment,
        } = active;

        pipeline.detach();
        drop(events);

        pipeline.set_state(PipelineState::Null)?;
        pipeline
            .wait_for_state(PipelineState::Null, self.config.settings.stop_timeout)
            .await?;

        debug!(path = ?segment.path, "Segment closed");
        Ok(())
    }

    /// Open the next segment, retrying with exponential backoff.
    ///
    /// Returns `None` if cancelled while waiting between attempts.
    async fn reopen(
        &self,
        previous: i64,
        cancel: &CancellationToken,
    ) -> Option<Result<ActiveSegment>> {
        let settings = &self.config.settings;
        let mut attempt = 0;

        loop {
            match self.open_segment(Some(previous)).await {
                Ok(active) => return Some(Ok(active)),
                Err(e) if attempt < settings.rotation_retries => {
                    let delay = settings.backoff_for(attempt);
                    warn!(
                        camera = %self.config.camera_id,
                        stream = %self.config.stream_kind,
                        "Rotation attempt {} failed: {}; retrying in {}ms",
                        attempt + 1,
                        e,
                        delay.as_millis()
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let reason = match e {
                        CamvaultError::RotationFailure { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    return Some(Err(self.rotation_failure(format!(
                        "gave up after {} attempts: {}",
                        attempt + 1,
                        reason
                    ))));
                }
            }
        }
    }

    async fn on_event(&self, event: PipelineEvent) {
        let camera = &self.config.camera_id;
        let kind = self.config.stream_kind;

        match event {
            PipelineEvent::Error { message, debug: details } => {
                let mut status = self.status.lock().await;
                if is_transport_message(&message) {
                    let err = CamvaultError::Transport {
                        camera: camera.clone(),
                        stream: kind,
                        message: message.clone(),
                    };
                    warn!("{}; reconnecting at next rotation", err);
                    status.transport_errors += 1;
                } else {
                    error!(
                        camera = %camera,
                        stream = %kind,
                        details = ?details,
                        "Capture pipeline error: {}", message
                    );
                    status.pipeline_errors += 1;
                }
                status.last_error = Some(message);
            }
            PipelineEvent::Warning { message } => {
                warn!(camera = %camera, stream = %kind, "Capture pipeline warning: {}", message);
            }
            PipelineEvent::Eos => {
                warn!(
                    camera = %camera,
                    stream = %kind,
                    "Capture pipeline reached end of stream, waiting for rotation"
                );
            }
            PipelineEvent::StateChanged { old, current } => {
                debug!(camera = %camera, stream = %kind, "Capture pipeline {} -> {}", old, current);
            }
            _ => {}
        }
    }
}

/// Recording task: consume pipeline events until the rotation deadline, then
/// replace the pipeline. Rotation is strictly sequential: the next segment
/// is opened only after the previous pipeline has reached NULL.
async fn run(inner: Arc<Inner>, mut active: ActiveSegment, cancel: CancellationToken) {
    let settings = inner.config.settings.clone();

    loop {
        let deadline = Instant::now() + settings.segment_duration;
        let next_rotation_at = chrono::Duration::from_std(settings.segment_duration)
            .ok()
            .map(|d| Utc::now() + d);
        inner.status.lock().await.next_rotation_at = next_rotation_at;

        match wait_for_rotation(&inner, &mut active.events, deadline, &cancel).await {
            Wake::Rotate => {}
            Wake::Stop => {
                inner.set_state(SessionState::Stopping).await;
                if let Err(e) = inner.close_segment(active).await {
                    warn!("Capture pipeline did not stop cleanly: {}", e);
                }
                inner.finish().await;
                return;
            }
        }

        debug!(
            camera = %inner.config.camera_id,
            stream = %inner.config.stream_kind,
            "Rotating segment"
        );
        inner.set_state(SessionState::RotatingOut).await;
        let previous = active.segment.captured_at;

        if let Err(e) = inner.close_segment(active).await {
            inner
                .give_up(inner.rotation_failure(format!("previous pipeline did not stop: {}", e)))
                .await;
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                inner.finish().await;
                return;
            }
            _ = sleep(settings.rotation_settle) => {}
        }

        match inner.reopen(previous, &cancel).await {
            Some(Ok(next)) => {
                active = next;
                let mut status = inner.status.lock().await;
                status.rotations += 1;
                status.state = SessionState::Recording;
            }
            Some(Err(e)) => {
                inner.give_up(e).await;
                return;
            }
            None => {
                inner.finish().await;
                return;
            }
        }
    }
}

async fn wait_for_rotation(
    inner: &Inner,
    events: &mut EventReceiver,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Wake {
    let mut events_open = true;
    let rotate = sleep_until(deadline);
    tokio::pin!(rotate);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Wake::Stop,
            _ = &mut rotate => return Wake::Rotate,
            event = events.recv(), if events_open => match event {
                Some(event) => inner.on_event(event).await,
                None => events_open = false,
            },
        }
    }
}
