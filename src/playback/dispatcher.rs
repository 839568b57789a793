use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::request::PlaybackRequest;
use super::resolver::PlaybackPlan;
use super::seek::{CoordinatorState, Flow, PlaybackOutcome, SeekCoordinator};
use crate::engine::{EventReceiver, PipelineEvent};
use crate::error::{CamvaultError, Result};
use crate::naming::StreamKind;

pub type PlaybackId = Uuid;

/// Observable state of one playback
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    pub id: PlaybackId,
    pub camera_id: String,
    pub stream_kind: StreamKind,
    pub start_ts: i64,
    pub segments: usize,
    pub start_offset_secs: u64,
    pub duration_limit_secs: Option<u64>,
    pub state: CoordinatorState,
    pub seeks_issued: usize,
    pub outcome: Option<PlaybackOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PlaybackStatus {
    pub fn new(id: PlaybackId, request: &PlaybackRequest, plan: &PlaybackPlan) -> Self {
        Self {
            id,
            camera_id: request.camera_id.clone(),
            stream_kind: request.stream_kind,
            start_ts: request.start_ts,
            segments: plan.segments.len(),
            start_offset_secs: plan.start_offset.as_secs(),
            duration_limit_secs: plan.duration_limit.map(|d| d.as_secs()),
            state: CoordinatorState::Built,
            seeks_issued: 0,
            outcome: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Timing of the dispatch task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// How long a pipeline may take to drain an injected EOS before release
    pub eos_timeout: Duration,
    /// How long finished playbacks stay visible through `status` and `list`
    pub finished_retention: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            eos_timeout: Duration::from_secs(2),
            finished_retention: Duration::from_secs(600),
        }
    }
}

enum Command {
    Register {
        id: PlaybackId,
        coordinator: SeekCoordinator,
        events: EventReceiver,
    },
    Stop {
        id: PlaybackId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

type StatusTable = Arc<RwLock<HashMap<PlaybackId, PlaybackStatus>>>;

/// Shared event-processing context for every playback.
///
/// One task multiplexes the event streams of all registered pipelines and
/// feeds each event to the pipeline's [`SeekCoordinator`]. A pipeline that
/// was sent EOS stays registered until the EOS comes out of it, or until
/// [`DispatcherSettings::eos_timeout`] passes. Finished playbacks are
/// forgotten after [`DispatcherSettings::finished_retention`].
pub struct PlaybackDispatcher {
    commands: mpsc::UnboundedSender<Command>,
    statuses: StatusTable,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackDispatcher {
    /// Spawn the dispatch task on the current runtime
    pub fn spawn(settings: DispatcherSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let statuses: StatusTable = Arc::new(RwLock::new(HashMap::new()));
        let dispatch = Dispatch::new(Arc::clone(&statuses), settings);
        let handle = tokio::spawn(dispatch.run(rx));

        Self {
            commands: tx,
            statuses,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Start routing `events` to `coordinator`
    pub async fn register(
        &self,
        status: PlaybackStatus,
        coordinator: SeekCoordinator,
        events: EventReceiver,
    ) -> Result<()> {
        let id = status.id;
        self.statuses.write().await.insert(id, status);

        self.commands
            .send(Command::Register {
                id,
                coordinator,
                events,
            })
            .map_err(|_| CamvaultError::Task("playback dispatcher is not running".to_string()))
    }

    /// Stop a playback. Returns false if it is unknown or already finished.
    pub async fn stop(&self, id: PlaybackId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn status(&self, id: PlaybackId) -> Option<PlaybackStatus> {
        self.statuses.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<PlaybackStatus> {
        let mut all: Vec<PlaybackStatus> = self.statuses.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Release every pipeline and end the dispatch task
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Playback dispatcher panicked: {}", e);
            }
        }
    }
}

/// State owned by the dispatch task
struct Dispatch {
    statuses: StatusTable,
    settings: DispatcherSettings,
    streams: StreamMap<PlaybackId, UnboundedReceiverStream<PipelineEvent>>,
    coordinators: HashMap<PlaybackId, SeekCoordinator>,
    /// Release deadline of every pipeline draining an injected EOS
    draining: HashMap<PlaybackId, Instant>,
    /// Finished playbacks, oldest first
    finished: VecDeque<(Instant, PlaybackId)>,
}

impl Dispatch {
    fn new(statuses: StatusTable, settings: DispatcherSettings) -> Self {
        Self {
            statuses,
            settings,
            streams: StreamMap::new(),
            coordinators: HashMap::new(),
            draining: HashMap::new(),
            finished: VecDeque::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Playback dispatcher started");

        loop {
            let drain_deadline = self.draining.values().min().copied();
            let evict_at = self
                .finished
                .front()
                .map(|(at, _)| *at + self.settings.finished_retention);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Register { id, coordinator, events }) => {
                        self.streams.insert(id, UnboundedReceiverStream::new(events));
                        self.coordinators.insert(id, coordinator);
                    }
                    Some(Command::Stop { id, reply }) => {
                        let found = self.retire(id, PlaybackOutcome::Stopped).await;
                        if found {
                            info!(playback = %id, "Playback stopped");
                        }
                        let _ = reply.send(found);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some((id, event)) = self.streams.next(), if !self.streams.is_empty() => {
                    self.on_event(id, event).await;
                }
                _ = sleep_until(drain_deadline.unwrap_or_else(Instant::now)), if drain_deadline.is_some() => {
                    self.release_drained().await;
                }
                _ = sleep_until(evict_at.unwrap_or_else(Instant::now)), if evict_at.is_some() => {
                    self.evict_finished().await;
                }
            }
        }

        let remaining: Vec<PlaybackId> = self.coordinators.keys().copied().collect();
        for id in remaining {
            self.retire(id, PlaybackOutcome::Stopped).await;
        }

        debug!("Playback dispatcher stopped");
    }

    async fn on_event(&mut self, id: PlaybackId, event: PipelineEvent) {
        let Some(coordinator) = self.coordinators.get_mut(&id) else {
            self.streams.remove(&id);
            return;
        };

        let flow = coordinator.handle(event).await;
        let state = coordinator.state();
        let seeks = coordinator.seeks_issued();

        if let Some(status) = self.statuses.write().await.get_mut(&id) {
            status.state = state;
            status.seeks_issued = seeks;
        }

        match flow {
            Flow::Continue => {}
            Flow::Draining => {
                debug!(playback = %id, "Waiting for EOS to drain");
                self.draining
                    .insert(id, Instant::now() + self.settings.eos_timeout);
            }
            Flow::Finished(outcome) => {
                info!(playback = %id, "Playback finished: {:?}", outcome);
                self.retire(id, outcome).await;
            }
        }
    }

    /// Release pipelines whose EOS did not come out before the deadline
    async fn release_drained(&mut self) {
        let now = Instant::now();
        let expired: Vec<PlaybackId> = self
            .draining
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            warn!(
                playback = %id,
                "EOS not drained within {}ms, releasing pipeline",
                self.settings.eos_timeout.as_millis()
            );
            self.retire(id, PlaybackOutcome::Completed).await;
        }
    }

    async fn evict_finished(&mut self) {
        let now = Instant::now();
        let mut statuses = self.statuses.write().await;

        while let Some(&(at, id)) = self.finished.front() {
            if at + self.settings.finished_retention > now {
                break;
            }
            self.finished.pop_front();
            statuses.remove(&id);
            debug!(playback = %id, "Forgot finished playback");
        }
    }

    /// Release the pipeline of `id` and record how it ended.
    /// Returns false if `id` is not an active playback.
    async fn retire(&mut self, id: PlaybackId, outcome: PlaybackOutcome) -> bool {
        self.streams.remove(&id);
        self.draining.remove(&id);
        let Some(coordinator) = self.coordinators.remove(&id) else {
            return false;
        };
        coordinator.release();

        if let Some(status) = self.statuses.write().await.get_mut(&id) {
            status.outcome = Some(outcome);
            status.finished_at = Some(Utc::now());
        }
        self.finished.push_back((Instant::now(), id));
        true
    }
}
