//! In-memory media engine for tests
//!
//! [`ScriptedEngine`] records every pipeline it builds and every command
//! issued to them. State changes settle immediately and emit the matching
//! [`PipelineEvent`]s; tests can inject further events with
//! [`ScriptedPipeline::emit`] and script failures per build index.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::engine::{
    EventReceiver, MediaEngine, MediaPipeline, PipelineDescription, PipelineEvent, PipelineState,
    SeekRequest,
};
use crate::error::EngineError;

/// A command observed by a [`ScriptedPipeline`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetState(PipelineState),
    Seek(SeekRequest),
    Eos,
    Detach,
}

#[derive(Default)]
struct Script {
    pipelines: Vec<Arc<ScriptedPipeline>>,
    failed_builds: usize,
    fail_builds: HashSet<usize>,
    stall_playing: HashSet<usize>,
    stall_null: HashSet<usize>,
    fail_subscribe: HashSet<usize>,
    reject_seeks: bool,
    hold_eos: bool,
}

/// Scripted engine. Clones share the same script and history.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build attempt `index` (0-based, counting failures) returns an error
    pub fn fail_build(&self, index: usize) -> &Self {
        lock(&self.script).fail_builds.insert(index);
        self
    }

    /// Pipeline from build attempt `index` never reaches PLAYING
    pub fn stall_playing(&self, index: usize) -> &Self {
        lock(&self.script).stall_playing.insert(index);
        self
    }

    /// Pipeline from build attempt `index` never reaches NULL
    pub fn stall_null(&self, index: usize) -> &Self {
        lock(&self.script).stall_null.insert(index);
        self
    }

    /// Pipeline from build attempt `index` has no event stream to hand out
    pub fn fail_subscribe(&self, index: usize) -> &Self {
        lock(&self.script).fail_subscribe.insert(index);
        self
    }

    /// Every seek is rejected by the engine
    pub fn reject_seeks(&self) -> &Self {
        lock(&self.script).reject_seeks = true;
        self
    }

    /// Injected EOS is recorded but never comes back out of the pipeline;
    /// tests deliver it with [`ScriptedPipeline::emit`]
    pub fn hold_eos(&self) -> &Self {
        lock(&self.script).hold_eos = true;
        self
    }

    /// Successfully built pipelines, in build order
    pub fn pipelines(&self) -> Vec<Arc<ScriptedPipeline>> {
        lock(&self.script).pipelines.clone()
    }

    pub fn last_pipeline(&self) -> Option<Arc<ScriptedPipeline>> {
        lock(&self.script).pipelines.last().cloned()
    }

    /// Number of build attempts, successful or not
    pub fn build_attempts(&self) -> usize {
        let script = lock(&self.script);
        script.pipelines.len() + script.failed_builds
    }
}

impl MediaEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn build(
        &self,
        description: &PipelineDescription,
    ) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        let mut script = lock(&self.script);
        let index = script.pipelines.len() + script.failed_builds;

        if script.fail_builds.contains(&index) {
            script.failed_builds += 1;
            return Err(EngineError::Build(format!("scripted failure for build {}", index)));
        }

        let pipeline = Arc::new(ScriptedPipeline::new(
            description.clone(),
            script.stall_playing.contains(&index),
            script.stall_null.contains(&index),
            script.reject_seeks,
            script.hold_eos,
        ));
        if script.fail_subscribe.contains(&index) {
            lock(&pipeline.events_rx).take();
        }
        script.pipelines.push(Arc::clone(&pipeline));

        Ok(pipeline)
    }
}

/// Pipeline produced by [`ScriptedEngine`]
pub struct ScriptedPipeline {
    description: PipelineDescription,
    commands: Mutex<Vec<Command>>,
    state: watch::Sender<PipelineState>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<PipelineEvent>>>,
    events_rx: Mutex<Option<EventReceiver>>,
    stall_playing: bool,
    stall_null: bool,
    reject_seeks: bool,
    hold_eos: bool,
}

impl ScriptedPipeline {
    fn new(
        description: PipelineDescription,
        stall_playing: bool,
        stall_null: bool,
        reject_seeks: bool,
        hold_eos: bool,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(PipelineState::Null);

        Self {
            description,
            commands: Mutex::new(Vec::new()),
            state,
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            stall_playing,
            stall_null,
            reject_seeks,
            hold_eos,
        }
    }

    /// Deliver an event to the subscriber, as if the engine raised it.
    /// Dropped once the pipeline is detached.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = lock(&self.events_tx).as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        lock(&self.commands).clone()
    }

    pub fn seeks(&self) -> Vec<SeekRequest> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Seek(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn eos_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| matches!(c, Command::Eos))
            .count()
    }

    pub fn is_detached(&self) -> bool {
        lock(&self.events_tx).is_none()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn record(&self, command: Command) {
        lock(&self.commands).push(command);
    }

    fn transition(&self, current: PipelineState) {
        let old = self.state.send_replace(current);
        if old != current {
            self.emit(PipelineEvent::StateChanged { old, current });
        }
    }
}

#[async_trait]
impl MediaPipeline for ScriptedPipeline {
    fn description(&self) -> &PipelineDescription {
        &self.description
    }

    fn set_state(&self, target: PipelineState) -> Result<(), EngineError> {
        self.record(Command::SetState(target));

        match target {
            PipelineState::Playing => {
                if self.stall_playing {
                    return Ok(());
                }
                if self.state() == PipelineState::Null {
                    self.transition(PipelineState::Paused);
                    self.emit(PipelineEvent::Prepared);
                }
                self.transition(PipelineState::Playing);
            }
            PipelineState::Null if self.stall_null => {}
            other => self.transition(other),
        }

        Ok(())
    }

    async fn wait_for_state(
        &self,
        target: PipelineState,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let mut rx = self.state.subscribe();
        let reached = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| *s == target).await.is_ok()
        })
        .await;

        match reached {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::StateChange {
                target: target.to_string(),
                reason: "pipeline dropped".to_string(),
            }),
            Err(_) => Err(EngineError::Timeout {
                target: target.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn seek(&self, request: &SeekRequest) -> Result<(), EngineError> {
        self.record(Command::Seek(*request));
        if self.reject_seeks {
            return Err(EngineError::SeekRejected("scripted rejection".to_string()));
        }
        Ok(())
    }

    fn send_eos(&self) -> Result<(), EngineError> {
        self.record(Command::Eos);
        if !self.hold_eos {
            self.emit(PipelineEvent::Eos);
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<EventReceiver, EngineError> {
        lock(&self.events_rx)
            .take()
            .ok_or(EngineError::EventsUnavailable)
    }

    fn detach(&self) {
        self.record(Command::Detach);
        lock(&self.events_tx).take();
    }
}
