//! Engine backed by `gst-launch-1.0` child processes
//!
//! Each pipeline is one child process. Its console output is translated into
//! [`PipelineEvent`]s. The launcher cannot reposition a running pipeline, so
//! seeks are rejected and playback continues from the start of the first
//! segment.
//!
//! The launcher runs with `-e`, which turns SIGINT into an end-of-stream so
//! muxers can finalize their files. Stopping a pipeline interrupts it first
//! and kills it only if it has not exited within the stop grace period.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{
    EventReceiver, MediaEngine, MediaPipeline, PipelineDescription, PipelineEvent, PipelineState,
    SeekRequest,
};
use crate::error::EngineError;

pub const DEFAULT_LAUNCH_BINARY: &str = "gst-launch-1.0";

/// How long an interrupted launcher may take to drain before it is killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(1500);

/// Runs every pipeline through the GStreamer command-line launcher
#[derive(Debug, Clone)]
pub struct LaunchEngine {
    binary: PathBuf,
    stop_grace: Duration,
}

impl LaunchEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }
}

impl Default for LaunchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LAUNCH_BINARY)
    }
}

impl MediaEngine for LaunchEngine {
    fn name(&self) -> &str {
        "gst-launch"
    }

    fn build(
        &self,
        description: &PipelineDescription,
    ) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        if description.launch_args().is_empty() {
            return Err(EngineError::Build("empty pipeline description".to_string()));
        }
        Ok(Arc::new(LaunchPipeline::new(
            self.binary.clone(),
            description.clone(),
            self.stop_grace,
        )))
    }
}

type EventSink = Arc<Mutex<Option<mpsc::UnboundedSender<PipelineEvent>>>>;

/// Request to the task supervising a launcher process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// SIGINT only: the launcher sends EOS and exits once it is drained
    Interrupt,
    /// SIGINT, then SIGKILL after the stop grace period
    Stop,
}

struct LaunchPipeline {
    binary: PathBuf,
    description: PipelineDescription,
    stop_grace: Duration,
    events_tx: EventSink,
    events_rx: Mutex<Option<EventReceiver>>,
    state_tx: Arc<watch::Sender<PipelineState>>,
    control_tx: Mutex<Option<mpsc::UnboundedSender<Control>>>,
}

impl LaunchPipeline {
    fn new(binary: PathBuf, description: PipelineDescription, stop_grace: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PipelineState::Null);

        Self {
            binary,
            description,
            stop_grace,
            events_tx: Arc::new(Mutex::new(Some(tx))),
            events_rx: Mutex::new(Some(rx)),
            state_tx: Arc::new(state_tx),
            control_tx: Mutex::new(None),
        }
    }

    fn spawn_process(&self) -> Result<(), EngineError> {
        let mut control_slot = self.control_tx.lock().map_err(|_| poisoned())?;
        if control_slot.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.binary)
            .arg("-e")
            .args(self.description.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::StateChange {
                target: PipelineState::Playing.to_string(),
                reason: format!("failed to spawn {:?}: {}", self.binary, e),
            })?;

        info!("Spawned {:?} (pid {:?})", self.binary, child.id());

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_console(
                stdout,
                Arc::clone(&self.events_tx),
                Arc::clone(&self.state_tx),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_console(
                stderr,
                Arc::clone(&self.events_tx),
                Arc::clone(&self.state_tx),
            ));
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *control_slot = Some(control_tx);
        tokio::spawn(supervise(
            child,
            control_rx,
            self.stop_grace,
            Arc::clone(&self.events_tx),
            Arc::clone(&self.state_tx),
        ));

        Ok(())
    }

    fn terminate(&self) -> Result<(), EngineError> {
        let control = self.control_tx.lock().map_err(|_| poisoned())?.take();
        match control {
            Some(control) => {
                let _ = control.send(Control::Stop);
            }
            None => {
                self.state_tx.send_replace(PipelineState::Null);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MediaPipeline for LaunchPipeline {
    fn description(&self) -> &PipelineDescription {
        &self.description
    }

    fn set_state(&self, target: PipelineState) -> Result<(), EngineError> {
        match target {
            PipelineState::Playing => self.spawn_process(),
            PipelineState::Null => self.terminate(),
            other => Err(EngineError::Unsupported(format!(
                "gst-launch pipelines cannot be held in {}",
                other
            ))),
        }
    }

    async fn wait_for_state(
        &self,
        target: PipelineState,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let mut rx = self.state_tx.subscribe();
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

    fn seek(&self, _request: &SeekRequest) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(
            "gst-launch pipelines cannot seek".to_string(),
        ))
    }

    fn send_eos(&self) -> Result<(), EngineError> {
        let control = self.control_tx.lock().map_err(|_| poisoned())?;
        match control.as_ref() {
            Some(control) if control.send(Control::Interrupt).is_ok() => Ok(()),
            _ => Err(EngineError::Unsupported(
                "launcher process is not running".to_string(),
            )),
        }
    }

    fn subscribe(&self) -> Result<EventReceiver, EngineError> {
        self.events_rx
            .lock()
            .map_err(|_| poisoned())?
            .take()
            .ok_or(EngineError::EventsUnavailable)
    }

    fn detach(&self) {
        if let Ok(mut tx) = self.events_tx.lock() {
            tx.take();
        }
    }
}

fn poisoned() -> EngineError {
    EngineError::StateChange {
        target: "any".to_string(),
        reason: "pipeline lock poisoned".to_string(),
    }
}

fn emit(events: &EventSink, event: PipelineEvent) {
    if let Ok(tx) = events.lock() {
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(event);
        }
    }
}

fn transition(events: &EventSink, state: &watch::Sender<PipelineState>, current: PipelineState) {
    let old = state.send_replace(current);
    if old != current {
        emit(events, PipelineEvent::StateChanged { old, current });
    }
}

/// Ask the launcher to finish: with `-e` it answers SIGINT with an EOS
#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            warn!("Failed to interrupt launcher process {}: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}

/// Wait for the child to exit, relaying interrupt and stop requests.
///
/// A stop interrupts the child and kills it if it has not exited after
/// `stop_grace`. Dropping every control sender counts as a stop.
async fn supervise(
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<Control>,
    stop_grace: Duration,
    events: EventSink,
    state: Arc<watch::Sender<PipelineState>>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = control.recv() => match request {
                Some(Control::Interrupt) => interrupt(&child),
                Some(Control::Stop) | None => {
                    interrupt(&child);
                    match tokio::time::timeout(stop_grace, child.wait()).await {
                        Ok(status) => break status,
                        Err(_) => {
                            warn!(
                                "Launcher still running {}ms after interrupt, killing it",
                                stop_grace.as_millis()
                            );
                            if let Err(e) = child.kill().await {
                                warn!("Failed to kill launcher process: {}", e);
                            }
                            break child.wait().await;
                        }
                    }
                }
            },
        }
    };

    match status {
        Ok(status) if status.success() => debug!("Launcher exited cleanly"),
        Ok(status) => emit(
            &events,
            PipelineEvent::Error {
                message: format!("launcher exited with {}", status),
                debug: None,
            },
        ),
        Err(e) => warn!("Failed to wait for launcher process: {}", e),
    }

    transition(&events, &state, PipelineState::Null);
}

/// Translate launcher console lines into pipeline events
async fn read_console<R>(reader: R, events: EventSink, state: Arc<watch::Sender<PipelineState>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        debug!("gst-launch: {}", line);

        if line.starts_with("Pipeline is PREROLLED")
            || line.starts_with("Pipeline is live and does not need PREROLL")
        {
            transition(&events, &state, PipelineState::Paused);
            emit(&events, PipelineEvent::Prepared);
        } else if line.starts_with("Setting pipeline to PLAYING") {
            transition(&events, &state, PipelineState::Playing);
        } else if line.starts_with("Got EOS") {
            emit(&events, PipelineEvent::Eos);
        } else if let Some(rest) = line.strip_prefix("ERROR:") {
            let message = console_message(rest);
            emit(&events, PipelineEvent::Error { message, debug: None });
        } else if let Some(rest) = line.strip_prefix("WARNING:") {
            let message = console_message(rest);
            emit(&events, PipelineEvent::Warning { message });
        }
    }
}

/// `from element /GstPipeline:pipeline0/...: Could not read.` -> `Could not read.`
fn console_message(rest: &str) -> String {
    rest.split_once(": ")
        .map(|(_, m)| m)
        .unwrap_or(rest)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_message() {
        assert_eq!(
            console_message(" from element /GstPipeline:pipeline0/GstRTSPSrc:rtspsrc0: Could not open resource for reading."),
            "Could not open resource for reading."
        );
        assert_eq!(console_message(" plain"), "plain");
    }

    #[test]
    fn test_build_rejects_empty_description() {
        let engine = LaunchEngine::default();
        assert!(engine.build(&PipelineDescription::new("   ")).is_err());
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    fn supervised(
        script: &str,
        stop_grace: Duration,
    ) -> (
        mpsc::UnboundedSender<Control>,
        EventReceiver,
        Arc<watch::Sender<PipelineState>>,
        tokio::task::JoinHandle<()>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let events: EventSink = Arc::new(Mutex::new(Some(events_tx)));
        let state = Arc::new(watch::channel(PipelineState::Playing).0);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(supervise(
            shell(script),
            control_rx,
            stop_grace,
            events,
            Arc::clone(&state),
        ));
        (control_tx, events_rx, state, handle)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_interrupts_before_killing() {
        // Exits cleanly on SIGINT, like gst-launch -e after draining
        let (control, mut events, state, handle) = supervised(
            "trap 'exit 0' INT; while :; do sleep 0.05; done",
            Duration::from_secs(5),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        control.send(Control::Stop).unwrap();
        handle.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5), "child was not interrupted");
        assert_eq!(*state.borrow(), PipelineState::Null);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, PipelineEvent::Error { .. });
        }
        assert!(!saw_error, "clean exit reported as error");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_after_grace() {
        let (control, mut events, state, handle) = supervised(
            "trap '' INT; while :; do sleep 0.05; done",
            Duration::from_millis(300),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        control.send(Control::Stop).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*state.borrow(), PipelineState::Null);
        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, PipelineEvent::Error { .. });
        }
        assert!(saw_error, "killed launcher should report a failed exit");
    }

    #[tokio::test]
    async fn test_eos_requires_running_process() {
        let engine = LaunchEngine::default();
        let pipeline = engine
            .build(&PipelineDescription::new("videotestsrc ! fakesink"))
            .unwrap();
        assert!(pipeline.send_eos().is_err());
    }

    #[tokio::test]
    async fn test_seek_is_rejected() {
        let engine = LaunchEngine::default();
        let pipeline = engine
            .build(&PipelineDescription::new("videotestsrc ! fakesink"))
            .unwrap();
        let request = SeekRequest {
            start: Duration::from_secs(30),
            stop: None,
            flags: super::super::SeekFlags::FLUSH,
        };
        assert!(matches!(
            pipeline.seek(&request),
            Err(EngineError::Unsupported(_))
        ));
        assert!(pipeline.subscribe().is_ok());
        assert!(matches!(
            pipeline.subscribe(),
            Err(EngineError::EventsUnavailable)
        ));
    }
}
