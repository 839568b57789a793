//! In-process GStreamer engine
//!
//! Platform: requires the GStreamer 1.x development libraries at build time.

use async_trait::async_trait;
use futures::stream::StreamExt;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    EventReceiver, MediaEngine, MediaPipeline, PipelineDescription, PipelineEvent, PipelineState,
    SeekFlags, SeekRequest,
};
use crate::error::EngineError;

/// Builds pipelines with `gst::parse::launch`
#[derive(Debug)]
pub struct GstEngine {
    _private: (),
}

impl GstEngine {
    pub fn new() -> Result<Self, EngineError> {
        gst::init().map_err(|e| EngineError::Build(format!("GStreamer init failed: {}", e)))?;
        Ok(Self { _private: () })
    }
}

impl MediaEngine for GstEngine {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn build(
        &self,
        description: &PipelineDescription,
    ) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        let element = gst::parse::launch(description.as_str())
            .map_err(|e| EngineError::Build(e.to_string()))?;
        let pipeline = element
            .downcast::<gst::Pipeline>()
            .map_err(|_| EngineError::Build("description did not produce a pipeline".to_string()))?;

        Ok(Arc::new(GstPipeline {
            pipeline,
            description: description.clone(),
            watch: Mutex::new(WatchSlot::Unused),
        }))
    }
}

enum WatchSlot {
    Unused,
    Active(JoinHandle<()>),
    Detached,
}

struct GstPipeline {
    pipeline: gst::Pipeline,
    description: PipelineDescription,
    watch: Mutex<WatchSlot>,
}

fn to_gst_state(state: PipelineState) -> gst::State {
    match state {
        PipelineState::Null => gst::State::Null,
        PipelineState::Ready => gst::State::Ready,
        PipelineState::Paused => gst::State::Paused,
        PipelineState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> PipelineState {
    match state {
        gst::State::Ready => PipelineState::Ready,
        gst::State::Paused => PipelineState::Paused,
        gst::State::Playing => PipelineState::Playing,
        _ => PipelineState::Null,
    }
}

fn to_gst_flags(flags: SeekFlags) -> gst::SeekFlags {
    let mut out = gst::SeekFlags::empty();
    if flags.contains(SeekFlags::FLUSH) {
        out |= gst::SeekFlags::FLUSH;
    }
    if flags.contains(SeekFlags::ACCURATE) {
        out |= gst::SeekFlags::ACCURATE;
    }
    if flags.contains(SeekFlags::SEGMENT) {
        out |= gst::SeekFlags::SEGMENT;
    }
    out
}

fn clock_time(d: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(d.as_nanos() as u64)
}

#[async_trait]
impl MediaPipeline for GstPipeline {
    fn description(&self) -> &PipelineDescription {
        &self.description
    }

    fn set_state(&self, target: PipelineState) -> Result<(), EngineError> {
        self.pipeline
            .set_state(to_gst_state(target))
            .map(|_| ())
            .map_err(|e| EngineError::StateChange {
                target: target.to_string(),
                reason: e.to_string(),
            })
    }

    async fn wait_for_state(
        &self,
        target: PipelineState,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let pipeline = self.pipeline.clone();
        let wait = clock_time(timeout);
        let (result, current, _pending) =
            tokio::task::spawn_blocking(move || pipeline.state(wait))
                .await
                .map_err(|e| EngineError::StateChange {
                    target: target.to_string(),
                    reason: e.to_string(),
                })?;

        if from_gst_state(current) == target {
            return Ok(());
        }

        match result {
            Err(e) => Err(EngineError::StateChange {
                target: target.to_string(),
                reason: e.to_string(),
            }),
            Ok(gst::StateChangeSuccess::Async) => Err(EngineError::Timeout {
                target: target.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(_) => Err(EngineError::StateChange {
                target: target.to_string(),
                reason: format!("settled in {:?}", current),
            }),
        }
    }

    fn seek(&self, request: &SeekRequest) -> Result<(), EngineError> {
        let start = Some(clock_time(request.start));
        let stop = request.stop.map(clock_time);
        let stop_type = if stop.is_some() {
            gst::SeekType::Set
        } else {
            gst::SeekType::None
        };

        self.pipeline
            .seek(
                1.0,
                to_gst_flags(request.flags),
                gst::SeekType::Set,
                start,
                stop_type,
                stop,
            )
            .map_err(|e| EngineError::SeekRejected(e.to_string()))
    }

    fn send_eos(&self) -> Result<(), EngineError> {
        if self.pipeline.send_event(gst::event::Eos::new()) {
            Ok(())
        } else {
            Err(EngineError::StateChange {
                target: "EOS".to_string(),
                reason: "event not handled".to_string(),
            })
        }
    }

    fn subscribe(&self) -> Result<EventReceiver, EngineError> {
        let mut slot = self.watch.lock().map_err(|_| EngineError::EventsUnavailable)?;
        if !matches!(*slot, WatchSlot::Unused) {
            return Err(EngineError::EventsUnavailable);
        }

        let bus = self.pipeline.bus().ok_or(EngineError::EventsUnavailable)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let owner = self.pipeline.clone().upcast::<gst::Object>();
        let mut messages = bus.stream();

        let handle = tokio::spawn(async move {
            let mut prepared = false;

            while let Some(msg) = messages.next().await {
                let mut out = Vec::with_capacity(2);

                match msg.view() {
                    gst::MessageView::StateChanged(sc) => {
                        if msg.src() != Some(&owner) {
                            continue;
                        }
                        let old = from_gst_state(sc.old());
                        let current = from_gst_state(sc.current());
                        out.push(PipelineEvent::StateChanged { old, current });
                        if current == PipelineState::Paused && !prepared {
                            prepared = true;
                            out.push(PipelineEvent::Prepared);
                        }
                    }
                    gst::MessageView::AsyncDone(_) => out.push(PipelineEvent::AsyncDone),
                    gst::MessageView::SegmentDone(_) => out.push(PipelineEvent::SegmentDone),
                    gst::MessageView::Eos(_) => out.push(PipelineEvent::Eos),
                    gst::MessageView::Warning(w) => out.push(PipelineEvent::Warning {
                        message: w.error().to_string(),
                    }),
                    gst::MessageView::Error(e) => out.push(PipelineEvent::Error {
                        message: e.error().to_string(),
                        debug: e.debug().map(|d| d.to_string()),
                    }),
                    _ => {}
                }

                for event in out {
                    if tx.send(event).is_err() {
                        debug!("Event receiver dropped, ending bus watch");
                        return;
                    }
                }
            }
        });

        *slot = WatchSlot::Active(handle);
        Ok(rx)
    }

    fn detach(&self) {
        match self.watch.lock() {
            Ok(mut slot) => {
                if let WatchSlot::Active(handle) = std::mem::replace(&mut *slot, WatchSlot::Detached) {
                    handle.abort();
                }
            }
            Err(_) => warn!("Bus watch lock poisoned during detach"),
        }
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        self.detach();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
