//! Media pipeline engine contract
//!
//! The recording and playback core never talks to a specific media framework.
//! It emits a textual [`PipelineDescription`], hands it to a [`MediaEngine`],
//! and drives the resulting [`MediaPipeline`] through state changes and seeks
//! while consuming typed [`PipelineEvent`]s.
//!
//! Implementations:
//! - [`LaunchEngine`]: runs each pipeline as a `gst-launch-1.0` child process
//! - `GstEngine`: in-process GStreamer (cargo feature `gstreamer`)
//! - `testing::ScriptedEngine`: in-memory engine for tests

pub mod description;
pub mod launch;

#[cfg(feature = "gstreamer")]
pub mod gst;

use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::EngineError;

pub use description::{Codec, Container, PipelineDescription};
pub use launch::LaunchEngine;

#[cfg(feature = "gstreamer")]
pub use self::gst::GstEngine;

/// Execution state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Flags accompanying a seek command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeekFlags: u32 {
        /// Drop queued data before repositioning
        const FLUSH = 0b001;
        /// Position exactly rather than on the nearest keyframe
        const ACCURATE = 0b010;
        /// Signal segment-done at the stop position instead of ending the stream
        const SEGMENT = 0b100;
    }
}

/// A time-based seek: `start` to `stop` (open-ended when `stop` is `None`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub start: Duration,
    pub stop: Option<Duration>,
    pub flags: SeekFlags,
}

impl SeekRequest {
    pub fn is_bounded(&self) -> bool {
        self.stop.is_some()
    }
}

/// Asynchronous notification from a running pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The media graph finished prerolling and can accept commands
    Prepared,
    /// Pipeline-level state transition
    StateChanged {
        old: PipelineState,
        current: PipelineState,
    },
    /// A pending asynchronous state change or flush completed
    AsyncDone,
    /// Playback reached the stop position of a segment-mode seek
    SegmentDone,
    /// End of stream
    Eos,
    Warning {
        message: String,
    },
    Error {
        message: String,
        debug: Option<String>,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// A controllable execution graph produced by a [`MediaEngine`]
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Description this pipeline was built from
    fn description(&self) -> &PipelineDescription;

    /// Request a state transition. May complete asynchronously.
    fn set_state(&self, target: PipelineState) -> Result<(), EngineError>;

    /// Wait until the pipeline has settled in `target`, at most `timeout`
    async fn wait_for_state(
        &self,
        target: PipelineState,
        timeout: Duration,
    ) -> Result<(), EngineError>;

    fn seek(&self, request: &SeekRequest) -> Result<(), EngineError>;

    /// Inject an end-of-stream into the pipeline
    fn send_eos(&self) -> Result<(), EngineError>;

    /// Take the event stream. Only one subscriber is supported.
    fn subscribe(&self) -> Result<EventReceiver, EngineError>;

    /// Stop delivering events. Must be called before teardown so no stale
    /// notification can reach an owner that already released the pipeline.
    fn detach(&self);
}

/// Turns pipeline descriptions into running graphs
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &str;

    fn build(
        &self,
        description: &PipelineDescription,
    ) -> Result<Arc<dyn MediaPipeline>, EngineError>;
}
