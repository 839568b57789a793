//! Seek Coordinator
//!
//! A playback pipeline accepts seeks only once it is prepared and running.
//! The coordinator follows its notifications:
//!
//! ```text
//! Built → Prepared → AwaitingPlaying → SeekPending → Seeking → Active
//!       → SegmentDone | EndOfStream | Error
//! ```
//!
//! and issues at most one seek, a short settle delay after PLAYING.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::engine::{MediaPipeline, PipelineEvent, PipelineState, SeekFlags, SeekRequest};
use crate::error::CamvaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Built,
    Prepared,
    AwaitingPlaying,
    SeekPending,
    Seeking,
    Active,
    SegmentDone,
    EndOfStream,
    Error,
}

impl CoordinatorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CoordinatorState::SegmentDone | CoordinatorState::EndOfStream | CoordinatorState::Error
        )
    }
}

/// How a playback ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackOutcome {
    /// The bounded range was played and end-of-stream was synthesized
    Completed,
    /// The selected segments ran out
    EndOfStream,
    Failed { message: String },
    /// Stopped on request
    Stopped,
}

/// Result of feeding one event to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// EOS was injected; keep the pipeline until the EOS reaches the end of it
    Draining,
    Finished(PlaybackOutcome),
}

/// The single seek needed to apply `offset` and `limit`, if any.
///
/// Bounded seeks run in segment mode so reaching the stop position raises
/// segment-done instead of ending the stream.
pub fn plan_seek(offset: Duration, limit: Option<Duration>) -> Option<SeekRequest> {
    let limit = limit.filter(|l| !l.is_zero());
    let bounded = SeekFlags::FLUSH | SeekFlags::ACCURATE | SeekFlags::SEGMENT;

    match (offset.is_zero(), limit) {
        (false, Some(limit)) => Some(SeekRequest {
            start: offset,
            stop: Some(offset + limit),
            flags: bounded,
        }),
        (false, None) => Some(SeekRequest {
            start: offset,
            stop: None,
            flags: SeekFlags::FLUSH | SeekFlags::ACCURATE,
        }),
        (true, Some(limit)) => Some(SeekRequest {
            start: Duration::ZERO,
            stop: Some(limit),
            flags: bounded,
        }),
        (true, None) => None,
    }
}

/// Applies a start offset and duration limit to one playback pipeline
pub struct SeekCoordinator {
    pipeline: Arc<dyn MediaPipeline>,
    state: CoordinatorState,
    planned: Option<SeekRequest>,
    pending: Option<SeekRequest>,
    settle_delay: Duration,
    seeks_issued: usize,
}

impl SeekCoordinator {
    pub fn new(
        pipeline: Arc<dyn MediaPipeline>,
        start_offset: Duration,
        duration_limit: Option<Duration>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            pipeline,
            state: CoordinatorState::Built,
            planned: plan_seek(start_offset, duration_limit),
            pending: None,
            settle_delay,
            seeks_issued: 0,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn planned_seek(&self) -> Option<&SeekRequest> {
        self.planned.as_ref()
    }

    pub fn seeks_issued(&self) -> usize {
        self.seeks_issued
    }

    /// Advance on one pipeline notification
    pub async fn handle(&mut self, event: PipelineEvent) -> Flow {
        if self.state == CoordinatorState::SegmentDone {
            return match event {
                PipelineEvent::Eos => {
                    debug!("Synthesized EOS drained");
                    Flow::Finished(PlaybackOutcome::Completed)
                }
                PipelineEvent::Error { message, debug: details } => {
                    error!(details = ?details, "Playback pipeline error while draining: {}", message);
                    Flow::Finished(PlaybackOutcome::Failed { message })
                }
                _ => Flow::Continue,
            };
        }
        if self.state.is_terminal() {
            return Flow::Continue;
        }

        // EOS and errors end the playback in any state; anything else must
        // wait for preparation
        let ends = matches!(event, PipelineEvent::Eos | PipelineEvent::Error { .. });
        if self.state == CoordinatorState::Built && !ends {
            if event == PipelineEvent::Prepared {
                self.state = CoordinatorState::Prepared;
                self.pending = self.planned;
                self.state = CoordinatorState::AwaitingPlaying;
                debug!("Playback prepared, pending seek: {:?}", self.pending);
            } else {
                debug!("Ignoring {:?} before preparation", event);
            }
            return Flow::Continue;
        }

        match event {
            PipelineEvent::StateChanged {
                current: PipelineState::Playing,
                ..
            } => {
                match self.pending.take() {
                    Some(request) => self.apply(request).await,
                    None if self.state == CoordinatorState::AwaitingPlaying => {
                        self.state = CoordinatorState::Active;
                    }
                    None => {}
                }
                Flow::Continue
            }
            PipelineEvent::SegmentDone => {
                info!("Segment done (duration reached), sending EOS");
                self.state = CoordinatorState::SegmentDone;
                match self.pipeline.send_eos() {
                    Ok(()) => Flow::Draining,
                    Err(e) => {
                        warn!("Failed to send EOS: {}", e);
                        Flow::Finished(PlaybackOutcome::Completed)
                    }
                }
            }
            PipelineEvent::Eos => {
                info!("Playback reached end of stream");
                self.state = CoordinatorState::EndOfStream;
                Flow::Finished(PlaybackOutcome::EndOfStream)
            }
            PipelineEvent::Error { message, debug: details } => {
                error!(details = ?details, "Playback pipeline error: {}", message);
                self.state = CoordinatorState::Error;
                Flow::Finished(PlaybackOutcome::Failed { message })
            }
            PipelineEvent::Warning { message } => {
                warn!("Playback pipeline warning: {}", message);
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    async fn apply(&mut self, request: SeekRequest) {
        self.state = CoordinatorState::SeekPending;
        sleep(self.settle_delay).await;

        self.state = CoordinatorState::Seeking;
        info!(
            offset_secs = request.start.as_secs_f64(),
            stop_secs = ?request.stop.map(|s| s.as_secs_f64()),
            "Seeking playback"
        );
        self.seeks_issued += 1;

        if let Err(e) = self.pipeline.seek(&request) {
            let err = CamvaultError::SeekFailure(e.to_string());
            warn!("{}; continuing unseeked", err);
        }

        self.state = CoordinatorState::Active;
    }

    /// Stop watching and tear the pipeline down
    pub fn release(self) {
        self.pipeline.detach();
        if let Err(e) = self.pipeline.set_state(PipelineState::Null) {
            warn!("Failed to stop playback pipeline: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_seek_table() {
        let s = Duration::from_secs;
        let bounded = SeekFlags::FLUSH | SeekFlags::ACCURATE | SeekFlags::SEGMENT;

        let seek = plan_seek(s(30), Some(s(150))).unwrap();
        assert_eq!((seek.start, seek.stop, seek.flags), (s(30), Some(s(180)), bounded));

        let seek = plan_seek(s(30), None).unwrap();
        assert_eq!(seek.stop, None);
        assert!(!seek.flags.contains(SeekFlags::SEGMENT));

        let seek = plan_seek(Duration::ZERO, Some(s(60))).unwrap();
        assert_eq!((seek.start, seek.stop), (Duration::ZERO, Some(s(60))));
        assert!(seek.flags.contains(SeekFlags::SEGMENT));

        assert!(plan_seek(Duration::ZERO, None).is_none());
        assert!(plan_seek(Duration::ZERO, Some(Duration::ZERO)).is_none());
    }
}
