use std::time::Duration;

use crate::engine::{Codec, Container};
use crate::naming::StreamKind;

/// Timing and retry parameters shared by every recording session
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    /// Target length of each segment before rotating
    /// Default: 80 seconds
    pub segment_duration: Duration,

    /// Container written by the capture pipeline
    pub container: Container,

    /// How long a new pipeline may take to reach PLAYING
    pub start_timeout: Duration,

    /// How long an old pipeline may take to reach NULL during rotation
    pub stop_timeout: Duration,

    /// Pause between tearing down the old pipeline and building the next
    pub rotation_settle: Duration,

    /// Extra attempts to rebuild the pipeline after a failed rotation
    pub rotation_retries: u32,

    /// First retry delay; doubles after every failed attempt
    pub rotation_backoff: Duration,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            segment_duration: Duration::from_secs(80),
            container: Container::Matroska,
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            rotation_settle: Duration::from_millis(100),
            rotation_retries: 3,
            rotation_backoff: Duration::from_millis(1000),
        }
    }
}

impl RecordingSettings {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.rotation_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Immutable inputs of one (camera, stream kind) session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub camera_id: String,
    pub stream_kind: StreamKind,
    /// RTSP URL of the stream
    pub url: String,
    pub codec: Codec,
    pub settings: RecordingSettings,
}
