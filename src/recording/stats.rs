use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::naming::{Segment, StreamKind};

/// Lifecycle state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Recording,
    RotatingOut,
    Stopping,
}

/// Statistics about a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub camera_id: String,

    pub stream_kind: StreamKind,

    pub state: SessionState,

    /// Whether a capture task is currently active
    pub is_running: bool,

    /// When the current run started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Segment being written right now
    pub current_segment: Option<Segment>,

    /// Wall-clock estimate of the next rotation
    pub next_rotation_at: Option<DateTime<Utc>>,

    /// Segments opened since the session was created
    pub segments_started: usize,

    /// Completed rotations since the session was created
    pub rotations: usize,

    /// Upstream errors absorbed while recording
    pub transport_errors: usize,

    /// Other pipeline errors absorbed while recording
    pub pipeline_errors: usize,

    /// Rotations that gave up after exhausting retries
    pub rotation_failures: usize,

    pub last_error: Option<String>,
}
