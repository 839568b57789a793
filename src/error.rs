//! Error types for recording and playback

use std::path::PathBuf;
use thiserror::Error;

use crate::naming::StreamKind;

/// Errors reported by a media engine implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The pipeline description could not be turned into an execution graph
    #[error("Failed to build pipeline: {0}")]
    Build(String),

    /// A state transition was rejected by the engine
    #[error("State change to {target} failed: {reason}")]
    StateChange { target: String, reason: String },

    /// A state transition did not complete before the deadline
    #[error("Timed out after {timeout_ms}ms waiting for {target}")]
    Timeout { target: String, timeout_ms: u64 },

    /// The engine refused a seek command
    #[error("Seek rejected: {0}")]
    SeekRejected(String),

    /// The operation is not available on this engine
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Event notifications were already taken or detached
    #[error("Pipeline events unavailable")]
    EventsUnavailable,
}

/// Errors surfaced by the recording and playback core
#[derive(Error, Debug)]
pub enum CamvaultError {
    /// A capture or playback pipeline cannot be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Upstream source unreachable or dropped mid-recording
    #[error("Transport error on {camera}/{stream}: {message}")]
    Transport {
        camera: String,
        stream: StreamKind,
        message: String,
    },

    /// A capture pipeline failed to start or reach the playing state
    #[error("Rotation failure on {camera}/{stream}: {reason}")]
    RotationFailure {
        camera: String,
        stream: StreamKind,
        reason: String,
    },

    /// No recorded segment covers the requested timestamp
    #[error("No recording for {camera}/{stream} at or before {timestamp}")]
    NotFound {
        camera: String,
        stream: StreamKind,
        timestamp: i64,
    },

    /// The engine rejected a seek command
    #[error("Seek failure: {0}")]
    SeekFailure(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A blocking helper task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CamvaultError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means the requested data does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CamvaultError>;

/// Message fragments that identify upstream connection problems
const TRANSPORT_MARKERS: [&str; 3] = ["Could not read", "Connection", "resource"];

/// Classify an engine error message as a transport (upstream) error
pub fn is_transport_message(message: &str) -> bool {
    TRANSPORT_MARKERS.iter().any(|m| message.contains(m))
}
