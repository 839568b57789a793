//! Recording Segment Manager
//!
//! One [`RecordingSession`] per (camera, stream kind) keeps a capture
//! pipeline writing into the current segment and rotates it on a fixed
//! interval:
//!
//! ```text
//! Idle → Starting → Recording → RotatingOut → Recording → … → Stopping → Idle
//! ```
//!
//! Upstream errors are logged and left to the next rotation, which rebuilds
//! the pipeline and reconnects. [`RecordingManager`] owns every session.

mod config;
mod manager;
mod session;
mod stats;

pub use config::{RecordingSettings, SessionConfig};
pub use manager::RecordingManager;
pub use session::RecordingSession;
pub use stats::{SessionState, SessionStats};
