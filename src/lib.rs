pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod naming;
pub mod playback;
pub mod recording;
pub mod storage;
pub mod testing;

pub use config::{CameraConfig, Config};
pub use engine::{
    Codec, Container, LaunchEngine, MediaEngine, MediaPipeline, PipelineDescription,
    PipelineEvent, PipelineState, SeekFlags, SeekRequest,
};
pub use error::{CamvaultError, EngineError};
pub use http::{create_router, AppState};
pub use naming::{Segment, SegmentNaming, StreamKind};
pub use playback::{
    PlaybackPlan, PlaybackQuery, PlaybackRequest, PlaybackService, PlaybackSettings,
    PlaybackStatus, SeekCoordinator, SegmentResolver,
};
pub use recording::{RecordingManager, RecordingSession, RecordingSettings, SessionStats};
pub use storage::{RetentionPolicy, RetentionSweeper, SegmentScanner};
