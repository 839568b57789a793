use crate::config::CameraConfig;
use crate::playback::PlaybackService;
use crate::recording::RecordingManager;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Configured cameras, in configuration order
    pub cameras: Arc<Vec<CameraConfig>>,

    /// Recording sessions of every camera
    pub recordings: Arc<RecordingManager>,

    /// Timestamp playback
    pub playback: Arc<PlaybackService>,
}

impl AppState {
    pub fn new(
        cameras: Vec<CameraConfig>,
        recordings: Arc<RecordingManager>,
        playback: Arc<PlaybackService>,
    ) -> Self {
        Self {
            cameras: Arc::new(cameras),
            recordings,
            playback,
        }
    }

    pub fn camera(&self, name: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.name == name)
    }
}
