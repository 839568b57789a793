use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::config::{RecordingSettings, SessionConfig};
use super::session::RecordingSession;
use super::stats::SessionStats;
use crate::config::CameraConfig;
use crate::engine::MediaEngine;
use crate::error::{CamvaultError, Result};
use crate::naming::{SegmentNaming, StreamKind};

type SessionKey = (String, StreamKind);

/// Owns every recording session of the process.
///
/// Lifecycle: [`new`](Self::new) → [`add_camera`](Self::add_camera) →
/// [`start_all`](Self::start_all) → [`stop_all`](Self::stop_all) → drop.
/// Shared by `Arc`; sessions are independent and one failing never affects
/// another.
pub struct RecordingManager {
    engine: Arc<dyn MediaEngine>,
    naming: SegmentNaming,
    settings: RecordingSettings,
    sessions: RwLock<BTreeMap<SessionKey, Arc<RecordingSession>>>,
}

impl RecordingManager {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        naming: SegmentNaming,
        settings: RecordingSettings,
    ) -> Self {
        Self {
            engine,
            naming,
            settings,
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn naming(&self) -> &SegmentNaming {
        &self.naming
    }

    /// Register a primary and a secondary session for `camera`
    pub async fn add_camera(&self, camera: &CameraConfig) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        if StreamKind::ALL
            .iter()
            .any(|kind| sessions.contains_key(&(camera.name.clone(), *kind)))
        {
            return Err(CamvaultError::Configuration(format!(
                "Camera {} is already registered",
                camera.name
            )));
        }

        for kind in StreamKind::ALL {
            let config = SessionConfig {
                camera_id: camera.name.clone(),
                stream_kind: kind,
                url: camera.url_for(kind).to_string(),
                codec: camera.codec_for(kind),
                settings: self.settings.clone(),
            };
            let session = RecordingSession::new(config, Arc::clone(&self.engine), self.naming.clone());
            sessions.insert((camera.name.clone(), kind), Arc::new(session));
        }

        info!(camera = %camera.name, "Camera registered for recording");
        Ok(())
    }

    /// Start every session. Returns how many are recording afterwards.
    pub async fn start_all(&self) -> usize {
        let sessions = self.all_sessions().await;
        let results = join_all(sessions.iter().map(|s| s.start())).await;

        let mut started = 0;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(()) => started += 1,
                Err(e) => warn!(
                    camera = %session.camera_id(),
                    stream = %session.stream_kind(),
                    "Session not started: {}", e
                ),
            }
        }

        info!("Started {}/{} recording sessions", started, sessions.len());
        started
    }

    /// Stop every session concurrently and return their final statistics
    pub async fn stop_all(&self) -> Vec<SessionStats> {
        let sessions = self.all_sessions().await;
        let stats = join_all(sessions.iter().map(|s| s.stop())).await;
        info!("Stopped {} recording sessions", stats.len());
        stats
    }

    pub async fn session(&self, camera_id: &str, kind: StreamKind) -> Option<Arc<RecordingSession>> {
        self.sessions
            .read()
            .await
            .get(&(camera_id.to_string(), kind))
            .cloned()
    }

    /// Both sessions of one camera, primary first
    pub async fn camera_sessions(&self, camera_id: &str) -> Vec<Arc<RecordingSession>> {
        let sessions = self.sessions.read().await;
        StreamKind::ALL
            .iter()
            .filter_map(|kind| sessions.get(&(camera_id.to_string(), *kind)).cloned())
            .collect()
    }

    pub async fn all_stats(&self) -> Vec<SessionStats> {
        let sessions = self.all_sessions().await;
        join_all(sessions.iter().map(|s| s.get_stats())).await
    }

    pub async fn camera_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().map(|(camera, _)| camera.clone()).collect();
        ids.dedup();
        ids
    }

    async fn all_sessions(&self) -> Vec<Arc<RecordingSession>> {
        self.sessions.read().await.values().cloned().collect()
    }
}
