use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::dispatcher::{DispatcherSettings, PlaybackDispatcher, PlaybackId, PlaybackStatus};
use super::request::PlaybackRequest;
use super::resolver::{PlaybackPlan, SegmentResolver};
use super::seek::SeekCoordinator;
use crate::config::CameraConfig;
use crate::engine::{description, Codec, MediaEngine, PipelineDescription, PipelineState};
use crate::error::{CamvaultError, Result};

/// Playback pipeline parameters
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Pause between reaching PLAYING and issuing the seek
    pub settle_delay: Duration,
    /// Launch fragment appended after the `pay0` payloader
    pub sink: String,
    pub dispatcher: DispatcherSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(200),
            sink: "fakesink sync=true".to_string(),
            dispatcher: DispatcherSettings::default(),
        }
    }
}

/// Resolve → build → coordinate pipeline for timestamp playback
pub struct PlaybackService {
    resolver: SegmentResolver,
    engine: Arc<dyn MediaEngine>,
    cameras: HashMap<String, CameraConfig>,
    settings: PlaybackSettings,
    dispatcher: PlaybackDispatcher,
}

impl PlaybackService {
    /// Must be called inside a tokio runtime; spawns the dispatcher task
    pub fn new(
        resolver: SegmentResolver,
        engine: Arc<dyn MediaEngine>,
        cameras: &[CameraConfig],
        settings: PlaybackSettings,
    ) -> Self {
        let cameras = cameras.iter().map(|c| (c.name.clone(), c.clone())).collect();
        let dispatcher = PlaybackDispatcher::spawn(settings.dispatcher);

        Self {
            resolver,
            engine,
            cameras,
            settings,
            dispatcher,
        }
    }

    pub fn resolver(&self) -> &SegmentResolver {
        &self.resolver
    }

    /// Resolve on the blocking pool
    pub async fn resolve(&self, request: &PlaybackRequest) -> Result<PlaybackPlan> {
        let resolver = self.resolver.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&request))
            .await
            .map_err(|e| CamvaultError::Task(e.to_string()))?
    }

    /// Playback pipeline for `plan`, using the camera's codec for the stream
    pub fn describe(&self, request: &PlaybackRequest, plan: &PlaybackPlan) -> PipelineDescription {
        let codec: Codec = self
            .cameras
            .get(&request.camera_id)
            .map(|c| c.codec_for(request.stream_kind))
            .unwrap_or_default();

        description::playback(&plan.files(), codec).with_sink(&self.settings.sink)
    }

    /// Resolve the request, build its pipeline and hand it to the dispatcher.
    ///
    /// Fails with `NotFound` before any pipeline is built when nothing was
    /// recorded at or before the requested time.
    pub async fn start(&self, request: &PlaybackRequest) -> Result<PlaybackStatus> {
        let plan = self.resolve(request).await?;
        let description = self.describe(request, &plan);

        let pipeline = self.engine.build(&description).map_err(|e| {
            CamvaultError::Configuration(format!("playback pipeline: {}", e))
        })?;
        let events = pipeline.subscribe()?;

        let coordinator = SeekCoordinator::new(
            Arc::clone(&pipeline),
            plan.start_offset,
            plan.duration_limit,
            self.settings.settle_delay,
        );

        let id = Uuid::new_v4();
        let status = PlaybackStatus::new(id, request, &plan);
        self.dispatcher
            .register(status.clone(), coordinator, events)
            .await?;

        if let Err(e) = pipeline.set_state(PipelineState::Playing) {
            self.dispatcher.stop(id).await;
            return Err(e.into());
        }

        info!(
            playback = %id,
            camera = %request.camera_id,
            stream = %request.stream_kind,
            offset_secs = plan.start_offset.as_secs(),
            "Playback started with {} segment(s)",
            plan.segments.len()
        );

        Ok(status)
    }

    pub async fn stop(&self, id: PlaybackId) -> bool {
        self.dispatcher.stop(id).await
    }

    pub async fn status(&self, id: PlaybackId) -> Option<PlaybackStatus> {
        self.dispatcher.status(id).await
    }

    pub async fn list(&self) -> Vec<PlaybackStatus> {
        self.dispatcher.list().await
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
