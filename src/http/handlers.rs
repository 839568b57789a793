use super::state::AppState;
use crate::engine::Codec;
use crate::error::CamvaultError;
use crate::naming::{Segment, StreamKind};
use crate::playback::{PlaybackId, PlaybackQuery, PlaybackRequest};
use crate::recording::{RecordingSession, SessionStats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// `1`, `sub` or `secondary` select the secondary stream. Omitted on
    /// recording control means both streams.
    pub stream: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CameraSummary {
    pub name: String,
    pub codec_main: Codec,
    pub codec_sub: Codec,
    pub recording: bool,
}

#[derive(Debug, Serialize)]
pub struct RecordingActionResponse {
    pub camera: String,
    pub status: String,
    pub sessions: Vec<SessionStats>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub camera: String,
    pub stream: StreamKind,
    pub timestamp: i64,
    pub segments: Vec<Segment>,
    pub start_offset_secs: u64,
    pub duration_limit_secs: Option<u64>,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct StopPlaybackResponse {
    pub id: PlaybackId,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn camera_not_found(camera: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Camera {} not found", camera))
}

impl IntoResponse for CamvaultError {
    fn into_response(self) -> Response {
        let status = match &self {
            CamvaultError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

/// Sessions addressed by `stream`: one kind, or both when omitted
async fn target_sessions(
    state: &AppState,
    camera: &str,
    query: &StreamQuery,
) -> Vec<Arc<RecordingSession>> {
    match query.stream.as_deref() {
        Some(stream) => state
            .recordings
            .session(camera, StreamKind::from_query(Some(stream)))
            .await
            .into_iter()
            .collect(),
        None => state.recordings.camera_sessions(camera).await,
    }
}

fn playback_request(camera: &str, query: &PlaybackQuery) -> Result<PlaybackRequest, Response> {
    query
        .to_request(camera)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Missing timestamp parameter"))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /cameras
pub async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    let mut cameras = Vec::with_capacity(state.cameras.len());

    for camera in state.cameras.iter() {
        let recording = state
            .recordings
            .camera_sessions(&camera.name)
            .await
            .iter()
            .any(|s| s.is_running());

        cameras.push(CameraSummary {
            name: camera.name.clone(),
            codec_main: camera.codec_main,
            codec_sub: camera.codec_sub,
            recording,
        });
    }

    (StatusCode::OK, Json(cameras))
}

/// GET /recordings
/// Stats of every recording session
pub async fn list_recordings(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.recordings.all_stats().await))
}

/// GET /recordings/:camera
pub async fn get_camera_recordings(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Response {
    let sessions = state.recordings.camera_sessions(&camera).await;
    if sessions.is_empty() {
        return camera_not_found(&camera);
    }

    let mut stats = Vec::with_capacity(sessions.len());
    for session in sessions {
        stats.push(session.get_stats().await);
    }

    (StatusCode::OK, Json(stats)).into_response()
}

/// POST /recordings/:camera/start?stream=
/// Start recording; also restarts a session that gave up after a failure
pub async fn start_recording(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let sessions = target_sessions(&state, &camera, &query).await;
    if sessions.is_empty() {
        return camera_not_found(&camera);
    }

    if sessions.iter().all(|s| s.is_running()) {
        return error_response(
            StatusCode::CONFLICT,
            format!("Camera {} is already recording", camera),
        );
    }

    info!("Starting recording for camera: {}", camera);

    let mut stats = Vec::with_capacity(sessions.len());
    for session in sessions {
        if let Err(e) = session.start().await {
            error!("Failed to start recording: {}", e);
            return e.into_response();
        }
        stats.push(session.get_stats().await);
    }

    (
        StatusCode::OK,
        Json(RecordingActionResponse {
            camera,
            status: "recording".to_string(),
            sessions: stats,
        }),
    )
        .into_response()
}

/// POST /recordings/:camera/stop?stream=
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let sessions = target_sessions(&state, &camera, &query).await;
    if sessions.is_empty() {
        return camera_not_found(&camera);
    }

    info!("Stopping recording for camera: {}", camera);

    let mut stats = Vec::with_capacity(sessions.len());
    for session in sessions {
        stats.push(session.stop().await);
    }

    (
        StatusCode::OK,
        Json(RecordingActionResponse {
            camera,
            status: "stopped".to_string(),
            sessions: stats,
        }),
    )
        .into_response()
}

/// GET /cameras/:camera/segments?stream=
pub async fn list_segments(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if state.camera(&camera).is_none() {
        return camera_not_found(&camera);
    }

    let kind = StreamKind::from_query(query.stream.as_deref());
    let scanner = state.playback.resolver().scanner().clone();

    match tokio::task::spawn_blocking(move || scanner.scan(&camera, kind)).await {
        Ok(segments) => (StatusCode::OK, Json(segments)).into_response(),
        Err(e) => CamvaultError::Task(e.to_string()).into_response(),
    }
}

/// GET /cameras/:camera/playback?stream=&timestamp=&duration=
/// Resolve a playback request without starting it
pub async fn resolve_playback(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Query(query): Query<PlaybackQuery>,
) -> Response {
    if state.camera(&camera).is_none() {
        return camera_not_found(&camera);
    }
    let request = match playback_request(&camera, &query) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.playback.resolve(&request).await {
        Ok(plan) => {
            let description = state.playback.describe(&request, &plan);
            (
                StatusCode::OK,
                Json(ResolveResponse {
                    camera,
                    stream: request.stream_kind,
                    timestamp: request.start_ts,
                    start_offset_secs: plan.start_offset.as_secs(),
                    duration_limit_secs: plan.duration_limit.map(|d| d.as_secs()),
                    segments: plan.segments,
                    description: description.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /cameras/:camera/playback?stream=&timestamp=&duration=
/// Resolve, build and start a playback pipeline
pub async fn start_playback(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Query(query): Query<PlaybackQuery>,
) -> Response {
    if state.camera(&camera).is_none() {
        return camera_not_found(&camera);
    }
    let request = match playback_request(&camera, &query) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.playback.start(&request).await {
        Ok(status) => (StatusCode::CREATED, Json(status)).into_response(),
        Err(e) => {
            error!("Failed to start playback: {}", e);
            e.into_response()
        }
    }
}

/// GET /playback
pub async fn list_playbacks(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.playback.list().await))
}

/// GET /playback/:id
pub async fn get_playback(State(state): State<AppState>, Path(id): Path<PlaybackId>) -> Response {
    match state.playback.status(id).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Playback {} not found", id)),
    }
}

/// DELETE /playback/:id
pub async fn stop_playback(State(state): State<AppState>, Path(id): Path<PlaybackId>) -> Response {
    if state.playback.stop(id).await {
        (
            StatusCode::OK,
            Json(StopPlaybackResponse {
                id,
                status: "stopped".to_string(),
            }),
        )
            .into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            format!("Playback {} not found or already finished", id),
        )
    }
}
