use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/cameras", get(handlers::list_cameras))
        // Recording control
        .route("/recordings", get(handlers::list_recordings))
        .route("/recordings/:camera", get(handlers::get_camera_recordings))
        .route("/recordings/:camera/start", post(handlers::start_recording))
        .route("/recordings/:camera/stop", post(handlers::stop_recording))
        // Segment queries and playback
        .route("/cameras/:camera/segments", get(handlers::list_segments))
        .route(
            "/cameras/:camera/playback",
            get(handlers::resolve_playback).post(handlers::start_playback),
        )
        .route("/playback", get(handlers::list_playbacks))
        .route(
            "/playback/:id",
            get(handlers::get_playback).delete(handlers::stop_playback),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
