// Integration tests for the HTTP API
//
// The router is driven in-process with tower's `oneshot`; a scripted engine
// stands in for the media framework and segments live in a temporary tree.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use camvault::config::CameraConfig;
use camvault::engine::Codec;
use camvault::naming::{SegmentNaming, StreamKind};
use camvault::playback::{PlaybackService, PlaybackSettings, SegmentResolver};
use camvault::recording::{RecordingManager, RecordingSettings};
use camvault::storage::SegmentScanner;
use camvault::testing::ScriptedEngine;
use camvault::{create_router, AppState};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const T: i64 = 1_700_000_000;

fn camera() -> CameraConfig {
    CameraConfig {
        name: "cam_1".to_string(),
        main_url: "rtsp://10.0.0.5/main".to_string(),
        sub_url: "rtsp://10.0.0.5/sub".to_string(),
        codec_main: Codec::H264,
        codec_sub: Codec::H264,
    }
}

async fn app(base: &Path, engine: &ScriptedEngine) -> Result<Router> {
    let naming = SegmentNaming::new(base, "mkv");
    for ts in [T + 100, T + 220, T + 340] {
        let time = Utc.timestamp_opt(ts, 0).unwrap();
        let path = naming.path_for("cam_1", StreamKind::Primary, &time);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, b"segment")?;
    }

    let cameras = vec![camera()];
    let recordings = Arc::new(RecordingManager::new(
        Arc::new(engine.clone()),
        naming.clone(),
        RecordingSettings::default(),
    ));
    recordings.add_camera(&cameras[0]).await?;

    let scanner = SegmentScanner::new(naming, vec!["mkv".to_string()]);
    let playback = Arc::new(PlaybackService::new(
        SegmentResolver::new(scanner),
        Arc::new(engine.clone()),
        &cameras,
        PlaybackSettings {
            settle_delay: Duration::ZERO,
            ..PlaybackSettings::default()
        },
    ));

    Ok(create_router(AppState::new(cameras, recordings, playback)))
}

async fn send(app: &Router, method: Method, uri: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())?;
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

#[tokio::test]
async fn test_health_and_cameras() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let app = app(temp_dir.path(), &ScriptedEngine::new()).await?;

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/cameras").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "cam_1");
    assert_eq!(body[0]["recording"], false);

    Ok(())
}

#[tokio::test]
async fn test_resolve_playback() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let app = app(temp_dir.path(), &ScriptedEngine::new()).await?;

    let uri = format!("/cameras/cam_1/playback?stream=0&timestamp={}&duration=150", T + 250);
    let (status, body) = send(&app, Method::GET, &uri).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["start_offset_secs"], 30);
    assert_eq!(body["duration_limit_secs"], 150);
    let stamps: Vec<i64> = body["segments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["captured_at"].as_i64().unwrap())
        .collect();
    assert_eq!(stamps, vec![T + 220, T + 340]);
    assert!(body["description"].as_str().unwrap().contains("filesrc"));

    Ok(())
}

#[tokio::test]
async fn test_resolve_errors() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let app = app(temp_dir.path(), &ScriptedEngine::new()).await?;

    let (status, _) = send(&app, Method::GET, &format!("/cameras/nope/playback?timestamp={}", T)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Before the first recorded segment
    let (status, body) = send(&app, Method::GET, &format!("/cameras/cam_1/playback?timestamp={}", T)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, Method::GET, "/cameras/cam_1/playback?stream=0").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing recorded on the secondary stream
    let uri = format!("/cameras/cam_1/playback?stream=1&timestamp={}", T + 250);
    let (status, _) = send(&app, Method::GET, &uri).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_list_segments() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let app = app(temp_dir.path(), &ScriptedEngine::new()).await?;

    let (status, body) = send(&app, Method::GET, "/cameras/cam_1/segments").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = send(&app, Method::GET, "/cameras/cam_1/segments?stream=sub").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_start_and_stop_playback() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let engine = ScriptedEngine::new();
    let app = app(temp_dir.path(), &engine).await?;

    let uri = format!("/cameras/cam_1/playback?timestamp={}", T + 250);
    let (status, body) = send(&app, Method::POST, &uri).await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let mut active = Value::Null;
    for _ in 0..100 {
        let (_, body) = send(&app, Method::GET, &format!("/playback/{}", id)).await?;
        if body["state"] == "active" {
            active = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(active["seeks_issued"], 1);

    let pipeline = engine.last_pipeline().unwrap();
    let seeks = pipeline.seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].start, Duration::from_secs(30));
    assert_eq!(seeks[0].stop, None);

    let (status, body) = send(&app, Method::GET, "/playback").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/playback/{}", id)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(pipeline.is_detached());

    // Already stopped
    let (status, _) = send(&app, Method::DELETE, &format!("/playback/{}", id)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, Method::GET, &format!("/playback/{}", id)).await?;
    assert_eq!(body["outcome"]["kind"], "stopped");

    Ok(())
}

#[tokio::test]
async fn test_recording_control() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let app = app(temp_dir.path(), &ScriptedEngine::new()).await?;

    let (status, body) = send(&app, Method::POST, "/recordings/cam_1/start").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "recording");
    assert_eq!(body["sessions"].as_array().unwrap().len(), 2);

    let (status, _) = send(&app, Method::POST, "/recordings/cam_1/start").await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Method::GET, "/recordings/cam_1").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().iter().all(|s| s["is_running"] == true));

    let (status, body) = send(&app, Method::POST, "/recordings/cam_1/stop?stream=sub").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(body["sessions"][0]["stream_kind"], "secondary");

    // One stream idle again, so start is accepted
    let (status, _) = send(&app, Method::POST, "/recordings/cam_1/start?stream=sub").await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::POST, "/recordings/cam_1/stop").await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::POST, "/recordings/nope/start").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
