// Integration tests for the shared playback dispatcher
//
// Pipelines come from a scripted engine and the tokio clock is paused, so
// EOS draining and the retention of finished playbacks run deterministically.

use anyhow::Result;
use camvault::engine::{MediaEngine, PipelineDescription, PipelineEvent, PipelineState};
use camvault::naming::{Segment, StreamKind};
use camvault::playback::{
    CoordinatorState, DispatcherSettings, PlaybackDispatcher, PlaybackId, PlaybackOutcome,
    PlaybackPlan, PlaybackRequest, PlaybackStatus, SeekCoordinator,
};
use camvault::testing::{Command, ScriptedEngine, ScriptedPipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

const T: i64 = 1_700_000_000;

fn settings() -> DispatcherSettings {
    DispatcherSettings {
        eos_timeout: Duration::from_secs(2),
        finished_retention: Duration::from_secs(60),
    }
}

/// Register a playback 30s into one segment, optionally bounded, and start it
async fn start_playback(
    dispatcher: &PlaybackDispatcher,
    engine: &ScriptedEngine,
    limit_secs: Option<u64>,
) -> Result<(PlaybackId, Arc<ScriptedPipeline>)> {
    let pipeline = engine.build(&PipelineDescription::new("filesrc ! fakesink"))?;
    let scripted = engine.last_pipeline().unwrap();
    let events = pipeline.subscribe()?;

    let request = PlaybackRequest::new("cam_1", StreamKind::Primary, T + 30)
        .with_duration(limit_secs.unwrap_or(0) as i64);
    let plan = PlaybackPlan {
        segments: vec![Segment {
            camera_id: "cam_1".to_string(),
            stream_kind: StreamKind::Primary,
            captured_at: T,
            path: format!("/recordings/{}.mkv", T).into(),
        }],
        start_offset: Duration::from_secs(30),
        duration_limit: limit_secs.map(Duration::from_secs),
    };
    let coordinator = SeekCoordinator::new(
        Arc::clone(&pipeline),
        plan.start_offset,
        plan.duration_limit,
        Duration::ZERO,
    );

    let id = Uuid::new_v4();
    dispatcher
        .register(PlaybackStatus::new(id, &request, &plan), coordinator, events)
        .await?;
    pipeline.set_state(PipelineState::Playing)?;

    Ok((id, scripted))
}

/// Let the dispatcher work through queued events
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_segment_done_releases_after_eos_drains() -> Result<()> {
    let engine = ScriptedEngine::new();
    engine.hold_eos();
    let dispatcher = PlaybackDispatcher::spawn(settings());

    let (id, pipeline) = start_playback(&dispatcher, &engine, Some(60)).await?;
    settle().await;
    assert_eq!(pipeline.seeks().len(), 1);

    pipeline.emit(PipelineEvent::SegmentDone);
    settle().await;

    // EOS injected, pipeline still running until it drains
    assert_eq!(pipeline.commands().last(), Some(&Command::Eos));
    assert!(!pipeline.is_detached());
    let status = dispatcher.status(id).await.unwrap();
    assert_eq!(status.state, CoordinatorState::SegmentDone);
    assert!(status.outcome.is_none());

    pipeline.emit(PipelineEvent::Eos);
    settle().await;

    let commands = pipeline.commands();
    assert_eq!(
        &commands[commands.len() - 3..],
        &[
            Command::Eos,
            Command::Detach,
            Command::SetState(PipelineState::Null),
        ]
    );
    let status = dispatcher.status(id).await.unwrap();
    assert_eq!(status.outcome, Some(PlaybackOutcome::Completed));
    assert!(status.finished_at.is_some());

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_undrained_eos_released_after_timeout() -> Result<()> {
    let engine = ScriptedEngine::new();
    engine.hold_eos();
    let dispatcher = PlaybackDispatcher::spawn(settings());

    let (id, pipeline) = start_playback(&dispatcher, &engine, Some(60)).await?;
    settle().await;
    pipeline.emit(PipelineEvent::SegmentDone);

    sleep(Duration::from_secs(1)).await;
    assert!(!pipeline.is_detached());

    sleep(Duration::from_millis(1500)).await;
    assert!(pipeline.is_detached());
    assert_eq!(pipeline.state(), PipelineState::Null);
    assert_eq!(pipeline.eos_count(), 1);

    let status = dispatcher.status(id).await.unwrap();
    assert_eq!(status.outcome, Some(PlaybackOutcome::Completed));

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_finished_playbacks_are_forgotten() -> Result<()> {
    let engine = ScriptedEngine::new();
    let dispatcher = PlaybackDispatcher::spawn(settings());

    let mut finished = Vec::new();
    for _ in 0..3 {
        let (id, pipeline) = start_playback(&dispatcher, &engine, Some(60)).await?;
        settle().await;
        pipeline.emit(PipelineEvent::SegmentDone);
        finished.push(id);
    }
    let (running, _) = start_playback(&dispatcher, &engine, None).await?;
    settle().await;

    let all = dispatcher.list().await;
    assert_eq!(all.len(), 4);
    assert_eq!(all.iter().filter(|s| s.outcome.is_some()).count(), 3);

    sleep(Duration::from_secs(61)).await;

    for id in finished {
        assert!(dispatcher.status(id).await.is_none());
    }
    let remaining = dispatcher.list().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, running);
    assert_eq!(remaining[0].state, CoordinatorState::Active);

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_draining() -> Result<()> {
    let engine = ScriptedEngine::new();
    engine.hold_eos();
    let dispatcher = PlaybackDispatcher::spawn(settings());

    let (id, pipeline) = start_playback(&dispatcher, &engine, Some(60)).await?;
    settle().await;
    pipeline.emit(PipelineEvent::SegmentDone);
    settle().await;

    assert!(dispatcher.stop(id).await);
    assert!(pipeline.is_detached());
    assert!(!dispatcher.stop(id).await);

    let status = dispatcher.status(id).await.unwrap();
    assert_eq!(status.outcome, Some(PlaybackOutcome::Stopped));

    // The drain deadline passing later does not touch the stopped playback
    sleep(Duration::from_secs(3)).await;
    assert_eq!(pipeline.commands().iter().filter(|c| **c == Command::Detach).count(), 1);

    dispatcher.shutdown().await;
    Ok(())
}
