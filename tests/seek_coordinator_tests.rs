// Integration tests for the seek coordinator
//
// A scripted pipeline records every command, so these tests check exactly
// which seeks and EOS events the coordinator issues for each notification.

use anyhow::Result;
use camvault::engine::{
    MediaEngine, PipelineDescription, PipelineEvent, PipelineState, SeekFlags, SeekRequest,
};
use camvault::playback::{CoordinatorState, Flow, PlaybackOutcome, SeekCoordinator};
use camvault::testing::{Command, ScriptedEngine, ScriptedPipeline};
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(200);

fn build_coordinator(
    engine: &ScriptedEngine,
    offset: u64,
    limit: Option<u64>,
) -> Result<(SeekCoordinator, Arc<ScriptedPipeline>)> {
    let pipeline = engine.build(&PipelineDescription::new("filesrc ! fakesink"))?;
    let scripted = engine.last_pipeline().unwrap();
    let coordinator = SeekCoordinator::new(
        pipeline,
        Duration::from_secs(offset),
        limit.map(Duration::from_secs),
        SETTLE,
    );
    Ok((coordinator, scripted))
}

fn playing() -> PipelineEvent {
    PipelineEvent::StateChanged {
        old: PipelineState::Paused,
        current: PipelineState::Playing,
    }
}

#[tokio::test(start_paused = true)]
async fn test_open_ended_seek_after_playing() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 30, None)?;

    assert_eq!(coordinator.handle(PipelineEvent::Prepared).await, Flow::Continue);
    assert_eq!(coordinator.state(), CoordinatorState::AwaitingPlaying);
    assert!(pipeline.seeks().is_empty(), "no seek before PLAYING");

    coordinator.handle(playing()).await;

    assert_eq!(
        pipeline.seeks(),
        vec![SeekRequest {
            start: Duration::from_secs(30),
            stop: None,
            flags: SeekFlags::FLUSH | SeekFlags::ACCURATE,
        }]
    );
    assert_eq!(coordinator.state(), CoordinatorState::Active);

    // A second PLAYING notification must not seek again
    coordinator.handle(playing()).await;
    assert_eq!(pipeline.seeks().len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_bounded_seek_uses_segment_mode() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 30, Some(150))?;

    coordinator.handle(PipelineEvent::Prepared).await;
    coordinator.handle(playing()).await;

    let seeks = pipeline.seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].start, Duration::from_secs(30));
    assert_eq!(seeks[0].stop, Some(Duration::from_secs(180)));
    assert!(seeks[0].flags.contains(SeekFlags::SEGMENT));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_limit_from_start() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 0, Some(60))?;

    coordinator.handle(PipelineEvent::Prepared).await;
    coordinator.handle(playing()).await;

    let seeks = pipeline.seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].start, Duration::ZERO);
    assert_eq!(seeks[0].stop, Some(Duration::from_secs(60)));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_seek_without_offset_or_limit() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 0, None)?;

    coordinator.handle(PipelineEvent::Prepared).await;
    coordinator.handle(playing()).await;

    assert!(pipeline.seeks().is_empty());
    assert_eq!(coordinator.state(), CoordinatorState::Active);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_seek_waits_for_settle_delay() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, _pipeline) = build_coordinator(&engine, 30, None)?;

    coordinator.handle(PipelineEvent::Prepared).await;

    let before = tokio::time::Instant::now();
    coordinator.handle(playing()).await;

    assert!(before.elapsed() >= SETTLE);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_events_before_prepared_are_ignored() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 30, Some(10))?;

    assert_eq!(coordinator.handle(playing()).await, Flow::Continue);
    assert_eq!(coordinator.handle(PipelineEvent::SegmentDone).await, Flow::Continue);

    assert_eq!(coordinator.state(), CoordinatorState::Built);
    assert!(pipeline.commands().is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_segment_done_sends_single_eos() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 30, Some(150))?;

    coordinator.handle(PipelineEvent::Prepared).await;
    coordinator.handle(playing()).await;

    let flow = coordinator.handle(PipelineEvent::SegmentDone).await;
    assert_eq!(flow, Flow::Draining);
    assert_eq!(coordinator.state(), CoordinatorState::SegmentDone);

    // No further seeks or EOS while the injected EOS drains
    assert_eq!(coordinator.handle(PipelineEvent::SegmentDone).await, Flow::Continue);
    assert_eq!(coordinator.handle(playing()).await, Flow::Continue);

    assert_eq!(pipeline.eos_count(), 1);
    assert_eq!(pipeline.seeks().len(), 1);

    // The EOS leaving the pipeline completes the playback
    assert_eq!(
        coordinator.handle(PipelineEvent::Eos).await,
        Flow::Finished(PlaybackOutcome::Completed)
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_end_of_stream_and_error_finish() -> Result<()> {
    let engine = ScriptedEngine::new();

    let (mut coordinator, _pipeline) = build_coordinator(&engine, 0, None)?;
    coordinator.handle(PipelineEvent::Prepared).await;
    assert_eq!(
        coordinator.handle(PipelineEvent::Eos).await,
        Flow::Finished(PlaybackOutcome::EndOfStream)
    );

    let (mut coordinator, _pipeline) = build_coordinator(&engine, 0, None)?;
    let flow = coordinator
        .handle(PipelineEvent::Error {
            message: "Could not open resource for reading.".to_string(),
            debug: None,
        })
        .await;
    assert_eq!(
        flow,
        Flow::Finished(PlaybackOutcome::Failed {
            message: "Could not open resource for reading.".to_string()
        })
    );
    assert_eq!(coordinator.state(), CoordinatorState::Error);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_seek_continues_unseeked() -> Result<()> {
    let engine = ScriptedEngine::new();
    engine.reject_seeks();
    let (mut coordinator, pipeline) = build_coordinator(&engine, 30, None)?;

    coordinator.handle(PipelineEvent::Prepared).await;
    assert_eq!(coordinator.handle(playing()).await, Flow::Continue);

    assert_eq!(pipeline.seeks().len(), 1);
    assert_eq!(coordinator.state(), CoordinatorState::Active);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_release_detaches_before_stopping() -> Result<()> {
    let engine = ScriptedEngine::new();
    let (coordinator, pipeline) = build_coordinator(&engine, 0, None)?;

    coordinator.release();

    assert_eq!(
        pipeline.commands(),
        vec![Command::Detach, Command::SetState(PipelineState::Null)]
    );
    assert!(pipeline.is_detached());

    Ok(())
}
