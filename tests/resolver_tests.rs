// Integration tests for the segment resolver
//
// Segments are laid out on disk at captured_at = {T+100, T+220, T+340} and
// playback requests are resolved against the real directory tree.

use anyhow::Result;
use camvault::naming::{SegmentNaming, StreamKind};
use camvault::playback::{PlaybackRequest, SegmentResolver};
use camvault::storage::SegmentScanner;
use chrono::{TimeZone, Utc};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const T: i64 = 1_700_000_000;

fn setup(stamps: &[i64]) -> Result<(TempDir, SegmentResolver)> {
    let temp_dir = TempDir::new()?;
    let naming = SegmentNaming::new(temp_dir.path(), "mkv");

    for ts in stamps {
        let time = Utc.timestamp_opt(*ts, 0).unwrap();
        let path = naming.path_for("cam_1", StreamKind::Primary, &time);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, b"segment")?;
    }

    let scanner = SegmentScanner::new(naming, vec!["mkv".to_string()]);
    Ok((temp_dir, SegmentResolver::new(scanner)))
}

fn request(start_ts: i64, duration: i64) -> PlaybackRequest {
    PlaybackRequest::new("cam_1", StreamKind::Primary, start_ts).with_duration(duration)
}

#[test]
fn test_resolve_without_duration() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100, T + 220, T + 340])?;

    let plan = resolver.resolve(&request(T + 250, 0))?;

    let stamps: Vec<i64> = plan.segments.iter().map(|s| s.captured_at).collect();
    assert_eq!(stamps, vec![T + 220]);
    assert_eq!(plan.start_offset, Duration::from_secs(30));
    assert_eq!(plan.duration_limit, None);

    Ok(())
}

#[test]
fn test_resolve_with_duration() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100, T + 220, T + 340])?;

    // Covers up to T+400; T+340 is the first segment reaching it
    let plan = resolver.resolve(&request(T + 250, 150))?;

    let stamps: Vec<i64> = plan.segments.iter().map(|s| s.captured_at).collect();
    assert_eq!(stamps, vec![T + 220, T + 340]);
    assert_eq!(plan.start_offset, Duration::from_secs(30));
    assert_eq!(plan.duration_limit, Some(Duration::from_secs(150)));
    assert_eq!(plan.files().len(), 2);

    Ok(())
}

#[test]
fn test_resolve_exact_timestamp_is_inclusive() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100, T + 220, T + 340])?;

    let plan = resolver.resolve(&request(T + 220, 0))?;

    assert_eq!(plan.segments[0].captured_at, T + 220);
    assert_eq!(plan.start_offset, Duration::ZERO);

    Ok(())
}

#[test]
fn test_resolve_before_first_segment_fails() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100, T + 220, T + 340])?;

    let err = resolver.resolve(&request(T + 99, 60)).unwrap_err();
    assert!(err.is_not_found());

    Ok(())
}

#[test]
fn test_resolve_empty_tree_fails() -> Result<()> {
    let (_dir, resolver) = setup(&[])?;

    let err = resolver.resolve(&request(T, 0)).unwrap_err();
    assert!(err.is_not_found());

    Ok(())
}

#[test]
fn test_resolve_negative_duration_is_unbounded() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100, T + 220, T + 340])?;

    let plan = resolver.resolve(&request(T + 100, -30))?;

    assert_eq!(plan.segments.len(), 1);
    assert_eq!(plan.duration_limit, None);

    Ok(())
}

#[test]
fn test_resolve_is_idempotent() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100, T + 220, T + 340])?;

    let first = resolver.resolve(&request(T + 150, 200))?;
    let second = resolver.resolve(&request(T + 150, 200))?;

    assert_eq!(first, second);

    Ok(())
}

#[test]
fn test_resolve_ignores_other_stream() -> Result<()> {
    let (_dir, resolver) = setup(&[T + 100])?;

    let secondary = PlaybackRequest::new("cam_1", StreamKind::Secondary, T + 150);
    assert!(resolver.resolve(&secondary).unwrap_err().is_not_found());

    Ok(())
}
