use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::request::PlaybackRequest;
use crate::error::{CamvaultError, Result};
use crate::naming::Segment;
use crate::storage::SegmentScanner;

/// Segments and offsets that satisfy a playback request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackPlan {
    /// Non-empty, ascending by `captured_at`
    pub segments: Vec<Segment>,
    /// Position within the first segment where playback starts
    pub start_offset: Duration,
    /// Amount of video to play; `None` plays to the end of the segments
    pub duration_limit: Option<Duration>,
}

impl PlaybackPlan {
    pub fn files(&self) -> Vec<PathBuf> {
        self.segments.iter().map(|s| s.path.clone()).collect()
    }
}

/// Pick the segments covering `start_ts .. start_ts + duration`.
///
/// `segments` must be ascending by `captured_at`. The start segment is the
/// latest one at or before `start_ts`. With a positive `duration`, following
/// segments are appended up to and including the first one starting at or
/// after the end of the range; otherwise only the start segment is used.
/// Returns `None` when no segment starts at or before `start_ts`.
pub fn select_segments(segments: &[Segment], start_ts: i64, duration: i64) -> Option<PlaybackPlan> {
    let start = segments.iter().rposition(|s| s.captured_at <= start_ts)?;
    let first = &segments[start];

    let selected = if duration > 0 {
        let end_ts = start_ts.saturating_add(duration);
        let mut selected = Vec::new();
        for segment in &segments[start..] {
            selected.push(segment.clone());
            if segment.captured_at >= end_ts {
                break;
            }
        }
        selected
    } else {
        vec![first.clone()]
    };

    let offset = (start_ts - first.captured_at).max(0) as u64;

    Some(PlaybackPlan {
        segments: selected,
        start_offset: Duration::from_secs(offset),
        duration_limit: (duration > 0).then(|| Duration::from_secs(duration as u64)),
    })
}

/// Resolves playback requests against the on-disk segment tree
#[derive(Debug, Clone)]
pub struct SegmentResolver {
    scanner: SegmentScanner,
}

impl SegmentResolver {
    pub fn new(scanner: SegmentScanner) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &SegmentScanner {
        &self.scanner
    }

    /// Scan the request's series and select its segments.
    ///
    /// Blocking: walks the directory tree.
    pub fn resolve(&self, request: &PlaybackRequest) -> Result<PlaybackPlan> {
        let segments = self.scanner.scan(&request.camera_id, request.stream_kind);
        debug!(
            camera = %request.camera_id,
            stream = %request.stream_kind,
            "Resolving {} against {} segments",
            request.start_ts,
            segments.len()
        );

        let plan = select_segments(&segments, request.start_ts, request.duration).ok_or_else(|| {
            CamvaultError::NotFound {
                camera: request.camera_id.clone(),
                stream: request.stream_kind,
                timestamp: request.start_ts,
            }
        })?;

        info!(
            camera = %request.camera_id,
            stream = %request.stream_kind,
            offset_secs = plan.start_offset.as_secs(),
            "Selected {} segment(s) starting at {}",
            plan.segments.len(),
            plan.segments[0].captured_at
        );

        Ok(plan)
    }
}
