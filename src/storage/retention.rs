use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scanner::SegmentScanner;
use crate::naming::{Segment, StreamKind};

/// Which segments the sweeper is allowed to delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPolicy {
    /// Segments older than this are removed
    pub max_age: Option<Duration>,
    /// Upper bound on the total size of all recorded segments
    pub max_total_bytes: Option<u64>,
}

impl RetentionPolicy {
    pub fn is_noop(&self) -> bool {
        self.max_age.is_none() && self.max_total_bytes.is_none()
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}

/// Periodic segment deletion across every recorded series
///
/// The newest segment of each series is never touched since its writer may
/// still hold it open.
pub struct RetentionSweeper {
    scanner: SegmentScanner,
    series: Vec<(String, StreamKind)>,
    policy: RetentionPolicy,
}

struct Candidate {
    segment: Segment,
    size: u64,
}

impl RetentionSweeper {
    pub fn new(
        scanner: SegmentScanner,
        cameras: impl IntoIterator<Item = String>,
        policy: RetentionPolicy,
    ) -> Self {
        let series = cameras
            .into_iter()
            .flat_map(|camera| StreamKind::ALL.map(|kind| (camera.clone(), kind)))
            .collect();

        Self {
            scanner,
            series,
            policy,
        }
    }

    /// Run one sweep against the wall-clock time `now` (Unix seconds)
    pub fn sweep(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();
        if self.policy.is_noop() {
            return report;
        }

        let mut candidates = Vec::new();
        let mut total_bytes = 0u64;

        for (camera, kind) in &self.series {
            let mut segments = self.scanner.scan(camera, *kind);
            let newest = segments.pop();

            if let Some(newest) = newest {
                total_bytes += file_size(&newest.path);
            }

            for segment in segments {
                let size = file_size(&segment.path);
                total_bytes += size;
                candidates.push(Candidate { segment, size });
            }
        }

        candidates.sort_by_key(|c| c.segment.captured_at);

        let cutoff = self
            .policy
            .max_age
            .map(|age| now.saturating_sub(age.as_secs() as i64));

        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let expired = cutoff.is_some_and(|c| candidate.segment.captured_at < c);
            if expired && self.remove(&candidate) {
                total_bytes = total_bytes.saturating_sub(candidate.size);
                report.removed += 1;
                report.freed_bytes += candidate.size;
            } else {
                kept.push(candidate);
            }
        }

        if let Some(budget) = self.policy.max_total_bytes {
            for candidate in &kept {
                if total_bytes <= budget {
                    break;
                }
                if self.remove(candidate) {
                    total_bytes = total_bytes.saturating_sub(candidate.size);
                    report.removed += 1;
                    report.freed_bytes += candidate.size;
                }
            }
        }

        report.remaining_bytes = total_bytes;

        if report.removed > 0 {
            info!(
                "Retention sweep removed {} segments ({:.2} MB freed, {:.2} MB remaining)",
                report.removed,
                report.freed_bytes as f64 / (1024.0 * 1024.0),
                report.remaining_bytes as f64 / (1024.0 * 1024.0)
            );
        } else {
            debug!("Retention sweep: nothing to remove");
        }

        report
    }

    /// Sweep every `interval` until `cancel` fires
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let sweeper = Arc::new(self);

        tokio::spawn(async move {
            info!("Retention sweeper started (every {}s)", interval.as_secs());
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        let sweeper = Arc::clone(&sweeper);
                        if let Err(e) = tokio::task::spawn_blocking(move || sweeper.sweep(now)).await {
                            warn!("Retention sweep panicked: {}", e);
                        }
                    }
                }
            }

            info!("Retention sweeper stopped");
        })
    }

    fn remove(&self, candidate: &Candidate) -> bool {
        let path = &candidate.segment.path;
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed segment {:?}", path);
                let root = self
                    .scanner
                    .naming()
                    .series_root(&candidate.segment.camera_id, candidate.segment.stream_kind);
                prune_empty_dirs(path, &root);
                true
            }
            Err(e) => {
                warn!("Failed to remove segment {:?}: {}", path, e);
                false
            }
        }
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Remove now-empty parent directories of `path`, stopping at `root`
fn prune_empty_dirs(path: &Path, root: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        // remove_dir fails on non-empty directories, which ends the walk
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}
