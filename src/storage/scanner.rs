use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::naming::{parse_timestamp, Segment, SegmentNaming, StreamKind};

/// Segment index scanner
///
/// Walks the `{base}/{quality}/{camera}` tree on every call. There is no
/// persisted index; a scan runs once per playback request.
#[derive(Debug, Clone)]
pub struct SegmentScanner {
    naming: SegmentNaming,
    extensions: Vec<String>,
}

impl SegmentScanner {
    pub fn new(naming: SegmentNaming, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self { naming, extensions }
    }

    pub fn naming(&self) -> &SegmentNaming {
        &self.naming
    }

    /// All segments of one series, ascending by `captured_at`.
    ///
    /// Files with unrecognized extensions or without a parseable timestamp
    /// are skipped. A missing series root yields an empty list.
    pub fn scan(&self, camera_id: &str, kind: StreamKind) -> Vec<Segment> {
        let root = self.naming.series_root(camera_id, kind);
        if !root.is_dir() {
            debug!("No recordings directory at {:?}", root);
            return Vec::new();
        }

        let mut segments: Vec<Segment> = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.is_recognized(entry.path()))
            .filter_map(|entry| {
                let captured_at = parse_timestamp(entry.path())?;
                Some(Segment {
                    camera_id: camera_id.to_string(),
                    stream_kind: kind,
                    captured_at,
                    path: entry.into_path(),
                })
            })
            .collect();

        segments.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.path.cmp(&b.path))
        });

        debug!(
            "Scanned {:?}: {} segments for {}/{}",
            root,
            segments.len(),
            camera_id,
            kind
        );

        segments
    }

    fn is_recognized(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|known| *known == e)
            })
            .unwrap_or(false)
    }
}
