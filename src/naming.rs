//! Segment naming scheme
//!
//! Recordings live under a fixed directory template:
//!
//! ```text
//! {base}/{quality}/{camera}/{YYYY}/{MM}/{DD}/{HH}/{unix_ts}.{ext}
//! ```
//!
//! The Unix timestamp in the filename is the segment's start time and the only
//! index key. Parsing accepts that form, or falls back to the `/YYYY/MM/DD/HH/`
//! fragment of the path when the filename carries no timestamp.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Directory bucket for primary (main) streams
pub const HI_QUALITY_DIR: &str = "hi_quality";
/// Directory bucket for secondary (sub) streams
pub const LOW_QUALITY_DIR: &str = "low_quality";

/// Shorter leading digit runs are not taken as Unix timestamps
const MIN_FILENAME_TS_DIGITS: usize = 9;

/// Quality/encoding track recorded independently per camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Main, high-quality stream
    Primary,
    /// Sub, low-quality stream
    Secondary,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Primary, StreamKind::Secondary];

    /// Quality bucket directory name. Fixed mapping, not configurable.
    pub fn quality_dir(self) -> &'static str {
        match self {
            StreamKind::Primary => HI_QUALITY_DIR,
            StreamKind::Secondary => LOW_QUALITY_DIR,
        }
    }

    /// Parse the `stream` query parameter.
    ///
    /// `1`, `sub` and `secondary` select the secondary stream, anything else
    /// selects the primary stream.
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1") | Some("sub") | Some("secondary") => StreamKind::Secondary,
            _ => StreamKind::Primary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Primary => "primary",
            StreamKind::Secondary => "secondary",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub camera_id: String,
    pub stream_kind: StreamKind,
    /// Unix seconds at which recording of this segment began
    pub captured_at: i64,
    pub path: PathBuf,
}

/// Maps (camera, stream kind, time) to on-disk locations
#[derive(Debug, Clone)]
pub struct SegmentNaming {
    base: PathBuf,
    extension: String,
}

impl SegmentNaming {
    pub fn new(base: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            extension: extension.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Root of one (camera, stream kind) series: `{base}/{quality}/{camera}`
    pub fn series_root(&self, camera_id: &str, kind: StreamKind) -> PathBuf {
        self.base.join(kind.quality_dir()).join(camera_id)
    }

    /// Hour directory holding segments started at `time`
    pub fn directory_for<Tz: TimeZone>(
        &self,
        camera_id: &str,
        kind: StreamKind,
        time: &DateTime<Tz>,
    ) -> PathBuf {
        let local = time.with_timezone(&Local);
        self.series_root(camera_id, kind)
            .join(format!("{:04}", local.year()))
            .join(format!("{:02}", local.month()))
            .join(format!("{:02}", local.day()))
            .join(format!("{:02}", local.hour()))
    }

    /// Full path of the segment started at `time`. Pure, no I/O.
    pub fn path_for<Tz: TimeZone>(
        &self,
        camera_id: &str,
        kind: StreamKind,
        time: &DateTime<Tz>,
    ) -> PathBuf {
        self.directory_for(camera_id, kind, time)
            .join(format!("{}.{}", time.timestamp(), self.extension))
    }
}

/// Extract the segment start timestamp embedded in `path`.
///
/// Tries the leading numeric filename first, then a `/YYYY/MM/DD/HH/` path
/// fragment (which resolves to the start of that local hour).
pub fn parse_timestamp(path: &Path) -> Option<i64> {
    filename_timestamp(path).or_else(|| hour_directory_timestamp(path))
}

fn filename_timestamp(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let digits = leading_digits(name);
    if digits.len() < MIN_FILENAME_TS_DIGITS {
        return None;
    }
    digits.parse().ok()
}

fn hour_directory_timestamp(path: &Path) -> Option<i64> {
    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    parts.windows(4).find_map(|w| {
        let year = numeric_component(w[0], 4)?;
        let month = numeric_component(w[1], 2)?;
        let day = numeric_component(w[2], 2)?;
        let hour = leading_digits(w[3]);
        if hour.is_empty() || hour.len() > 2 {
            return None;
        }
        let hour: u32 = hour.parse().ok()?;
        Local
            .with_ymd_and_hms(year as i32, month, day, hour, 0, 0)
            .earliest()
            .map(|t| t.timestamp())
    })
}

/// A path component made only of digits, at most `max_len` of them
fn numeric_component(part: &str, max_len: usize) -> Option<u32> {
    if part.is_empty() || part.len() > max_len || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn leading_digits(s: &str) -> &str {
    let end = s
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(s.len());
    &s[..end]
}
