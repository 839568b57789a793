use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::naming::StreamKind;

/// A request to play back recorded video from an absolute time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    pub camera_id: String,
    pub stream_kind: StreamKind,
    /// Unix seconds
    pub start_ts: i64,
    /// Seconds of video to play; zero or negative means no limit
    #[serde(default)]
    pub duration: i64,
}

impl PlaybackRequest {
    pub fn new(camera_id: impl Into<String>, stream_kind: StreamKind, start_ts: i64) -> Self {
        Self {
            camera_id: camera_id.into(),
            stream_kind,
            start_ts,
            duration: 0,
        }
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn duration_limit(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration as u64))
    }
}

/// Query parameters of the playback endpoint: `stream`, `timestamp`, `duration`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackQuery {
    pub stream: Option<String>,
    pub timestamp: Option<i64>,
    pub duration: Option<i64>,
}

impl PlaybackQuery {
    pub fn stream_kind(&self) -> StreamKind {
        StreamKind::from_query(self.stream.as_deref())
    }

    /// `None` without a timestamp, which selects live rather than playback
    pub fn to_request(&self, camera_id: &str) -> Option<PlaybackRequest> {
        let start_ts = self.timestamp?;
        Some(
            PlaybackRequest::new(camera_id, self.stream_kind(), start_ts)
                .with_duration(self.duration.unwrap_or(0)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_duration_is_unbounded() {
        let req = PlaybackRequest::new("cam_1", StreamKind::Primary, 1_700_000_000);
        assert_eq!(req.duration_limit(), None);
        assert_eq!(req.clone().with_duration(-5).duration_limit(), None);
        assert_eq!(
            req.with_duration(150).duration_limit(),
            Some(Duration::from_secs(150))
        );
    }

    #[test]
    fn test_query_requires_timestamp() {
        let query = PlaybackQuery {
            stream: Some("1".to_string()),
            timestamp: None,
            duration: Some(60),
        };
        assert!(query.to_request("cam_1").is_none());

        let query = PlaybackQuery {
            timestamp: Some(1_700_000_000),
            ..query
        };
        let req = query.to_request("cam_1").unwrap();
        assert_eq!(req.stream_kind, StreamKind::Secondary);
        assert_eq!(req.duration, 60);
    }
}
