use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{Codec, Container};
use crate::naming::{SegmentNaming, StreamKind};
use crate::playback::{DispatcherSettings, PlaybackSettings};
use crate::recording::RecordingSettings;
use crate::storage::RetentionPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    pub base_path: PathBuf,
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u64,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_rotation_settle_ms")]
    pub rotation_settle_ms: u64,
    #[serde(default = "default_rotation_retries")]
    pub rotation_retries: u32,
    #[serde(default = "default_rotation_backoff_ms")]
    pub rotation_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Pause between reaching PLAYING and issuing the seek
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Launch fragment appended after the `pay0` payloader
    #[serde(default = "default_sink")]
    pub sink: String,
    /// File extensions the scanner recognizes as segments
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Time a pipeline gets to drain an injected EOS before it is released
    #[serde(default = "default_eos_timeout_ms")]
    pub eos_timeout_ms: u64,
    /// How long finished playbacks remain listed
    #[serde(default = "default_finished_retention_secs")]
    pub finished_retention_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            sink: default_sink(),
            extensions: default_extensions(),
            eos_timeout_ms: default_eos_timeout_ms(),
            finished_retention_secs: default_finished_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
    pub max_age_hours: Option<u64>,
    pub max_total_gb: Option<f64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_retention_interval_secs(),
            max_age_hours: None,
            max_total_gb: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Launch,
    Gstreamer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,
    #[serde(default = "default_launch_binary")]
    pub launch_binary: String,
    /// Time an interrupted launcher gets to finalize its file before it is
    /// killed. Defaults to three quarters of `recording.stop_timeout_secs`.
    pub stop_grace_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            launch_binary: default_launch_binary(),
            stop_grace_ms: None,
        }
    }
}

/// One camera and its two RTSP streams
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub main_url: String,
    pub sub_url: String,
    #[serde(default)]
    pub codec_main: Codec,
    #[serde(default)]
    pub codec_sub: Codec,
}

impl CameraConfig {
    pub fn url_for(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Primary => &self.main_url,
            StreamKind::Secondary => &self.sub_url,
        }
    }

    pub fn codec_for(&self, kind: StreamKind) -> Codec {
        match kind {
            StreamKind::Primary => self.codec_main,
            StreamKind::Secondary => self.codec_sub,
        }
    }
}

fn default_segment_duration_secs() -> u64 {
    80
}

fn default_container() -> String {
    "mkv".to_string()
}

fn default_start_timeout_secs() -> u64 {
    5
}

fn default_stop_timeout_secs() -> u64 {
    2
}

fn default_rotation_settle_ms() -> u64 {
    100
}

fn default_rotation_retries() -> u32 {
    3
}

fn default_rotation_backoff_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_sink() -> String {
    "fakesink sync=true".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["mkv".to_string(), "mp4".to_string()]
}

fn default_eos_timeout_ms() -> u64 {
    2000
}

fn default_finished_retention_secs() -> u64 {
    600
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_launch_binary() -> String {
    crate::engine::launch::DEFAULT_LAUNCH_BINARY.to_string()
}

impl Config {
    /// Load `path` (extension optional) layered with `CAMVAULT__*` environment
    /// variables, e.g. `CAMVAULT__SERVICE__HTTP__PORT=9000`.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CAMVAULT").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        let cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        self.container()?;
        if self.recording.segment_duration_secs == 0 {
            return Err(anyhow!("recording.segment_duration_secs must be positive"));
        }

        if let Some(gb) = self.retention.max_total_gb {
            if gb.is_nan() || gb <= 0.0 {
                return Err(anyhow!("retention.max_total_gb must be positive, got {}", gb));
            }
        }

        let stop_timeout = Duration::from_secs(self.recording.stop_timeout_secs);
        if self.launch_stop_grace() >= stop_timeout {
            return Err(anyhow!(
                "engine.stop_grace_ms must be shorter than recording.stop_timeout_secs"
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.name.as_str()) {
                return Err(anyhow!("Duplicate camera name: {}", camera.name));
            }
        }

        Ok(())
    }

    pub fn container(&self) -> Result<Container> {
        Container::from_extension(&self.recording.container)
            .ok_or_else(|| anyhow!("Unsupported container: {}", self.recording.container))
    }

    pub fn naming(&self) -> Result<SegmentNaming> {
        Ok(SegmentNaming::new(
            self.recording.base_path.clone(),
            self.container()?.extension(),
        ))
    }

    pub fn recording_settings(&self) -> Result<RecordingSettings> {
        let r = &self.recording;
        Ok(RecordingSettings {
            segment_duration: Duration::from_secs(r.segment_duration_secs),
            container: self.container()?,
            start_timeout: Duration::from_secs(r.start_timeout_secs),
            stop_timeout: Duration::from_secs(r.stop_timeout_secs),
            rotation_settle: Duration::from_millis(r.rotation_settle_ms),
            rotation_retries: r.rotation_retries,
            rotation_backoff: Duration::from_millis(r.rotation_backoff_ms),
        })
    }

    pub fn launch_stop_grace(&self) -> Duration {
        match self.engine.stop_grace_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.recording.stop_timeout_secs) * 3 / 4,
        }
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        let p = &self.playback;
        PlaybackSettings {
            settle_delay: Duration::from_millis(p.settle_delay_ms),
            sink: p.sink.clone(),
            dispatcher: DispatcherSettings {
                eos_timeout: Duration::from_millis(p.eos_timeout_ms),
                finished_retention: Duration::from_secs(p.finished_retention_secs),
            },
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        let r = &self.retention;
        RetentionPolicy {
            max_age: r.max_age_hours.map(|h| Duration::from_secs(h * 3600)),
            max_total_bytes: r
                .max_total_gb
                .map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64),
        }
    }

    pub fn camera(&self, name: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.name == name)
    }
}
