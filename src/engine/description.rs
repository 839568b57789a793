//! Textual pipeline descriptions
//!
//! The engine's launch syntax is treated as a serialization format: these
//! builders are the only place the core emits it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Video codec carried by a camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
    /// Unknown upstream codec; recorded and served as H.264
    Auto,
}

impl Codec {
    fn is_h265(self) -> bool {
        matches!(self, Codec::H265)
    }

    pub fn depayloader(self) -> &'static str {
        if self.is_h265() {
            "rtph265depay"
        } else {
            "rtph264depay"
        }
    }

    pub fn parser(self) -> &'static str {
        if self.is_h265() {
            "h265parse"
        } else {
            "h264parse"
        }
    }

    pub fn payloader(self) -> &'static str {
        if self.is_h265() {
            "rtph265pay"
        } else {
            "rtph264pay"
        }
    }
}

/// Segment file container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Matroska,
    Mp4,
}

impl Container {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mkv" => Some(Container::Matroska),
            "mp4" => Some(Container::Mp4),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// File extension written for this container
    pub fn extension(self) -> &'static str {
        match self {
            Container::Matroska => "mkv",
            Container::Mp4 => "mp4",
        }
    }

    pub fn muxer(self) -> &'static str {
        match self {
            Container::Matroska => "matroskamux streamable=true writing-app=camvault",
            Container::Mp4 => "mp4mux fragment-duration=1000 streamable=true",
        }
    }

    pub fn demuxer(self) -> &'static str {
        match self {
            Container::Matroska => "matroskademux",
            Container::Mp4 => "qtdemux",
        }
    }
}

/// A pipeline in the engine's launch syntax
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PipelineDescription(String);

impl PipelineDescription {
    pub fn new(launch: impl Into<String>) -> Self {
        Self(launch.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a downstream fragment after the last element
    pub fn with_sink(&self, sink: &str) -> Self {
        let sink = sink.trim();
        if sink.is_empty() {
            return self.clone();
        }
        Self(format!("{} ! {}", self.0, sink))
    }

    /// Split into command-line arguments for `gst-launch-1.0`.
    ///
    /// Double-quoted values stay one argument with quotes removed, so paths
    /// containing spaces survive the round trip.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = self.0.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' if in_quotes => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '"' => in_quotes = !in_quotes,
                c if c.is_whitespace() && !in_quotes => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            args.push(current);
        }

        args
    }
}

impl fmt::Display for PipelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Capture pipeline: source → depayloader → parser → queue → muxer → file sink
pub fn capture(url: &str, codec: Codec, container: Container, output: &Path) -> PipelineDescription {
    PipelineDescription(format!(
        "rtspsrc location={url} protocols=tcp latency=200 buffer-mode=auto retry=5 \
         timeout=5000000 tcp-timeout=5000000 do-rtcp=false drop-on-latency=true ! \
         {depay} ! {parse} config-interval=-1 ! \
         queue max-size-buffers=200 max-size-bytes=10485760 max-size-time=3000000000 leaky=downstream ! \
         {mux} ! filesink location={location} async=false sync=false",
        url = quote(Path::new(url)),
        depay = codec.depayloader(),
        parse = codec.parser(),
        mux = container.muxer(),
        location = quote(output),
    ))
}

/// Playback pipeline ending in an RTP payloader named `pay0`.
///
/// One file is demuxed directly; several are concatenated in order so the
/// downstream timeline is continuous across segment boundaries.
pub fn playback(files: &[PathBuf], codec: Codec) -> PipelineDescription {
    let parse = codec.parser();
    let pay = codec.payloader();
    let tail = format!(
        "queue max-size-time=5000000000 max-size-bytes=0 max-size-buffers=0 ! \
         {pay} name=pay0 pt=96 config-interval=-1 mtu=1400"
    );

    if let [file] = files {
        let demux = demuxer_for(file);
        return PipelineDescription(format!(
            "filesrc location={} ! {demux} ! {parse} ! {tail}",
            quote(file)
        ));
    }

    let branches: Vec<String> = files
        .iter()
        .map(|file| {
            format!(
                "filesrc location={} ! {} ! {parse} ! queue max-size-time=3000000000 ! concat.",
                quote(file),
                demuxer_for(file)
            )
        })
        .collect();

    PipelineDescription(format!(
        "{} concat name=concat ! {parse} ! {tail}",
        branches.join(" ")
    ))
}

fn demuxer_for(file: &Path) -> &'static str {
    Container::from_path(file)
        .unwrap_or(Container::Matroska)
        .demuxer()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_file_playback() {
        let desc = playback(&[PathBuf::from("/rec/1700000000.mkv")], Codec::H264);
        assert!(desc.as_str().starts_with("filesrc location=\"/rec/1700000000.mkv\" ! matroskademux ! h264parse"));
        assert!(desc.as_str().contains("rtph264pay name=pay0"));
        assert!(!desc.as_str().contains("concat"));
    }

    #[test]
    fn test_concat_playback_preserves_order() {
        let files = vec![
            PathBuf::from("/rec/1700000000.mkv"),
            PathBuf::from("/rec/1700000080.mp4"),
        ];
        let desc = playback(&files, Codec::H265);
        let s = desc.as_str();
        assert!(s.contains("concat name=concat ! h265parse"));
        let first = s.find("1700000000.mkv").unwrap();
        let second = s.find("1700000080.mp4").unwrap();
        assert!(first < second);
        assert!(s.contains("qtdemux"));
        assert!(s.contains("rtph265pay name=pay0"));
    }

    #[test]
    fn test_capture_uses_codec_and_container() {
        let desc = capture(
            "rtsp://10.0.0.5/stream",
            Codec::H265,
            Container::Matroska,
            Path::new("/rec/hi_quality/cam/1700000000.mkv"),
        );
        let s = desc.as_str();
        assert!(s.contains("rtph265depay ! h265parse config-interval=-1"));
        assert!(s.contains("matroskamux"));
        assert!(s.contains("filesink location=\"/rec/hi_quality/cam/1700000000.mkv\""));
    }

    #[test]
    fn test_launch_args_keep_quoted_paths() {
        let desc = PipelineDescription::new("filesrc location=\"/my rec/a.mkv\" ! fakesink");
        assert_eq!(
            desc.launch_args(),
            vec!["filesrc", "location=/my rec/a.mkv", "!", "fakesink"]
        );
    }

    #[test]
    fn test_with_sink() {
        let desc = PipelineDescription::new("videotestsrc").with_sink("fakesink sync=true");
        assert_eq!(desc.as_str(), "videotestsrc ! fakesink sync=true");
        assert_eq!(desc.with_sink("  ").as_str(), desc.as_str());
    }
}
