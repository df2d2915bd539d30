//! External media tool collaborators.
//!
//! The engine never links a media library; it shells out to `ffmpeg` and
//! `ffprobe` found in PATH. The trait boundary keeps the pipeline testable:
//! tests substitute a scripted executor and no subprocess is spawned.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use reelsmith_common::{ComposeError, ComposeResult};

/// Exit status of one external tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolStatus {
    /// Process return code. Zero means success by convention.
    pub rc: i32,
}

impl ToolStatus {
    pub fn success(&self) -> bool {
        self.rc == 0
    }
}

/// Probe result for one media file. Fields are `None` when the tool could
/// not determine them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub sample_rate: Option<u32>,
}

/// Boundary to the external media tool.
///
/// `execute` reports a nonzero exit as a status, not an error; each stage
/// decides what a nonzero rc means for it. Only spawning failures are
/// errors.
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn execute(&self, args: &[String]) -> ComposeResult<ToolStatus>;

    async fn probe(&self, source: &Path) -> ComposeResult<MediaInfo>;
}

/// `MediaTool` backed by the `ffmpeg` and `ffprobe` binaries.
pub struct FfmpegTool {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegTool {
    pub fn new() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }

    /// Use explicit binary paths instead of PATH lookup.
    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Whether both binaries can be found.
    pub fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn execute(&self, args: &[String]) -> ComposeResult<ToolStatus> {
        tracing::debug!(args = ?args, "Running ffmpeg");

        let output = Command::new(&self.ffmpeg)
            .args(args)
            .output()
            .await
            .map_err(|e| ComposeError::tool(format!("failed to start ffmpeg: {e}")))?;

        let rc = output.status.code().unwrap_or(-1);
        if rc != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(rc, stderr = %tail(&stderr, 800), "ffmpeg exited nonzero");
        }

        Ok(ToolStatus { rc })
    }

    async fn probe(&self, source: &Path) -> ComposeResult<MediaInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-show_entries",
                "stream=codec_type,codec_name,duration,sample_rate",
                "-of",
                "json",
            ])
            .arg(source)
            .output()
            .await
            .map_err(|e| ComposeError::tool(format!("failed to start ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ComposeError::probe(source, tail(&stderr, 400)));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ComposeError::probe(source, format!("unparseable probe output: {e}")))?;

        Ok(media_info_from_probe(&parsed))
    }
}

/// Extract [`MediaInfo`] from ffprobe's JSON output. The stream duration is
/// preferred (video first, then audio) with the container duration as a
/// fallback.
fn media_info_from_probe(parsed: &serde_json::Value) -> MediaInfo {
    let empty = Vec::new();
    let streams = parsed["streams"].as_array().unwrap_or(&empty);

    let stream_of = |kind: &str| {
        streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some(kind))
    };

    let video = stream_of("video");
    let audio = stream_of("audio");

    let duration_of = |stream: Option<&serde_json::Value>| {
        stream
            .and_then(|s| s["duration"].as_str())
            .and_then(|d| d.parse::<f64>().ok())
    };

    let duration = duration_of(video)
        .or_else(|| duration_of(audio))
        .or_else(|| {
            parsed["format"]["duration"]
                .as_str()
                .and_then(|d| d.parse::<f64>().ok())
        });

    MediaInfo {
        duration,
        video_codec: video
            .and_then(|s| s["codec_name"].as_str())
            .map(str::to_string),
        audio_codec: audio
            .and_then(|s| s["codec_name"].as_str())
            .map(str::to_string),
        sample_rate: audio
            .and_then(|s| s["sample_rate"].as_str())
            .and_then(|r| r.parse::<u32>().ok()),
    }
}

fn command_exists(binary: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn tail(text: &str, max: usize) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().nth_back(max.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}
