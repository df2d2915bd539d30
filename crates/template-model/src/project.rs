//! Project configuration and compile results.
//!
//! The project configuration is supplied by the caller alongside the
//! descriptor; the compile result is what the engine hands back on success.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::descriptor::SubtitleRef;

/// Caller-supplied configuration for one compile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Scratch directory for intermediate artifacts. Defaults to `build`.
    pub build_dir: Option<PathBuf>,

    /// Temp directory for rename-then-rewrite steps. Defaults to
    /// `<build_dir>/temp`.
    pub temp_dir: Option<PathBuf>,

    /// Persistent asset store shared across compiles. Defaults to `assets`.
    pub assets_dir: Option<PathBuf>,

    /// Where the final video is relocated. When unset, the output stays in
    /// the build directory.
    pub output_dir: Option<PathBuf>,

    /// Audio encoding parameters.
    pub audio_config: AudioConfig,

    /// Subtitle override. Takes precedence over the descriptor's global
    /// subtitle reference.
    pub subtitles: Option<SubtitleRef>,

    /// Maximum number of segment builds in flight at once.
    pub max_concurrent_builds: Option<usize>,
}

impl ProjectConfig {
    /// Resolve directories, applying defaults for anything unset.
    pub fn resolve_paths(&self) -> ResolvedPaths {
        let build_dir = self
            .build_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("build"));
        let temp_dir = self
            .temp_dir
            .clone()
            .unwrap_or_else(|| build_dir.join("temp"));
        let assets_dir = self
            .assets_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("assets"));

        ResolvedPaths {
            build_dir,
            temp_dir,
            assets_dir,
            output_dir: self.output_dir.clone(),
        }
    }

    /// Concurrency bound for segment builds. Defaults to 1: one external
    /// encode at a time.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_builds.unwrap_or(1).max(1)
    }
}

/// Directories resolved from a [`ProjectConfig`].
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub build_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
}

/// Audio encoding parameters for synthesized and reformatted tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channel_layout")]
    pub channel_layout: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channel_layout: default_channel_layout(),
        }
    }
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channel_layout() -> String {
    "stereo".to_string()
}

/// Assets touched during a compile, reported back to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateAssets {
    /// Font name -> cached path.
    pub fonts: BTreeMap<String, String>,

    /// Music/audio asset name -> cached path.
    pub musics: BTreeMap<String, String>,

    /// Source inputs consumed by segment builds.
    pub inputs: Vec<String>,
}

/// The compile outcome handed to the caller on success. Absence of a result
/// is the failure signal; no error value crosses this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    /// Final artifact path (`<output_dir>/output.mp4` when an output
    /// directory is configured).
    pub final_video: PathBuf,

    /// Assets touched during the compile.
    pub assets: TemplateAssets,

    /// Completion timestamp (ISO 8601).
    pub completed_at: String,
}

impl CompileResult {
    pub fn new(final_video: PathBuf, assets: TemplateAssets) -> Self {
        Self {
            final_video,
            assets,
            completed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
