//! Template descriptor types.
//!
//! The descriptor is the declarative input defining one compile: global
//! feature toggles, an ordered list of sections, timed audio clips, and
//! overlays. Field names follow the descriptor's JSON shape (camelCase).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Visibility tag selecting a section for the video timeline.
pub const VIDEO_SEGMENT: &str = "video_segment";

/// Errors raised while loading a descriptor from disk.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse descriptor: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level template descriptor (one compile request).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateDescriptor {
    /// Global feature toggles and shared references.
    pub global: GlobalOptions,

    /// Ordered content sections.
    pub sections: Vec<Section>,

    /// Timed audio clips laid over the video timeline.
    pub audios: Vec<TimedMedia>,

    /// Overlay regions applied during finalize.
    pub overlays: Vec<Overlay>,
}

impl TemplateDescriptor {
    /// Parse a descriptor from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Load and parse a descriptor from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&content)?)
    }

    /// Sections that belong to the video timeline, in declaration order.
    pub fn video_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_video_segment())
    }

    /// The first blur overlay, if any. Color overlays are ignored by the
    /// blur stage.
    pub fn first_blur_overlay(&self) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.kind == OverlayKind::Blur)
    }
}

/// Global options shared by every section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalOptions {
    /// Template variables substituted into section options (`{{ name }}`).
    pub variables: HashMap<String, String>,

    /// Output orientation hint ("landscape" / "portrait").
    pub orientation: Option<String>,

    pub music_enabled: bool,
    pub audio_enabled: bool,
    pub subtitles_enabled: bool,
    pub blur_enabled: bool,

    /// Volume applied to the video's own audio during the final mix.
    pub audio_volume_level: Option<f64>,

    /// Transition duration between segments, in seconds.
    pub transition_duration: Option<f64>,

    /// Background music bed.
    pub music: Option<MediaRef>,

    /// Background audio track mixed under the timed clips.
    pub audio: Option<MediaRef>,

    /// Template-level subtitle reference (project config may override).
    pub subtitles: Option<SubtitleRef>,
}

impl GlobalOptions {
    /// Substitute `{{ name }}` tokens with the descriptor's variables.
    /// Unknown variables are left in place.
    pub fn resolve(&self, input: &str) -> String {
        substitute_variables(input, &self.variables)
    }
}

/// Reference to a named media asset, fetched by URL or read from a path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaRef {
    pub name: String,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
}

/// Reference to a subtitle asset and the fonts it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubtitleRef {
    pub name: String,
    pub url: Option<String>,
    pub fonts: Vec<String>,
}

/// One named unit of content with its own build lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Section {
    /// Unique name, used as a file-path component for build artifacts.
    pub name: String,

    /// Variant tag selecting the build strategy.
    #[serde(rename = "type")]
    pub kind: String,

    /// Visibility tags. A section is a video segment iff it carries
    /// [`VIDEO_SEGMENT`].
    pub visibility: Vec<String>,

    pub options: SectionOptions,

    /// Opaque filter entries, passed through to the build strategy.
    pub filters: Vec<Filter>,
}

impl Section {
    pub fn is_video_segment(&self) -> bool {
        self.visibility.iter().any(|v| v == VIDEO_SEGMENT)
    }
}

/// Per-section options. Only the fields relevant to the selected strategy
/// are read; the rest are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SectionOptions {
    /// Literal duration in seconds. Probed for `project_video` sections.
    pub duration: Option<f64>,

    /// Source video for `video` sections. May contain `{{ var }}` tokens.
    pub video_url: Option<String>,

    /// Source image for `image` sections. May contain `{{ var }}` tokens.
    pub image_url: Option<String>,

    /// Source file extension ("mp4", "png", ...).
    pub extension: Option<String>,

    /// Whether the section's own audio track should be pre-extracted to
    /// feed the audio timeline.
    pub use_audio: bool,

    /// Drop the section's audio track entirely.
    pub mute_section: bool,

    /// Music bed volume while this section plays.
    pub music_volume_level: Option<f64>,

    /// Playback speed multiplier.
    pub speed: Option<f64>,
}

/// Opaque filter entry. Interpreted by build strategies, never by the
/// director.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Option<serde_json::Value>,
    pub values: Option<serde_json::Value>,
    pub range: Option<String>,
}

/// A timed audio clip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimedMedia {
    pub name: String,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    pub extension: Option<String>,
    pub options: TimedMediaOptions,
}

/// Placement of a timed clip on the audio timeline.
///
/// Invariant: when both `end` and `duration` are supplied,
/// `end == start + duration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimedMediaOptions {
    pub start: f64,
    pub end: Option<f64>,
    pub duration: f64,
    pub volume: Option<f64>,
}

impl TimedMediaOptions {
    /// End of the clip on the timeline.
    pub fn end(&self) -> f64 {
        self.end.unwrap_or(self.start + self.duration)
    }

    /// Whether a supplied `end` agrees with `start + duration`.
    pub fn is_consistent(&self) -> bool {
        match self.end {
            Some(end) => (end - (self.start + self.duration)).abs() < 1e-6,
            None => true,
        }
    }
}

/// An overlay region applied to the final video.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: OverlayKind,

    pub options: OverlayOptions,
}

/// Overlay variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Color,
    Blur,
}

/// Overlay geometry. Validated at apply time: x, y must be non-negative and
/// width, height, blur strength strictly positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayOptions {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,

    #[serde(default = "default_blur_strength")]
    pub blur_strength: f64,

    #[serde(default)]
    pub color: Option<String>,
}

fn default_blur_strength() -> f64 {
    10.0
}

/// Replace `{{ name }}` tokens with values from `vars`. Tokens without a
/// matching variable are left untouched.
pub fn substitute_variables(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let token = after[..close].trim();
                match vars.get(token) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..close]);
                        out.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
