//! Error types shared across Reelsmith crates.

use std::path::PathBuf;

/// Top-level error type for Reelsmith operations.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Segment build failed: {section}")]
    SegmentBuild { section: String },

    #[error("Probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Asset could not be resolved: {name}")]
    AssetResolution { name: String },

    #[error("Subtitle asset missing at burn time: {path}")]
    SubtitleMissing { path: PathBuf },

    #[error("Invalid overlay geometry: {message}")]
    OverlayGeometry { message: String },

    #[error("Audio composition error: {message}")]
    AudioCompose { message: String },

    #[error("Music composition error: {message}")]
    MusicCompose { message: String },

    #[error("Concatenation error: {message}")]
    Concat { message: String },

    #[error("Tool error: {message}")]
    Tool { message: String },

    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ComposeError.
pub type ComposeResult<T> = Result<T, ComposeError>;

impl ComposeError {
    pub fn segment_build(section: impl Into<String>) -> Self {
        Self::SegmentBuild {
            section: section.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn asset(name: impl Into<String>) -> Self {
        Self::AssetResolution { name: name.into() }
    }

    pub fn overlay_geometry(msg: impl Into<String>) -> Self {
        Self::OverlayGeometry {
            message: msg.into(),
        }
    }

    pub fn audio_compose(msg: impl Into<String>) -> Self {
        Self::AudioCompose {
            message: msg.into(),
        }
    }

    pub fn music_compose(msg: impl Into<String>) -> Self {
        Self::MusicCompose {
            message: msg.into(),
        }
    }

    pub fn concat(msg: impl Into<String>) -> Self {
        Self::Concat {
            message: msg.into(),
        }
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool {
            message: msg.into(),
        }
    }

    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error is a per-asset failure the caller may skip,
    /// as opposed to one that is fatal for the whole compile.
    pub fn is_asset_skip(&self) -> bool {
        matches!(self, Self::AssetResolution { .. })
    }
}
