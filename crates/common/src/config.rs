//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where cached assets are stored across compiles.
    pub assets_dir: PathBuf,

    /// Default compile settings.
    pub compile: CompileDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default compile parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileDefaults {
    /// Scratch directory for intermediate artifacts.
    pub build_dir: PathBuf,

    /// Maximum number of segment builds in flight at once.
    pub max_concurrent_builds: usize,

    /// Default audio sample rate.
    pub audio_sample_rate: u32,

    /// Default audio channel layout.
    pub audio_channel_layout: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelsmith=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            assets_dir: dirs_default_assets(),
            compile: CompileDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CompileDefaults {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build"),
            max_concurrent_builds: 1,
            audio_sample_rate: 44100,
            audio_channel_layout: "stereo".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelsmith").join("config.json")
}

/// Default persistent assets directory.
fn dirs_default_assets() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("reelsmith").join("assets")
}
