//! Audio composition.
//!
//! Three responsibilities:
//! - **Loading:** resolve timed clips and the optional background track
//!   through the asset cache (a clip that cannot be resolved is skipped,
//!   not fatal)
//! - **Mixing:** lay every clip on a covering timeline over a background
//!   or silence bed and mix them into one AAC track
//! - **Replacement:** mix the composed track over the assembled video's
//!   own audio and swap the video's audio stream without re-encoding pixels
//!
//! # Covering timeline
//!
//! Clips may overlap. The covering duration is computed by sorting clips by
//! start, sweep-merging overlapping intervals, and recording gaps as their
//! own intervals; the sum of interval lengths telescopes to
//! `max(end) - min(start)`. That covering span sizes the silence bed when
//! no background track is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelsmith_common::{ComposeError, ComposeResult};
use reelsmith_template_model::{AudioConfig, GlobalOptions, TemplateDescriptor};

use crate::assets::{AssetCache, AssetKind};
use crate::state::{BuildState, LoadedClip};
use crate::storage::Storage;
use crate::tool::MediaTool;

/// Volume applied to a configured background track in the mix.
const BACKGROUND_VOLUME: f64 = 0.2;

/// Merge `(start, end)` intervals: overlapping intervals coalesce, and the
/// gap between two disjoint intervals is recorded as its own interval.
pub fn merge_timeline(intervals: &[(f64, f64)]) -> Vec<(f64, f64)> {
    if intervals.is_empty() {
        return Vec::new();
    }

    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut merged = Vec::new();
    let mut current = sorted[0];

    for &next in &sorted[1..] {
        if current.1 >= next.0 {
            current.1 = current.1.max(next.1);
        } else {
            merged.push(current);
            merged.push((current.1, next.0));
            current = next;
        }
    }

    merged.push(current);
    merged
}

/// Total covering duration of a set of clips: the span from the earliest
/// start to the latest end, independent of overlap structure.
pub fn covering_duration(clips: &[LoadedClip]) -> f64 {
    let intervals: Vec<(f64, f64)> = clips
        .iter()
        .map(|c| (c.start, c.start + c.duration))
        .collect();

    merge_timeline(&intervals)
        .iter()
        .map(|(start, end)| end - start)
        .sum()
}

/// Builds and mixes the audio timeline.
#[derive(Clone)]
pub struct AudioComposer {
    tool: Arc<dyn MediaTool>,
    storage: Arc<dyn Storage>,
    cache: Arc<AssetCache>,
}

impl AudioComposer {
    pub fn new(
        tool: Arc<dyn MediaTool>,
        storage: Arc<dyn Storage>,
        cache: Arc<AssetCache>,
    ) -> Self {
        Self {
            tool,
            storage,
            cache,
        }
    }

    /// Resolve every timed clip and the optional background track.
    /// Unresolvable clips are skipped; everything else lands in the build
    /// state.
    pub async fn load_audios(
        &self,
        descriptor: &TemplateDescriptor,
        state: &mut BuildState,
    ) -> ComposeResult<()> {
        tracing::info!(count = descriptor.audios.len(), "[Audio] Loading audios");

        for clip in &descriptor.audios {
            let path = if let Some(local) = &clip.path {
                self.cache.record_input(local);
                local.clone()
            } else {
                match self
                    .cache
                    .resolve(
                        &clip.name,
                        clip.url.as_deref(),
                        clip.extension.as_deref(),
                        AssetKind::Audio,
                    )
                    .await
                {
                    Ok(path) => path,
                    Err(e) if e.is_asset_skip() => {
                        tracing::error!(clip = %clip.name, "[Audio] skipped: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            state.audio_segments.push(LoadedClip {
                name: clip.name.clone(),
                path,
                start: clip.options.start,
                duration: clip.options.duration,
                volume: clip.options.volume,
            });
        }

        tracing::info!(
            loaded = state.audio_segments.len(),
            "[Audio] Loaded all audios"
        );

        if let Some(background) = &descriptor.global.audio {
            let logical = format!("audio_{}", background.name);
            match self
                .cache
                .resolve(&logical, background.url.as_deref(), Some("mp4"), AssetKind::Audio)
                .await
            {
                Ok(path) => {
                    tracing::info!(name = %background.name, "[Audio] Loaded background audio");
                    state.background_audio_path = Some(path);
                }
                Err(e) if e.is_asset_skip() => {
                    tracing::error!(name = %background.name, "[Audio] background skipped: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Mix the loaded clips into a single composed track at
    /// `<build_dir>/audios/audio.m4a`.
    pub async fn compose(
        &self,
        state: &mut BuildState,
        audio_config: &AudioConfig,
        build_dir: &Path,
    ) -> ComposeResult<()> {
        if state.audio_segments.is_empty() {
            tracing::info!("[Audio] No audio segments to compose. Skipping.");
            return Ok(());
        }

        let audio_dir = build_dir.join("audios");
        self.storage.create_dir_all(&audio_dir).await?;
        let destination = audio_dir.join("audio.m4a");

        let bed = match &state.background_audio_path {
            Some(background) => {
                let info = self.tool.probe(background).await?;
                let duration = info.duration.ok_or_else(|| {
                    ComposeError::probe(background.clone(), "no duration for background audio")
                })?;

                LoadedClip {
                    name: "background".to_string(),
                    path: background.clone(),
                    start: 0.0,
                    duration,
                    volume: Some(BACKGROUND_VOLUME),
                }
            }
            None => {
                let duration = covering_duration(&state.audio_segments);
                let blank = audio_dir.join("blank.m4a");
                self.create_blank_audio(duration, &blank, audio_config)
                    .await?;

                LoadedClip {
                    name: "blank".to_string(),
                    path: blank,
                    start: 0.0,
                    duration,
                    volume: None,
                }
            }
        };

        let mut segments = vec![bed];
        segments.extend(state.audio_segments.iter().cloned());

        let args = build_mix_args(&segments, &destination);
        tracing::info!(destination = %destination.display(), "[Audio] Composing audio");

        let status = self.tool.execute(&args).await?;
        if !status.success() {
            return Err(ComposeError::audio_compose(format!(
                "mix failed with rc {}",
                status.rc
            )));
        }

        state.audio_path = Some(destination);
        Ok(())
    }

    /// Synthesize a silence bed matching the configured channel layout and
    /// sample rate.
    async fn create_blank_audio(
        &self,
        duration: f64,
        destination: &Path,
        audio_config: &AudioConfig,
    ) -> ComposeResult<()> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ComposeError::audio_compose(format!(
                "invalid blank bed duration {duration}"
            )));
        }

        tracing::info!(duration, "[Audio] Creating blank audio");
        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "anullsrc=channel_layout={}:sample_rate={}",
                audio_config.channel_layout, audio_config.sample_rate
            ),
            "-t".to_string(),
            format!("{duration:.6}"),
            "-c:a".to_string(),
            "aac".to_string(),
            destination.display().to_string(),
        ];

        let status = self.tool.execute(&args).await?;
        if !status.success() {
            return Err(ComposeError::audio_compose(format!(
                "blank audio synthesis failed with rc {}",
                status.rc
            )));
        }

        Ok(())
    }

    /// Replace the assembled video's audio stream with a mix of its own
    /// (noise-reduced, volume-adjusted) audio and the composed track. The
    /// video stream is copied verbatim.
    ///
    /// ffmpeg cannot overwrite its own input, so the video is renamed to a
    /// temp path and re-written under its original name.
    pub async fn append_audio(
        &self,
        final_video: &Path,
        state: &BuildState,
        global: &GlobalOptions,
        audio_config: &AudioConfig,
        temp_dir: &Path,
    ) -> ComposeResult<()> {
        let Some(audio_path) = &state.audio_path else {
            tracing::info!("[Audio] No composed audio to append. Skipping.");
            return Ok(());
        };

        tracing::info!("[Audio] Appending audio to the video");

        self.storage.create_dir_all(temp_dir).await?;
        let temp = temp_dir.join(format!(
            "tmp_video_{}.mp4",
            chrono::Utc::now().timestamp_millis()
        ));
        self.storage.move_file(final_video, &temp).await?;

        let volume = global.audio_volume_level.unwrap_or(1.0);
        let channel_config = format!(
            "aformat=sample_fmts=fltp:sample_rates={}:channel_layouts=stereo",
            audio_config.sample_rate
        );

        let filter = format!(
            "[0:a]{channel_config},volume={volume},afftdn=nr=20:nf=-20,apad[voice]; \
             [1:a]{channel_config}[mix]; \
             [voice][mix]amix=inputs=2[final]"
        );

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            temp.display().to_string(),
            "-i".to_string(),
            audio_path.display().to_string(),
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "[final]".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-shortest".to_string(),
            final_video.display().to_string(),
        ];

        let status = self.tool.execute(&args).await?;
        if !status.success() {
            return Err(ComposeError::audio_compose(format!(
                "audio append failed with rc {}",
                status.rc
            )));
        }

        self.storage.unlink(&temp).await.ok();
        Ok(())
    }
}

/// One clip's node in the mix graph: delay to its start position, apply its
/// volume, label the output `a{i}`.
fn segment_filter(clip: &LoadedClip, index: usize) -> String {
    let start_ms = (clip.start * 1000.0).round() as i64;
    let volume = clip.volume.unwrap_or(1.0);

    format!("[{index}:a]adelay={start_ms}:all=1,volume={volume}[a{index}]")
}

/// Full mix command: every segment as an input, per-segment filters, an
/// N-way amix, loudness normalization, AAC 48 kHz 192 kbps.
fn build_mix_args(segments: &[LoadedClip], destination: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    let mut filters = Vec::with_capacity(segments.len());
    let mut mix_labels = Vec::with_capacity(segments.len());

    for (index, segment) in segments.iter().enumerate() {
        args.push("-i".to_string());
        args.push(segment.path.display().to_string());
        filters.push(segment_filter(segment, index));
        mix_labels.push(format!("[a{index}]"));
    }

    let filter_complex = format!(
        "{}; {}amix=inputs={}[mixed]; [mixed]loudnorm[out]",
        filters.join("; "),
        mix_labels.join(" "),
        segments.len()
    );

    args.extend([
        "-filter_complex".to_string(),
        filter_complex,
        "-map".to_string(),
        "[out]".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-ar".to_string(),
        "48000".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        destination.display().to_string(),
    ]);

    args
}
