//! Per-section segment building.
//!
//! Each video section goes through a fixed three-step protocol:
//! 1. `build_part` — select a build strategy from the section type and
//!    resolve the source asset and output path
//! 2. `prepare_part` — pre-extract the source's audio track when the
//!    strategy feeds the audio timeline
//! 3. `render_part` — run the assembled ffmpeg command
//!
//! Strategies are a closed tagged union: unknown section types fail the
//! build without panicking, and the set of variants is the whole dispatch
//! surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelsmith_common::ComposeResult;
use reelsmith_template_model::{AudioConfig, GlobalOptions, Section};

use crate::assets::{AssetCache, AssetKind};
use crate::tool::MediaTool;

/// Shared context for segment builds; cheap to clone across tasks.
pub struct SegmentContext {
    pub tool: Arc<dyn MediaTool>,
    pub cache: Arc<AssetCache>,
    pub build_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub audio_config: AudioConfig,
}

/// Build strategy selected from a section's type tag.
#[derive(Debug, Clone)]
pub enum SegmentPlan {
    /// A plain video clip, local or fetched by URL.
    Video {
        source: PathBuf,
        duration: Option<f64>,
        mute: bool,
        extract_audio: bool,
    },

    /// A video measured from the project's asset store; its duration comes
    /// from probing, not the descriptor.
    ProjectVideo {
        source: PathBuf,
        extract_audio: bool,
    },

    /// A still image rendered to a clip of fixed duration.
    Image { source: PathBuf, duration: f64 },
}

impl SegmentPlan {
    /// Select and prepare a strategy for `section`. Returns `None` for an
    /// unrecognized section type.
    pub async fn for_section(
        section: &Section,
        global: &GlobalOptions,
        ctx: &SegmentContext,
    ) -> ComposeResult<Option<SegmentPlan>> {
        match section.kind.as_str() {
            "video" => {
                let Some(url) = section.options.video_url.as_deref() else {
                    tracing::error!(section = %section.name, "video section without videoUrl");
                    return Ok(None);
                };

                let source = resolve_source(
                    &section.name,
                    &global.resolve(url),
                    section.options.extension.as_deref(),
                    ctx,
                )
                .await?;

                Ok(Some(SegmentPlan::Video {
                    source,
                    duration: section.options.duration,
                    mute: section.options.mute_section,
                    extract_audio: section.options.use_audio,
                }))
            }

            "project_video" => {
                let source = ctx
                    .assets_dir
                    .join("videos")
                    .join(format!("{}.mp4", section.name));
                ctx.cache.record_input(&source);

                Ok(Some(SegmentPlan::ProjectVideo {
                    source,
                    extract_audio: section.options.use_audio,
                }))
            }

            "image" => {
                let Some(url) = section.options.image_url.as_deref() else {
                    tracing::error!(section = %section.name, "image section without imageUrl");
                    return Ok(None);
                };
                let Some(duration) = section.options.duration else {
                    tracing::error!(section = %section.name, "image section without duration");
                    return Ok(None);
                };

                let source = resolve_source(
                    &section.name,
                    &global.resolve(url),
                    section.options.extension.as_deref().or(Some("png")),
                    ctx,
                )
                .await?;

                Ok(Some(SegmentPlan::Image { source, duration }))
            }

            other => {
                tracing::error!(section = %section.name, kind = other, "unrecognized section type");
                Ok(None)
            }
        }
    }

    /// Whether `prepare_part` should extract the source's audio track.
    pub fn wants_audio_extract(&self) -> bool {
        match self {
            SegmentPlan::Video { extract_audio, .. }
            | SegmentPlan::ProjectVideo { extract_audio, .. } => *extract_audio,
            SegmentPlan::Image { .. } => false,
        }
    }

    pub fn source(&self) -> &Path {
        match self {
            SegmentPlan::Video { source, .. }
            | SegmentPlan::ProjectVideo { source, .. }
            | SegmentPlan::Image { source, .. } => source,
        }
    }

    /// ffmpeg arguments for the audio pre-extraction step.
    pub fn audio_extract_args(&self, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-i".into(),
            self.source().display().to_string(),
            "-vn".into(),
            "-acodec".into(),
            "aac".into(),
            output.display().to_string(),
        ]
    }

    /// ffmpeg arguments for the render step.
    pub fn render_args(&self, output: &Path, audio: &AudioConfig) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into()];

        match self {
            SegmentPlan::Video {
                source,
                duration,
                mute,
                ..
            } => {
                args.extend(["-i".into(), source.display().to_string()]);
                if let Some(duration) = duration {
                    args.extend(["-t".into(), format!("{duration:.6}")]);
                }
                if *mute {
                    args.push("-an".into());
                }
                args.extend(video_encode_args());
                if !mute {
                    args.extend(["-c:a".into(), "aac".into()]);
                }
            }

            SegmentPlan::ProjectVideo { source, .. } => {
                args.extend(["-i".into(), source.display().to_string()]);
                args.extend(video_encode_args());
                args.extend(["-c:a".into(), "aac".into()]);
            }

            SegmentPlan::Image { source, duration } => {
                // A silent audio track keeps the stream layout uniform for
                // the concat demuxer.
                args.extend(["-loop".into(), "1".into()]);
                args.extend(["-i".into(), source.display().to_string()]);
                args.extend(["-f".into(), "lavfi".into()]);
                args.extend([
                    "-i".into(),
                    format!(
                        "anullsrc=channel_layout={}:sample_rate={}",
                        audio.channel_layout, audio.sample_rate
                    ),
                ]);
                args.extend(["-t".into(), format!("{duration:.6}")]);
                args.extend(video_encode_args());
                args.extend(["-c:a".into(), "aac".into(), "-shortest".into()]);
            }
        }

        args.push(output.display().to_string());
        args
    }
}

fn video_encode_args() -> [String; 10] {
    [
        "-r".into(),
        "30".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "fast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
    ]
}

/// Resolve a section source: remote URLs go through the asset cache,
/// anything else is used as a local path.
async fn resolve_source(
    name: &str,
    url: &str,
    extension: Option<&str>,
    ctx: &SegmentContext,
) -> ComposeResult<PathBuf> {
    if url.starts_with("http://") || url.starts_with("https://") {
        ctx.cache
            .resolve(name, Some(url), extension, AssetKind::Video)
            .await
    } else {
        let path = PathBuf::from(url);
        ctx.cache.record_input(&path);
        Ok(path)
    }
}

/// Drives one section through the build/prepare/render protocol.
pub struct SegmentBuilder {
    ctx: Arc<SegmentContext>,
    section: Section,
    global: GlobalOptions,
    plan: Option<SegmentPlan>,
    output: PathBuf,
    extracted_audio: Option<PathBuf>,
}

impl SegmentBuilder {
    pub fn new(ctx: Arc<SegmentContext>, section: Section, global: GlobalOptions) -> Self {
        let output = ctx
            .build_dir
            .join(format!("{}_output.mp4", section.name));

        Self {
            ctx,
            section,
            global,
            plan: None,
            output,
            extracted_audio: None,
        }
    }

    /// Rendered output path for this section.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Audio track extracted during `prepare_part`, if any.
    pub fn extracted_audio(&self) -> Option<&Path> {
        self.extracted_audio.as_deref()
    }

    /// Step 1: select the build strategy. Returns `false` (logged, no
    /// panic) when the section type is unrecognized or the source cannot
    /// be resolved.
    pub async fn build_part(&mut self) -> bool {
        tracing::info!(section = %self.section.name, "[BuildPart] init");

        match SegmentPlan::for_section(&self.section, &self.global, &self.ctx).await {
            Ok(Some(plan)) => {
                self.plan = Some(plan);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!(section = %self.section.name, error = %e, "[BuildPart] failed");
                false
            }
        }
    }

    /// Step 2: pre-extract the audio track when the strategy needs it.
    /// Returns `false` when the extraction command fails; the caller
    /// records the failure but still runs `render_part`.
    pub async fn prepare_part(&mut self) -> bool {
        let Some(plan) = &self.plan else {
            return false;
        };

        if !plan.wants_audio_extract() {
            return true;
        }

        let audio_out = self
            .ctx
            .build_dir
            .join(format!("{}_audio.m4a", self.section.name));

        tracing::info!(section = %self.section.name, "[PreparePart] extracting audio");
        let args = plan.audio_extract_args(&audio_out);

        match self.ctx.tool.execute(&args).await {
            Ok(status) if status.success() => {
                tracing::info!(
                    section = %self.section.name,
                    path = %audio_out.display(),
                    "[PreparePart] audio extracted"
                );
                self.extracted_audio = Some(audio_out);
                true
            }
            Ok(status) => {
                tracing::error!(section = %self.section.name, rc = status.rc, "[PreparePart] extraction failed");
                false
            }
            Err(e) => {
                tracing::error!(section = %self.section.name, error = %e, "[PreparePart] extraction failed");
                false
            }
        }
    }

    /// Step 3: run the render command. Any nonzero return code is a
    /// failure.
    pub async fn render_part(&mut self) -> bool {
        let Some(plan) = &self.plan else {
            return false;
        };

        let args = plan.render_args(&self.output, &self.ctx.audio_config);
        tracing::debug!(section = %self.section.name, args = ?args, "[RenderPart] command");

        match self.ctx.tool.execute(&args).await {
            Ok(status) => {
                tracing::info!(section = %self.section.name, rc = status.rc, "[RenderPart] finished");
                status.success()
            }
            Err(e) => {
                tracing::error!(section = %self.section.name, error = %e, "[RenderPart] failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use reelsmith_common::ComposeResult;

    use crate::storage::FsStorage;
    use crate::tool::{MediaInfo, ToolStatus};

    struct OkTool;

    #[async_trait]
    impl MediaTool for OkTool {
        async fn execute(&self, _args: &[String]) -> ComposeResult<ToolStatus> {
            Ok(ToolStatus { rc: 0 })
        }

        async fn probe(&self, _source: &Path) -> ComposeResult<MediaInfo> {
            Ok(MediaInfo::default())
        }
    }

    fn context(root: &Path) -> Arc<SegmentContext> {
        let storage = Arc::new(FsStorage::new(root.join("downloads")));
        Arc::new(SegmentContext {
            tool: Arc::new(OkTool),
            cache: Arc::new(AssetCache::new(root.join("assets"), storage)),
            build_dir: root.join("build"),
            assets_dir: root.join("assets"),
            audio_config: AudioConfig::default(),
        })
    }

    fn video_section(name: &str, url: &str) -> Section {
        let mut section = Section {
            name: name.to_string(),
            kind: "video".to_string(),
            visibility: vec!["video_segment".to_string()],
            ..Default::default()
        };
        section.options.video_url = Some(url.to_string());
        section.options.duration = Some(3.672);
        section
    }

    #[tokio::test]
    async fn test_unknown_type_fails_build_part() {
        let dir = tempfile::tempdir().unwrap();
        let section = Section {
            name: "weird".to_string(),
            kind: "hologram".to_string(),
            ..Default::default()
        };

        let mut builder =
            SegmentBuilder::new(context(dir.path()), section, GlobalOptions::default());
        assert!(!builder.build_part().await);
    }

    #[tokio::test]
    async fn test_local_video_source_skips_cache_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let section = video_section("intro", "/media/local.mp4");

        let mut builder =
            SegmentBuilder::new(context(dir.path()), section, GlobalOptions::default());
        assert!(builder.build_part().await);
        assert!(builder
            .output()
            .to_string_lossy()
            .ends_with("intro_output.mp4"));
    }

    #[tokio::test]
    async fn test_variable_substitution_in_video_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let section = video_section("intro", "{{ videoSample }}");

        let mut global = GlobalOptions::default();
        global
            .variables
            .insert("videoSample".to_string(), "/media/sample.mp4".to_string());

        let mut builder = SegmentBuilder::new(ctx.clone(), section, global);
        assert!(builder.build_part().await);

        let inputs = ctx.cache.snapshot().inputs;
        assert_eq!(inputs, vec!["/media/sample.mp4".to_string()]);
    }

    #[test]
    fn test_video_render_args_mute_drops_audio() {
        let plan = SegmentPlan::Video {
            source: PathBuf::from("/media/a.mp4"),
            duration: Some(2.0),
            mute: true,
            extract_audio: false,
        };

        let args = plan.render_args(Path::new("/build/a_output.mp4"), &AudioConfig::default());
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
        assert!(args.contains(&"-t".to_string()));
    }

    #[test]
    fn test_image_render_args_add_silent_track() {
        let plan = SegmentPlan::Image {
            source: PathBuf::from("/media/logo.png"),
            duration: 4.0,
        };

        let args = plan.render_args(Path::new("/build/logo_output.mp4"), &AudioConfig::default());
        let joined = args.join(" ");
        assert!(joined.contains("anullsrc=channel_layout=stereo:sample_rate=44100"));
        assert!(joined.contains("-loop 1"));
        assert!(joined.contains("-shortest"));
    }
}
