//! The director: top-level compile state machine.
//!
//! Drives one compile through its states: configure, init assets, build and
//! concatenate video segments, compose audio, finalize. Segment builds fan
//! out through a bounded worker pool; their outcomes flow back to a single
//! aggregator that owns the build state, so the manifest stays in
//! declaration order and progress accounting has exactly one writer.
//!
//! `construct` absorbs every error: the caller gets `Some(result)` or
//! `None`, never an error value. Failures are logged, recorded, and
//! surfaced through the event observer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use reelsmith_common::{ComposeError, ComposeResult};
use reelsmith_template_model::{
    CompileResult, GlobalOptions, ProjectConfig, ResolvedPaths, Section, TemplateDescriptor,
};

use crate::assets::AssetCache;
use crate::audio::AudioComposer;
use crate::captions::CaptionComposer;
use crate::editor::VideoEditor;
use crate::events::{CancelToken, CompileEvent, EventObserver};
use crate::music::MusicComposer;
use crate::overlay::OverlayComposer;
use crate::segment::{SegmentBuilder, SegmentContext};
use crate::state::BuildState;
use crate::storage::Storage;
use crate::tool::MediaTool;

/// Result of one segment build task, reported back to the aggregator.
struct SegmentOutcome {
    index: usize,
    name: String,
    output: Option<PathBuf>,
    failed: bool,
    skipped: bool,
    extracted_audio: Option<PathBuf>,
}

pub struct Director {
    tool: Arc<dyn MediaTool>,
    storage: Arc<dyn Storage>,
    cache: Arc<AssetCache>,
    audio: AudioComposer,
    music: MusicComposer,
    captions: CaptionComposer,
    editor: VideoEditor,

    config: ProjectConfig,
    paths: ResolvedPaths,
    descriptor: TemplateDescriptor,

    state: BuildState,
    final_video: PathBuf,

    observer: Option<EventObserver>,
    cancel: CancelToken,

    /// Set on the first recorded failure; segment tasks check it before
    /// starting work.
    stop: Arc<AtomicBool>,
}

impl Director {
    /// Configure a compile: resolve and create the working directories and
    /// wire up the collaborator graph. This is the only way in.
    pub fn configure(
        tool: Arc<dyn MediaTool>,
        storage: Arc<dyn Storage>,
        config: ProjectConfig,
        descriptor: TemplateDescriptor,
    ) -> ComposeResult<Self> {
        let paths = config.resolve_paths();

        std::fs::create_dir_all(&paths.build_dir)?;
        std::fs::create_dir_all(&paths.temp_dir)?;
        std::fs::create_dir_all(&paths.assets_dir)?;

        let cache = Arc::new(AssetCache::new(paths.assets_dir.clone(), storage.clone()));
        let audio = AudioComposer::new(tool.clone(), storage.clone(), cache.clone());
        let music = MusicComposer::new(tool.clone(), storage.clone(), cache.clone());
        let captions = CaptionComposer::new(tool.clone(), storage.clone(), cache.clone());
        let overlay = OverlayComposer::new(tool.clone(), storage.clone());
        let editor = VideoEditor::new(
            tool.clone(),
            storage.clone(),
            cache.clone(),
            audio.clone(),
            overlay,
            captions.clone(),
        );

        let final_video = paths.build_dir.join("output.mp4");

        tracing::info!(build_dir = %paths.build_dir.display(), "Director configured");

        Ok(Self {
            tool,
            storage,
            cache,
            audio,
            music,
            captions,
            editor,
            config,
            paths,
            descriptor,
            state: BuildState::default(),
            final_video,
            observer: None,
            cancel: CancelToken::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Attach an observer for progress and terminal events.
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Token for cooperative cancellation. Once cancelled, no new segment
    /// build starts and the finalize pipeline is skipped; builds already
    /// dispatched run to completion.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the compile to completion. `None` is the failure signal — no
    /// error value crosses this boundary.
    pub async fn construct(mut self) -> Option<CompileResult> {
        match self.run().await {
            Ok(Some(result)) => Some(result),
            Ok(None) => {
                tracing::info!("[Director] compile cancelled");
                self.delete_manifest().await;
                self.notify(&CompileEvent::TaskStopped {
                    message: "task cancelled".to_string(),
                });
                None
            }
            Err(err) => {
                self.fire_error(&err).await;
                None
            }
        }
    }

    /// The state sequence. `Ok(None)` means cancelled.
    async fn run(&mut self) -> ComposeResult<Option<CompileResult>> {
        self.init().await?;

        self.compile_video_segments().await?;

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        if !self.state.errors.is_empty() {
            return Err(ComposeError::segment_build(self.state.errors.join(", ")));
        }

        if self.descriptor.global.audio_enabled {
            self.compile_audio_segments().await?;
        }

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let mut final_video = self.final_video.clone();
        self.editor
            .finalize(
                &self.descriptor,
                &self.config,
                &self.paths,
                &mut self.state,
                &mut final_video,
                self.observer.as_ref(),
            )
            .await?;
        self.final_video = final_video;

        Ok(Some(CompileResult::new(
            self.final_video.clone(),
            self.cache.snapshot(),
        )))
    }

    /// Prepare the manifest and trigger the idempotent, cache-aware asset
    /// loaders.
    async fn init(&mut self) -> ComposeResult<()> {
        let manifest = self.paths.build_dir.join("segments.list");
        self.state.file_concat_path = Some(manifest.clone());

        self.audio
            .load_audios(&self.descriptor, &mut self.state)
            .await?;
        self.music
            .load_music(&self.descriptor, &mut self.state)
            .await?;
        self.captions
            .load_subtitles(&self.config, &self.descriptor, &mut self.state)
            .await?;

        self.storage.write(&manifest, "").await?;
        tracing::info!(path = %manifest.display(), "[Init] Segment manifest created");

        Ok(())
    }

    /// Build every video segment through the bounded pool, then
    /// concatenate and (optionally) lay the music bed.
    async fn compile_video_segments(&mut self) -> ComposeResult<()> {
        tracing::info!("[Director] Compiling video segments");

        let sections: Vec<Section> = self.descriptor.video_sections().cloned().collect();

        // Duration accounting is synchronous: a probe failure here aborts
        // the compile immediately.
        for section in &sections {
            let duration = self.section_duration(section).await?;
            self.state.record_duration(&section.name, duration);
        }
        self.state.total_segments = sections.len();
        self.state.video_inputs = vec![None; sections.len()];

        tracing::info!(
            segments = sections.len(),
            total_length = self.state.total_length,
            "[Director] Length computed"
        );

        let ctx = Arc::new(SegmentContext {
            tool: self.tool.clone(),
            cache: self.cache.clone(),
            build_dir: self.paths.build_dir.clone(),
            assets_dir: self.paths.assets_dir.clone(),
            audio_config: self.config.audio_config.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut builds: JoinSet<SegmentOutcome> = JoinSet::new();

        for (index, section) in sections.into_iter().enumerate() {
            if self.cancel.is_cancelled() || self.stop.load(Ordering::SeqCst) {
                break;
            }

            let ctx = ctx.clone();
            let global = self.descriptor.global.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let stop = self.stop.clone();

            builds.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("build semaphore closed");

                // Re-check after waiting for a slot: a failure or a
                // cancellation while queued means this build never starts.
                if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
                    return SegmentOutcome {
                        index,
                        name: section.name.clone(),
                        output: None,
                        failed: false,
                        skipped: true,
                        extracted_audio: None,
                    };
                }

                build_segment(ctx, section, global, index).await
            });
        }

        // Single-writer aggregation: every outcome is applied here, in
        // completion order, while the manifest keeps declaration order.
        while let Some(joined) = builds.join_next().await {
            let outcome = joined
                .map_err(|e| ComposeError::tool(format!("segment task failed: {e}")))?;
            self.apply_outcome(outcome).await?;
        }

        if self.cancel.is_cancelled() || !self.state.errors.is_empty() {
            return Ok(());
        }

        self.editor.concat(&mut self.state, &self.final_video).await?;

        if self.descriptor.global.music_enabled {
            self.music
                .loop_music(&mut self.state, &self.paths.build_dir)
                .await?;
            self.music
                .append_music(&self.final_video, &self.state, &self.paths.temp_dir)
                .await?;
        }

        tracing::info!("[Director] Compilation done");
        Ok(())
    }

    async fn compile_audio_segments(&mut self) -> ComposeResult<()> {
        self.audio
            .compose(
                &mut self.state,
                &self.config.audio_config,
                &self.paths.build_dir,
            )
            .await
    }

    /// Apply one segment outcome to the shared state.
    async fn apply_outcome(&mut self, outcome: SegmentOutcome) -> ComposeResult<()> {
        if outcome.skipped {
            tracing::info!(section = %outcome.name, "[Editing] skipped");
            return Ok(());
        }

        if outcome.failed {
            tracing::error!(section = %outcome.name, "[Editing] failed");
            self.state.record_error(&outcome.name);
            self.stop.store(true, Ordering::SeqCst);
            return Ok(());
        }

        if let Some(extracted) = outcome.extracted_audio {
            self.state.background_audio_path = Some(extracted);
        }

        if let Some(output) = outcome.output {
            self.state.set_video_input(outcome.index, output);
            if let Some(manifest) = self.state.file_concat_path.clone() {
                self.storage
                    .write(&manifest, &self.state.manifest_contents())
                    .await?;
            }
        }

        if let Some(section) = self
            .descriptor
            .sections
            .iter()
            .find(|s| s.name == outcome.name)
        {
            self.music.prepare_track(section, &mut self.state);
        }

        let segment_length = self
            .state
            .durations
            .get(&outcome.name)
            .copied()
            .unwrap_or(0.0);
        let progress = self.state.advance_progress(segment_length);

        self.notify(&CompileEvent::SegmentCompleted {
            section: outcome.name.clone(),
        });
        self.notify(&CompileEvent::Progress(progress));

        tracing::info!(
            section = %outcome.name,
            percent = (progress * 100.0).round(),
            "[Editing] finalized"
        );

        Ok(())
    }

    /// Duration of one section: the literal option, or a probe for section
    /// types measured from their source video.
    async fn section_duration(&self, section: &Section) -> ComposeResult<f64> {
        if section.kind == "project_video" {
            tracing::info!(section = %section.name, "[Editing] fetching infos");
            let source = self
                .paths
                .assets_dir
                .join("videos")
                .join(format!("{}.mp4", section.name));

            let info = self.tool.probe(&source).await?;
            return info
                .duration
                .ok_or_else(|| ComposeError::probe(source, "duration not found"));
        }

        section.options.duration.ok_or_else(|| {
            ComposeError::config(format!("section {} has no duration", section.name))
        })
    }

    async fn fire_error(&mut self, err: &ComposeError) {
        tracing::error!(error = %err, "[Director] compile failed");

        self.stop.store(true, Ordering::SeqCst);
        self.delete_manifest().await;
        self.notify(&CompileEvent::TaskStopped {
            message: err.to_string(),
        });
    }

    async fn delete_manifest(&self) {
        if let Some(manifest) = &self.state.file_concat_path {
            self.storage.unlink(manifest).await.ok();
        }
    }

    fn notify(&self, event: &CompileEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

/// One segment's pass through the build/prepare/render protocol. Failures
/// are reported in the outcome, never unwound past the task boundary.
async fn build_segment(
    ctx: Arc<SegmentContext>,
    section: Section,
    global: GlobalOptions,
    index: usize,
) -> SegmentOutcome {
    let name = section.name.clone();
    tracing::info!(section = %name, "[Editing] started");

    let mut builder = SegmentBuilder::new(ctx, section, global);

    if !builder.build_part().await {
        return SegmentOutcome {
            index,
            name,
            output: None,
            failed: true,
            skipped: false,
            extracted_audio: None,
        };
    }

    let prepare_ok = builder.prepare_part().await;
    let render_ok = builder.render_part().await;

    SegmentOutcome {
        index,
        name,
        output: render_ok.then(|| builder.output().to_path_buf()),
        failed: !prepare_ok || !render_ok,
        skipped: false,
        extracted_audio: builder.extracted_audio().map(Path::to_path_buf),
    }
}
