//! Compile a template descriptor into a video.

use std::path::PathBuf;
use std::sync::Arc;

use reelsmith_common::config::AppConfig;
use reelsmith_compose_engine::{CompileEvent, Director, FfmpegTool, FsStorage};
use reelsmith_template_model::{AudioConfig, ProjectConfig, TemplateDescriptor};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    app: &AppConfig,
    descriptor: PathBuf,
    output: PathBuf,
    build_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
    max_concurrent: Option<usize>,
    sample_rate: Option<u32>,
    channel_layout: Option<String>,
) -> anyhow::Result<()> {
    println!("Compiling descriptor: {}", descriptor.display());

    let descriptor = TemplateDescriptor::from_path(&descriptor)
        .map_err(|e| anyhow::anyhow!("Failed to load descriptor: {e}"))?;

    let tool = FfmpegTool::new();
    if !tool.is_available() {
        anyhow::bail!("ffmpeg/ffprobe not found in PATH");
    }

    // CLI flags win; the app config supplies the rest.
    let build_dir = build_dir.unwrap_or_else(|| app.compile.build_dir.clone());
    let assets_dir = assets_dir.unwrap_or_else(|| app.assets_dir.clone());

    let config = ProjectConfig {
        build_dir: Some(build_dir.clone()),
        assets_dir: Some(assets_dir),
        output_dir: Some(output),
        audio_config: AudioConfig {
            sample_rate: sample_rate.unwrap_or(app.compile.audio_sample_rate),
            channel_layout: channel_layout
                .unwrap_or_else(|| app.compile.audio_channel_layout.clone()),
        },
        max_concurrent_builds: Some(
            max_concurrent.unwrap_or(app.compile.max_concurrent_builds),
        ),
        ..Default::default()
    };

    println!("  Sections: {}", descriptor.sections.len());
    println!("  Audio clips: {}", descriptor.audios.len());
    println!("  Build dir: {}", build_dir.display());

    let storage = Arc::new(FsStorage::new(build_dir.join("downloads")));
    let director = Director::configure(Arc::new(tool), storage, config, descriptor)
        .map_err(|e| anyhow::anyhow!("Failed to configure compile: {e}"))?
        .with_observer(Box::new(|event| match event {
            CompileEvent::Progress(p) => {
                print!("\r  Progress: {:.1}%  ", p * 100.0);
            }
            CompileEvent::SegmentCompleted { section } => {
                tracing::debug!(section = %section, "segment completed");
            }
            CompileEvent::TaskStopped { message } => {
                println!("\n  Stopped: {message}");
            }
            CompileEvent::Finalized { video, .. } => {
                println!("\n  Finalized: {}", video.display());
            }
        }));

    match director.construct().await {
        Some(result) => {
            println!("Compile complete: {}", result.final_video.display());
            println!(
                "  Assets: {} font(s), {} music(s), {} input(s)",
                result.assets.fonts.len(),
                result.assets.musics.len(),
                result.assets.inputs.len()
            );
            Ok(())
        }
        None => anyhow::bail!("Compile failed — see log output for details"),
    }
}
