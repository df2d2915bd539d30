//! Probe a media file.

use std::path::PathBuf;

use reelsmith_compose_engine::{FfmpegTool, MediaTool};

pub async fn run(path: PathBuf) -> anyhow::Result<()> {
    let tool = FfmpegTool::new();
    if !tool.is_available() {
        anyhow::bail!("ffmpeg/ffprobe not found in PATH");
    }

    let info = tool
        .probe(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Probe failed: {e}"))?;

    println!("Media: {}", path.display());
    match info.duration {
        Some(duration) => println!("  Duration: {duration:.3}s"),
        None => println!("  Duration: unknown"),
    }
    println!(
        "  Video codec: {}",
        info.video_codec.as_deref().unwrap_or("none")
    );
    println!(
        "  Audio codec: {}",
        info.audio_codec.as_deref().unwrap_or("none")
    );
    if let Some(rate) = info.sample_rate {
        println!("  Sample rate: {rate} Hz");
    }

    Ok(())
}
