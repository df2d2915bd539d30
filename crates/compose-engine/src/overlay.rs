//! Overlay composition: rectangular blur regions.
//!
//! The region is cropped out, blurred, and composited back at the same
//! coordinates, leaving the rest of the frame untouched. The audio stream
//! is copied unchanged.

use std::path::Path;
use std::sync::Arc;

use reelsmith_common::{ComposeError, ComposeResult};
use reelsmith_template_model::{OverlayOptions, TemplateDescriptor};

use crate::state::BuildState;
use crate::storage::Storage;
use crate::tool::MediaTool;

/// Applies blur overlays during finalize.
#[derive(Clone)]
pub struct OverlayComposer {
    tool: Arc<dyn MediaTool>,
    storage: Arc<dyn Storage>,
}

/// Build the blur-box command: crop the region, blur it, overlay it back.
/// Geometry is validated here; x and y must be non-negative and width,
/// height, and blur strength strictly positive.
pub fn blur_box_args(
    input: &Path,
    output: &Path,
    options: &OverlayOptions,
) -> ComposeResult<Vec<String>> {
    let OverlayOptions {
        x,
        y,
        width,
        height,
        blur_strength,
        ..
    } = *options;

    if x < 0.0 || y < 0.0 || width <= 0.0 || height <= 0.0 || blur_strength <= 0.0 {
        return Err(ComposeError::overlay_geometry(format!(
            "x={x} y={y} width={width} height={height} blurStrength={blur_strength}"
        )));
    }

    let filter = format!(
        "[0:v]crop={width}:{height}:{x}:{y},avgblur={blur_strength}[fg];[0:v][fg]overlay={x}:{y}[v]"
    );

    Ok(vec![
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "0:a".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ])
}

impl OverlayComposer {
    pub fn new(tool: Arc<dyn MediaTool>, storage: Arc<dyn Storage>) -> Self {
        Self { tool, storage }
    }

    /// Apply the first blur overlay from the descriptor to the video. No
    /// blur overlay means no work — the video is left untouched.
    pub async fn apply_blur(
        &self,
        descriptor: &TemplateDescriptor,
        final_video: &Path,
        state: &mut BuildState,
        temp_dir: &Path,
    ) -> ComposeResult<()> {
        let Some(overlay) = descriptor.first_blur_overlay() else {
            tracing::info!("[BlurBox] No blur overlay in descriptor. Skipping.");
            return Ok(());
        };

        tracing::info!(
            x = overlay.options.x,
            y = overlay.options.y,
            width = overlay.options.width,
            height = overlay.options.height,
            strength = overlay.options.blur_strength,
            "[BlurBox] Applying blur overlay"
        );

        self.storage.create_dir_all(temp_dir).await?;
        let temp = temp_dir.join(format!(
            "tmp_video_{}.mp4",
            chrono::Utc::now().timestamp_millis()
        ));
        self.storage.move_file(final_video, &temp).await?;

        let args = blur_box_args(&temp, final_video, &overlay.options)?;
        let status = self.tool.execute(&args).await?;
        tracing::info!(rc = status.rc, "[BlurBox] finished");

        if !status.success() {
            state.record_error("blurBox");
            return Err(ComposeError::tool(format!(
                "box blur failed with rc {}",
                status.rc
            )));
        }

        self.storage.unlink(&temp).await.ok();
        Ok(())
    }
}
