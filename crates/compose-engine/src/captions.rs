//! Caption composition: subtitle resolution and burn-in.

use std::path::Path;
use std::sync::Arc;

use reelsmith_common::{ComposeError, ComposeResult};
use reelsmith_template_model::{ProjectConfig, SubtitleRef, TemplateDescriptor};

use crate::assets::{AssetCache, AssetKind};
use crate::state::BuildState;
use crate::storage::Storage;
use crate::tool::MediaTool;

/// Resolves subtitle assets and burns them into video.
#[derive(Clone)]
pub struct CaptionComposer {
    tool: Arc<dyn MediaTool>,
    storage: Arc<dyn Storage>,
    cache: Arc<AssetCache>,
}

impl CaptionComposer {
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

    /// The active subtitle reference: a project-level override wins over
    /// the template's global reference.
    pub fn active_subtitles<'a>(
        config: &'a ProjectConfig,
        descriptor: &'a TemplateDescriptor,
    ) -> Option<&'a SubtitleRef> {
        config
            .subtitles
            .as_ref()
            .or(descriptor.global.subtitles.as_ref())
    }

    /// Resolve the subtitle asset and its fonts through the cache. Without
    /// a subtitle configuration this is a no-op; a subtitle that cannot be
    /// resolved is logged and skipped (missing subtitles are only fatal at
    /// burn time).
    pub async fn load_subtitles(
        &self,
        config: &ProjectConfig,
        descriptor: &TemplateDescriptor,
        state: &mut BuildState,
    ) -> ComposeResult<()> {
        tracing::info!("[Captions] Loading subtitles");

        let Some(subtitles) = Self::active_subtitles(config, descriptor) else {
            tracing::info!("[Captions] No subtitles configured. Skipping.");
            return Ok(());
        };

        match self
            .cache
            .resolve(
                &subtitles.name,
                subtitles.url.as_deref(),
                None,
                AssetKind::Subtitle,
            )
            .await
        {
            Ok(path) => {
                tracing::info!(path = %path.display(), "[Captions] Subtitle ready");
                state.subtitle_path = Some(path);
            }
            Err(e) if e.is_asset_skip() => {
                tracing::info!("[Captions] Subtitle not in cache and no URL provided.");
            }
            Err(e) => return Err(e),
        }

        for font in &subtitles.fonts {
            match self.cache.resolve(font, None, None, AssetKind::Font).await {
                Ok(_) => tracing::info!(font = %font, "[Captions] Font ready"),
                Err(e) if e.is_asset_skip() => {
                    tracing::error!(font = %font, "[Captions] font skipped: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Burn the resolved subtitle file into the video as a filter, reading
    /// from a renamed temporary copy and writing back to the original name.
    ///
    /// `scale` optionally prefixes the filter chain (e.g. `"scale=1280:-1,"`).
    pub async fn burn_captions(
        &self,
        final_video: &Path,
        state: &BuildState,
        temp_dir: &Path,
        scale: Option<&str>,
    ) -> ComposeResult<()> {
        tracing::info!("[Captions] Burning subtitles");

        let Some(subtitle_path) = &state.subtitle_path else {
            tracing::info!("[Captions] No subtitles to burn. Skipping.");
            return Ok(());
        };

        self.storage.create_dir_all(temp_dir).await?;
        let temp = temp_dir.join(format!(
            "tmp_video_{}.mp4",
            chrono::Utc::now().timestamp_millis()
        ));
        self.storage.move_file(final_video, &temp).await?;

        if !self.storage.stat(&temp).await {
            return Err(ComposeError::FileNotFound { path: temp });
        }
        if !self.storage.stat(subtitle_path).await {
            return Err(ComposeError::SubtitleMissing {
                path: subtitle_path.clone(),
            });
        }

        let fonts_dir = self.cache.assets_dir().join("fonts");
        let filter = format!(
            "{}ass={}:fontsdir={}",
            scale.unwrap_or(""),
            subtitle_path.display(),
            fonts_dir.display()
        );

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            temp.display().to_string(),
            "-vf".to_string(),
            filter,
            "-max_muxing_queue_size".to_string(),
            "1024".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            final_video.display().to_string(),
        ];

        let status = self.tool.execute(&args).await?;
        tracing::info!(rc = status.rc, "[Captions] burn finished");

        if !status.success() {
            return Err(ComposeError::tool(format!(
                "subtitle burn failed with rc {}",
                status.rc
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use reelsmith_template_model::GlobalOptions;

    fn subtitle_ref(name: &str) -> SubtitleRef {
        SubtitleRef {
            name: name.to_string(),
            url: None,
            fonts: Vec::new(),
        }
    }

    #[test]
    fn test_project_override_wins() {
        let config = ProjectConfig {
            subtitles: Some(subtitle_ref("override.ass")),
            ..Default::default()
        };
        let descriptor = TemplateDescriptor {
            global: GlobalOptions {
                subtitles: Some(subtitle_ref("template.ass")),
                ..Default::default()
            },
            ..Default::default()
        };

        let active = CaptionComposer::active_subtitles(&config, &descriptor).unwrap();
        assert_eq!(active.name, "override.ass");
    }

    #[test]
    fn test_template_subtitles_used_without_override() {
        let config = ProjectConfig::default();
        let descriptor = TemplateDescriptor {
            global: GlobalOptions {
                subtitles: Some(subtitle_ref("template.ass")),
                ..Default::default()
            },
            ..Default::default()
        };

        let active = CaptionComposer::active_subtitles(&config, &descriptor).unwrap();
        assert_eq!(active.name, "template.ass");
    }

    #[test]
    fn test_no_subtitles_is_none() {
        let config = ProjectConfig::default();
        let descriptor = TemplateDescriptor::default();
        assert!(CaptionComposer::active_subtitles(&config, &descriptor).is_none());
    }
}
