//! Background music bed: load, loop to length, append under the mix.
//!
//! Music handling is deliberately shallow — the contract is loop/append.
//! Per-section volume levels are collected during segment builds so the
//! bed volume can follow the loudest requested level.

use std::path::Path;
use std::sync::Arc;

use reelsmith_common::{ComposeError, ComposeResult};
use reelsmith_template_model::{Section, TemplateDescriptor};

use crate::assets::{AssetCache, AssetKind};
use crate::state::BuildState;
use crate::storage::Storage;
use crate::tool::MediaTool;

/// Default music bed volume under the main mix.
const BED_VOLUME: f64 = 0.2;

#[derive(Clone)]
pub struct MusicComposer {
    tool: Arc<dyn MediaTool>,
    storage: Arc<dyn Storage>,
    cache: Arc<AssetCache>,
}

impl MusicComposer {
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

    /// Resolve the configured music bed through the cache. Nothing
    /// configured, or an unresolvable asset, leaves the bed unset.
    pub async fn load_music(
        &self,
        descriptor: &TemplateDescriptor,
        state: &mut BuildState,
    ) -> ComposeResult<()> {
        let Some(music) = &descriptor.global.music else {
            tracing::info!("[Music] No music configured. Skipping.");
            return Ok(());
        };

        match self
            .cache
            .resolve(&music.name, music.url.as_deref(), None, AssetKind::Music)
            .await
        {
            Ok(path) => {
                tracing::info!(name = %music.name, "[Music] Loaded music bed");
                state.music_path = Some(path);
            }
            Err(e) if e.is_asset_skip() => {
                tracing::error!(name = %music.name, "[Music] skipped: {e}");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Record a section's requested music volume, in build order.
    pub fn prepare_track(&self, section: &Section, state: &mut BuildState) {
        let volume = section.options.music_volume_level.unwrap_or(BED_VOLUME);
        state.music_volumes.push((section.name.clone(), volume));
    }

    /// Loop the bed out to the video's total length.
    pub async fn loop_music(
        &self,
        state: &mut BuildState,
        build_dir: &Path,
    ) -> ComposeResult<()> {
        let Some(music_path) = &state.music_path else {
            return Ok(());
        };

        let music_dir = build_dir.join("musics");
        self.storage.create_dir_all(&music_dir).await?;
        let looped = music_dir.join("music_looped.m4a");

        let args = vec![
            "-y".to_string(),
            "-stream_loop".to_string(),
            "-1".to_string(),
            "-i".to_string(),
            music_path.display().to_string(),
            "-t".to_string(),
            format!("{:.6}", state.total_length),
            "-c:a".to_string(),
            "aac".to_string(),
            looped.display().to_string(),
        ];

        let status = self.tool.execute(&args).await?;
        if !status.success() {
            return Err(ComposeError::music_compose(format!(
                "music loop failed with rc {}",
                status.rc
            )));
        }

        state.music_path = Some(looped);
        Ok(())
    }

    /// Mix the looped bed under the video's audio, copying the video
    /// stream.
    pub async fn append_music(
        &self,
        final_video: &Path,
        state: &BuildState,
        temp_dir: &Path,
    ) -> ComposeResult<()> {
        let Some(music_path) = &state.music_path else {
            return Ok(());
        };

        tracing::info!("[Music] Appending music bed");

        let volume = state
            .music_volumes
            .iter()
            .map(|(_, v)| *v)
            .fold(f64::NEG_INFINITY, f64::max);
        let volume = if volume.is_finite() { volume } else { BED_VOLUME };

        self.storage.create_dir_all(temp_dir).await?;
        let temp = temp_dir.join(format!(
            "tmp_video_{}.mp4",
            chrono::Utc::now().timestamp_millis()
        ));
        self.storage.move_file(final_video, &temp).await?;

        let filter = format!("[1:a]volume={volume}[bed];[0:a][bed]amix=inputs=2:duration=first[mix]");

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            temp.display().to_string(),
            "-i".to_string(),
            music_path.display().to_string(),
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "[mix]".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            final_video.display().to_string(),
        ];

        let status = self.tool.execute(&args).await?;
        if !status.success() {
            return Err(ComposeError::music_compose(format!(
                "music append failed with rc {}",
                status.rc
            )));
        }

        self.storage.unlink(&temp).await.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use crate::storage::FsStorage;
    use crate::tool::{MediaInfo, ToolStatus};
    use async_trait::async_trait;

    struct OkTool;

    #[async_trait]
    impl crate::tool::MediaTool for OkTool {
        async fn execute(&self, _args: &[String]) -> ComposeResult<ToolStatus> {
            Ok(ToolStatus { rc: 0 })
        }

        async fn probe(&self, _source: &Path) -> ComposeResult<MediaInfo> {
            Ok(MediaInfo::default())
        }
    }

    #[test]
    fn test_prepare_track_collects_volumes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(dir.path().join("dl")));
        let composer = MusicComposer::new(
            Arc::new(OkTool),
            storage.clone(),
            Arc::new(AssetCache::new(dir.path().join("assets"), storage)),
        );

        let mut state = BuildState::default();
        let mut quiet = Section {
            name: "intro".to_string(),
            ..Default::default()
        };
        quiet.options.music_volume_level = Some(0.1);
        let loud = Section {
            name: "body".to_string(),
            ..Default::default()
        };

        composer.prepare_track(&quiet, &mut state);
        composer.prepare_track(&loud, &mut state);

        assert_eq!(
            state.music_volumes,
            vec![("intro".to_string(), 0.1), ("body".to_string(), BED_VOLUME)]
        );
    }

    #[tokio::test]
    async fn test_loop_music_without_bed_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(dir.path().join("dl")));
        let composer = MusicComposer::new(
            Arc::new(OkTool),
            storage.clone(),
            Arc::new(AssetCache::new(dir.path().join("assets"), storage)),
        );

        let mut state = BuildState::default();
        composer
            .loop_music(&mut state, &PathBuf::from("/b"))
            .await
            .unwrap();
        assert!(state.music_path.is_none());
    }
}
