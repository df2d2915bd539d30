//! Caching asset layer.
//!
//! Resolves a logical asset name to a canonical on-disk path under the
//! asset store, fetching remote assets exactly once. The store outlives
//! individual compiles; two compiles may race on the same asset, so the
//! fetch-and-move is a critical section per canonical path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use reelsmith_common::{ComposeError, ComposeResult};
use reelsmith_template_model::TemplateAssets;

use crate::storage::Storage;

/// Kind of cached asset. Determines the store subdirectory, the default
/// file extension, and whether the logical name is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Audio,
    Music,
    Subtitle,
    Font,
    Video,
}

impl AssetKind {
    pub fn dir(&self) -> &'static str {
        match self {
            AssetKind::Audio => "audios",
            AssetKind::Music => "musics",
            AssetKind::Subtitle => "subtitles",
            AssetKind::Font => "fonts",
            AssetKind::Video => "videos",
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            AssetKind::Audio | AssetKind::Music => "mp3",
            AssetKind::Subtitle => "ass",
            AssetKind::Font => "ttf",
            AssetKind::Video => "mp4",
        }
    }

    /// Subtitle and font names are normalized; other kinds keep their
    /// logical name as-is.
    fn normalizes(&self) -> bool {
        matches!(self, AssetKind::Subtitle | AssetKind::Font)
    }
}

/// Normalize a subtitle/font asset name: strip the file extension, replace
/// `:` `.` `'` and space with `_`, and lowercase.
pub fn normalize_asset_name(name: &str) -> String {
    let stem = match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    };

    stem.chars()
        .map(|c| match c {
            ':' | '.' | '\'' | ' ' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Fetch-once asset cache over the shared asset store.
pub struct AssetCache {
    assets_dir: PathBuf,
    storage: Arc<dyn Storage>,

    /// One lock per canonical path, so concurrent resolutions of the same
    /// asset serialize on the move-into-place.
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,

    manifest: std::sync::Mutex<TemplateAssets>,
}

impl AssetCache {
    pub fn new(assets_dir: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            storage,
            locks: Mutex::new(HashMap::new()),
            manifest: std::sync::Mutex::new(TemplateAssets::default()),
        }
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// Canonical on-disk path for a logical asset name.
    pub fn canonical_path(&self, name: &str, extension: Option<&str>, kind: AssetKind) -> PathBuf {
        let stem = if kind.normalizes() {
            normalize_asset_name(name)
        } else {
            name.to_string()
        };
        let ext = extension.unwrap_or_else(|| kind.default_extension());

        self.assets_dir.join(kind.dir()).join(format!("{stem}.{ext}"))
    }

    /// Resolve a logical asset to its canonical path: cache hit, or fetch
    /// from `url` and move into place. Neither is a terminal failure for
    /// the asset; the caller decides whether to skip it.
    pub async fn resolve(
        &self,
        name: &str,
        url: Option<&str>,
        extension: Option<&str>,
        kind: AssetKind,
    ) -> ComposeResult<PathBuf> {
        let canonical = self.canonical_path(name, extension, kind);
        let lock = self.lock_for(&canonical).await;
        let _guard = lock.lock().await;

        if self.storage.stat(&canonical).await {
            tracing::info!(name, path = %canonical.display(), "Asset loaded from cache");
            self.record(name, &canonical, kind);
            return Ok(canonical);
        }

        let Some(url) = url else {
            tracing::error!(name, "Asset not cached and no source URL provided");
            return Err(ComposeError::asset(name));
        };

        let fetched = self.storage.fetch(url).await?;
        // Move, not copy: a concurrent reader must never see a partial file.
        self.storage.move_file(&fetched, &canonical).await?;

        tracing::info!(name, path = %canonical.display(), "Asset fetched");
        self.record(name, &canonical, kind);
        Ok(canonical)
    }

    async fn lock_for(&self, canonical: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(canonical.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn record(&self, name: &str, path: &Path, kind: AssetKind) {
        let mut manifest = self.manifest.lock().expect("asset manifest poisoned");
        let path = path.display().to_string();

        match kind {
            AssetKind::Font => {
                manifest.fonts.insert(name.to_string(), path);
            }
            AssetKind::Audio | AssetKind::Music => {
                manifest.musics.insert(name.to_string(), path);
            }
            AssetKind::Video => {
                if !manifest.inputs.contains(&path) {
                    manifest.inputs.push(path);
                }
            }
            AssetKind::Subtitle => {}
        }
    }

    /// Record a source input consumed without going through `resolve`
    /// (e.g. a local file referenced directly by a section).
    pub fn record_input(&self, path: &Path) {
        let mut manifest = self.manifest.lock().expect("asset manifest poisoned");
        let path = path.display().to_string();
        if !manifest.inputs.contains(&path) {
            manifest.inputs.push(path);
        }
    }

    /// Snapshot of every asset touched so far.
    pub fn snapshot(&self) -> TemplateAssets {
        self.manifest.lock().expect("asset manifest poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// Storage fake that counts fetches and materializes files in a
    /// tempdir.
    struct CountingStorage {
        inner: crate::storage::FsStorage,
        fetches: AtomicUsize,
        payload_dir: PathBuf,
    }

    impl CountingStorage {
        fn new(root: &Path) -> Self {
            Self {
                inner: crate::storage::FsStorage::new(root.join("downloads")),
                fetches: AtomicUsize::new(0),
                payload_dir: root.join("payloads"),
            }
        }
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn fetch(&self, url: &str) -> ComposeResult<PathBuf> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::fs::create_dir_all(&self.payload_dir).await?;
            let path = self.payload_dir.join(format!("fetch-{n}"));
            tokio::fs::write(&path, url).await?;
            Ok(path)
        }

        async fn move_file(&self, from: &Path, to: &Path) -> ComposeResult<()> {
            self.inner.move_file(from, to).await
        }

        async fn copy_file(&self, from: &Path, to: &Path) -> ComposeResult<()> {
            self.inner.copy_file(from, to).await
        }

        async fn stat(&self, path: &Path) -> bool {
            self.inner.stat(path).await
        }

        async fn read_to_string(&self, path: &Path) -> ComposeResult<String> {
            self.inner.read_to_string(path).await
        }

        async fn write(&self, path: &Path, contents: &str) -> ComposeResult<()> {
            self.inner.write(path, contents).await
        }

        async fn append(&self, path: &Path, contents: &str) -> ComposeResult<()> {
            self.inner.append(path, contents).await
        }

        async fn unlink(&self, path: &Path) -> ComposeResult<()> {
            self.inner.unlink(path).await
        }

        async fn clean_dir(&self, path: &Path) -> ComposeResult<()> {
            self.inner.clean_dir(path).await
        }

        async fn create_dir_all(&self, path: &Path) -> ComposeResult<()> {
            self.inner.create_dir_all(path).await
        }
    }

    #[test]
    fn test_normalize_asset_name() {
        assert_eq!(normalize_asset_name("1734701524027.ass"), "1734701524027");
        assert_eq!(normalize_asset_name("My Show: Ep.1.srt"), "my_show__ep_1");
        assert_eq!(normalize_asset_name("O'Neill"), "o_neill");
        assert_eq!(normalize_asset_name("Roboto"), "roboto");
    }

    #[tokio::test]
    async fn test_resolve_fetches_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(CountingStorage::new(dir.path()));
        let cache = AssetCache::new(dir.path().join("assets"), storage.clone());

        let first = cache
            .resolve("clip-1", Some("https://cdn/clip1.mp3"), None, AssetKind::Audio)
            .await
            .unwrap();
        let second = cache
            .resolve("clip-1", Some("https://cdn/clip1.mp3"), None, AssetKind::Audio)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_without_url_or_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(CountingStorage::new(dir.path()));
        let cache = AssetCache::new(dir.path().join("assets"), storage);

        let err = cache
            .resolve("orphan", None, None, AssetKind::Music)
            .await
            .unwrap_err();
        assert!(err.is_asset_skip());
    }

    #[tokio::test]
    async fn test_subtitle_path_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(CountingStorage::new(dir.path()));
        let cache = AssetCache::new(dir.path().join("assets"), storage);

        let path = cache
            .resolve("My Show: Ep.1.srt", Some("https://cdn/ep1.ass"), None, AssetKind::Subtitle)
            .await
            .unwrap();

        assert!(path.ends_with("subtitles/my_show__ep_1.ass"));
    }

    #[tokio::test]
    async fn test_manifest_records_touched_assets() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(CountingStorage::new(dir.path()));
        let cache = AssetCache::new(dir.path().join("assets"), storage);

        cache
            .resolve("Roboto", Some("https://cdn/roboto.ttf"), None, AssetKind::Font)
            .await
            .unwrap();
        cache
            .resolve("bed", Some("https://cdn/bed.mp3"), None, AssetKind::Music)
            .await
            .unwrap();
        cache.record_input(Path::new("/tmp/in.mp4"));

        let assets = cache.snapshot();
        assert!(assets.fonts.contains_key("Roboto"));
        assert!(assets.musics.contains_key("bed"));
        assert_eq!(assets.inputs, vec!["/tmp/in.mp4".to_string()]);
    }
}
