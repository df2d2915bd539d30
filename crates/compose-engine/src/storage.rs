//! Storage collaborator: local filesystem operations plus remote fetch.
//!
//! All file effects in the engine go through this trait so tests can watch
//! or redirect them. `FsStorage` is the production implementation: tokio
//! filesystem calls and reqwest downloads into a scratch directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use reelsmith_common::{ComposeError, ComposeResult};

/// Boundary for file and network-transfer effects.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Download `url` to a temporary location and return its path. The
    /// caller is expected to move the file into place.
    async fn fetch(&self, url: &str) -> ComposeResult<PathBuf>;

    /// Move a file, replacing the destination. Falls back to copy+unlink
    /// across filesystems.
    async fn move_file(&self, from: &Path, to: &Path) -> ComposeResult<()>;

    async fn copy_file(&self, from: &Path, to: &Path) -> ComposeResult<()>;

    /// Whether a file exists at `path`.
    async fn stat(&self, path: &Path) -> bool;

    async fn read_to_string(&self, path: &Path) -> ComposeResult<String>;

    /// Create or truncate a file with the given contents.
    async fn write(&self, path: &Path, contents: &str) -> ComposeResult<()>;

    /// Append to a file, creating it if needed.
    async fn append(&self, path: &Path, contents: &str) -> ComposeResult<()>;

    /// Remove a file. Removing a missing file is not an error.
    async fn unlink(&self, path: &Path) -> ComposeResult<()>;

    /// Remove a directory tree and recreate it empty.
    async fn clean_dir(&self, path: &Path) -> ComposeResult<()>;

    async fn create_dir_all(&self, path: &Path) -> ComposeResult<()>;
}

/// Filesystem-backed storage with reqwest downloads.
pub struct FsStorage {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl FsStorage {
    /// `download_dir` receives fetched files before they are moved into
    /// place by the caller.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            download_dir: download_dir.into(),
        }
    }

    fn download_target(&self, url: &str) -> PathBuf {
        let name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("download");
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();

        self.download_dir
            .join(format!("{}_{}", chrono::Utc::now().timestamp_millis(), safe))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn fetch(&self, url: &str) -> ComposeResult<PathBuf> {
        tracing::info!(url, "Fetching remote asset");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ComposeError::fetch(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ComposeError::fetch(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ComposeError::fetch(url, e.to_string()))?;

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let target = self.download_target(url);
        tokio::fs::write(&target, &bytes).await?;

        tracing::info!(url, path = %target.display(), bytes = bytes.len(), "Fetched");
        Ok(target)
    }

    async fn move_file(&self, from: &Path, to: &Path) -> ComposeResult<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            // EXDEV: destination on a different filesystem
            Err(_) => {
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await?;
                Ok(())
            }
        }
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> ComposeResult<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(from, to).await?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn read_to_string(&self, path: &Path) -> ComposeResult<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, path: &Path, contents: &str) -> ComposeResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(path, contents).await?)
    }

    async fn append(&self, path: &Path, contents: &str) -> ComposeResult<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        Ok(())
    }

    async fn unlink(&self, path: &Path) -> ComposeResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clean_dir(&self, path: &Path) -> ComposeResult<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> ComposeResult<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &Path) -> FsStorage {
        FsStorage::new(dir.join("downloads"))
    }

    #[tokio::test]
    async fn test_move_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        let from = dir.path().join("a.txt");
        let to = dir.path().join("nested/b.txt");
        tokio::fs::write(&from, "payload").await.unwrap();

        storage.move_file(&from, &to).await.unwrap();

        assert!(!storage.stat(&from).await);
        assert_eq!(storage.read_to_string(&to).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_append_creates_and_extends() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let path = dir.path().join("list.txt");

        storage.append(&path, "file one.mp4\n").await.unwrap();
        storage.append(&path, "file two.mp4\n").await.unwrap();

        let content = storage.read_to_string(&path).await.unwrap();
        assert_eq!(content, "file one.mp4\nfile two.mp4\n");
    }

    #[tokio::test]
    async fn test_unlink_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        storage.unlink(&dir.path().join("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_dir_leaves_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let target = dir.path().join("scratch");

        tokio::fs::create_dir_all(target.join("deep")).await.unwrap();
        tokio::fs::write(target.join("deep/file"), "x").await.unwrap();

        storage.clean_dir(&target).await.unwrap();

        assert!(storage.stat(&target.join("deep/file")).await == false);
        assert!(tokio::fs::metadata(&target).await.unwrap().is_dir());
    }

    #[test]
    fn test_download_target_sanitizes_name() {
        let storage = FsStorage::new("/tmp/dl");
        let target = storage.download_target("https://cdn.example.com/a/cl ip?.mp3");
        let name = target.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("cl_ip_.mp3"));
    }
}
