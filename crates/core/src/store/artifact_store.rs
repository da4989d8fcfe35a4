//! Storage for artifact bytes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::StoreError;

/// Storage backend for output artifacts, keyed by plain file name.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `bytes` under `name`, returning where they landed.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError>;

    /// Reads an artifact. A missing artifact is `Ok(None)`.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removes an artifact. Returns whether it existed.
    async fn remove(&self, name: &str) -> Result<bool, StoreError>;

    fn path_of(&self, name: &str) -> PathBuf;
}

/// Artifacts as files in one directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Opens the store, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` inside the root, refusing anything that is not a plain file name.
    fn checked_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(|c: char| c == '/' || c == '\\')
            && !name.contains("..");
        if !plain {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.checked_path(name)?;
        // Readers never observe a half-written artifact.
        let temp = self.root.join(format!(".{}.tmp", name));
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(path)
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.checked_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.checked_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
