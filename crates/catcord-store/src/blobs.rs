//! Blob storage for avatars and server icons.
//!
//! Keys are slash-separated (`avatars/<uid>`, `serverIcons/<id>/<file>`) and
//! map straight onto a directory tree in the filesystem backend. Every
//! segment is validated before it touches the path, so a hostile key can
//! never escape the base directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Contract of the hosted blob service.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key, replacing any previous value, and return a
    /// download URL for the stored blob.
    async fn upload(&self, key: &str, data: Bytes) -> Result<String>;

    /// Fetch the bytes stored under a key.
    async fn download(&self, key: &str) -> Result<Bytes>;

    /// Remove the blob stored under a key.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FsBlobStore {
    /// Create the store, making the base directory if needed.
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        info!(path = %base_path.display(), "blob store initialized");
        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key to a path under the base directory, rejecting empty,
    /// absolute, or parent-traversing segments.
    fn safe_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
            return Err(StoreError::InvalidBlobKey(key.to_string()));
        }
        let mut resolved = self.base_path.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(StoreError::InvalidBlobKey(key.to_string()));
            }
            resolved.push(segment);
        }
        if !resolved.starts_with(&self.base_path) {
            return Err(StoreError::InvalidBlobKey(key.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, key: &str, data: Bytes) -> Result<String> {
        if data.is_empty() {
            return Err(StoreError::InvalidBlobKey(format!("{key}: empty blob")));
        }
        if data.len() > self.max_size {
            return Err(StoreError::InvalidBlobKey(format!(
                "{key}: blob of {} bytes exceeds limit of {}",
                data.len(),
                self.max_size
            )));
        }
        let path = self.safe_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        debug!(key, size = data.len(), "stored blob");
        Ok(format!("file://{}", path.display()))
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let path = self.safe_path(key)?;
        if !path.exists() {
            return Err(StoreError::NotFound);
        }
        let data = fs::read(&path).await?;
        debug!(key, size = data.len(), "retrieved blob");
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.safe_path(key)?;
        if !path.exists() {
            return Err(StoreError::NotFound);
        }
        fs::remove_file(&path).await?;
        debug!(key, "deleted blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FsBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn upload_and_download() {
        let (store, _dir) = test_store().await;
        let url = store
            .upload("avatars/u1", Bytes::from_static(b"png-bytes"))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        let data = store.download("avatars/u1").await.unwrap();
        assert_eq!(&data[..], b"png-bytes");
    }

    #[tokio::test]
    async fn upload_replaces_previous_value() {
        let (store, _dir) = test_store().await;
        store
            .upload("avatars/u1", Bytes::from_static(b"one"))
            .await
            .unwrap();
        store
            .upload("avatars/u1", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(&store.download("avatars/u1").await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn delete_then_missing() {
        let (store, _dir) = test_store().await;
        store
            .upload("serverIcons/s1/icon.png", Bytes::from_static(b"x"))
            .await
            .unwrap();
        store.delete("serverIcons/s1/icon.png").await.unwrap();
        assert!(matches!(
            store.download("serverIcons/s1/icon.png").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (store, _dir) = test_store().await;
        for key in ["../escape", "a/../../b", "/abs", "a//b", "", "a/.."] {
            let err = store.upload(key, Bytes::from_static(b"x")).await;
            assert!(
                matches!(err, Err(StoreError::InvalidBlobKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn empty_blob_is_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.upload("avatars/u1", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn oversized_blob_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf(), 8).await.unwrap();
        let err = store
            .upload("avatars/u1", Bytes::from_static(b"way too large"))
            .await;
        assert!(err.is_err());
    }
}
