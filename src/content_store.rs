//! Document Content Storage
//!
//! Abstract interface for the external document store holding file bytes.
//! The engine only ever records [`ContentHandle`] references; these
//! implementations target the local filesystem (POC) or memory (tests).
//! An S3-compatible backend slots in behind the same trait.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::document::ContentHandle;

/// Error type for content storage operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("content not found: {0}")]
    NotFound(String),

    /// External passthrough handles cannot be dereferenced locally.
    #[error("unsupported handle: {0}")]
    Unsupported(String),
}

/// Content-addressed storage for document binaries.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their content-addressed handle.
    async fn store(&self, content: &[u8]) -> Result<ContentHandle, ContentStoreError>;

    /// Fetch bytes by handle.
    async fn fetch(&self, handle: &ContentHandle) -> Result<Vec<u8>, ContentStoreError>;

    /// Check whether content exists for a handle.
    async fn exists(&self, handle: &ContentHandle) -> Result<bool, ContentStoreError>;
}

/// Local filesystem implementation, sharded by digest prefix.
pub struct LocalContentStore {
    base_path: PathBuf,
}

impl LocalContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for(&self, handle: &ContentHandle) -> Result<PathBuf, ContentStoreError> {
        let digest = handle
            .digest()
            .ok_or_else(|| ContentStoreError::Unsupported(handle.to_uri()))?;
        let (shard, rest) = digest.split_at(2);
        Ok(self.base_path.join(shard).join(rest))
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn store(&self, content: &[u8]) -> Result<ContentHandle, ContentStoreError> {
        let handle = ContentHandle::from_bytes(content);
        let path = self.path_for(&handle)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(handle)
    }

    async fn fetch(&self, handle: &ContentHandle) -> Result<Vec<u8>, ContentStoreError> {
        let path = self.path_for(handle)?;
        if !path.exists() {
            return Err(ContentStoreError::NotFound(handle.to_uri()));
        }
        Ok(tokio::fs::read(path).await?)
    }

    async fn exists(&self, handle: &ContentHandle) -> Result<bool, ContentStoreError> {
        Ok(self.path_for(handle)?.exists())
    }
}

/// In-memory content store.
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn store(&self, content: &[u8]) -> Result<ContentHandle, ContentStoreError> {
        let handle = ContentHandle::from_bytes(content);
        let mut blobs = self.blobs.write().await;
        blobs.insert(handle.to_uri(), content.to_vec());
        Ok(handle)
    }

    async fn fetch(&self, handle: &ContentHandle) -> Result<Vec<u8>, ContentStoreError> {
        if handle.digest().is_none() {
            return Err(ContentStoreError::Unsupported(handle.to_uri()));
        }
        let blobs = self.blobs.read().await;
        blobs
            .get(&handle.to_uri())
            .cloned()
            .ok_or_else(|| ContentStoreError::NotFound(handle.to_uri()))
    }

    async fn exists(&self, handle: &ContentHandle) -> Result<bool, ContentStoreError> {
        if handle.digest().is_none() {
            return Err(ContentStoreError::Unsupported(handle.to_uri()));
        }
        let blobs = self.blobs.read().await;
        Ok(blobs.contains_key(&handle.to_uri()))
    }
}
