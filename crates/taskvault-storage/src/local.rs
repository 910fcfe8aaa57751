//! Local disk blob store

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BlobStore, validate_digest};
use crate::error::StorageError;

const STAGING_DIR: &str = ".staging";

/// Local disk blob store
///
/// Stores blobs in a flat content-addressable directory:
/// `<base_path>/<digest>`, with in-progress writes under
/// `<base_path>/.staging/<uuid>.tmp`.
pub struct LocalStorage {
    base_path: PathBuf,
    staging_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local blob store
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let staging_path = base_path.join(STAGING_DIR);

        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(&staging_path).await?;

        info!("Initialized blob storage at {:?}", base_path);

        Ok(Self {
            base_path,
            staging_path,
        })
    }

    /// Get the file path for a digest
    fn blob_path(&self, digest: &str) -> Result<PathBuf, StorageError> {
        validate_digest(digest)?;
        Ok(self.base_path.join(digest))
    }

    fn not_found(digest: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(digest.to_string())
            } else {
                StorageError::Io(e)
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn exists(&self, digest: &str) -> Result<bool, StorageError> {
        let path = self.blob_path(digest)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read(&self, digest: &str) -> Result<Bytes, StorageError> {
        let path = self.blob_path(digest)?;
        debug!("Reading blob from {:?}", path);

        let data = fs::read(&path).await.map_err(Self::not_found(digest))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, digest: &str, data: Bytes) -> Result<String, StorageError> {
        let path = self.blob_path(digest)?;
        let temp_path = self.staging_path.join(format!("{}.tmp", Uuid::new_v4()));
        debug!("Writing blob to {:?} via {:?}", path, temp_path);

        let staged = async {
            let mut file = File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_file(&temp_path).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!("Failed to remove staged blob {:?}: {}", temp_path, cleanup);
            }
            return Err(StorageError::Io(e));
        }

        Ok(path.to_string_lossy().to_string())
    }

    async fn delete(&self, digest: &str) -> Result<bool, StorageError> {
        let path = self.blob_path(digest)?;
        debug!("Deleting blob at {:?}", path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut digests = Vec::new();
        let mut dir = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_digest(&name).is_ok() {
                digests.push(name);
            }
        }

        Ok(digests)
    }

    async fn clear_staging(&self) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        let mut dir = fs::read_dir(&self.staging_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove staging file {:?}: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} leftover staging files", removed);
        }
        Ok(removed)
    }
}
