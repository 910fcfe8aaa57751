//! Blob store trait

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Blob store trait
///
/// Implementations keep one immutable blob per digest. A write must never
/// leave a partially written blob visible at the digest's final location.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check if a blob exists
    async fn exists(&self, digest: &str) -> Result<bool, StorageError>;

    /// Read a blob fully into memory
    async fn read(&self, digest: &str) -> Result<Bytes, StorageError>;

    /// Write a blob, replacing any previous blob for the digest.
    /// Returns the storage path recorded in the index.
    async fn write(&self, digest: &str, data: Bytes) -> Result<String, StorageError>;

    /// Delete a blob, returning whether it existed
    async fn delete(&self, digest: &str) -> Result<bool, StorageError>;

    /// List the digests of all stored blobs
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Remove temporary files left behind by interrupted writes
    async fn clear_staging(&self) -> Result<u64, StorageError>;
}

/// Check that a digest is a lowercase hex string usable as a file name
pub fn validate_digest(digest: &str) -> Result<(), StorageError> {
    if digest.len() < 2 {
        return Err(StorageError::InvalidDigest(format!(
            "Digest too short: {}",
            digest
        )));
    }
    if !digest
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(StorageError::InvalidDigest(format!(
            "Digest is not lowercase hex: {}",
            digest
        )));
    }
    Ok(())
}
