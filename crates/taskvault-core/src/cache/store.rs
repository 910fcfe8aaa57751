//! Storage engine: blob store plus persisted index

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use taskvault_db::{Database, IndexEntry, Metadata, NewIndexEntry};
use taskvault_storage::{BlobStore, LocalStorage, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::locks::WriteLocks;
use crate::error::StoreError;

/// File name of the index database under the cache root
pub const INDEX_FILE: &str = "index.db";
/// Directory holding one blob per digest under the cache root
pub const BLOB_DIR: &str = "blobs";

/// A cached task output
#[derive(Debug, Clone)]
pub struct Entry {
    pub digest: String,
    pub data: Bytes,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: u64,
}

impl Entry {
    /// Build a fresh entry created at `now`
    pub fn new(digest: impl Into<String>, data: Bytes, metadata: Metadata, now: DateTime<Utc>) -> Self {
        let size = data.len() as u64;
        Self {
            digest: digest.into(),
            data,
            metadata,
            created_at: now,
            accessed_at: now,
            expires_at: None,
            size,
        }
    }

    fn from_index(row: IndexEntry, data: Bytes, accessed_at: DateTime<Utc>) -> Self {
        Self {
            digest: row.digest,
            size: row.size.max(0) as u64,
            data,
            metadata: row.metadata,
            created_at: row.created_at,
            accessed_at,
            expires_at: row.expires_at,
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: i64,
    pub total_size: i64,
    pub capacity: u64,
    pub usage_percent: f64,
    pub oldest_access: Option<DateTime<Utc>>,
}

/// Durable, capacity-bounded store of entries keyed by digest
///
/// Writes place the blob before committing the index row that references
/// it, and only one write per digest is in flight at a time. Reads never
/// take the per-digest lock.
pub struct Store {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    capacity: u64,
    locks: WriteLocks,
    eviction: Mutex<()>,
}

impl Store {
    /// Create a store over an existing index and blob store
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, capacity: u64) -> Self {
        Self {
            db,
            blobs,
            capacity,
            locks: WriteLocks::new(),
            eviction: Mutex::new(()),
        }
    }

    /// Open the store under a cache root directory
    ///
    /// Creates `index.db` and `blobs/` as needed, then reconciles blobs
    /// left without an index row by an interrupted write.
    pub async fn open(root: impl AsRef<Path>, capacity: u64) -> Result<Self, StoreError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| StoreError::Blob {
                context: format!("creating cache directory {:?}", root),
                source: StorageError::Io(e),
            })?;

        let db = Database::connect(root.join(INDEX_FILE))
            .await
            .map_err(StoreError::index("opening index"))?;
        let blobs = LocalStorage::new(root.join(BLOB_DIR))
            .await
            .map_err(StoreError::blob("opening blob directory"))?;

        let store = Self::new(db, Arc::new(blobs), capacity);
        store.reconcile().await?;

        info!(
            "Opened cache store at {:?} (capacity: {} bytes)",
            root, capacity
        );
        Ok(store)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Store an entry, then evict if the store grew past capacity
    pub async fn set(&self, entry: Entry) -> Result<(), StoreError> {
        let digest = entry.digest.clone();
        let size = entry.data.len() as u64;

        if size > self.capacity {
            return Err(StoreError::EntryTooLarge {
                digest,
                size,
                capacity: self.capacity,
            });
        }

        let _guard = self.locks.acquire(&digest).await;
        debug!("Storing entry {} ({} bytes)", digest, size);

        let blob_path = self
            .blobs
            .write(&digest, entry.data)
            .await
            .map_err(StoreError::blob(format!("writing blob {}", digest)))?;

        let row = NewIndexEntry {
            digest: digest.clone(),
            metadata: entry.metadata,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            size: size as i64,
            blob_path,
        };

        if let Err(e) = self.db.upsert_index_entry(row).await {
            if let Err(cleanup) = self.blobs.delete(&digest).await {
                warn!("Failed to remove uncommitted blob {}: {}", digest, cleanup);
            }
            return Err(StoreError::Index {
                context: format!("committing index row {}", digest),
                source: e,
            });
        }

        self.evict_if_needed().await?;
        Ok(())
    }

    /// Look up a live entry
    ///
    /// Expired rows read as a miss but stay in place. A row whose blob has
    /// gone missing also reads as a miss, and the row is removed.
    pub async fn get(&self, digest: &str) -> Result<Option<Entry>, StoreError> {
        let row = match self
            .db
            .get_index_entry(digest)
            .await
            .map_err(StoreError::index(format!("looking up {}", digest)))?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        let now = Utc::now();
        if row.is_expired_at(now) {
            debug!("Entry {} expired at {:?}", digest, row.expires_at);
            return Ok(None);
        }

        let data = match self.blobs.read(digest).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => {
                self.heal(digest).await;
                return Ok(None);
            }
            Err(e) => {
                return Err(StoreError::Blob {
                    context: format!("reading blob {}", digest),
                    source: e,
                });
            }
        };

        // Row and blob are read without the write lock; a concurrent overwrite
        // can land in between, so the blob must match the row it is paired with
        let row = if data.len() as i64 == row.size {
            row
        } else {
            match self
                .db
                .get_index_entry(digest)
                .await
                .map_err(StoreError::index(format!("re-reading {}", digest)))?
            {
                Some(current) if current.size == data.len() as i64 && !current.is_expired_at(now) => {
                    current
                }
                _ => {
                    debug!(
                        "Blob {} is {} bytes but its index row records {}, treating as miss",
                        digest,
                        data.len(),
                        row.size
                    );
                    return Ok(None);
                }
            }
        };

        self.db
            .touch_index_entry(digest, now)
            .await
            .map_err(StoreError::index(format!("refreshing access time of {}", digest)))?;

        Ok(Some(Entry::from_index(row, data, now)))
    }

    /// Remove every entry saved under a task name; returns how many were removed
    pub async fn invalidate_task(&self, task: &str) -> Result<u64, StoreError> {
        let digests = self
            .db
            .list_digests_for_task(task)
            .await
            .map_err(StoreError::index(format!("listing entries of task {}", task)))?;

        let mut removed = 0u64;
        for digest in digests {
            let _guard = self.locks.acquire(&digest).await;
            if self.remove_locked(&digest).await? {
                removed += 1;
            }
        }

        info!("Invalidated {} entries for task {}", removed, task);
        Ok(removed)
    }

    /// Remove an entry; deleting an absent digest is not an error
    pub async fn delete(&self, digest: &str) -> Result<bool, StoreError> {
        let _guard = self.locks.acquire(digest).await;
        self.remove_locked(digest).await
    }

    /// Get storage statistics
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let index = self
            .db
            .get_index_stats()
            .await
            .map_err(StoreError::index("computing stats"))?;

        let usage_percent = if self.capacity == 0 {
            0.0
        } else {
            index.total_size as f64 / self.capacity as f64 * 100.0
        };

        Ok(StoreStats {
            entries: index.entry_count,
            total_size: index.total_size,
            capacity: self.capacity,
            usage_percent,
            oldest_access: index.oldest_access,
        })
    }

    /// Physically remove entries whose TTL has passed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let expired = self
            .db
            .get_expired_entries(now)
            .await
            .map_err(StoreError::index("listing expired entries"))?;

        let mut purged = 0u64;
        for row in expired {
            let _guard = self.locks.acquire(&row.digest).await;

            // Rewritten since listed: the new row carries its own expiry
            match self.db.get_index_entry(&row.digest).await {
                Ok(Some(current)) if current.is_expired_at(now) => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to re-check expired entry {}: {}", row.digest, e);
                    continue;
                }
            }

            match self.remove_locked(&row.digest).await {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to purge expired entry {}: {}", row.digest, e),
            }
        }

        info!("Purged {} expired entries", purged);
        Ok(purged)
    }

    /// Delete leftover staging files and blobs no index row references
    pub async fn reconcile(&self) -> Result<u64, StoreError> {
        self.blobs
            .clear_staging()
            .await
            .map_err(StoreError::blob("clearing staging area"))?;

        let indexed: HashSet<String> = self
            .db
            .list_index_digests()
            .await
            .map_err(StoreError::index("listing indexed digests"))?
            .into_iter()
            .collect();
        let stored = self
            .blobs
            .list()
            .await
            .map_err(StoreError::blob("listing blobs"))?;

        let mut removed = 0u64;
        for digest in stored.into_iter().filter(|d| !indexed.contains(d)) {
            let _guard = self.locks.acquire(&digest).await;

            // A write may have committed the row since the listing
            match self.db.get_index_entry(&digest).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    warn!("Failed to re-check orphaned blob {}: {}", digest, e);
                    continue;
                }
            }

            match self.blobs.delete(&digest).await {
                Ok(true) => {
                    debug!("Removed orphaned blob {}", digest);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove orphaned blob {}: {}", digest, e),
            }
        }

        if removed > 0 {
            info!("Reconciled cache store: removed {} orphaned blobs", removed);
        }
        Ok(removed)
    }

    /// Close the index connection pool
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Evict least recently accessed entries down to half of capacity
    ///
    /// Only runs when the total size is above capacity. Entries with a write
    /// in flight are skipped, as are entries that fail to delete.
    async fn evict_if_needed(&self) -> Result<u64, StoreError> {
        let _pass = self.eviction.lock().await;

        let mut total = self
            .db
            .get_total_size()
            .await
            .map_err(StoreError::index("calculating cache size"))?
            .max(0) as u64;

        if total <= self.capacity {
            return Ok(0);
        }

        let target = self.capacity / 2;
        info!(
            "Cache size {} exceeds capacity {}, evicting down to {} bytes",
            total, self.capacity, target
        );

        let candidates = self
            .db
            .get_eviction_candidates()
            .await
            .map_err(StoreError::index("listing eviction candidates"))?;

        let mut freed = 0u64;
        let mut evicted = 0u64;
        for candidate in candidates {
            if total <= target {
                break;
            }

            let Some(_guard) = self.locks.try_acquire(&candidate.digest) else {
                debug!("Skipping eviction of {}: write in flight", candidate.digest);
                continue;
            };

            debug!(
                "Evicting cache entry: {} (last accessed {})",
                candidate.digest, candidate.accessed_at
            );

            match self.remove_locked(&candidate.digest).await {
                Ok(true) => {
                    let size = candidate.size.max(0) as u64;
                    total = total.saturating_sub(size);
                    freed += size;
                    evicted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to evict {}: {}", candidate.digest, e),
            }
        }

        info!("Evicted {} entries ({} bytes) from cache", evicted, freed);
        Ok(freed)
    }

    /// Remove index row then blob; the caller holds the digest's write lock
    async fn remove_locked(&self, digest: &str) -> Result<bool, StoreError> {
        let existed = self
            .db
            .delete_index_entry(digest)
            .await
            .map_err(StoreError::index(format!("deleting index row {}", digest)))?;

        self.blobs
            .delete(digest)
            .await
            .map_err(StoreError::blob(format!("deleting blob {}", digest)))?;

        Ok(existed)
    }

    /// Drop an index row whose blob is missing
    async fn heal(&self, digest: &str) {
        let _guard = self.locks.acquire(digest).await;

        // A writer may have placed a new blob while we waited for the lock
        match self.blobs.exists(digest).await {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                warn!("Failed to check blob {} during self-heal: {}", digest, e);
                return;
            }
        }

        warn!("Cache entry in index but blob missing, removing: {}", digest);
        if let Err(e) = self.db.delete_index_entry(digest).await {
            warn!("Failed to remove stale index row {}: {}", digest, e);
        }
    }
}
