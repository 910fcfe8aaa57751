//! Cache manager implementation

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use taskvault_db::{Metadata, MetadataValue};
use taskvault_hash::HashEngine;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::policy::EvictionPolicy;
use super::store::{Entry, Store, StoreStats};
use crate::audit::{AuditEvent, AuditSink};
use crate::config::CacheSettings;
use crate::error::CoreError;

/// A cached task output returned by a lookup
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub digest: String,
    pub data: Bytes,
    pub metadata: Metadata,
}

/// Storage statistics plus in-process hit/miss counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Point-in-time description of the cache for backups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stats: CacheStats,
}

/// State guarded by the configuration barrier
#[derive(Default)]
struct ManagerState {
    policies: HashMap<String, EvictionPolicy>,
    closed: bool,
}

/// Maps (task, input) pairs to cached outputs
///
/// Lookups, saves and stats share the configuration barrier; registering a
/// policy or closing the manager takes it exclusively.
pub struct CacheManager {
    store: Store,
    hasher: HashEngine,
    audit: Arc<dyn AuditSink>,
    state: RwLock<ManagerState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new(store: Store, hasher: HashEngine, audit: Arc<dyn AuditSink>) -> Self {
        info!(
            "Initializing cache manager (capacity: {} bytes, hash: {})",
            store.capacity(),
            hasher.algorithm()
        );

        Self {
            store,
            hasher,
            audit,
            state: RwLock::new(ManagerState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Validate settings, open the store and register the configured policies
    pub async fn open(settings: &CacheSettings, audit: Arc<dyn AuditSink>) -> Result<Self, CoreError> {
        settings.validate()?;

        let store = Store::open(&settings.cache_dir, settings.max_size).await?;
        let manager = Self::new(store, HashEngine::new(settings.hash_algorithm), audit);

        for policy in &settings.policies {
            manager.register_policy(policy.clone()).await?;
        }

        Ok(manager)
    }

    pub fn hasher(&self) -> &HashEngine {
        &self.hasher
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Cache the output of a task run; returns the input digest
    pub async fn save_result(
        &self,
        task: &str,
        input: &[u8],
        output: impl Into<Bytes>,
        user_metadata: Option<Metadata>,
    ) -> Result<String, CoreError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        let digest = self.hasher.hash_data(input);
        let output = output.into();
        let now = Utc::now();

        let mut metadata = Metadata::new();
        metadata.insert("task".to_string(), MetadataValue::from(task));
        metadata.insert("input_hash".to_string(), MetadataValue::from(digest.as_str()));
        metadata.insert("output_size".to_string(), MetadataValue::from(output.len()));
        if let Some(user) = user_metadata {
            metadata.insert("user_data".to_string(), MetadataValue::from(user));
        }

        let mut entry = Entry::new(digest.clone(), output, metadata, now);
        if let Some(ttl) = state.policies.get(task).and_then(EvictionPolicy::effective_ttl) {
            entry.expires_at = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl));
        }

        debug!("Saving result for task {} ({} bytes)", task, entry.size);

        if let Err(e) = self.store.set(entry).await {
            self.audit.record(&AuditEvent::error("save_error", task, &e));
            return Err(e.into());
        }

        self.audit.record(&AuditEvent::hit("save", task, &digest));
        Ok(digest)
    }

    /// Look up the cached output for a task input; a miss is `Ok(None)`
    pub async fn get_result(&self, task: &str, input: &[u8]) -> Result<Option<CachedResult>, CoreError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        let digest = self.hasher.hash_data(input);

        let entry = match self.store.get(&digest).await {
            Ok(entry) => entry,
            Err(e) => {
                self.audit.record(&AuditEvent::error("get_error", task, &e));
                return Err(e.into());
            }
        };

        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.audit.record(&AuditEvent::hit("get", task, &digest));
                Ok(Some(CachedResult {
                    digest: entry.digest,
                    data: entry.data,
                    metadata: entry.metadata,
                }))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.audit.record(&AuditEvent::miss("get", task, &digest));
                Ok(None)
            }
        }
    }

    /// Delete the cached output for a task input; returns whether it existed
    pub async fn delete_result(&self, task: &str, input: &[u8]) -> Result<bool, CoreError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        let digest = self.hasher.hash_data(input);
        match self.store.delete(&digest).await {
            Ok(existed) => {
                debug!("Deleted result for task {}: {} (existed: {})", task, digest, existed);
                if existed {
                    self.audit.record(&AuditEvent::delete("delete", task, Some(&digest)));
                }
                Ok(existed)
            }
            Err(e) => {
                self.audit.record(&AuditEvent::error("delete_error", task, &e));
                Err(e.into())
            }
        }
    }

    /// Delete every cached output saved under a task name; returns the count
    ///
    /// Matches the task name recorded at save time exactly.
    pub async fn invalidate_task(&self, task: &str) -> Result<u64, CoreError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        match self.store.invalidate_task(task).await {
            Ok(removed) => {
                self.audit.record(&AuditEvent::delete("invalidate", task, None));
                Ok(removed)
            }
            Err(e) => {
                self.audit.record(&AuditEvent::error("invalidate_error", task, &e));
                Err(e.into())
            }
        }
    }

    /// Register (or replace) the policy for a task
    ///
    /// Applies to later saves only; existing entries keep their expiry.
    pub async fn register_policy(&self, policy: EvictionPolicy) -> Result<(), CoreError> {
        if policy.name.trim().is_empty() {
            return Err(CoreError::InvalidPolicy("policy name required".to_string()));
        }

        let mut state = self.state.write().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        debug!(
            "Registering policy for task {} (ttl: {:?}, strategy: {})",
            policy.name,
            policy.effective_ttl(),
            policy.strategy.as_str()
        );
        state.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Current policy for a task, if one is registered
    pub async fn policy(&self, task: &str) -> Option<EvictionPolicy> {
        self.state.read().await.policies.get(task).cloned()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> Result<CacheStats, CoreError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        Ok(CacheStats {
            store: self.store.stats().await?,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        })
    }

    /// Remove expired entries from disk
    pub async fn purge_expired(&self) -> Result<u64, CoreError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(CoreError::Closed);
        }

        Ok(self.store.purge_expired().await?)
    }

    /// Export the current cache state as pretty-printed JSON
    pub async fn export_snapshot(&self) -> Result<String, CoreError> {
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            stats: self.stats().await?,
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Close the index and the audit sink; later calls fail with `Closed`
    pub async fn close(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        self.store.close().await;
        if let Err(e) = self.audit.close() {
            warn!("Failed to close audit sink: {}", e);
            return Err(CoreError::Audit(e));
        }

        info!("Cache manager closed");
        Ok(())
    }
}
