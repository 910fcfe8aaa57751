//! Core error types

use taskvault_db::DbError;
use taskvault_storage::StorageError;
use thiserror::Error;

/// Invalid configuration, detected before any storage operation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cache directory is required")]
    MissingCacheDir,

    #[error("Invalid cache capacity: {0} bytes (must be greater than zero)")]
    InvalidCapacity(u64),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("Unknown audit mode: {0}")]
    UnknownAuditMode(String),

    #[error("Unknown eviction strategy '{strategy}' for task '{task}'")]
    UnknownStrategy { task: String, strategy: String },

    #[error("Policy name required")]
    EmptyPolicyName,
}

/// Storage engine failure, annotated with what was being attempted
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Index error while {context}: {source}")]
    Index {
        context: String,
        #[source]
        source: DbError,
    },

    #[error("Blob error while {context}: {source}")]
    Blob {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("Entry {digest} is {size} bytes, larger than the cache capacity of {capacity} bytes")]
    EntryTooLarge {
        digest: String,
        size: u64,
        capacity: u64,
    },
}

impl StoreError {
    pub(crate) fn index(context: impl Into<String>) -> impl FnOnce(DbError) -> StoreError {
        let context = context.into();
        move |source| StoreError::Index { context, source }
    }

    pub(crate) fn blob(context: impl Into<String>) -> impl FnOnce(StorageError) -> StoreError {
        let context = context.into();
        move |source| StoreError::Blob { context, source }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Audit sink error: {0}")]
    Audit(#[source] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Cache manager is closed")]
    Closed,
}
