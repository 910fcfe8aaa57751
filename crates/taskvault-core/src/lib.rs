//! TaskVault Core Business Logic
//!
//! This crate provides the cache manager, the storage engine that backs it,
//! per-task eviction policies and the audit trail.

pub mod audit;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;

pub use audit::{
    AuditEvent, AuditKind, AuditMode, AuditSink, FileAuditLog, NoopAudit, ParseAuditModeError,
    TracingAudit,
};
pub use cache::{
    CacheManager, CacheStats, CachedResult, EvictionPolicy, EvictionStrategy, Snapshot, Store,
    StoreStats,
};
pub use client::Client;
pub use config::{CacheSettings, DEFAULT_MAX_SIZE, default_policy};
pub use error::{ConfigError, CoreError, StoreError};
pub use taskvault_db::{Metadata, MetadataValue};
pub use taskvault_hash::{HashAlgorithm, HashEngine};
