//! Cache management module

mod locks;
mod manager;
mod policy;
mod store;

pub use manager::{CacheManager, CacheStats, CachedResult, Snapshot};
pub use policy::{EvictionPolicy, EvictionStrategy, ParseEvictionStrategyError};
pub use store::{BLOB_DIR, Entry, INDEX_FILE, Store, StoreStats};
