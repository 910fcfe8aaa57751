//! Cache settings consumed at construction
//!
//! The binary owns config-file loading; it converts its file format into
//! these types so the core crate stays independent of how settings are read.

use std::path::PathBuf;
use std::time::Duration;
use taskvault_hash::HashAlgorithm;

use crate::audit::AuditMode;
use crate::cache::{EvictionPolicy, EvictionStrategy};
use crate::error::ConfigError;

/// Default cache capacity: 10 GiB
pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Task name of the policy created for new configurations
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Settings for opening a cache manager
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Root directory holding the index, blobs and audit log
    pub cache_dir: PathBuf,
    /// Capacity in bytes
    pub max_size: u64,
    pub hash_algorithm: HashAlgorithm,
    /// Destination of audit events
    pub audit: AuditMode,
    /// Policies registered when the manager opens
    pub policies: Vec<EvictionPolicy>,
}

impl CacheSettings {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_size: DEFAULT_MAX_SIZE,
            hash_algorithm: HashAlgorithm::default(),
            audit: AuditMode::default(),
            policies: Vec::new(),
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_audit(mut self, audit: AuditMode) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Check the settings before any storage is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingCacheDir);
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidCapacity(self.max_size));
        }
        if self.policies.iter().any(|p| p.name.trim().is_empty()) {
            return Err(ConfigError::EmptyPolicyName);
        }
        Ok(())
    }
}

/// Policy written into new configurations: 7 days TTL, 100 MiB hint, LRU
pub fn default_policy() -> EvictionPolicy {
    EvictionPolicy::new(DEFAULT_POLICY_NAME)
        .with_ttl(Duration::from_secs(7 * 24 * 60 * 60))
        .with_max_size(100 * 1024 * 1024)
        .with_strategy(EvictionStrategy::Lru)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(CacheSettings::new("/tmp/cache").validate().is_ok());

        assert!(matches!(
            CacheSettings::new("").validate(),
            Err(ConfigError::MissingCacheDir)
        ));
        assert!(matches!(
            CacheSettings::new("/tmp/cache").with_max_size(0).validate(),
            Err(ConfigError::InvalidCapacity(0))
        ));
        assert!(matches!(
            CacheSettings::new("/tmp/cache")
                .with_policy(EvictionPolicy::new(" "))
                .validate(),
            Err(ConfigError::EmptyPolicyName)
        ));
    }

    #[test]
    fn test_default_policy() {
        let policy = default_policy();
        assert_eq!(policy.name, "default");
        assert_eq!(policy.effective_ttl(), Some(Duration::from_secs(604_800)));
        assert_eq!(policy.max_size, Some(104_857_600));
    }
}
