//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskvault_core::{
    AuditMode, CacheSettings, ConfigError, DEFAULT_MAX_SIZE, EvictionPolicy, EvictionStrategy,
    HashAlgorithm, default_policy,
};
use tracing::info;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = ".taskvault/config.toml";

/// Prefix of environment variables overriding `[cache]` and `[logging]`
/// values, e.g. `TASKVAULT__CACHE__MAX_SIZE`
const ENV_PREFIX: &str = "TASKVAULT";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    /// Policies keyed by task name
    #[serde(default = "default_policies")]
    pub policies: BTreeMap<String, PolicyConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
    /// `file`, `tracing` or `none`
    #[serde(default = "default_audit")]
    pub audit: String,
}

/// Per-task retention rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Zero disables expiry
    #[serde(default)]
    pub ttl_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size: default_max_size(),
            hash_algorithm: default_hash_algorithm(),
            audit: default_audit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            policies: default_policies(),
            logging: LoggingConfig::default(),
        }
    }
}

impl From<&EvictionPolicy> for PolicyConfig {
    fn from(policy: &EvictionPolicy) -> Self {
        Self {
            ttl_seconds: policy.ttl.map(|ttl| ttl.as_secs()).unwrap_or_default(),
            max_size_bytes: policy.max_size,
            strategy: policy.strategy.as_str().to_string(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".taskvault/cache")
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn default_hash_algorithm() -> String {
    HashAlgorithm::default().as_str().to_string()
}

fn default_audit() -> String {
    AuditMode::default().as_str().to_string()
}

fn default_strategy() -> String {
    EvictionStrategy::default().as_str().to_string()
}

fn default_policies() -> BTreeMap<String, PolicyConfig> {
    let policy = default_policy();
    BTreeMap::from([(policy.name.clone(), PolicyConfig::from(&policy))])
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Values taken from `TASKVAULT__*` environment variables
///
/// Policy tables are keyed by task name, which is case-sensitive, so they
/// are only read from the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    cache: CacheOverrides,
    logging: LoggingOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheOverrides {
    dir: Option<PathBuf>,
    max_size: Option<u64>,
    hash_algorithm: Option<String>,
    audit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingOverrides {
    level: Option<String>,
    format: Option<String>,
}

impl Config {
    /// Load configuration from a file, with environment overrides
    ///
    /// A missing file is not an error: defaults are used, still subject to
    /// `TASKVAULT__*` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            info!("Loaded configuration from {:?}", path);
            config
        } else {
            info!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        config.apply_env(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )?;
        Ok(config)
    }

    /// Overlay `[cache]` and `[logging]` values from an environment source
    fn apply_env(&mut self, env: ::config::Environment) -> Result<()> {
        let overrides: EnvOverrides = ::config::Config::builder()
            .add_source(env)
            .build()
            .with_context(|| "Failed to read environment overrides")?
            .try_deserialize()
            .with_context(|| "Failed to parse environment overrides")?;

        let cache = overrides.cache;
        if let Some(dir) = cache.dir {
            self.cache.dir = dir;
        }
        if let Some(max_size) = cache.max_size {
            self.cache.max_size = max_size;
        }
        if let Some(hash_algorithm) = cache.hash_algorithm {
            self.cache.hash_algorithm = hash_algorithm;
        }
        if let Some(audit) = cache.audit {
            self.cache.audit = audit;
        }

        let logging = overrides.logging;
        if let Some(level) = logging.level {
            self.logging.level = level;
        }
        if let Some(format) = logging.format {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Save configuration to a file atomically
    ///
    /// Writes to a temporary file in the same directory, syncs it and renames
    /// it over the target, so a crash leaves the previous file intact.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all().with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Convert into validated cache settings
    pub fn to_settings(&self) -> Result<CacheSettings, ConfigError> {
        let hash_algorithm: HashAlgorithm = self
            .cache
            .hash_algorithm
            .parse()
            .map_err(|_| ConfigError::UnsupportedHashAlgorithm(self.cache.hash_algorithm.clone()))?;

        let audit: AuditMode = self
            .cache
            .audit
            .parse()
            .map_err(|_| ConfigError::UnknownAuditMode(self.cache.audit.clone()))?;

        let mut settings = CacheSettings::new(&self.cache.dir)
            .with_max_size(self.cache.max_size)
            .with_hash_algorithm(hash_algorithm)
            .with_audit(audit);

        for (name, policy) in &self.policies {
            let strategy: EvictionStrategy =
                policy
                    .strategy
                    .parse()
                    .map_err(|_| ConfigError::UnknownStrategy {
                        task: name.clone(),
                        strategy: policy.strategy.clone(),
                    })?;

            let mut eviction = EvictionPolicy::new(name.as_str())
                .with_ttl(Duration::from_secs(policy.ttl_seconds))
                .with_strategy(strategy);
            if let Some(max_size) = policy.max_size_bytes {
                eviction = eviction.with_max_size(max_size);
            }
            settings = settings.with_policy(eviction);
        }

        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use taskvault_core::{CacheManager, NoopAudit};
    use tempfile::TempDir;

    fn env_source(vars: &[(&str, &str)]) -> ::config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(Some(vars))
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.cache.dir, PathBuf::from(".taskvault/cache"));
        assert_eq!(config.cache.max_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.cache.hash_algorithm, "blake3");
        assert_eq!(config.cache.audit, "file");
        assert_eq!(config.logging.level, "info");

        let policy = &config.policies["default"];
        assert_eq!(policy.ttl_seconds, 7 * 24 * 60 * 60);
        assert_eq!(policy.max_size_bytes, Some(100 * 1024 * 1024));
        assert_eq!(policy.strategy, "lru");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.cache.max_size = 4096;
        config.cache.hash_algorithm = "sha256".to_string();
        config.policies.insert(
            "flaky".to_string(),
            PolicyConfig {
                ttl_seconds: 60,
                max_size_bytes: None,
                strategy: "fifo".to_string(),
            },
        );
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.cache.max_size, 4096);
        assert_eq!(loaded.cache.hash_algorithm, "sha256");
        assert_eq!(loaded.policies.len(), 2);
        assert_eq!(loaded.policies["flaky"].ttl_seconds, 60);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nmax_size = 1024\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache.max_size, 1024);
        assert_eq!(config.cache.hash_algorithm, "blake3");
        assert!(config.policies.contains_key("default"));
    }

    #[test]
    fn test_policy_names_keep_their_case() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[policies.BuildDocs]\nttl_seconds = 60\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.policies.contains_key("BuildDocs"));
        assert!(!config.policies.contains_key("builddocs"));

        let settings = config.to_settings().unwrap();
        let policy = settings
            .policies
            .iter()
            .find(|p| p.name == "BuildDocs")
            .unwrap();
        assert_eq!(policy.effective_ttl(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_mixed_case_policy_ttl_applies_to_saves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "[cache]\ndir = {:?}\n\n[policies.BuildDocs]\nttl_seconds = 60\n",
                dir.path().join("cache")
            ),
        )
        .unwrap();

        let settings = Config::load(&path).unwrap().to_settings().unwrap();
        let manager = CacheManager::open(&settings, Arc::new(NoopAudit)).await.unwrap();

        let digest = manager
            .save_result("BuildDocs", b"docs-src", &b"html"[..], None)
            .await
            .unwrap();
        let entry = manager.store().get(&digest).await.unwrap().unwrap();
        let expires_at = entry.expires_at.unwrap();
        let ttl = expires_at - entry.created_at;
        assert_eq!(ttl.num_seconds(), 60);

        let other = manager
            .save_result("builddocs", b"other-src", &b"html"[..], None)
            .await
            .unwrap();
        assert!(manager.store().get(&other).await.unwrap().unwrap().expires_at.is_none());

        manager.close().await.unwrap();
    }

    #[test]
    fn test_env_overrides_cache_and_logging() {
        let mut config = Config::default();
        config.policies.insert(
            "BuildDocs".to_string(),
            PolicyConfig {
                ttl_seconds: 60,
                max_size_bytes: None,
                strategy: "lru".to_string(),
            },
        );

        config
            .apply_env(env_source(&[
                ("TASKVAULT__CACHE__MAX_SIZE", "2048"),
                ("TASKVAULT__CACHE__AUDIT", "tracing"),
                ("TASKVAULT__CACHE__DIR", "/tmp/vault"),
                ("TASKVAULT__LOGGING__FORMAT", "json"),
                ("TASKVAULT__POLICIES__BUILDDOCS__TTL_SECONDS", "1"),
                ("TASKVAULT_CONFIG", "ignored.toml"),
            ]))
            .unwrap();

        assert_eq!(config.cache.max_size, 2048);
        assert_eq!(config.cache.audit, "tracing");
        assert_eq!(config.cache.dir, PathBuf::from("/tmp/vault"));
        assert_eq!(config.cache.hash_algorithm, "blake3");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.policies["BuildDocs"].ttl_seconds, 60);
        assert!(!config.policies.contains_key("builddocs"));
    }

    #[test]
    fn test_to_settings() {
        let mut config = Config::default();
        config.cache.dir = PathBuf::from("/tmp/vault");

        let settings = config.to_settings().unwrap();
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/vault"));
        assert_eq!(settings.hash_algorithm, HashAlgorithm::Blake3);
        assert_eq!(settings.audit, AuditMode::File);
        assert_eq!(settings.policies.len(), 1);
        assert_eq!(
            settings.policies[0].effective_ttl(),
            Some(Duration::from_secs(604_800))
        );
    }

    #[test]
    fn test_to_settings_rejects_invalid_values() {
        let mut config = Config::default();
        config.cache.hash_algorithm = "md5".to_string();
        assert!(matches!(
            config.to_settings(),
            Err(ConfigError::UnsupportedHashAlgorithm(name)) if name == "md5"
        ));

        let mut config = Config::default();
        config.cache.audit = "syslog".to_string();
        assert!(matches!(
            config.to_settings(),
            Err(ConfigError::UnknownAuditMode(mode)) if mode == "syslog"
        ));

        let mut config = Config::default();
        config.cache.max_size = 0;
        assert!(matches!(config.to_settings(), Err(ConfigError::InvalidCapacity(0))));

        let mut config = Config::default();
        config.policies.get_mut("default").unwrap().strategy = "random".to_string();
        assert!(matches!(
            config.to_settings(),
            Err(ConfigError::UnknownStrategy { task, .. }) if task == "default"
        ));
    }
}
