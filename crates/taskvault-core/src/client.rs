//! Programmatic interface for tools that embed the cache

use bytes::Bytes;

use crate::cache::{CacheManager, CacheStats};
use crate::config::CacheSettings;
use crate::error::CoreError;

/// Thin wrapper over [`CacheManager`] that opens its own audit sink
pub struct Client {
    manager: CacheManager,
}

impl Client {
    /// Open the cache described by `settings`
    pub async fn open(settings: &CacheSettings) -> Result<Self, CoreError> {
        settings.validate()?;
        let audit = settings
            .audit
            .open_sink(&settings.cache_dir)
            .map_err(CoreError::Audit)?;
        let manager = CacheManager::open(settings, audit).await?;
        Ok(Self { manager })
    }

    /// Cache a task output; returns the cache key
    pub async fn cache_result(
        &self,
        task: &str,
        input: &[u8],
        output: impl Into<Bytes>,
    ) -> Result<String, CoreError> {
        self.manager.save_result(task, input, output, None).await
    }

    /// Cached output for a task input, if any
    pub async fn get_cached_result(&self, task: &str, input: &[u8]) -> Result<Option<Bytes>, CoreError> {
        Ok(self
            .manager
            .get_result(task, input)
            .await?
            .map(|result| result.data))
    }

    pub async fn stats(&self) -> Result<CacheStats, CoreError> {
        self.manager.stats().await
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub async fn close(&self) -> Result<(), CoreError> {
        self.manager.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AUDIT_FILE, AuditMode};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_client_round_trip() {
        let dir = TempDir::new().unwrap();
        let client = Client::open(&CacheSettings::new(dir.path())).await.unwrap();

        let key = client.cache_result("lint", b"src", &b"ok"[..]).await.unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(
            client.get_cached_result("lint", b"src").await.unwrap(),
            Some(Bytes::from_static(b"ok"))
        );
        assert_eq!(client.get_cached_result("lint", b"other").await.unwrap(), None);

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.store.entries, 1);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);

        client.close().await.unwrap();
        assert!(dir.path().join(AUDIT_FILE).exists());
    }

    #[tokio::test]
    async fn test_client_without_audit_log() {
        let dir = TempDir::new().unwrap();
        let settings = CacheSettings::new(dir.path()).with_audit(AuditMode::None);
        let client = Client::open(&settings).await.unwrap();

        client.cache_result("lint", b"src", &b"ok"[..]).await.unwrap();
        assert_eq!(client.manager().invalidate_task("lint").await.unwrap(), 1);
        client.close().await.unwrap();

        assert!(!dir.path().join(AUDIT_FILE).exists());
    }
}
