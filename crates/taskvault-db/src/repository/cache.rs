//! Cache index operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::DbError;
use crate::models::{EvictionCandidate, IndexEntry, NewIndexEntry};
use crate::repository::Database;
use crate::utils::{format_timestamp, parse_timestamp};

const ENTRY_COLUMNS: &str =
    "digest, metadata, created_at, accessed_at, expires_at, size, blob_path";

/// Aggregate figures over the whole index
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexStats {
    pub entry_count: i64,
    pub total_size: i64,
    pub oldest_access: Option<DateTime<Utc>>,
}

impl Database {
    // ==================== Cache Entry Operations ====================

    /// Insert an index row, replacing any row for the same digest
    pub async fn upsert_index_entry(&self, entry: NewIndexEntry) -> Result<IndexEntry, DbError> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (digest, metadata, created_at, accessed_at, expires_at, size, blob_path)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(digest) DO UPDATE SET
                metadata = excluded.metadata,
                created_at = excluded.created_at,
                accessed_at = excluded.accessed_at,
                expires_at = excluded.expires_at,
                size = excluded.size,
                blob_path = excluded.blob_path
            "#,
        )
        .bind(&entry.digest)
        .bind(&metadata_json)
        .bind(format_timestamp(&entry.created_at))
        .bind(format_timestamp(&entry.created_at))
        .bind(entry.expires_at.as_ref().map(format_timestamp))
        .bind(entry.size)
        .bind(&entry.blob_path)
        .execute(&self.pool)
        .await?;

        Ok(IndexEntry {
            digest: entry.digest,
            metadata: entry.metadata,
            created_at: entry.created_at,
            accessed_at: entry.created_at,
            expires_at: entry.expires_at,
            size: entry.size,
            blob_path: entry.blob_path,
        })
    }

    /// Get an index row by digest, expired or not
    pub async fn get_index_entry(&self, digest: &str) -> Result<Option<IndexEntry>, DbError> {
        let sql = format!("SELECT {} FROM cache_entries WHERE digest = ?", ENTRY_COLUMNS);
        let result = sqlx::query(&sql)
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| IndexEntry::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Update the last accessed time
    pub async fn touch_index_entry(&self, digest: &str, now: DateTime<Utc>) -> Result<(), DbError> {
        sqlx::query("UPDATE cache_entries SET accessed_at = ? WHERE digest = ?")
            .bind(format_timestamp(&now))
            .bind(digest)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete an index row by digest
    pub async fn delete_index_entry(&self, digest: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE digest = ?")
            .bind(digest)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All rows in eviction order: least recently accessed first, ties by insertion order
    pub async fn get_eviction_candidates(&self) -> Result<Vec<EvictionCandidate>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT digest, size, accessed_at
            FROM cache_entries
            ORDER BY accessed_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| EvictionCandidate::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Rows whose expiry time is at or before `now`
    pub async fn get_expired_entries(&self, now: DateTime<Utc>) -> Result<Vec<IndexEntry>, DbError> {
        let sql = format!(
            "SELECT {} FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ? ORDER BY expires_at ASC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(&now))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| IndexEntry::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Digests of every indexed entry
    pub async fn list_index_digests(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query("SELECT digest FROM cache_entries")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("digest")).collect())
    }

    /// Digests of every entry saved under a task name
    pub async fn list_digests_for_task(&self, task: &str) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT digest FROM cache_entries
            WHERE json_extract(metadata, '$.task') = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(task)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("digest")).collect())
    }

    /// Get total indexed size
    pub async fn get_total_size(&self) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COALESCE(SUM(size), 0) as total FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("total"))
    }

    /// Get entry count, total size and oldest access time in one query
    pub async fn get_index_stats(&self) -> Result<IndexStats, DbError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count, COALESCE(SUM(size), 0) as total, MIN(accessed_at) as oldest
            FROM cache_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let oldest_access = row
            .get::<Option<String>, _>("oldest")
            .and_then(|s| parse_timestamp(&s).ok());

        Ok(IndexStats {
            entry_count: row.get("count"),
            total_size: row.get("total"),
            oldest_access,
        })
    }
}
