//! Database models

use crate::utils::{parse_datetime_or_now, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeMap;

/// Open-ended entry metadata, ordered by key
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A metadata value
///
/// Serialized untagged, so a metadata map round-trips as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(Metadata),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            MetadataValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

impl From<Metadata> for MetadataValue {
    fn from(v: Metadata) -> Self {
        MetadataValue::Map(v)
    }
}

/// Index row for a cached blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub digest: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: i64,
    pub blob_path: String,
}

impl IndexEntry {
    /// Whether the entry is logically expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// New index row (for insertion)
#[derive(Debug, Clone)]
pub struct NewIndexEntry {
    pub digest: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: i64,
    pub blob_path: String,
}

/// Lightweight row used to pick eviction victims
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub digest: String,
    pub size: i64,
    pub accessed_at: DateTime<Utc>,
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for IndexEntry {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let metadata_json: String = row.try_get("metadata")?;
        let metadata: Metadata =
            serde_json::from_str(&metadata_json).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let expires_at = row
            .try_get::<Option<String>, _>("expires_at")?
            .map(|s| parse_timestamp(&s))
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(IndexEntry {
            digest: row.try_get("digest")?,
            metadata,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            accessed_at: parse_datetime_or_now(&row.try_get::<String, _>("accessed_at")?),
            expires_at,
            size: row.try_get("size")?,
            blob_path: row.try_get("blob_path")?,
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for EvictionCandidate {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(EvictionCandidate {
            digest: row.try_get("digest")?,
            size: row.try_get("size")?,
            accessed_at: parse_datetime_or_now(&row.try_get::<String, _>("accessed_at")?),
        })
    }
}
