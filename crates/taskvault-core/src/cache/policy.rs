//! Per-task eviction policies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Error type for parsing eviction strategy
#[derive(Debug, Clone)]
pub struct ParseEvictionStrategyError(String);

impl ParseEvictionStrategyError {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParseEvictionStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid eviction strategy: {}", self.0)
    }
}

impl std::error::Error for ParseEvictionStrategyError {}

/// Named eviction strategy
///
/// Only LRU ordering is implemented; LFU and FIFO are accepted so existing
/// configurations keep loading, and are evicted in LRU order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least Recently Used - evict items that haven't been accessed recently
    #[default]
    Lru,
    /// Least Frequently Used
    Lfu,
    /// First In First Out
    Fifo,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Lfu => "lfu",
            EvictionStrategy::Fifo => "fifo",
        }
    }
}

impl FromStr for EvictionStrategy {
    type Err = ParseEvictionStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(EvictionStrategy::Lru),
            "lfu" => Ok(EvictionStrategy::Lfu),
            "fifo" => Ok(EvictionStrategy::Fifo),
            _ => Err(ParseEvictionStrategyError(s.to_string())),
        }
    }
}

/// Retention rules for the entries of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Task name the policy applies to
    pub name: String,
    /// Entries expire this long after they are saved
    pub ttl: Option<Duration>,
    /// Size hint for the task's entries, in bytes
    pub max_size: Option<u64>,
    pub strategy: EvictionStrategy,
}

impl EvictionPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: None,
            max_size: None,
            strategy: EvictionStrategy::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// TTL to apply at write time; a zero TTL means no expiry
    pub fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| !ttl.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strategy() {
        assert_eq!("LRU".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Lru);
        assert_eq!("fifo".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Fifo);

        let err = "random".parse::<EvictionStrategy>().unwrap_err();
        assert_eq!(err.name(), "random");
    }

    #[test]
    fn test_effective_ttl() {
        let policy = EvictionPolicy::new("build");
        assert_eq!(policy.effective_ttl(), None);

        let policy = policy.with_ttl(Duration::ZERO);
        assert_eq!(policy.effective_ttl(), None);

        let policy = policy.with_ttl(Duration::from_secs(60));
        assert_eq!(policy.effective_ttl(), Some(Duration::from_secs(60)));
    }
}
