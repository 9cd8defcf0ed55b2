use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::JobqResult;
use crate::models::JobResult;

/// Result cache interface keyed by job fingerprint.
///
/// An entry expires after its TTL; backends may additionally bound the
/// number of live entries and evict in least-recently-used order.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Look up a cached result. Expired entries are treated as absent.
    async fn get(&self, fingerprint: &str) -> JobqResult<Option<JobResult>>;

    /// Store a result under the given fingerprint, replacing any
    /// previous entry for the same fingerprint.
    async fn put(&self, fingerprint: &str, result: JobResult) -> JobqResult<()>;

    /// Remove an entry. Returns whether an entry was present.
    async fn remove(&self, fingerprint: &str) -> JobqResult<bool>;

    /// Snapshot of cache counters.
    async fn stats(&self) -> CacheStats;

    /// Backend reachability check.
    async fn health_check(&self) -> JobqResult<bool>;
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expired: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.hits = 3;
        stats.misses = 1;
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
