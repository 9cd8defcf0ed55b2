//! In-process result cache with TTL and LRU eviction

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobq_core::models::JobResult;
use jobq_core::traits::{CacheStats, ResultCache};
use jobq_core::JobqResult;
use tracing::debug;

/// Cached result entry. At most one entry exists per fingerprint.
#[derive(Debug, Clone)]
struct CacheEntry {
    result: JobResult,
    expires_at: DateTime<Utc>,
    /// Monotonic access tick, used for LRU ordering.
    last_accessed: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Recency queue of (fingerprint, tick). Stale pairs are skipped
    /// during eviction, so each operation stays O(1) amortized.
    recency: VecDeque<(String, u64)>,
    tick: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn touch(&mut self, fingerprint: &str) -> u64 {
        self.tick += 1;
        self.recency.push_back((fingerprint.to_string(), self.tick));
        self.tick
    }

    /// Remove least-recently-used entries until the map fits `capacity`.
    fn evict_over_capacity(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            match self.recency.pop_front() {
                Some((fingerprint, tick)) => {
                    let is_current = self
                        .entries
                        .get(&fingerprint)
                        .map(|e| e.last_accessed == tick)
                        .unwrap_or(false);
                    if is_current {
                        self.entries.remove(&fingerprint);
                        self.stats.evictions += 1;
                        debug!("Evicted LRU cache entry: {}", fingerprint);
                    }
                    // Stale pair: a newer tick exists for this key, skip.
                }
                None => break,
            }
        }
    }
}

/// In-memory result cache.
///
/// All state lives behind a single mutex; operations never await while
/// holding it. `get` lazily drops expired entries, `put` evicts the
/// least-recently-used entry once the map exceeds `capacity`.
pub struct MemoryResultCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    default_ttl: Duration,
}

impl MemoryResultCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned mutex means a panic while mutating the map; the
        // map contents can no longer be trusted, treat as corruption.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, fingerprint: &str) -> JobqResult<Option<JobResult>> {
        let mut inner = self.lock();
        let now = Utc::now();

        match inner.entries.get(fingerprint) {
            Some(entry) if entry.expires_at <= now => {
                inner.entries.remove(fingerprint);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                debug!("Cache entry expired: {}", fingerprint);
                Ok(None)
            }
            Some(entry) => {
                let result = entry.result.clone();
                let tick = inner.touch(fingerprint);
                if let Some(entry) = inner.entries.get_mut(fingerprint) {
                    entry.last_accessed = tick;
                }
                inner.stats.hits += 1;
                Ok(Some(result))
            }
            None => {
                inner.stats.misses += 1;
                Ok(None)
            }
        }
    }

    async fn put(&self, fingerprint: &str, result: JobResult) -> JobqResult<()> {
        let mut inner = self.lock();
        let tick = inner.touch(fingerprint);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.default_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        inner.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                result,
                expires_at,
                last_accessed: tick,
            },
        );
        inner.stats.sets += 1;
        inner.evict_over_capacity(self.capacity);
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> JobqResult<bool> {
        let mut inner = self.lock();
        Ok(inner.entries.remove(fingerprint).is_some())
    }

    async fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    async fn health_check(&self) -> JobqResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(job_id: &str, value: i64) -> JobResult {
        JobResult::new(job_id, json!(value), 10)
    }

    #[tokio::test]
    async fn test_get_after_put_until_expiry() {
        let cache = MemoryResultCache::new(8, Duration::from_millis(50));
        cache.put("f1", result("job-1", 84)).await.unwrap();

        let hit = cache.get("f1").await.unwrap().expect("entry before TTL");
        assert_eq!(hit.value, json!(84));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("f1").await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let cache = MemoryResultCache::new(3, Duration::from_secs(60));
        for i in 0..10 {
            cache
                .put(&format!("f{i}"), result(&format!("job-{i}"), i))
                .await
                .unwrap();
            assert!(cache.len() <= 3);
        }
        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 7);
    }

    #[tokio::test]
    async fn test_lru_order_eviction() {
        let cache = MemoryResultCache::new(2, Duration::from_secs(60));
        cache.put("f1", result("job-1", 1)).await.unwrap();
        cache.put("f2", result("job-2", 2)).await.unwrap();

        // 访问f1使其成为最近使用，f2被淘汰
        cache.get("f1").await.unwrap().unwrap();
        cache.put("f3", result("job-3", 3)).await.unwrap();

        assert!(cache.get("f1").await.unwrap().is_some());
        assert!(cache.get("f2").await.unwrap().is_none());
        assert!(cache.get("f3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_replaces_same_fingerprint() {
        let cache = MemoryResultCache::new(4, Duration::from_secs(60));
        cache.put("f1", result("job-1", 1)).await.unwrap();
        cache.put("f1", result("job-1b", 2)).await.unwrap();

        assert_eq!(cache.len(), 1);
        let hit = cache.get("f1").await.unwrap().unwrap();
        assert_eq!(hit.value, json!(2));
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;
        let cache = Arc::new(MemoryResultCache::new(64, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("f{}", (t * 50 + i) % 100);
                    cache
                        .put(&key, JobResult::new("job", json!(i), 1))
                        .await
                        .unwrap();
                    let _ = cache.get(&key).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
