//! Redis-backed result cache

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobq_core::errors::JobqError;
use jobq_core::models::JobResult;
use jobq_core::traits::{CacheStats, ResultCache};
use jobq_core::JobqResult;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Result cache over a shared Redis instance.
///
/// Entry expiry is delegated to SETEX; capacity bounding is left to the
/// server's configured eviction policy. Undecodable stored bytes are
/// reported as `CacheCorruption` after the offending key is dropped.
pub struct RedisResultCache {
    client: Arc<redis::Client>,
    key_prefix: String,
    default_ttl: Duration,
    stats: Arc<RwLock<CacheStats>>,
}

impl RedisResultCache {
    pub async fn new(
        redis_url: &str,
        key_prefix: Option<String>,
        default_ttl: Duration,
    ) -> JobqResult<Self> {
        info!("Creating Redis result cache with URL: {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| JobqError::CacheError(e.to_string()))?;

        // Verify connectivity before handing the cache out
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| JobqError::CacheError(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| JobqError::CacheError(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key_prefix: key_prefix.unwrap_or_else(|| "jobq".to_string()),
            default_ttl,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    async fn get_connection(&self) -> JobqResult<redis::aio::ConnectionManager> {
        self.client
            .get_connection_manager()
            .await
            .map_err(|e| JobqError::CacheError(e.to_string()))
    }

    fn build_key(&self, fingerprint: &str) -> String {
        if self.key_prefix.is_empty() {
            format!("result:{fingerprint}")
        } else {
            format!("{}:result:{fingerprint}", self.key_prefix)
        }
    }

    async fn record_error(&self) {
        self.stats.write().await.errors += 1;
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn get(&self, fingerprint: &str) -> JobqResult<Option<JobResult>> {
        let key = self.build_key(fingerprint);
        let mut conn = self.get_connection().await?;

        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Cache GET failed for key {}: {}", key, e);
                JobqError::CacheError(e.to_string())
            })?;

        match raw {
            Some(bytes) => match serde_json::from_slice::<JobResult>(&bytes) {
                Ok(result) => {
                    debug!("Cache HIT: {}", key);
                    self.stats.write().await.hits += 1;
                    Ok(Some(result))
                }
                Err(e) => {
                    // Drop the bad entry so a restart rebuilds from empty
                    warn!("Corrupted cache entry {}, dropping it: {}", key, e);
                    self.record_error().await;
                    let _: Result<i32, _> =
                        redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
                    Err(JobqError::CacheCorruption(format!(
                        "无法解码缓存条目 {key}: {e}"
                    )))
                }
            },
            None => {
                debug!("Cache MISS: {}", key);
                self.stats.write().await.misses += 1;
                Ok(None)
            }
        }
    }

    async fn put(&self, fingerprint: &str, result: JobResult) -> JobqResult<()> {
        let key = self.build_key(fingerprint);
        let payload = serde_json::to_vec(&result)?;
        let mut conn = self.get_connection().await?;

        let ttl_seconds = self.default_ttl.as_secs().max(1) as i64;
        let _: () = redis::cmd("SETEX")
            .arg(&key)
            .arg(ttl_seconds)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Cache SET failed for key {}: {}", key, e);
                JobqError::CacheError(e.to_string())
            })?;

        debug!("Cache SET: {} with TTL {}s", key, ttl_seconds);
        self.stats.write().await.sets += 1;
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> JobqResult<bool> {
        let key = self.build_key(fingerprint);
        let mut conn = self.get_connection().await?;

        let deleted: i32 = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| JobqError::CacheError(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    async fn health_check(&self) -> JobqResult<bool> {
        let mut conn = self.get_connection().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| JobqError::CacheError(e.to_string()))?;
        Ok(reply == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_building() {
        let client = redis::Client::open("redis://localhost:6379").unwrap();
        let cache = RedisResultCache {
            client: Arc::new(client),
            key_prefix: "jobq".to_string(),
            default_ttl: Duration::from_secs(60),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        };
        assert_eq!(cache.build_key("abc"), "jobq:result:abc");

        let unprefixed = RedisResultCache {
            client: cache.client.clone(),
            key_prefix: String::new(),
            default_ttl: Duration::from_secs(60),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        };
        assert_eq!(unprefixed.build_key("abc"), "result:abc");
    }
}
