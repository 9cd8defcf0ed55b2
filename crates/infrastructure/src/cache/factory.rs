//! Cache backend selection

use std::sync::Arc;
use std::time::Duration;

use jobq_core::config::{CacheConfig, CacheType};
use jobq_core::traits::ResultCache;
use jobq_core::JobqResult;
use tracing::info;

use super::{MemoryResultCache, RedisResultCache};

pub struct ResultCacheFactory;

impl ResultCacheFactory {
    /// Build the configured result cache backend.
    pub async fn create(config: &CacheConfig) -> JobqResult<Arc<dyn ResultCache>> {
        let ttl = Duration::from_secs(config.default_ttl_seconds);
        match config.r#type {
            CacheType::Memory => {
                info!(
                    "Initializing in-memory result cache (capacity: {}, ttl: {}s)",
                    config.capacity, config.default_ttl_seconds
                );
                Ok(Arc::new(MemoryResultCache::new(config.capacity, ttl)))
            }
            CacheType::Redis => {
                info!("Initializing Redis result cache at {}", config.redis_url);
                let cache =
                    RedisResultCache::new(&config.redis_url, config.key_prefix.clone(), ttl)
                        .await?;
                Ok(Arc::new(cache))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_creation() {
        let config = CacheConfig::default();
        let cache = ResultCacheFactory::create(&config).await.unwrap();
        assert!(cache.health_check().await.unwrap());
    }
}
