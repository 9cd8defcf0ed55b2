//! Result cache backends

pub mod factory;
pub mod memory;
pub mod redis;

pub use factory::ResultCacheFactory;
pub use memory::MemoryResultCache;
pub use redis::RedisResultCache;
