pub mod broker_client;
pub mod cache;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod redis_stream;

pub use broker_client::{BrokerClient, RetryPolicy};
pub use cache::{MemoryResultCache, RedisResultCache, ResultCacheFactory};
pub use in_memory_queue::InMemoryMessageQueue;
pub use message_queue::RabbitMQMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use redis_stream::RedisStreamMessageQueue;
