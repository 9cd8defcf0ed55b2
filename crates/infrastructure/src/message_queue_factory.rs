use std::sync::Arc;

use jobq_core::config::{MessageQueueConfig, MessageQueueType};
use jobq_core::errors::JobqError;
use jobq_core::traits::MessageQueue;
use jobq_core::JobqResult;
use tracing::{debug, info};

use crate::redis_stream::RedisStreamConfig;
use crate::{InMemoryMessageQueue, RabbitMQMessageQueue, RedisStreamMessageQueue};

/// 按配置构建消息队列后端
pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> JobqResult<Arc<dyn MessageQueue>> {
        Self::validate_config(config)?;
        debug!("创建消息队列，类型: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::InMemory => {
                info!("初始化内存消息队列");
                Ok(Arc::new(InMemoryMessageQueue::new()))
            }
            MessageQueueType::RedisStream => {
                info!("初始化Redis Stream消息队列");
                let redis_config = RedisStreamConfig::from_message_queue_config(config);
                let queue = RedisStreamMessageQueue::new(redis_config).await?;
                Ok(Arc::new(queue))
            }
            MessageQueueType::Rabbitmq => {
                info!("初始化RabbitMQ消息队列");
                let queue = RabbitMQMessageQueue::new(config.clone()).await?;
                Ok(Arc::new(queue))
            }
        }
    }

    /// 校验后端地址与类型匹配
    pub fn validate_config(config: &MessageQueueConfig) -> JobqResult<()> {
        match config.r#type {
            MessageQueueType::InMemory => Ok(()),
            MessageQueueType::RedisStream => {
                if config.redis.is_some() {
                    return Ok(());
                }
                let url = url::Url::parse(&config.url)
                    .map_err(|e| JobqError::Configuration(format!("无效的Redis URL: {e}")))?;
                if url.scheme() != "redis" && url.scheme() != "rediss" {
                    return Err(JobqError::Configuration(
                        "Redis Stream需要redis://或rediss://地址".to_string(),
                    ));
                }
                Ok(())
            }
            MessageQueueType::Rabbitmq => {
                let url = url::Url::parse(&config.url)
                    .map_err(|e| JobqError::Configuration(format!("无效的AMQP URL: {e}")))?;
                if url.scheme() != "amqp" && url.scheme() != "amqps" {
                    return Err(JobqError::Configuration(
                        "RabbitMQ需要amqp://或amqps://地址".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend_creation() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::InMemory,
            ..Default::default()
        };
        let queue = MessageQueueFactory::create(&config).await.unwrap();
        queue.create_queue("jobs", false).await.unwrap();
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 0);
    }

    #[test]
    fn test_validate_rejects_mismatched_url() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::Rabbitmq,
            url: "redis://localhost:6379".to_string(),
            ..Default::default()
        };
        assert!(MessageQueueFactory::validate_config(&config).is_err());

        let config = MessageQueueConfig {
            r#type: MessageQueueType::RedisStream,
            url: "amqp://localhost:5672".to_string(),
            ..Default::default()
        };
        assert!(MessageQueueFactory::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_redis_section() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::RedisStream,
            url: String::new(),
            redis: Some(Default::default()),
            ..Default::default()
        };
        assert!(MessageQueueFactory::validate_config(&config).is_ok());
    }
}
