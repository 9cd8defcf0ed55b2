use async_trait::async_trait;
use jobq_core::config::MessageQueueConfig;
use jobq_core::errors::JobqError;
use jobq_core::models::Message;
use jobq_core::traits::MessageQueue;
use jobq_core::JobqResult;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Queue,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// RabbitMQ消息队列实现
///
/// 持久化队列声明加发布确认，消息取走即确认。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMQMessageQueue {
    pub async fn new(config: MessageQueueConfig) -> JobqResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| JobqError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| JobqError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let queue = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
        };

        // 预先声明系统使用的三个队列
        for name in [
            &config.job_queue,
            &config.status_queue,
            &config.heartbeat_queue,
        ] {
            queue.create_queue(name, true).await?;
        }

        Ok(queue)
    }

    async fn declare_queue(
        &self,
        channel: &Channel,
        queue_name: &str,
        durable: bool,
    ) -> JobqResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| JobqError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}")))?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> JobqResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| JobqError::MessageQueue(format!("关闭连接失败: {e}")))?;
        info!("RabbitMQ连接已关闭");
        Ok(())
    }

    fn is_not_found(err: &lapin::Error) -> bool {
        let message = err.to_string();
        message.contains("NOT_FOUND") || message.contains("404")
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> JobqResult<()> {
        let channel = self.channel.lock().await;
        let payload = message
            .serialize_bytes()
            .map_err(|e| JobqError::Serialization(format!("序列化消息失败: {e}")))?;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                // delivery_mode 2 = 持久化消息
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| JobqError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}")))?;

        confirm
            .await
            .map_err(|e| JobqError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!("消息 {} 已发布到队列: {}", message.id, queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> JobqResult<Vec<Message>> {
        let channel = self.channel.lock().await;

        match channel.basic_get(queue, BasicGetOptions::default()).await {
            Ok(Some(delivery)) => {
                let message = Message::deserialize_bytes(&delivery.data)
                    .map_err(|e| JobqError::Serialization(format!("反序列化消息失败: {e}")))?;

                channel
                    .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                    .await
                    .map_err(|e| JobqError::MessageQueue(format!("确认消息失败: {e}")))?;

                Ok(vec![message])
            }
            Ok(None) => Ok(vec![]),
            Err(e) if Self::is_not_found(&e) => {
                // 队列尚未创建，按空队列处理
                debug!("队列 {} 不存在，返回空结果", queue);
                Ok(vec![])
            }
            Err(e) => Err(JobqError::MessageQueue(format!(
                "从队列 {queue} 获取消息失败: {e}"
            ))),
        }
    }

    async fn ack_message(&self, message_id: &str) -> JobqResult<()> {
        // basic_get路径下消息在consume时已确认
        debug!("确认消息: {}", message_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> JobqResult<()> {
        debug!("拒绝消息: {}, 重新入队: {}", message_id, requeue);
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> JobqResult<()> {
        let channel = self.channel.lock().await;
        self.declare_queue(&channel, queue, durable).await?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> JobqResult<()> {
        let channel = self.channel.lock().await;
        channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map_err(|e| JobqError::MessageQueue(format!("删除队列 {queue} 失败: {e}")))?;
        debug!("队列 {} 已删除", queue);
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> JobqResult<u32> {
        let channel = self.channel.lock().await;
        let declared = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match declared {
            Ok(info) => Ok(info.message_count()),
            Err(e) if Self::is_not_found(&e) => Ok(0),
            Err(e) => Err(JobqError::MessageQueue(format!(
                "获取队列 {queue} 信息失败: {e}"
            ))),
        }
    }

    async fn purge_queue(&self, queue: &str) -> JobqResult<()> {
        let channel = self.channel.lock().await;
        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| JobqError::MessageQueue(format!("清空队列 {queue} 失败: {e}")))?;
        debug!("队列 {} 已清空", queue);
        Ok(())
    }
}
