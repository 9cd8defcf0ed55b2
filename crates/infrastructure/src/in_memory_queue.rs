use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobq_core::errors::JobqError;
use jobq_core::models::Message;
use jobq_core::traits::MessageQueue;
use jobq_core::JobqResult;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// 内存消息队列实现
///
/// 基于Tokio channels，适用于单进程嵌入式部署和测试。
/// 每个队列是一对无界channel加原子大小计数，消息消费即确认。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    /// 队列存储：队列名 -> channel两端
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
    /// 单个队列的最大容量（0表示无限制）
    max_queue_size: usize,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    /// 接收端用Mutex包装，允许多个消费者轮流取走消息
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    size: Arc<AtomicU32>,
    _durable: bool,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_max_queue_size(10_000)
    }

    pub fn with_max_queue_size(max_queue_size: usize) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            max_queue_size,
        }
    }

    /// 获取或创建队列channel
    async fn get_or_create_queue(&self, queue_name: &str, durable: bool) -> JobqResult<()> {
        let mut queues = self.queues.write().await;
        if !queues.contains_key(queue_name) {
            debug!("创建内存队列: {}", queue_name);
            let (sender, receiver) = mpsc::unbounded_channel();
            queues.insert(
                queue_name.to_string(),
                QueueChannels {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                    size: Arc::new(AtomicU32::new(0)),
                    _durable: durable,
                },
            );
        }
        Ok(())
    }

    async fn get_channels(
        &self,
        queue_name: &str,
    ) -> JobqResult<(
        mpsc::UnboundedSender<Message>,
        Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
        Arc<AtomicU32>,
    )> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|c| (c.sender.clone(), c.receiver.clone(), c.size.clone()))
            .ok_or_else(|| JobqError::MessageQueue(format!("队列 '{queue_name}' 不存在")))
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> JobqResult<()> {
        self.get_or_create_queue(queue, false).await?;
        let (sender, _, size) = self.get_channels(queue).await?;

        if self.max_queue_size > 0 && size.load(Ordering::Relaxed) as usize >= self.max_queue_size {
            warn!("队列 '{}' 已满，拒绝消息 {}", queue, message.id);
            return Err(JobqError::MessageQueue(format!(
                "队列 '{queue}' 已达到容量上限 {}",
                self.max_queue_size
            )));
        }

        sender
            .send(message.clone())
            .map_err(|e| JobqError::MessageQueue(format!("向队列 '{queue}' 发送消息失败: {e}")))?;
        size.fetch_add(1, Ordering::Relaxed);

        debug!("消息 {} 已发布到队列 '{}'", message.id, queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> JobqResult<Vec<Message>> {
        self.get_or_create_queue(queue, false).await?;
        let (_, receiver, size) = self.get_channels(queue).await?;

        let mut messages = Vec::new();
        {
            let mut rx = receiver.lock().await;
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }

        if !messages.is_empty() {
            size.fetch_sub(messages.len() as u32, Ordering::Relaxed);
            debug!("从队列 '{}' 消费了 {} 条消息", queue, messages.len());
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> JobqResult<()> {
        // 内存队列消息一旦取走即确认
        debug!("确认消息: {}", message_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> JobqResult<()> {
        if requeue {
            warn!("内存队列不支持消息重新入队: {}", message_id);
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> JobqResult<()> {
        info!("创建队列 '{}' (durable: {})", queue, durable);
        self.get_or_create_queue(queue, durable).await
    }

    async fn delete_queue(&self, queue: &str) -> JobqResult<()> {
        let mut queues = self.queues.write().await;
        if let Some(channels) = queues.remove(queue) {
            drop(channels.sender);
            info!("队列 '{}' 已删除", queue);
        } else {
            warn!("要删除的队列 '{}' 不存在", queue);
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> JobqResult<u32> {
        let queues = self.queues.read().await;
        queues
            .get(queue)
            .map(|c| c.size.load(Ordering::Relaxed))
            .ok_or_else(|| JobqError::MessageQueue(format!("队列 '{queue}' 不存在")))
    }

    async fn purge_queue(&self, queue: &str) -> JobqResult<()> {
        let (_, receiver, size) = self.get_channels(queue).await?;
        let mut purged = 0u32;
        {
            let mut rx = receiver.lock().await;
            while rx.try_recv().is_ok() {
                purged += 1;
            }
        }
        size.store(0, Ordering::Relaxed);
        info!("清空队列 '{}'，移除 {} 条消息", queue, purged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobq_core::models::{JobExecutionMessage, Message};
    use serde_json::json;

    fn execution_message(job_id: &str) -> Message {
        Message::job_execution(JobExecutionMessage {
            job_id: job_id.to_string(),
            job_type: "shell".to_string(),
            payload: json!({"command": "echo"}),
            fingerprint: "f".repeat(64),
            timeout_seconds: 300,
            enqueued_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let queue = InMemoryMessageQueue::new();
        queue.create_queue("jobs", false).await.unwrap();

        let message = execution_message("job-1");
        queue.publish_message("jobs", &message).await.unwrap();
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 1);

        let messages = queue.consume_messages("jobs").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, message.id);
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let queue = InMemoryMessageQueue::new();
        let m1 = execution_message("job-1");
        let m2 = execution_message("job-2");
        queue.publish_message("q1", &m1).await.unwrap();
        queue.publish_message("q2", &m2).await.unwrap();

        let from_q1 = queue.consume_messages("q1").await.unwrap();
        assert_eq!(from_q1.len(), 1);
        assert_eq!(from_q1[0].id, m1.id);
        assert_eq!(queue.get_queue_size("q2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let queue = InMemoryMessageQueue::with_max_queue_size(2);
        queue
            .publish_message("jobs", &execution_message("a"))
            .await
            .unwrap();
        queue
            .publish_message("jobs", &execution_message("b"))
            .await
            .unwrap();
        let err = queue
            .publish_message("jobs", &execution_message("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobqError::MessageQueue(_)));
    }

    #[tokio::test]
    async fn test_purge_and_delete() {
        let queue = InMemoryMessageQueue::new();
        for i in 0..5 {
            queue
                .publish_message("jobs", &execution_message(&format!("job-{i}")))
                .await
                .unwrap();
        }
        queue.purge_queue("jobs").await.unwrap();
        assert_eq!(queue.get_queue_size("jobs").await.unwrap(), 0);

        queue.delete_queue("jobs").await.unwrap();
        assert!(queue.get_queue_size("jobs").await.is_err());
    }
}
