//! 基于Redis Stream的消息队列实现
//!
//! 每个队列对应一个stream，消费通过consumer group完成，
//! 消息确认映射为XACK。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jobq_core::config::{MessageQueueConfig, RedisConfig};
use jobq_core::errors::JobqError;
use jobq_core::models::Message;
use jobq_core::traits::MessageQueue;
use jobq_core::JobqResult;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Redis Stream队列配置
#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    pub url: String,
    /// consumer group名称前缀
    pub group_prefix: String,
    /// 本实例的consumer标识
    pub consumer_id: String,
    /// 单次XREADGROUP读取的消息上限
    pub read_count: usize,
}

impl RedisStreamConfig {
    pub fn from_message_queue_config(config: &MessageQueueConfig) -> Self {
        let url = config
            .redis
            .as_ref()
            .map(RedisConfig::build_url)
            .unwrap_or_else(|| config.url.clone());
        Self {
            url,
            group_prefix: "jobq".to_string(),
            consumer_id: format!("consumer_{}", &Uuid::new_v4().to_string()[..8]),
            read_count: 16,
        }
    }
}

/// Redis Stream消息队列
pub struct RedisStreamMessageQueue {
    connection: redis::aio::ConnectionManager,
    config: RedisStreamConfig,
    /// 已投递未确认的消息：消息id -> (stream, entry id)
    pending_acks: Arc<Mutex<HashMap<String, (String, String)>>>,
}

impl RedisStreamMessageQueue {
    pub async fn new(config: RedisStreamConfig) -> JobqResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| JobqError::MessageQueue(format!("无效的Redis地址: {e}")))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| JobqError::MessageQueue(format!("连接Redis失败: {e}")))?;

        info!("成功连接到Redis Stream后端: {}", config.url);

        Ok(Self {
            connection,
            config,
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn group_name(&self, queue: &str) -> String {
        format!("{}_{}", self.config.group_prefix, queue)
    }

    /// 确保stream和consumer group存在，组已存在不算错误
    async fn ensure_group(&self, queue: &str) -> JobqResult<()> {
        let mut conn = self.connection.clone();
        let group = self.group_name(queue);
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(queue, &group, "$")
            .await;

        match created {
            Ok(()) => {
                debug!("为stream {} 创建consumer group {}", queue, group);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(JobqError::MessageQueue(format!(
                "创建consumer group失败: {e}"
            ))),
        }
    }
}

#[async_trait]
impl MessageQueue for RedisStreamMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> JobqResult<()> {
        let payload = message
            .serialize_bytes()
            .map_err(|e| JobqError::Serialization(format!("序列化消息失败: {e}")))?;

        let mut conn = self.connection.clone();
        let entry_id: String = conn
            .xadd(queue, "*", &[("data", payload.as_slice())])
            .await
            .map_err(|e| JobqError::MessageQueue(format!("XADD到 {queue} 失败: {e}")))?;

        debug!("消息 {} 已写入stream {} ({})", message.id, queue, entry_id);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> JobqResult<Vec<Message>> {
        self.ensure_group(queue).await?;

        let group = self.group_name(queue);
        let options = StreamReadOptions::default()
            .group(&group, &self.config.consumer_id)
            .count(self.config.read_count);

        let mut conn = self.connection.clone();
        let reply: StreamReadReply = conn
            .xread_options(&[queue], &[">"], &options)
            .await
            .map_err(|e| JobqError::MessageQueue(format!("XREADGROUP {queue} 失败: {e}")))?;

        let mut messages = Vec::new();
        let mut pending = self.pending_acks.lock().await;
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let Some(redis::Value::BulkString(data)) = entry.map.get("data") else {
                    warn!("stream {} 条目 {} 缺少data字段，跳过", queue, entry.id);
                    continue;
                };
                match Message::deserialize_bytes(data) {
                    Ok(message) => {
                        pending.insert(message.id.clone(), (queue.to_string(), entry.id.clone()));
                        messages.push(message);
                    }
                    Err(e) => {
                        // 无法解码的消息直接确认丢弃，避免反复投递
                        warn!("丢弃无法解码的消息 {}: {}", entry.id, e);
                        let _: Result<i64, _> = conn.xack(queue, &group, &[&entry.id]).await;
                    }
                }
            }
        }

        if !messages.is_empty() {
            debug!("从stream {} 读取了 {} 条消息", queue, messages.len());
        }
        Ok(messages)
    }

    async fn ack_message(&self, message_id: &str) -> JobqResult<()> {
        let entry = {
            let mut pending = self.pending_acks.lock().await;
            pending.remove(message_id)
        };

        let Some((stream, entry_id)) = entry else {
            debug!("消息 {} 不在待确认列表中", message_id);
            return Ok(());
        };

        let group = self.group_name(&stream);
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .xack(&stream, &group, &[&entry_id])
            .await
            .map_err(|e| JobqError::MessageQueue(format!("XACK失败: {e}")))?;

        debug!("已确认消息 {} ({})", message_id, entry_id);
        Ok(())
    }

    async fn nack_message(&self, message_id: &str, requeue: bool) -> JobqResult<()> {
        if requeue {
            // 保留在pending entries list中，由组内重新认领
            debug!("消息 {} 保留待重新投递", message_id);
            return Ok(());
        }
        self.ack_message(message_id).await
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> JobqResult<()> {
        // stream天然持久化，durable标志无额外含义
        self.ensure_group(queue).await
    }

    async fn delete_queue(&self, queue: &str) -> JobqResult<()> {
        let mut conn = self.connection.clone();
        let deleted: i64 = conn
            .del(queue)
            .await
            .map_err(|e| JobqError::MessageQueue(format!("删除stream {queue} 失败: {e}")))?;
        if deleted > 0 {
            info!("stream {} 已删除", queue);
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> JobqResult<u32> {
        let mut conn = self.connection.clone();
        let size: u64 = conn
            .xlen(queue)
            .await
            .map_err(|e| JobqError::MessageQueue(format!("XLEN {queue} 失败: {e}")))?;
        Ok(size as u32)
    }

    async fn purge_queue(&self, queue: &str) -> JobqResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .del(queue)
            .await
            .map_err(|e| JobqError::MessageQueue(format!("清空stream {queue} 失败: {e}")))?;
        self.ensure_group(queue).await?;
        info!("stream {} 已清空", queue);
        Ok(())
    }
}
