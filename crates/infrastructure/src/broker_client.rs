use std::sync::Arc;
use std::time::Duration;

use jobq_core::config::MessageQueueConfig;
use jobq_core::errors::JobqError;
use jobq_core::models::Message;
use jobq_core::traits::MessageQueue;
use jobq_core::JobqResult;
use tracing::{debug, warn};

/// publish重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 重试间隔上限（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MessageQueueConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
            ..Default::default()
        }
    }

    /// 计算第attempt次失败后的退避间隔（attempt从0开始）
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay_ms as f64);
        let jitter = if self.jitter_factor > 0.0 {
            let spread = capped * self.jitter_factor;
            rand::random_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// 消息代理客户端
///
/// 包装具体队列后端，publish失败时按指数退避重试，
/// 用尽重试次数后报告BrokerUnavailable。重试只在发送
/// 失败时发生，已确认发布的消息不会重复投递。
pub struct BrokerClient {
    queue: Arc<dyn MessageQueue>,
    policy: RetryPolicy,
}

impl BrokerClient {
    pub fn new(queue: Arc<dyn MessageQueue>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn queue(&self) -> Arc<dyn MessageQueue> {
        Arc::clone(&self.queue)
    }

    /// 发布消息，失败时退避重试
    pub async fn publish(&self, queue: &str, message: &Message) -> JobqResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.queue.publish_message(queue, message).await {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(
                            "消息 {} 在第 {} 次尝试后发布成功",
                            message.id,
                            attempt + 1
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            "发布消息 {} 到队列 '{}' 失败，已重试 {} 次: {}",
                            message.id, queue, attempt, e
                        );
                        return Err(JobqError::BrokerUnavailable { attempts: attempt });
                    }
                    let delay = self.policy.backoff_delay(attempt - 1);
                    warn!(
                        "发布消息 {} 失败（第 {} 次尝试），{}ms后重试: {}",
                        message.id,
                        attempt,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 消费一批消息，空队列返回空集
    pub async fn consume(&self, queue: &str) -> JobqResult<Vec<Message>> {
        self.queue.consume_messages(queue).await
    }

    pub async fn ack(&self, message_id: &str) -> JobqResult<()> {
        self.queue.ack_message(message_id).await
    }

    pub async fn ensure_queue(&self, queue: &str, durable: bool) -> JobqResult<()> {
        self.queue.create_queue(queue, durable).await
    }
}
