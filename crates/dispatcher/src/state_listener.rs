use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobq_core::config::{DispatcherConfig, MessageQueueConfig};
use jobq_core::errors::JobqError;
use jobq_core::models::{Message, MessageType, StatusUpdateMessage, WorkerHeartbeatMessage};
use jobq_core::JobqResult;
use jobq_infrastructure::BrokerClient;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::dispatcher::PendingTable;
use crate::job_table::JobTable;

/// Worker存活信息，由心跳消息维护
#[derive(Debug, Clone)]
pub struct WorkerLiveness {
    pub last_heartbeat: DateTime<Utc>,
    pub running_job_count: i32,
}

/// 状态监听器
///
/// 并行监听状态队列和心跳队列。状态更新经任务表的
/// 状态机校验后落表，任务终止时释放去重表占位；
/// 心跳只更新存活视图。
#[derive(Clone)]
pub struct StateListener {
    broker: Arc<BrokerClient>,
    job_table: Arc<JobTable>,
    pending: Arc<PendingTable>,
    status_queue: String,
    heartbeat_queue: String,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
    worker_heartbeats: Arc<RwLock<HashMap<String, WorkerLiveness>>>,
}

impl StateListener {
    pub fn new(
        broker: Arc<BrokerClient>,
        job_table: Arc<JobTable>,
        pending: Arc<PendingTable>,
        mq_config: &MessageQueueConfig,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            broker,
            job_table,
            pending,
            status_queue: mq_config.status_queue.clone(),
            heartbeat_queue: mq_config.heartbeat_queue.clone(),
            poll_interval: Duration::from_millis(config.status_poll_interval_ms),
            running: Arc::new(RwLock::new(false)),
            worker_heartbeats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("状态监听器停止信号已发送");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 当前已知Worker的存活视图快照
    pub async fn worker_liveness(&self) -> HashMap<String, WorkerLiveness> {
        self.worker_heartbeats.read().await.clone()
    }

    /// 启动监听，直到stop被调用
    pub async fn run(&self) -> JobqResult<()> {
        *self.running.write().await = true;
        info!("状态监听器启动");

        let status_listener = {
            let listener = self.clone();
            let queue = self.status_queue.clone();
            tokio::spawn(async move { listener.listen_queue(&queue).await })
        };

        let heartbeat_listener = {
            let listener = self.clone();
            let queue = self.heartbeat_queue.clone();
            tokio::spawn(async move { listener.listen_queue(&queue).await })
        };

        let (status_result, heartbeat_result) =
            tokio::join!(status_listener, heartbeat_listener);

        if let Err(e) = status_result {
            error!("状态队列监听任务异常退出: {}", e);
        }
        if let Err(e) = heartbeat_result {
            error!("心跳队列监听任务异常退出: {}", e);
        }

        info!("状态监听器已停止");
        Ok(())
    }

    async fn listen_queue(&self, queue: &str) -> JobqResult<()> {
        info!("开始监听队列: {}", queue);

        loop {
            if !self.is_running().await {
                info!("收到停止信号，退出队列 {} 的监听", queue);
                break;
            }

            match self.broker.consume(queue).await {
                Ok(messages) => {
                    if messages.is_empty() {
                        tokio::time::sleep(self.poll_interval).await;
                        continue;
                    }
                    for message in messages {
                        if let Err(e) = self.process_message(&message).await {
                            error!("处理队列 {} 的消息 {} 时出错: {}", queue, message.id, e);
                        }
                    }
                }
                Err(e) => {
                    error!("从队列 {} 消费消息时出错: {}", queue, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        Ok(())
    }

    async fn process_message(&self, message: &Message) -> JobqResult<()> {
        match &message.message_type {
            MessageType::StatusUpdate(update) => {
                self.process_status_update(update).await?;
            }
            MessageType::WorkerHeartbeat(heartbeat) => {
                self.process_heartbeat(heartbeat).await;
            }
            MessageType::JobExecution(_) => {
                debug!("状态监听器忽略执行类消息: {}", message.id);
            }
        }
        self.broker.ack(&message.id).await
    }

    async fn process_status_update(&self, update: &StatusUpdateMessage) -> JobqResult<()> {
        debug!("处理任务 {} 的状态更新: {:?}", update.job_id, update.status);

        let applied = self
            .job_table
            .apply_update(
                &update.job_id,
                update.status,
                update.result.clone(),
                update.error_kind,
                update.error_message.clone(),
                Some(update.worker_id.clone()),
            )
            .await;

        match applied {
            Ok(true) => {
                if update.status.is_terminal() {
                    self.release_pending(&update.job_id).await;
                    info!(
                        "任务 {} 在Worker {} 上结束，状态: {:?}",
                        update.job_id, update.worker_id, update.status
                    );
                }
            }
            Ok(false) => {
                // 迟到或乱序的上报，丢弃
                warn!(
                    "任务 {} 的状态转换到 {:?} 无效，忽略",
                    update.job_id, update.status
                );
            }
            Err(JobqError::JobNotFound { .. }) => {
                warn!("收到未知任务 {} 的状态更新", update.job_id);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn process_heartbeat(&self, heartbeat: &WorkerHeartbeatMessage) {
        debug!(
            "收到Worker {} 的心跳，运行中任务: {}",
            heartbeat.worker_id, heartbeat.running_job_count
        );
        self.worker_heartbeats.write().await.insert(
            heartbeat.worker_id.clone(),
            WorkerLiveness {
                last_heartbeat: heartbeat.timestamp,
                running_job_count: heartbeat.running_job_count,
            },
        );
    }

    /// 释放去重表中指向该任务的指纹占位
    async fn release_pending(&self, job_id: &str) {
        let Some(entry) = self.job_table.get(job_id).await else {
            return;
        };
        let mut pending = self.pending.lock().await;
        if pending.get(&entry.fingerprint).map(String::as_str) == Some(job_id) {
            pending.remove(&entry.fingerprint);
        }
    }
}
