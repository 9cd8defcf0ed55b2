use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobq_core::config::{DispatcherConfig, MessageQueueConfig};
use jobq_core::models::{fingerprint, Job, JobExecutionMessage, JobStatus, Message};
use jobq_core::traits::ResultCache;
use jobq_core::JobqResult;
use jobq_infrastructure::BrokerClient;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::job_table::{JobEntry, JobTable};

/// 提交去重表：指纹 -> 未完成任务id
///
/// Dispatcher在提交时占位，StateListener在任务终止时释放。
pub type PendingTable = Mutex<HashMap<String, String>>;

/// 任务句柄
///
/// submit的返回值，后续通过job_id轮询状态。同指纹的
/// 重复提交会拿到指向同一任务的句柄。
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub fingerprint: String,
}

/// 任务分发器
pub struct Dispatcher {
    broker: Arc<BrokerClient>,
    cache: Arc<dyn ResultCache>,
    job_table: Arc<JobTable>,
    pending: Arc<PendingTable>,
    job_queue: String,
    default_timeout: Duration,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<BrokerClient>,
        cache: Arc<dyn ResultCache>,
        job_table: Arc<JobTable>,
        pending: Arc<PendingTable>,
        mq_config: &MessageQueueConfig,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            broker,
            cache,
            job_table,
            pending,
            job_queue: mq_config.job_queue.clone(),
            default_timeout: Duration::from_secs(config.default_job_timeout_seconds),
            poll_interval: Duration::from_millis(config.status_poll_interval_ms),
        }
    }

    /// 提交任务
    ///
    /// 先查结果缓存，命中则直接以Done状态落表；未命中时
    /// 检查去重表，同指纹已有未完成任务就复用其句柄，
    /// 否则占位并发布执行消息。
    pub async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> JobqResult<JobHandle> {
        let fp = fingerprint(job_type, &payload);

        match self.cache.get(&fp).await {
            Ok(Some(result)) => {
                let job = Job::new(job_type, payload);
                info!("任务 {} 命中结果缓存，跳过执行", job.id);
                self.job_table.insert_resolved(&job, result).await;
                return Ok(JobHandle {
                    job_id: job.id,
                    fingerprint: fp,
                });
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("查询结果缓存失败，按未命中处理: {}", e);
            }
        }

        let job = Job::new(job_type, payload);
        {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(&fp) {
                debug!("指纹 {} 已有未完成任务 {}，复用句柄", &fp[..8], existing);
                return Ok(JobHandle {
                    job_id: existing.clone(),
                    fingerprint: fp,
                });
            }
            pending.insert(fp.clone(), job.id.clone());
        }
        self.job_table.insert(&job).await;

        let message = Message::job_execution(JobExecutionMessage {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            fingerprint: fp.clone(),
            timeout_seconds: self.default_timeout.as_secs(),
            enqueued_at: Utc::now(),
        })
        .with_correlation_id(job.id.clone());

        if let Err(e) = self.broker.publish(&self.job_queue, &message).await {
            // 入队失败的任务立即判失败并释放去重位，句柄不会悬空
            warn!("任务 {} 入队失败: {}", job.id, e);
            let _ = self
                .job_table
                .apply_update(
                    &job.id,
                    JobStatus::Failed,
                    None,
                    None,
                    Some(format!("入队失败: {e}")),
                    None,
                )
                .await;
            self.pending.lock().await.remove(&fp);
            return Err(e);
        }

        info!("任务 {} ({}) 已提交到队列 {}", job.id, job.job_type, self.job_queue);
        Ok(JobHandle {
            job_id: job.id,
            fingerprint: fp,
        })
    }

    /// 查询任务当前状态快照
    pub async fn poll(&self, job_id: &str) -> JobqResult<JobEntry> {
        self.job_table
            .get(job_id)
            .await
            .ok_or_else(|| jobq_core::errors::JobqError::job_not_found(job_id))
    }

    /// 轮询等待任务进入终止状态
    pub async fn await_result(&self, handle: &JobHandle) -> JobqResult<JobEntry> {
        loop {
            let entry = self.poll(&handle.job_id).await?;
            if entry.status.is_terminal() {
                return Ok(entry);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 取消任务
    ///
    /// 只对非终止状态生效，返回是否实际取消。已投递的执行
    /// 消息不撤回，Worker迟到的状态上报会被状态机丢弃。
    pub async fn cancel(&self, job_id: &str) -> JobqResult<bool> {
        let entry = self.poll(job_id).await?;
        if entry.status.is_terminal() {
            debug!("任务 {} 已处于终止状态 {:?}，取消无效", job_id, entry.status);
            return Ok(false);
        }

        let applied = self
            .job_table
            .apply_update(
                job_id,
                JobStatus::Cancelled,
                None,
                None,
                Some("任务已被调用方取消".to_string()),
                None,
            )
            .await?;

        if applied {
            let mut pending = self.pending.lock().await;
            if pending.get(&entry.fingerprint).map(String::as_str) == Some(job_id) {
                pending.remove(&entry.fingerprint);
            }
            info!("任务 {} 已取消", job_id);
        }
        Ok(applied)
    }

    pub fn job_table(&self) -> Arc<JobTable> {
        Arc::clone(&self.job_table)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
