use std::collections::HashMap;

use chrono::{DateTime, Utc};
use jobq_core::errors::JobqError;
use jobq_core::models::{ErrorKind, Job, JobResult, JobStatus};
use jobq_core::JobqResult;
use tokio::sync::RwLock;

/// 任务表条目
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub job_id: String,
    pub job_type: String,
    pub fingerprint: String,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobEntry {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            fingerprint: job.fingerprint.clone(),
            status: job.status,
            result: None,
            error_kind: None,
            error_message: None,
            worker_id: None,
            submitted_at: job.submitted_at,
            updated_at: job.submitted_at,
        }
    }
}

/// 内存任务表
///
/// 以任务id为键，保存每个已提交任务的最新状态快照。
/// 状态更新经过状态机校验，终止状态之后的更新一律丢弃。
#[derive(Default)]
pub struct JobTable {
    entries: RwLock<HashMap<String, JobEntry>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: &Job) {
        let entry = JobEntry::from_job(job);
        self.entries.write().await.insert(job.id.clone(), entry);
    }

    /// 插入一条已完成的任务，用于缓存命中直接出结果的场景
    pub async fn insert_resolved(&self, job: &Job, result: JobResult) {
        let mut entry = JobEntry::from_job(job);
        entry.status = JobStatus::Done;
        entry.result = Some(result);
        entry.updated_at = Utc::now();
        self.entries.write().await.insert(job.id.clone(), entry);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobEntry> {
        self.entries.read().await.get(job_id).cloned()
    }

    /// 应用状态更新
    ///
    /// 返回Ok(false)表示转换不合法被忽略；任务不存在时报JobNotFound。
    pub async fn apply_update(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<JobResult>,
        error_kind: Option<ErrorKind>,
        error_message: Option<String>,
        worker_id: Option<String>,
    ) -> JobqResult<bool> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| JobqError::job_not_found(job_id))?;

        if !entry.status.can_transition_to(status) {
            return Ok(false);
        }

        entry.status = status;
        if result.is_some() {
            entry.result = result;
        }
        if error_kind.is_some() {
            entry.error_kind = error_kind;
        }
        if error_message.is_some() {
            entry.error_message = error_message;
        }
        if worker_id.is_some() {
            entry.worker_id = worker_id;
        }
        entry.updated_at = Utc::now();
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
