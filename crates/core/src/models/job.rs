use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 任务定义
///
/// 提交时创建，Worker执行过程中更新状态，结果TTL到期后销毁。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub fingerprint: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let job_type = job_type.into();
        let fingerprint = fingerprint(&job_type, &payload);
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            payload,
            fingerprint,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
        }
    }
}

/// 任务状态
///
/// 状态机：Pending → Running → {Done, Failed}；
/// Cancelled 由调用方触发。Done/Failed/Cancelled 为终止状态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 校验状态转换是否合法
    ///
    /// 缓存命中和无效载荷允许从 Pending 直接进入终止状态。
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Done)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// 任务级错误类别，随状态更新上报
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    HandlerPanic,
    InvalidPayload,
}

/// 任务执行结果，一经产生不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub value: serde_json::Value,
    pub computed_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl JobResult {
    pub fn new(job_id: impl Into<String>, value: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            value,
            computed_at: Utc::now(),
            execution_time_ms,
        }
    }
}

/// 计算任务指纹
///
/// 对 job_type 和 payload 的JSON编码做SHA-256，十六进制输出。
/// 相同类型与载荷的任务产生相同指纹，用于缓存查找和提交去重。
pub fn fingerprint(job_type: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
