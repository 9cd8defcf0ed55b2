use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobqError {
    #[error("消息代理不可用: 已重试{attempts}次")]
    BrokerUnavailable { attempts: u32 },
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的任务载荷: {0}")]
    InvalidPayload(String),
    #[error("未找到任务类型 '{job_type}' 的处理器")]
    HandlerNotFound { job_type: String },
    #[error("任务执行超时")]
    ExecutionTimeout,
    #[error("任务处理器崩溃: {0}")]
    HandlerPanic(String),
    #[error("结果缓存损坏: {0}")]
    CacheCorruption(String),
    #[error("结果缓存错误: {0}")]
    CacheError(String),
    #[error("任务未找到: {id}")]
    JobNotFound { id: String },
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type JobqResult<T> = Result<T, JobqError>;

impl JobqError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn invalid_payload<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPayload(msg.into())
    }
    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }
    /// 瞬态错误：本地退避重试后仍可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobqError::MessageQueue(_) | JobqError::CacheError(_) | JobqError::ExecutionTimeout
        )
    }
    /// 致命错误：进程应交由外部监督者重启
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JobqError::CacheCorruption(_) | JobqError::Configuration(_) | JobqError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for JobqError {
    fn from(err: serde_json::Error) -> Self {
        JobqError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for JobqError {
    fn from(err: anyhow::Error) -> Self {
        JobqError::Internal(err.to_string())
    }
}
