use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ErrorKind, JobResult, JobStatus};

/// 消息信封
///
/// 队列上传输的自描述编码：消息id、带标签的消息类型、
/// 入队时间戳和重试计数，JSON序列化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    JobExecution(JobExecutionMessage),
    StatusUpdate(StatusUpdateMessage),
    WorkerHeartbeat(WorkerHeartbeatMessage),
}

/// 任务执行消息：Dispatcher发布到任务队列，Worker消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionMessage {
    pub job_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub fingerprint: String,
    pub timeout_seconds: u64,
    pub enqueued_at: DateTime<Utc>,
}

/// 状态更新消息：Worker发布到状态队列，StateListener消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateMessage {
    pub job_id: String,
    pub status: JobStatus,
    pub worker_id: String,
    pub result: Option<JobResult>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Worker心跳消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatMessage {
    pub worker_id: String,
    pub running_job_count: i32,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn job_execution(message: JobExecutionMessage) -> Self {
        Self::wrap(MessageType::JobExecution(message))
    }

    pub fn status_update(message: StatusUpdateMessage) -> Self {
        Self::wrap(MessageType::StatusUpdate(message))
    }

    pub fn worker_heartbeat(message: WorkerHeartbeatMessage) -> Self {
        Self::wrap(MessageType::WorkerHeartbeat(message))
    }

    fn wrap(message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn is_retry_exhausted(&self, max_retries: i32) -> bool {
        self.retry_count >= max_retries
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::JobExecution(_) => "job_execution",
            MessageType::StatusUpdate(_) => "status_update",
            MessageType::WorkerHeartbeat(_) => "worker_heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution_message() -> JobExecutionMessage {
        JobExecutionMessage {
            job_id: "job-1".to_string(),
            job_type: "shell".to_string(),
            payload: json!({"command": "echo", "args": ["hello"]}),
            fingerprint: "abc123".to_string(),
            timeout_seconds: 300,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_message_creation() {
        let message = Message::job_execution(execution_message());
        assert!(!message.id.is_empty());
        assert_eq!(message.retry_count, 0);
        assert!(message.correlation_id.is_none());
        assert_eq!(message.message_type_str(), "job_execution");

        if let MessageType::JobExecution(msg) = &message.message_type {
            assert_eq!(msg.job_id, "job-1");
            assert_eq!(msg.job_type, "shell");
        } else {
            panic!("Expected JobExecution message type");
        }
    }

    #[test]
    fn test_status_update_message() {
        let update = StatusUpdateMessage {
            job_id: "job-2".to_string(),
            status: JobStatus::Failed,
            worker_id: "worker-001".to_string(),
            result: None,
            error_kind: Some(ErrorKind::InvalidPayload),
            error_message: Some("字段缺失".to_string()),
            timestamp: Utc::now(),
        };
        let message = Message::status_update(update);
        assert_eq!(message.message_type_str(), "status_update");

        if let MessageType::StatusUpdate(msg) = &message.message_type {
            assert_eq!(msg.status, JobStatus::Failed);
            assert_eq!(msg.error_kind, Some(ErrorKind::InvalidPayload));
        } else {
            panic!("Expected StatusUpdate message type");
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let original = Message::job_execution(execution_message())
            .with_correlation_id("correlation-123".to_string());
        let bytes = original.serialize_bytes().expect("序列化失败");
        let decoded = Message::deserialize_bytes(&bytes).expect("反序列化失败");

        assert_eq!(original.id, decoded.id);
        assert_eq!(original.correlation_id, decoded.correlation_id);
        assert_eq!(original.message_type_str(), decoded.message_type_str());
    }

    #[test]
    fn test_retry_bookkeeping() {
        let mut message = Message::worker_heartbeat(WorkerHeartbeatMessage {
            worker_id: "worker-001".to_string(),
            running_job_count: 2,
            timestamp: Utc::now(),
        });
        assert!(!message.is_retry_exhausted(3));
        message.increment_retry();
        message.increment_retry();
        message.increment_retry();
        assert_eq!(message.retry_count, 3);
        assert!(message.is_retry_exhausted(3));
    }
}
