pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{JobqError, JobqResult};
pub use models::{
    fingerprint, ErrorKind, Job, JobExecutionMessage, JobResult, JobStatus, Message, MessageType,
    StatusUpdateMessage, WorkerHeartbeatMessage,
};
pub use traits::{
    CacheStats, HandlerRegistry, JobContext, JobHandler, MessageQueue, ResultCache,
};
