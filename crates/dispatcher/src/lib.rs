//! 任务分发层
//!
//! Dispatcher负责接收提交、查询缓存、发布执行消息；
//! StateListener消费状态队列并回写任务表。

pub mod dispatcher;
pub mod job_table;
pub mod state_listener;

pub use dispatcher::{Dispatcher, JobHandle, PendingTable};
pub use job_table::{JobEntry, JobTable};
pub use state_listener::{StateListener, WorkerLiveness};
