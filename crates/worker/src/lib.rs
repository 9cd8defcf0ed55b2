//! 任务执行层
//!
//! WorkerService从任务队列消费执行消息，在固定大小的并发池中
//! 运行注册的处理器，执行结果写入结果缓存并经状态队列上报。

pub mod handlers;
pub mod service;

pub use handlers::{HttpHandler, ShellHandler};
pub use service::{WorkerService, WorkerServiceBuilder};
