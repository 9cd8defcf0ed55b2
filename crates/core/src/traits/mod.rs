pub mod job_handler;
pub mod message_queue;
pub mod result_cache;

pub use job_handler::*;
pub use message_queue::*;
pub use result_cache::*;
