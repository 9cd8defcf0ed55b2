use async_trait::async_trait;

use crate::errors::JobqResult;
use crate::models::Message;

/// 消息队列抽象接口
///
/// 具体后端（内存队列、Redis Stream、RabbitMQ）由配置选择，
/// 连接由实现独占持有，不直接暴露给调用方。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列
    async fn publish_message(&self, queue: &str, message: &Message) -> JobqResult<()>;

    /// 从指定队列消费一批消息，队列为空时返回空集
    async fn consume_messages(&self, queue: &str) -> JobqResult<Vec<Message>>;

    /// 确认消息处理完成
    async fn ack_message(&self, message_id: &str) -> JobqResult<()>;

    /// 拒绝消息并选择是否重新入队
    async fn nack_message(&self, message_id: &str, requeue: bool) -> JobqResult<()>;

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> JobqResult<()>;

    /// 删除队列
    async fn delete_queue(&self, queue: &str) -> JobqResult<()>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> JobqResult<u32>;

    /// 清空队列
    async fn purge_queue(&self, queue: &str) -> JobqResult<()>;
}
