use serde::{Deserialize, Serialize};

/// 消息队列后端类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageQueueType {
    InMemory,
    #[default]
    RedisStream,
    Rabbitmq,
}

/// Redis连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 30,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }
        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }
        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }
        Ok(())
    }

    /// 构建Redis连接URL
    pub fn build_url(&self) -> String {
        let auth = if let Some(password) = &self.password {
            format!(":{password}@")
        } else {
            String::new()
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

/// 消息队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageQueueConfig {
    #[serde(rename = "type", default)]
    pub r#type: MessageQueueType,
    /// 代理地址（redis://或amqp://）
    pub url: String,
    pub redis: Option<RedisConfig>,
    pub job_queue: String,
    pub status_queue: String,
    pub heartbeat_queue: String,
    /// publish失败的最大重试次数，超过后报告BrokerUnavailable
    pub max_retries: u32,
    /// 指数退避的基础间隔（毫秒）
    pub retry_base_delay_ms: u64,
    /// 退避间隔上限（毫秒）
    pub retry_max_delay_ms: u64,
    pub connection_timeout_seconds: u64,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            r#type: MessageQueueType::default(),
            url: "redis://localhost:6379".to_string(),
            redis: None,
            job_queue: "jobs".to_string(),
            status_queue: "status_updates".to_string(),
            heartbeat_queue: "heartbeats".to_string(),
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            connection_timeout_seconds: 30,
        }
    }
}

impl MessageQueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_queue.is_empty() {
            return Err(anyhow::anyhow!("任务队列名称不能为空"));
        }
        if self.status_queue.is_empty() {
            return Err(anyhow::anyhow!("状态队列名称不能为空"));
        }
        if self.heartbeat_queue.is_empty() {
            return Err(anyhow::anyhow!("心跳队列名称不能为空"));
        }
        if self.retry_base_delay_ms == 0 {
            return Err(anyhow::anyhow!("重试基础间隔必须大于0"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(anyhow::anyhow!("重试间隔上限不能小于基础间隔"));
        }
        match self.r#type {
            MessageQueueType::Rabbitmq => {
                if !self.url.starts_with("amqp://") && !self.url.starts_with("amqps://") {
                    return Err(anyhow::anyhow!("RabbitMQ URL必须以amqp://或amqps://开头"));
                }
            }
            MessageQueueType::RedisStream => {
                let has_redis_section = self.redis.is_some();
                let has_redis_url =
                    self.url.starts_with("redis://") || self.url.starts_with("rediss://");
                if !has_redis_section && !has_redis_url {
                    return Err(anyhow::anyhow!(
                        "Redis Stream配置缺失：需要提供redis配置段或有效的Redis URL"
                    ));
                }
                if let Some(redis) = &self.redis {
                    redis.validate()?;
                }
            }
            MessageQueueType::InMemory => {}
        }
        Ok(())
    }
}

/// 结果缓存后端类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    #[default]
    Memory,
    Redis,
}

/// 结果缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "type", default)]
    pub r#type: CacheType,
    /// 结果存储地址（redis后端使用）
    pub redis_url: String,
    pub key_prefix: Option<String>,
    /// 内存后端的最大条目数，超出时按LRU淘汰
    pub capacity: usize,
    /// 结果默认存活时间（秒）
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            r#type: CacheType::default(),
            redis_url: "redis://127.0.0.1:6379/1".to_string(),
            key_prefix: Some("jobq".to_string()),
            capacity: 1024,
            default_ttl_seconds: 3600,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 {
            return Err(anyhow::anyhow!("缓存容量必须大于0"));
        }
        if self.default_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("缓存TTL必须大于0"));
        }
        if self.r#type == CacheType::Redis
            && !self.redis_url.starts_with("redis://")
            && !self.redis_url.starts_with("rediss://")
        {
            return Err(anyhow::anyhow!("结果存储URL必须以redis://或rediss://开头"));
        }
        Ok(())
    }
}

/// Dispatcher配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// StateListener轮询状态队列的间隔（毫秒）
    pub status_poll_interval_ms: u64,
    /// 任务默认执行超时（秒），随执行消息下发
    pub default_job_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            status_poll_interval_ms: 200,
            default_job_timeout_seconds: 300,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("状态轮询间隔必须大于0"));
        }
        if self.default_job_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务默认超时必须大于0"));
        }
        Ok(())
    }
}

/// Worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    /// 固定并发执行槽数量
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_id: "worker-001".to_string(),
            max_concurrent_jobs: 5,
            poll_interval_ms: 1000,
            heartbeat_interval_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Worker并发数必须大于0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }
        Ok(())
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(anyhow::anyhow!("无效的日志级别: {}", other)),
        }
    }
}
