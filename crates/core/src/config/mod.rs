pub mod models;

pub use models::{
    CacheConfig, CacheType, DispatcherConfig, MessageQueueConfig, MessageQueueType,
    ObservabilityConfig, RedisConfig, WorkerConfig,
};

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub message_queue: MessageQueueConfig,
    pub result_cache: CacheConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. TOML配置文件
    /// 3. 环境变量覆盖（前缀JOBQ_，层级分隔符__）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/jobq.toml", "jobq.toml", "/etc/jobq/config.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("JOBQ")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("构建配置失败")?;
        let app_config: AppConfig = config.try_deserialize().context("解析配置失败")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// 校验整体配置
    pub fn validate(&self) -> Result<()> {
        self.message_queue
            .validate()
            .context("消息队列配置无效")?;
        self.result_cache.validate().context("结果缓存配置无效")?;
        self.dispatcher.validate().context("Dispatcher配置无效")?;
        self.worker.validate().context("Worker配置无效")?;
        self.observability
            .validate()
            .context("可观测性配置无效")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.message_queue.job_queue, "jobs");
        assert_eq!(config.result_cache.capacity, 1024);
        assert_eq!(config.worker.max_concurrent_jobs, 5);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[message_queue]
type = "in_memory"
url = ""
job_queue = "test_jobs"

[result_cache]
capacity = 16
default_ttl_seconds = 60

[worker]
worker_id = "worker-test"
max_concurrent_jobs = 2
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.message_queue.r#type, MessageQueueType::InMemory);
        assert_eq!(config.message_queue.job_queue, "test_jobs");
        // 未出现在文件中的字段保留默认值
        assert_eq!(config.message_queue.status_queue, "status_updates");
        assert_eq!(config.result_cache.capacity, 16);
        assert_eq!(config.worker.worker_id, "worker-test");
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        // 配置段只给出部分字段时，其余字段取默认值
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[worker]
enabled = true
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert!(config.worker.enabled);
        assert_eq!(config.worker.worker_id, "worker-001");
        assert_eq!(config.worker.max_concurrent_jobs, 5);
        assert_eq!(config.dispatcher.status_poll_interval_ms, 200);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let result = AppConfig::load(Some("/nonexistent/jobq.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.result_cache.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.message_queue.r#type = MessageQueueType::Rabbitmq;
        config.message_queue.url = "redis://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url_building() {
        let redis = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            database: 1,
            password: Some("secret".to_string()),
            connection_timeout_seconds: 30,
        };
        assert_eq!(redis.build_url(), "redis://:secret@cache.internal:6380/1");

        let no_auth = RedisConfig::default();
        assert_eq!(no_auth.build_url(), "redis://127.0.0.1:6379/0");
    }
}
