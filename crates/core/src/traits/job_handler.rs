use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::errors::JobqResult;

/// 任务执行上下文
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub timeout: Duration,
    pub worker_id: String,
}

/// 任务处理器接口
///
/// 每种任务类型对应一个处理器，返回结果值或按错误分类失败。
/// 处理器必须无副作用地可重入：相同载荷的重复调用应产生相同结果，
/// 缓存幂等性依赖这一点。
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 执行任务并返回结果值
    async fn handle(&self, ctx: &JobContext) -> JobqResult<serde_json::Value>;

    /// 处理器名称
    fn name(&self) -> &str;
}

/// 处理器注册表：任务类型 → 处理器
///
/// 在Dispatcher/Worker构建时装配，运行期只读。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// 注册任务处理器，同类型重复注册以后注册者为准
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        info!("注册任务处理器: {} -> {}", job_type, handler.name());
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        async fn handle(&self, ctx: &JobContext) -> JobqResult<serde_json::Value> {
            Ok(ctx.payload.clone())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register("echo", Arc::new(EchoHandler));
        assert!(registry.contains("echo"));
        assert!(!registry.contains("shell"));
        assert_eq!(registry.supported_types(), vec!["echo".to_string()]);

        let handler = registry.get("echo").expect("已注册的处理器");
        let ctx = JobContext {
            job_id: "job-1".to_string(),
            job_type: "echo".to_string(),
            payload: json!({"value": 42}),
            timeout: Duration::from_secs(5),
            worker_id: "worker-001".to_string(),
        };
        let value = handler.handle(&ctx).await.unwrap();
        assert_eq!(value, json!({"value": 42}));
    }

    #[tokio::test]
    async fn test_registry_replaces_duplicate_type() {
        struct NamedHandler(&'static str);

        #[async_trait]
        impl JobHandler for NamedHandler {
            async fn handle(&self, _ctx: &JobContext) -> JobqResult<serde_json::Value> {
                Ok(json!(self.0))
            }
            fn name(&self) -> &str {
                self.0
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register("echo", Arc::new(NamedHandler("first")));
        registry.register("echo", Arc::new(NamedHandler("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().name(), "second");
    }
}
