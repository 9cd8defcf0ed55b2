use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use jobq_core::config::AppConfig;
use jobq_core::traits::ResultCache;
use jobq_dispatcher::{Dispatcher, JobTable, PendingTable, StateListener};
use jobq_infrastructure::{BrokerClient, MessageQueueFactory, ResultCacheFactory, RetryPolicy};
use jobq_worker::{HttpHandler, ShellHandler, WorkerService};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Dispatcher（状态监听）
    Dispatcher,
    /// 仅运行Worker
    Worker,
    /// 单进程运行全部组件
    All,
}

/// 应用组合根
///
/// 装配消息队列、结果缓存和各服务组件。Dispatcher的提交
/// 接口通过dispatcher()暴露给嵌入方。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    broker: Arc<BrokerClient>,
    cache: Arc<dyn ResultCache>,
    job_table: Arc<JobTable>,
    pending: Arc<PendingTable>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用，模式: {:?}", mode);

        let queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("创建消息队列失败")?;
        let broker = Arc::new(BrokerClient::new(
            queue,
            RetryPolicy::from_config(&config.message_queue),
        ));
        let cache = ResultCacheFactory::create(&config.result_cache)
            .await
            .context("创建结果缓存失败")?;

        for name in [
            &config.message_queue.job_queue,
            &config.message_queue.status_queue,
            &config.message_queue.heartbeat_queue,
        ] {
            broker
                .ensure_queue(name, true)
                .await
                .with_context(|| format!("创建队列 {name} 失败"))?;
        }

        Ok(Self {
            config,
            mode,
            broker,
            cache,
            job_table: Arc::new(JobTable::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// 构建任务提交入口，与运行中的StateListener共享任务表和去重表
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.broker.clone(),
            self.cache.clone(),
            self.job_table.clone(),
            self.pending.clone(),
            &self.config.message_queue,
            &self.config.dispatcher,
        )
    }

    /// 运行应用直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut listener: Option<StateListener> = None;
        let mut worker: Option<WorkerService> = None;

        if matches!(self.mode, AppMode::Dispatcher | AppMode::All) {
            let state_listener = StateListener::new(
                self.broker.clone(),
                self.job_table.clone(),
                self.pending.clone(),
                &self.config.message_queue,
                &self.config.dispatcher,
            );
            let run_listener = state_listener.clone();
            tokio::spawn(async move {
                if let Err(e) = run_listener.run().await {
                    error!("状态监听器异常退出: {}", e);
                }
            });
            listener = Some(state_listener);
            info!("Dispatcher状态监听已启动");
        }

        if matches!(self.mode, AppMode::Worker | AppMode::All) {
            let worker_config = &self.config.worker;
            let service = WorkerService::builder(
                worker_config.worker_id.clone(),
                self.broker.clone(),
                self.cache.clone(),
            )
            .queues(&self.config.message_queue)
            .max_concurrent_jobs(worker_config.max_concurrent_jobs)
            .poll_interval_ms(worker_config.poll_interval_ms)
            .heartbeat_interval_seconds(worker_config.heartbeat_interval_seconds)
            .register_handler("shell", Arc::new(ShellHandler::new()))
            .register_handler("http", Arc::new(HttpHandler::new()))
            .build();

            service.start().await.context("启动Worker服务失败")?;
            worker = Some(service);
        }

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        if let Some(service) = worker {
            if let Err(e) = service.stop().await {
                error!("停止Worker服务失败: {}", e);
            }
        }
        if let Some(state_listener) = listener {
            state_listener.stop().await;
        }

        info!("应用已停止");
        Ok(())
    }
}
