use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use jobq_core::config::MessageQueueConfig;
use jobq_core::errors::JobqError;
use jobq_core::models::{
    ErrorKind, JobExecutionMessage, JobResult, JobStatus, Message, MessageType,
    StatusUpdateMessage, WorkerHeartbeatMessage,
};
use jobq_core::traits::{HandlerRegistry, JobContext, JobHandler, ResultCache};
use jobq_core::JobqResult;
use jobq_infrastructure::BrokerClient;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    broker: Arc<BrokerClient>,
    cache: Arc<dyn ResultCache>,
    handlers: HandlerRegistry,
    max_concurrent_jobs: usize,
    job_queue: String,
    status_queue: String,
    heartbeat_queue: String,
    poll_interval_ms: u64,
    heartbeat_interval_seconds: u64,
    hostname: String,
}

impl WorkerServiceBuilder {
    pub fn new(
        worker_id: String,
        broker: Arc<BrokerClient>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            worker_id,
            broker,
            cache,
            handlers: HandlerRegistry::new(),
            max_concurrent_jobs: 5,
            job_queue: "jobs".to_string(),
            status_queue: "status_updates".to_string(),
            heartbeat_queue: "heartbeats".to_string(),
            poll_interval_ms: 1000,
            heartbeat_interval_seconds: 30,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    /// 从消息队列配置读取三个队列名称
    pub fn queues(mut self, config: &MessageQueueConfig) -> Self {
        self.job_queue = config.job_queue.clone();
        self.status_queue = config.status_queue.clone();
        self.heartbeat_queue = config.heartbeat_queue.clone();
        self
    }

    pub fn max_concurrent_jobs(mut self, max_concurrent_jobs: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self
    }

    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn heartbeat_interval_seconds(mut self, heartbeat_interval_seconds: u64) -> Self {
        self.heartbeat_interval_seconds = heartbeat_interval_seconds;
        self
    }

    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = hostname;
        self
    }

    /// 注册任务处理器
    pub fn register_handler(
        mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        self.handlers.register(job_type, handler);
        self
    }

    pub fn build(self) -> WorkerService {
        WorkerService {
            worker_id: self.worker_id,
            broker: self.broker,
            cache: self.cache,
            handlers: Arc::new(self.handlers),
            max_concurrent_jobs: self.max_concurrent_jobs,
            semaphore: Arc::new(Semaphore::new(self.max_concurrent_jobs)),
            job_queue: self.job_queue,
            status_queue: self.status_queue,
            heartbeat_queue: self.heartbeat_queue,
            poll_interval_ms: self.poll_interval_ms,
            heartbeat_interval_seconds: self.heartbeat_interval_seconds,
            hostname: self.hostname,
            shutdown_tx: Arc::new(RwLock::new(None)),
            is_running: Arc::new(RwLock::new(false)),
        }
    }
}

/// 任务执行结果分类
enum ExecutionOutcome {
    Success(serde_json::Value),
    HandlerError(JobqError),
    Panicked(String),
    TimedOut,
}

/// Worker服务
///
/// 固定大小的执行池：每个任务占用一个信号量槽，满载时
/// 消费循环在下一个任务前等待。执行前按指纹查结果缓存，
/// 命中的任务直接以缓存结果完成，处理器不会重复运行。
#[derive(Clone)]
pub struct WorkerService {
    worker_id: String,
    broker: Arc<BrokerClient>,
    cache: Arc<dyn ResultCache>,
    handlers: Arc<HandlerRegistry>,
    max_concurrent_jobs: usize,
    semaphore: Arc<Semaphore>,
    job_queue: String,
    status_queue: String,
    heartbeat_queue: String,
    poll_interval_ms: u64,
    heartbeat_interval_seconds: u64,
    hostname: String,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    is_running: Arc<RwLock<bool>>,
}

impl WorkerService {
    pub fn builder(
        worker_id: String,
        broker: Arc<BrokerClient>,
        cache: Arc<dyn ResultCache>,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(worker_id, broker, cache)
    }

    pub fn supported_job_types(&self) -> Vec<String> {
        self.handlers.supported_types()
    }

    /// 当前占用的执行槽数量
    pub fn running_job_count(&self) -> i32 {
        (self.max_concurrent_jobs - self.semaphore.available_permits()) as i32
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// 启动消费循环和心跳循环
    pub async fn start(&self) -> JobqResult<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(JobqError::Internal("Worker服务已在运行".to_string()));
        }

        info!(
            "启动Worker服务: {} (主机: {}, 并发槽: {}, 支持类型: {:?})",
            self.worker_id,
            self.hostname,
            self.max_concurrent_jobs,
            self.supported_job_types()
        );

        self.broker.ensure_queue(&self.job_queue, true).await?;
        self.broker.ensure_queue(&self.status_queue, true).await?;
        self.broker.ensure_queue(&self.heartbeat_queue, true).await?;

        let (shutdown_tx, shutdown_rx_poll) = broadcast::channel(1);
        let shutdown_rx_heartbeat = shutdown_tx.subscribe();
        {
            let mut tx_guard = self.shutdown_tx.write().await;
            *tx_guard = Some(shutdown_tx);
        }

        let polling_service = self.clone();
        tokio::spawn(async move {
            polling_service.run_poll_loop(shutdown_rx_poll).await;
        });

        let heartbeat_service = self.clone();
        tokio::spawn(async move {
            heartbeat_service
                .run_heartbeat_loop(shutdown_rx_heartbeat)
                .await;
        });

        *is_running = true;
        info!("Worker服务启动成功: {}", self.worker_id);
        Ok(())
    }

    pub async fn stop(&self) -> JobqResult<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }

        info!("停止Worker服务: {}", self.worker_id);
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        *is_running = false;
        Ok(())
    }

    async fn run_poll_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut poll_interval = interval(Duration::from_millis(self.poll_interval_ms));
        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_and_execute().await {
                        error!("任务轮询失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("任务轮询收到停止信号");
                    break;
                }
            }
        }
    }

    async fn run_heartbeat_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut heartbeat_interval =
            interval(Duration::from_secs(self.heartbeat_interval_seconds));
        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        error!("发送心跳失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("心跳任务收到停止信号");
                    break;
                }
            }
        }
    }

    /// 拉取一批执行消息并投入执行池
    pub async fn poll_and_execute(&self) -> JobqResult<()> {
        let messages = self.broker.consume(&self.job_queue).await?;
        for message in messages {
            let message_id = message.id.clone();
            match message.message_type {
                MessageType::JobExecution(execution) => {
                    if let Err(e) = self.process_execution_message(execution).await {
                        error!("处理执行消息 {} 失败: {}", message_id, e);
                    }
                }
                _ => {
                    debug!("任务队列收到非执行类消息 {}，忽略", message_id);
                }
            }
            if let Err(e) = self.broker.ack(&message_id).await {
                warn!("确认消息 {} 失败: {}", message_id, e);
            }
        }
        Ok(())
    }

    async fn process_execution_message(&self, msg: JobExecutionMessage) -> JobqResult<()> {
        info!(
            "收到任务执行请求: job_id={}, job_type={}, timeout={}s",
            msg.job_id, msg.job_type, msg.timeout_seconds
        );

        // 幂等性：指纹命中缓存的任务直接以缓存结果完成
        match self.cache.get(&msg.fingerprint).await {
            Ok(Some(cached)) => {
                debug!("任务 {} 命中结果缓存，跳过执行", msg.job_id);
                let result = JobResult {
                    job_id: msg.job_id.clone(),
                    ..cached
                };
                self.send_status_update(&msg.job_id, JobStatus::Done, Some(result), None, None)
                    .await;
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                // 缓存读不出来就重新执行，处理器可重入
                warn!("查询结果缓存失败，改为重新执行: {}", e);
            }
        }

        let Some(handler) = self.handlers.get(&msg.job_type) else {
            error!("未找到任务类型 '{}' 的处理器", msg.job_type);
            self.send_status_update(
                &msg.job_id,
                JobStatus::Failed,
                None,
                Some(ErrorKind::InvalidPayload),
                Some(format!("不支持的任务类型: {}", msg.job_type)),
            )
            .await;
            return Ok(());
        };

        // 占用执行槽，满载时在此等待
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| JobqError::Internal("执行池信号量已关闭".to_string()))?;

        self.send_status_update(&msg.job_id, JobStatus::Running, None, None, None)
            .await;

        let service = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            service.execute_job(handler, msg).await;
        });
        Ok(())
    }

    async fn execute_job(&self, handler: Arc<dyn JobHandler>, msg: JobExecutionMessage) {
        let started = Instant::now();
        let timeout = Duration::from_secs(msg.timeout_seconds);
        let ctx = JobContext {
            job_id: msg.job_id.clone(),
            job_type: msg.job_type.clone(),
            payload: msg.payload.clone(),
            timeout,
            worker_id: self.worker_id.clone(),
        };

        // 处理器跑在独立任务里，panic由JoinError捕获而不是击穿执行池
        let mut execution = tokio::spawn(async move { handler.handle(&ctx).await });

        let outcome = tokio::select! {
            joined = &mut execution => match joined {
                Ok(Ok(value)) => ExecutionOutcome::Success(value),
                Ok(Err(e)) => ExecutionOutcome::HandlerError(e),
                Err(join_err) if join_err.is_panic() => {
                    ExecutionOutcome::Panicked(panic_detail(join_err))
                }
                Err(_) => ExecutionOutcome::HandlerError(
                    JobqError::Internal("执行任务被中止".to_string()),
                ),
            },
            _ = tokio::time::sleep(timeout) => {
                execution.abort();
                ExecutionOutcome::TimedOut
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            ExecutionOutcome::Success(value) => {
                let result = JobResult::new(&msg.job_id, value, elapsed_ms);
                // 缓存写入失败不阻塞任务完成
                if let Err(e) = self.cache.put(&msg.fingerprint, result.clone()).await {
                    warn!("写入结果缓存失败: {}", e);
                }
                info!("任务 {} 执行成功，耗时 {}ms", msg.job_id, elapsed_ms);
                self.send_status_update(&msg.job_id, JobStatus::Done, Some(result), None, None)
                    .await;
            }
            ExecutionOutcome::HandlerError(e) => {
                let kind = match &e {
                    JobqError::InvalidPayload(_) => Some(ErrorKind::InvalidPayload),
                    JobqError::ExecutionTimeout => Some(ErrorKind::Timeout),
                    _ => None,
                };
                warn!("任务 {} 执行失败: {}", msg.job_id, e);
                self.send_status_update(
                    &msg.job_id,
                    JobStatus::Failed,
                    None,
                    kind,
                    Some(e.to_string()),
                )
                .await;
            }
            ExecutionOutcome::Panicked(detail) => {
                error!("任务 {} 的处理器崩溃: {}", msg.job_id, detail);
                self.send_status_update(
                    &msg.job_id,
                    JobStatus::Failed,
                    None,
                    Some(ErrorKind::HandlerPanic),
                    Some(format!("处理器崩溃: {detail}")),
                )
                .await;
            }
            ExecutionOutcome::TimedOut => {
                error!("任务 {} 执行超时 ({}s)", msg.job_id, msg.timeout_seconds);
                self.send_status_update(
                    &msg.job_id,
                    JobStatus::Failed,
                    None,
                    Some(ErrorKind::Timeout),
                    Some(format!("任务执行超时 ({}s)", msg.timeout_seconds)),
                )
                .await;
            }
        }
    }

    /// 上报状态更新，发布重试由BrokerClient完成
    async fn send_status_update(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<JobResult>,
        error_kind: Option<ErrorKind>,
        error_message: Option<String>,
    ) {
        let update = StatusUpdateMessage {
            job_id: job_id.to_string(),
            status,
            worker_id: self.worker_id.clone(),
            result,
            error_kind,
            error_message,
            timestamp: Utc::now(),
        };
        let message = Message::status_update(update).with_correlation_id(job_id.to_string());

        if let Err(e) = self.broker.publish(&self.status_queue, &message).await {
            error!(
                "上报任务 {} 的状态 {:?} 失败: {}",
                job_id, status, e
            );
        } else {
            debug!("已上报任务 {} 的状态: {:?}", job_id, status);
        }
    }

    async fn send_heartbeat(&self) -> JobqResult<()> {
        let heartbeat = WorkerHeartbeatMessage {
            worker_id: self.worker_id.clone(),
            running_job_count: self.running_job_count(),
            timestamp: Utc::now(),
        };
        let message = Message::worker_heartbeat(heartbeat);
        self.broker.publish(&self.heartbeat_queue, &message).await?;
        debug!(
            "发送心跳: worker_id={}, running={}",
            self.worker_id,
            self.running_job_count()
        );
        Ok(())
    }
}

fn panic_detail(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "未知panic".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}
