//! Dispatcher与StateListener的集成测试，基于内存队列和内存缓存

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobq_core::config::{DispatcherConfig, MessageQueueConfig};
use jobq_core::models::{
    fingerprint, JobResult, JobStatus, Message, StatusUpdateMessage, WorkerHeartbeatMessage,
};
use jobq_core::traits::{MessageQueue, ResultCache};
use jobq_dispatcher::{Dispatcher, JobTable, PendingTable, StateListener};
use jobq_infrastructure::{BrokerClient, InMemoryMessageQueue, MemoryResultCache, RetryPolicy};
use serde_json::json;
use tokio::sync::Mutex;

struct Harness {
    queue: Arc<InMemoryMessageQueue>,
    cache: Arc<MemoryResultCache>,
    broker: Arc<BrokerClient>,
    dispatcher: Dispatcher,
    listener: StateListener,
}

async fn build_harness() -> Harness {
    let queue = Arc::new(InMemoryMessageQueue::new());
    let cache = Arc::new(MemoryResultCache::new(64, Duration::from_secs(60)));
    let broker = Arc::new(BrokerClient::new(queue.clone(), RetryPolicy::default()));
    let job_table = Arc::new(JobTable::new());
    let pending: Arc<PendingTable> = Arc::new(Mutex::new(HashMap::new()));

    let mq_config = MessageQueueConfig::default();
    let config = DispatcherConfig {
        enabled: true,
        status_poll_interval_ms: 10,
        default_job_timeout_seconds: 60,
    };

    for name in [
        &mq_config.job_queue,
        &mq_config.status_queue,
        &mq_config.heartbeat_queue,
    ] {
        broker.ensure_queue(name, true).await.unwrap();
    }

    let dispatcher = Dispatcher::new(
        broker.clone(),
        cache.clone(),
        job_table.clone(),
        pending.clone(),
        &mq_config,
        &config,
    );
    let listener = StateListener::new(broker.clone(), job_table, pending, &mq_config, &config);

    Harness {
        queue,
        cache,
        broker,
        dispatcher,
        listener,
    }
}

fn done_update(job_id: &str, value: serde_json::Value) -> Message {
    Message::status_update(StatusUpdateMessage {
        job_id: job_id.to_string(),
        status: JobStatus::Done,
        worker_id: "worker-001".to_string(),
        result: Some(JobResult::new(job_id, value, 7)),
        error_kind: None,
        error_message: None,
        timestamp: Utc::now(),
    })
}

#[tokio::test]
async fn test_submit_deduplicates_inflight_jobs() {
    let h = build_harness().await;

    let first = h
        .dispatcher
        .submit("shell", json!({"command": "sleep", "args": ["5"]}))
        .await
        .unwrap();
    let second = h
        .dispatcher
        .submit("shell", json!({"command": "sleep", "args": ["5"]}))
        .await
        .unwrap();

    // 同指纹的重复提交复用同一个任务，不重复入队
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(h.queue.get_queue_size("jobs").await.unwrap(), 1);

    let other = h
        .dispatcher
        .submit("shell", json!({"command": "ls"}))
        .await
        .unwrap();
    assert_ne!(first.job_id, other.job_id);
    assert_eq!(h.queue.get_queue_size("jobs").await.unwrap(), 2);
    assert_eq!(h.dispatcher.pending_count().await, 2);
}

#[tokio::test]
async fn test_cache_hit_resolves_without_publishing() {
    let h = build_harness().await;

    let payload = json!({"command": "date"});
    let fp = fingerprint("shell", &payload);
    h.cache
        .put(&fp, JobResult::new("earlier-job", json!({"stdout": "now"}), 5))
        .await
        .unwrap();

    let handle = h.dispatcher.submit("shell", payload).await.unwrap();
    let entry = h.dispatcher.poll(&handle.job_id).await.unwrap();

    assert_eq!(entry.status, JobStatus::Done);
    assert_eq!(entry.result.unwrap().value, json!({"stdout": "now"}));
    assert_eq!(h.queue.get_queue_size("jobs").await.unwrap(), 0);
    assert_eq!(h.dispatcher.pending_count().await, 0);
}

#[tokio::test]
async fn test_cancel_marks_terminal_and_releases_slot() {
    let h = build_harness().await;

    let payload = json!({"command": "sleep", "args": ["60"]});
    let handle = h.dispatcher.submit("shell", payload.clone()).await.unwrap();

    assert!(h.dispatcher.cancel(&handle.job_id).await.unwrap());
    let entry = h.dispatcher.poll(&handle.job_id).await.unwrap();
    assert_eq!(entry.status, JobStatus::Cancelled);

    // 终止状态下再次取消无效
    assert!(!h.dispatcher.cancel(&handle.job_id).await.unwrap());

    // 去重位已释放，同样的载荷可以重新提交
    let retry = h.dispatcher.submit("shell", payload).await.unwrap();
    assert_ne!(retry.job_id, handle.job_id);
    assert_eq!(h.queue.get_queue_size("jobs").await.unwrap(), 2);
}

#[tokio::test]
async fn test_state_listener_applies_updates_end_to_end() {
    let h = build_harness().await;

    let handle = h
        .dispatcher
        .submit("shell", json!({"command": "echo", "args": ["hi"]}))
        .await
        .unwrap();

    let listener = h.listener.clone();
    let run = tokio::spawn(async move { listener.run().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Worker上报：先Running再Done
    h.broker
        .publish(
            "status_updates",
            &Message::status_update(StatusUpdateMessage {
                job_id: handle.job_id.clone(),
                status: JobStatus::Running,
                worker_id: "worker-001".to_string(),
                result: None,
                error_kind: None,
                error_message: None,
                timestamp: Utc::now(),
            }),
        )
        .await
        .unwrap();
    h.broker
        .publish(
            "status_updates",
            &done_update(&handle.job_id, json!({"stdout": "hi\n"})),
        )
        .await
        .unwrap();

    let entry = h.dispatcher.await_result(&handle).await.unwrap();
    assert_eq!(entry.status, JobStatus::Done);
    assert_eq!(entry.result.unwrap().value, json!({"stdout": "hi\n"}));
    assert_eq!(entry.worker_id.as_deref(), Some("worker-001"));

    // 终止后去重位被释放
    assert_eq!(h.dispatcher.pending_count().await, 0);

    h.broker
        .publish(
            "heartbeats",
            &Message::worker_heartbeat(WorkerHeartbeatMessage {
                worker_id: "worker-001".to_string(),
                running_job_count: 1,
                timestamp: Utc::now(),
            }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let liveness = h.listener.worker_liveness().await;
    assert_eq!(liveness.get("worker-001").unwrap().running_job_count, 1);

    h.listener.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_late_update_after_cancel_is_discarded() {
    let h = build_harness().await;

    let handle = h
        .dispatcher
        .submit("shell", json!({"command": "sleep", "args": ["9"]}))
        .await
        .unwrap();
    h.dispatcher.cancel(&handle.job_id).await.unwrap();

    let listener = h.listener.clone();
    let run = tokio::spawn(async move { listener.run().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Worker的完成上报晚于取消，必须被丢弃
    h.broker
        .publish(
            "status_updates",
            &done_update(&handle.job_id, json!({"stdout": "late"})),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let entry = h.dispatcher.poll(&handle.job_id).await.unwrap();
    assert_eq!(entry.status, JobStatus::Cancelled);
    assert!(entry.result.is_none());

    h.listener.stop().await;
    run.await.unwrap().unwrap();
}
