//! End-to-end worker scenarios over the in-memory store.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use ferry_core::impls::InMemoryStore;
use ferry_core::ports::{Capability, ListStore};
use ferry_core::{
    FerryError, LoopExit, PerformResult, QueueClient, SERVICE_STOPPING, TaskStatus, TaskStorage,
};

use common::{init, monitor, queue_config, wait_until};

/// Reports a fixed outcome and counts dispatches.
struct Scripted {
    result: PerformResult,
    calls: Arc<AtomicU32>,
    storage: TaskStorage,
}

#[async_trait]
impl Capability for Scripted {
    async fn perform(&mut self, _parameters: &str) -> Result<PerformResult, FerryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.storage.insert("dispatches".to_string(), n.to_string());
        Ok(self.result.clone())
    }

    fn set_task_storage(&mut self, storage: TaskStorage) {
        self.storage = storage;
    }

    fn take_task_storage(&mut self) -> TaskStorage {
        std::mem::take(&mut self.storage)
    }
}

fn scripted(result: PerformResult, calls: Arc<AtomicU32>) -> Arc<dyn ferry_core::impls::CapabilityFactory> {
    Arc::new(move |_: &str| {
        Box::new(Scripted {
            result: result.clone(),
            calls: Arc::clone(&calls),
            storage: TaskStorage::new(),
        }) as Box<dyn Capability>
    })
}

/// Never returns from a dispatch.
struct Hangs {
    started: Arc<AtomicBool>,
}

#[async_trait]
impl Capability for Hangs {
    async fn perform(&mut self, _parameters: &str) -> Result<PerformResult, FerryError> {
        self.started.store(true, Ordering::SeqCst);
        std::future::pending().await
    }

    fn set_task_storage(&mut self, _storage: TaskStorage) {}

    fn take_task_storage(&mut self) -> TaskStorage {
        TaskStorage::new()
    }
}

#[tokio::test]
async fn three_tasks_all_succeed() {
    init();
    let store = Arc::new(InMemoryStore::new());
    let queue = queue_config(false, 0);
    let producer = QueueClient::new(store.clone(), &queue);
    for i in 0..3 {
        producer
            .enqueue(&producer.new_task("jobs", format!("{{\"n\":{i}}}")))
            .await
            .unwrap();
    }

    let calls = Arc::new(AtomicU32::new(0));
    let worker = monitor(&store, &queue, scripted(PerformResult::success(), calls.clone()));
    worker.start().await;
    wait_until(async || producer.counts("jobs").await.unwrap().succeeded == 3).await;
    worker.stop().await.unwrap();

    let counts = producer.counts("jobs").await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.succeeded, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // FIFO order is kept and harvested storage is written back
    let done = producer.succeeded_tasks("jobs").await.unwrap();
    let params: Vec<_> = done.iter().map(|t| t.parameters.as_str()).collect();
    assert_eq!(params, vec!["{\"n\":0}", "{\"n\":1}", "{\"n\":2}"]);
    assert_eq!(done[2].storage.get("dispatches").map(String::as_str), Some("3"));
    assert!(done.iter().all(|t| t.status == TaskStatus::Succeeded));
}

#[tokio::test]
async fn failing_task_is_recycled_until_max_retries() {
    init();
    let store = Arc::new(InMemoryStore::new());
    let queue = queue_config(true, 2);
    let producer = QueueClient::new(store.clone(), &queue);
    let task = producer.new_task("jobs", "{}");
    producer.enqueue(&task).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let worker = monitor(
        &store,
        &queue,
        scripted(PerformResult::failure("upstream timeout"), calls.clone()),
    );
    worker.start().await;
    wait_until(async || producer.counts("jobs").await.unwrap().failed == 1).await;
    worker.stop().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let failed = producer.failed_tasks("jobs").await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, task.id);
    assert_eq!(failed[0].retries, 2);
    assert_eq!(failed[0].reason.as_deref(), Some("upstream timeout"));
    assert_eq!(producer.pending_count("jobs").await.unwrap(), 0);
}

#[tokio::test]
async fn first_failure_requeues_with_one_retry() {
    init();
    let store = Arc::new(InMemoryStore::new());
    let mut client = QueueClient::new(store.clone(), &queue_config(true, 2));
    client.enqueue(&client.new_task("jobs", "{}")).await.unwrap();

    client.reserve("jobs").await.unwrap();
    client.fail("once").await.unwrap();

    let pending = client.pending_tasks("jobs").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retries, 1);
    assert!(client.failed_tasks("jobs").await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_fails_hung_dispatch_with_service_stopping() {
    init();
    let store = Arc::new(InMemoryStore::new());
    let queue = queue_config(false, 0);
    let producer = QueueClient::new(store.clone(), &queue);
    let task = producer.new_task("jobs", "{}");
    producer.enqueue(&task).await.unwrap();

    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let worker = monitor(
        &store,
        &queue,
        Arc::new(move |_: &str| {
            Box::new(Hangs {
                started: Arc::clone(&flag),
            }) as Box<dyn Capability>
        }),
    );
    worker.start().await;
    wait_until(async || started.load(Ordering::SeqCst)).await;

    worker.stop().await.unwrap();

    let failed = producer.failed_tasks("jobs").await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, task.id);
    assert_eq!(failed[0].reason.as_deref(), Some(SERVICE_STOPPING));
    assert_eq!(worker.last_exit(), Some(LoopExit::Aborted));
    assert!(!worker.is_running());
}

#[tokio::test]
async fn critical_failure_skips_recycling() {
    init();
    let store = Arc::new(InMemoryStore::new());
    let queue = queue_config(true, 0);
    let producer = QueueClient::new(store.clone(), &queue);
    producer.enqueue(&producer.new_task("jobs", "{}")).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let worker = monitor(
        &store,
        &queue,
        scripted(PerformResult::critical_failure("schema mismatch"), calls.clone()),
    );
    worker.start().await;
    wait_until(async || store.list_len("ferry:jobs:failed").await.unwrap() == 1).await;
    worker.stop().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failed = producer.failed_tasks("jobs").await.unwrap();
    assert_eq!(failed[0].retries, 0);
}

#[tokio::test]
async fn restart_after_stop_keeps_draining() {
    init();
    let store = Arc::new(InMemoryStore::new());
    let queue = queue_config(false, 0);
    let producer = QueueClient::new(store.clone(), &queue);

    let calls = Arc::new(AtomicU32::new(0));
    let worker = monitor(&store, &queue, scripted(PerformResult::success(), calls.clone()));

    worker.start().await;
    worker.stop().await.unwrap();
    assert_eq!(worker.last_exit(), Some(LoopExit::Stopped));

    producer.enqueue(&producer.new_task("jobs", "{}")).await.unwrap();
    worker.start().await;
    wait_until(async || producer.counts("jobs").await.unwrap().succeeded == 1).await;
    worker.stop().await.unwrap();
}
