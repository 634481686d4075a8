//! Common test utilities and fixtures

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use ferry_core::config::{QueueConfig, SandboxConfig, WorkerConfig};
use ferry_core::impls::{CapabilityFactory, InMemoryStore, InProcessIsolation};
use ferry_core::{QueueClient, SandboxManager, WorkerMonitor};

static INIT: Once = Once::new();

/// Initialize test logging once per test binary.
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("ferry_core=debug")
            .try_init();
    });
}

pub fn queue_config(recycle_tasks: bool, max_retries: u32) -> QueueConfig {
    QueueConfig {
        name: "jobs".to_string(),
        recycle_tasks,
        max_retries,
        purge_successful: false,
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        idle_sleep_ms: 20,
        dispatch_pause_ms: 1,
        stop_join_timeout_ms: 200,
        sandbox_release_retries: 2,
    }
}

/// Any existing file works as the location of an in-process sandbox.
pub fn sandbox_config() -> SandboxConfig {
    SandboxConfig {
        location: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")),
        entry_point: "main".to_string(),
        args: Vec::new(),
    }
}

pub fn monitor(
    store: &Arc<InMemoryStore>,
    queue: &QueueConfig,
    factory: Arc<dyn CapabilityFactory>,
) -> WorkerMonitor {
    let mut isolation = InProcessIsolation::new();
    isolation.register("main", factory).unwrap();

    let config = worker_config();
    let client = QueueClient::new(store.clone(), queue);
    let sandbox = SandboxManager::new(
        sandbox_config(),
        config.sandbox_release_retries,
        Arc::new(isolation),
    );
    WorkerMonitor::new(queue.name.clone(), config, client, sandbox).unwrap()
}

/// Poll `check` until it holds, failing the test after about two seconds.
pub async fn wait_until<F>(mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
