//! RedisStore against a live server.
//!
//! Run with: cargo test -p ferry-core --test redis_store -- --ignored

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ferry_core::config::StoreConfig;
use ferry_core::impls::RedisStore;
use ferry_core::ports::ListStore;
use ferry_core::{QueueClient, TASK_AVAILABLE};

async fn connect() -> RedisStore {
    common::init();
    let config = StoreConfig {
        url: std::env::var("FERRY_STORE_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        ..Default::default()
    };
    RedisStore::connect(&config)
        .await
        .expect("failed to connect to redis")
}

fn unique_prefix() -> String {
    format!("ferry-test-{}", ulid::Ulid::new())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn reserve_and_succeed_through_redis() {
    let store = Arc::new(connect().await);
    let prefix = unique_prefix();
    let mut client = QueueClient::new(store.clone(), &common::queue_config(false, 0))
        .with_key_prefix(prefix.clone());

    let mut sub = store.subscribe(&format!("{prefix}:jobs:notify")).await.unwrap();
    let task = client.new_task("jobs", "{}");
    client.enqueue(&task).await.unwrap();

    let note = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .unwrap();
    assert_eq!(note.as_deref(), Some(TASK_AVAILABLE));

    let reserved = client.reserve("jobs").await.unwrap();
    assert_eq!(reserved.id, task.id);
    client.succeed().await.unwrap();

    let counts = client.counts("jobs").await.unwrap();
    assert_eq!((counts.pending, counts.succeeded), (0, 1));
    assert_eq!(client.all_queues().await.unwrap(), vec!["jobs"]);

    assert_eq!(client.remove_task(&client.succeeded_tasks("jobs").await.unwrap()[0]).await.unwrap(), 1);
    assert!(store.keys(&prefix).await.unwrap().is_empty());
}
