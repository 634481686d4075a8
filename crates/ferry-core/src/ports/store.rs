//! ListStore port - the shared list / pub-sub store behind every queue.
//!
//! The queue client only needs a handful of primitives: push to tail, atomic
//! pop from head, length, full range read, publish, key enumeration by
//! prefix, and a channel subscription for the notification listener.
//!
//! # Implementations
//! - `InMemoryStore`: single process, used by tests
//! - `RedisStore`: RPUSH / LPOP / LLEN / LRANGE / PUBLISH / KEYS

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Messages published on a queue channel.
pub type Subscription = BoxStream<'static, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store connection pool error: {0}")]
    Pool(String),

    #[error("store command failed: {0}")]
    Command(String),
}

/// Storage collaborator.
///
/// `pop_head` must be atomic with respect to other processes: two workers
/// polling the same list never receive the same entry.
#[async_trait]
pub trait ListStore: Send + Sync {
    async fn push_tail(&self, list: &str, value: &str) -> Result<(), StoreError>;

    async fn pop_head(&self, list: &str) -> Result<Option<String>, StoreError>;

    async fn list_len(&self, list: &str) -> Result<usize, StoreError>;

    /// Snapshot of the whole list, head first.
    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError>;

    /// Keys currently holding data whose name starts with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}
