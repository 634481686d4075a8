//! RedisStore - Redis-backed list / pub-sub store
//!
//! | primitive   | command        |
//! |-------------|----------------|
//! | push_tail   | RPUSH          |
//! | pop_head    | LPOP (atomic)  |
//! | list_len    | LLEN           |
//! | range       | LRANGE 0 -1    |
//! | publish     | PUBLISH        |
//! | keys        | KEYS prefix*   |
//! | subscribe   | SUBSCRIBE      |
//!
//! Commands go through a deadpool connection pool; subscriptions open their
//! own dedicated pub/sub connection.

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::ports::{ListStore, StoreError, Subscription};

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    client: redis::Client,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = Config::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let client =
            redis::Client::open(config.url.as_str()).map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(url = %config.url, "connected to redis store");

        Ok(Self { pool, client })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn command_error(e: redis::RedisError) -> StoreError {
    StoreError::Command(e.to_string())
}

#[async_trait]
impl ListStore for RedisStore {
    async fn push_tail(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.rpush(list, value).await.map_err(command_error)?;
        Ok(())
    }

    async fn pop_head(&self, list: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.lpop(list, None).await.map_err(command_error)
    }

    async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        conn.llen(list).await.map_err(command_error)
    }

    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.lrange(list, 0, -1).await.map_err(command_error)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let receivers: i64 = conn.publish(channel, message).await.map_err(command_error)?;
        debug!(channel, receivers, "published notification");
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.keys(format!("{prefix}*")).await.map_err(command_error)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        pubsub.subscribe(channel).await.map_err(command_error)?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(stream.boxed())
    }
}
