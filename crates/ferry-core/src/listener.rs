//! QueueListener - forwards queue channel notifications to a callback.
//!
//! A wake-up hint only. The worker loop polls on its own schedule, so a lost
//! or late notification delays a task by at most one idle interval.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::QueueName;
use crate::error::Result;
use crate::ports::ListStore;

pub struct QueueListener {
    channel: String,
    join: JoinHandle<()>,
}

impl QueueListener {
    /// Subscribe to the queue's channel and call `on_message` for every
    /// message. The subscription is live when this returns.
    pub async fn spawn<F>(store: Arc<dyn ListStore>, queue: &QueueName, on_message: F) -> Result<Self>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let channel = queue.channel().to_string();
        let mut messages = store.subscribe(&channel).await?;
        info!(channel = %channel, "listening for queue notifications");

        let name = channel.clone();
        let join = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                debug!(channel = %name, %message, "queue notification");
                on_message(message);
            }
            debug!(channel = %name, "notification stream ended");
        });

        Ok(Self { channel, join })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn stop(self) {
        self.join.abort();
    }
}

impl Drop for QueueListener {
    fn drop(&mut self) {
        self.join.abort();
    }
}
