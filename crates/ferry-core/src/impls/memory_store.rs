//! InMemoryStore - list / pub-sub store for development and tests
//!
//! - `HashMap<String, VecDeque<String>>` holds every list
//! - one `broadcast` channel per pub/sub channel
//!
//! Lists that become empty are removed, so `keys` behaves like Redis and only
//! reports keys that currently hold data.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::ports::{ListStore, StoreError, Subscription};

const CHANNEL_CAPACITY: usize = 64;

type Lists = HashMap<String, VecDeque<String>>;
type Channels = HashMap<String, broadcast::Sender<String>>;

#[derive(Default)]
pub struct InMemoryStore {
    lists: Arc<Mutex<Lists>>,
    channels: Arc<Mutex<Channels>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lists(&self) -> Result<MutexGuard<'_, Lists>, StoreError> {
        self.lists
            .lock()
            .map_err(|_| StoreError::Command("list lock poisoned".to_string()))
    }

    fn channels(&self) -> Result<MutexGuard<'_, Channels>, StoreError> {
        self.channels
            .lock()
            .map_err(|_| StoreError::Command("channel lock poisoned".to_string()))
    }
}

#[async_trait]
impl ListStore for InMemoryStore {
    async fn push_tail(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut lists = self.lists()?;
        lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_head(&self, list: &str) -> Result<Option<String>, StoreError> {
        let mut lists = self.lists()?;
        let Some(entries) = lists.get_mut(list) else {
            return Ok(None);
        };
        let head = entries.pop_front();
        if entries.is_empty() {
            lists.remove(list);
        }
        Ok(head)
    }

    async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let lists = self.lists()?;
        Ok(lists.get(list).map_or(0, VecDeque::len))
    }

    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        let lists = self.lists()?;
        Ok(lists
            .get(list)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let channels = self.channels()?;
        if let Some(sender) = channels.get(channel) {
            // no subscribers left is not an error for a wake-up hint
            let _ = sender.send(message.to_string());
        }
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let lists = self.lists()?;
        Ok(lists
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let receiver = {
            let mut channels = self.channels()?;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "subscriber lagged behind channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
