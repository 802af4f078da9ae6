//! Enqueue notifications from producers to consumers

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::topic::Topic;

/// Told about every batch a producer durably enqueued
#[async_trait]
pub trait QueueNotifier: Send + Sync + 'static {
    async fn enqueued(&self, topic: &Topic, count: usize);
}

/// Notifier that drops every signal; consumers fall back to polling
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl QueueNotifier for NoopNotifier {
    async fn enqueued(&self, _topic: &Topic, _count: usize) {}
}

/// Per-topic wake-ups for consumer workers in this process
#[derive(Debug, Default)]
pub struct LocalQueueSignal {
    topics: DashMap<String, Arc<Notify>>,
}

impl LocalQueueSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a worker waits on for new entries of `topic`
    pub fn subscribe(&self, topic: &str) -> Arc<Notify> {
        self.topics.entry(topic.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    /// Wake the worker of `topic`. A signal with no waiter is kept until the
    /// next wait so no enqueue is missed.
    pub fn signal(&self, topic: &str) {
        self.subscribe(topic).notify_one();
    }
}

#[async_trait]
impl QueueNotifier for LocalQueueSignal {
    async fn enqueued(&self, topic: &Topic, count: usize) {
        if count > 0 {
            self.signal(&topic.to_string());
        }
    }
}
