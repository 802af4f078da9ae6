//! Consumer worker loop over one topic

use anyhow::Result;
use quarry_store::{QueueCursor, QueueStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::consumer::QueueConsumer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub consumed: usize,
    pub failed: usize,
}

pub struct ConsumerWorker {
    consumer: QueueConsumer,
    queue: QueueStore,
    wake: Arc<Notify>,
    page_size: u32,
    poll_interval: Duration,
}

impl ConsumerWorker {
    pub fn new(
        consumer: QueueConsumer,
        queue: QueueStore,
        wake: Arc<Notify>,
        page_size: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            consumer,
            queue,
            wake,
            page_size: page_size.max(1),
            poll_interval,
        }
    }

    pub fn id(&self) -> &str {
        self.consumer.id()
    }

    /// Walk every pending entry of the topic once, in (created_at, id) order.
    /// Failed entries stay queued and are passed over until the next cycle.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<CycleStats> {
        let topic = self.consumer.topic_name();
        let mut stats = CycleStats::default();
        let mut cursor: Option<QueueCursor> = None;

        loop {
            let page = self.queue.pending(topic, cursor.as_ref(), self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(QueueCursor::from(last));

            for entry in &page {
                if shutdown.is_cancelled() {
                    return Ok(stats);
                }
                match self.consumer.consume(entry).await {
                    Ok(()) => stats.consumed += 1,
                    Err(_) => stats.failed += 1,
                }
            }

            if page.len() < self.page_size as usize {
                break;
            }
        }

        if stats != CycleStats::default() {
            debug!(id = %self.id(), consumed = stats.consumed, failed = stats.failed, "Cycle done");
        }
        Ok(stats)
    }

    /// Run cycles until `shutdown` is cancelled, waking on enqueue
    /// notifications or the poll interval, whichever comes first
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(id = %self.id(), "Starting worker");

        while !shutdown.is_cancelled() {
            if let Err(e) = self.run_cycle(&shutdown).await {
                error!(id = %self.id(), "Error reading queue: {e:#}");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(id = %self.id(), "Exiting worker");
    }
}
