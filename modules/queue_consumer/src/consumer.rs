//! Transactional decode of single queue entries

use anyhow::{anyhow, Context, Result};
use quarry_common::{
    metrics::{CONSUME_FAILURE, CONSUME_PROCESSED, CONSUME_SUCCESS},
    ConsumerKeys, ContainerKind, EventType, MetricsSink, QueueEntry, RetryPolicy, Topic,
};
use quarry_store::{is_contention, QueueStore, StoreError};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::decoder::{ChainDecoder, DecodeContext};

pub struct QueueConsumer {
    id: String,
    topic: Topic,
    topic_name: String,
    kind: ContainerKind,
    decoder: Arc<dyn ChainDecoder>,
    pool: SqlitePool,
    queue: QueueStore,
    metrics: Arc<dyn MetricsSink>,
    keys: ConsumerKeys,
    retry: RetryPolicy,
    write_timeout: Duration,
}

impl QueueConsumer {
    pub fn new(
        topic: Topic,
        kind: ContainerKind,
        decoder: Arc<dyn ChainDecoder>,
        pool: SqlitePool,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryPolicy,
        write_timeout: Duration,
    ) -> Self {
        let topic_name = topic.to_string();
        Self {
            id: format!(
                "consumer {} {} {} {}",
                topic.network_id,
                topic.chain_id,
                topic.event_type,
                decoder.name()
            ),
            keys: ConsumerKeys::new(topic.chain_id.as_str(), topic.event_type),
            queue: QueueStore::new(pool.clone()),
            topic,
            topic_name,
            kind,
            decoder,
            pool,
            metrics,
            retry,
            write_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Decode one entry and remove it from the queue.
    ///
    /// Lock contention is retried with backoff inside this call. Any other
    /// error leaves the entry queued and is returned.
    pub async fn consume(&self, entry: &QueueEntry) -> Result<()> {
        self.metrics.counter_inc(&self.keys.processed);
        self.metrics.counter_inc(CONSUME_PROCESSED);
        let started = Instant::now();

        let result = self.decode_and_remove(entry).await;
        let elapsed = started.elapsed().as_millis() as u64;
        self.metrics.observe_millis(&self.keys.process_millis, elapsed);

        if let Err(e) = result {
            self.metrics.counter_inc(&self.keys.failure);
            self.metrics.counter_inc(CONSUME_FAILURE);
            error!(id = %self.id, entry = %entry.id, "Consume failed: {e:#}");
            return Err(e);
        }

        self.metrics.counter_inc(&self.keys.success);
        self.metrics.counter_inc(CONSUME_SUCCESS);
        Ok(())
    }

    async fn decode_and_remove(&self, entry: &QueueEntry) -> Result<()> {
        if entry.topic != self.topic_name {
            return Err(anyhow!(
                "entry {} belongs to {}, not {}",
                entry.id,
                entry.topic,
                self.topic_name
            ));
        }

        let mut sleeper = self.retry.sleeper();
        loop {
            match self.decode_once(entry).await {
                Ok(()) => break,
                Err(e) if is_contention(&e) => {
                    warn!(
                        id = %self.id,
                        entry = %entry.id,
                        attempt = sleeper.attempts() + 1,
                        "Decode contended, retrying: {e:#}"
                    );
                    sleeper.sleep().await;
                }
                Err(e) => return Err(e),
            }
        }

        // Removal commits separately from the decode transaction
        loop {
            match self.queue.remove(&entry.id).await {
                Ok(removed) => {
                    debug!(id = %self.id, entry = %entry.id, removed, "Entry consumed");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(id = %self.id, entry = %entry.id, "Remove contended, retrying: {e}");
                    sleeper.sleep().await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Removing decoded entry {}", entry.id))
                }
            }
        }
    }

    /// One attempt: decode inside a transaction and commit
    async fn decode_once(&self, entry: &QueueEntry) -> Result<()> {
        let attempt = async {
            let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
            {
                let mut ctx = DecodeContext {
                    conn: &mut *tx,
                    entry,
                    kind: self.kind,
                };
                match self.topic.event_type {
                    EventType::Decisions => self.decoder.consume(&mut ctx).await?,
                    EventType::Consensus => self.decoder.consume_consensus(&mut ctx).await?,
                }
            }
            tx.commit().await.map_err(StoreError::from)?;
            Ok::<(), anyhow::Error>(())
        };

        tokio::time::timeout(self.write_timeout, attempt)
            .await
            .map_err(|_| StoreError::Timeout)
            .with_context(|| format!("Decoding entry {}", entry.id))?
    }
}
