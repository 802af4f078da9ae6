//! One producer worker: ledger index range reads into the durable queue

use anyhow::{Context, Result};
use quarry_common::{
    metrics::{PRODUCE_FAILURE, PRODUCE_PROCESSED, PRODUCE_SUCCESS},
    Checkpoint, Container, IndexedChain, LedgerError, LedgerReader, MetricsSink, ProducerKeys,
    QueueEntry, QueueNotifier, Topic,
};
use quarry_store::{CheckpointStore, QueueStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::configuration::ChainProducerConfig;

/// Result of one poll of the ledger index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A batch was durably enqueued and the checkpoint advanced
    Drained { count: usize, inserted: usize },
    /// Nothing at the cursor yet, or the read deadline expired
    NotReady,
}

/// Storage and collaborators a producer worker writes through
#[derive(Clone)]
pub struct ProducerContext {
    pub checkpoints: CheckpointStore,
    pub queue: QueueStore,
    pub notifier: Arc<dyn QueueNotifier>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub struct ChainProducer {
    id: String,
    instance: String,
    topic: Topic,
    topic_name: String,
    chain: IndexedChain,
    ledger: Arc<dyn LedgerReader>,
    ctx: ProducerContext,
    keys: ProducerKeys,
    cfg: ChainProducerConfig,
    checkpoint: Checkpoint,
    /// Ledger position of the next read. Derived from the stored index only
    /// when the checkpoint is (re)loaded, then moved past every drained batch.
    next_start: u64,
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(deadline, fut).await.map_err(|_| StoreError::Timeout)?
}

impl ChainProducer {
    pub fn new(
        instance: impl Into<String>,
        topic: Topic,
        chain: IndexedChain,
        ledger: Arc<dyn LedgerReader>,
        ctx: ProducerContext,
        cfg: ChainProducerConfig,
    ) -> Self {
        let instance = instance.into();
        let topic_name = topic.to_string();
        Self {
            id: format!("producer {} {} {}", topic.network_id, topic.chain_id, topic.event_type),
            keys: ProducerKeys::new(topic.chain_id.as_str(), topic.event_type),
            checkpoint: Checkpoint::new(instance.clone(), topic_name.clone()),
            next_start: 0,
            instance,
            topic,
            topic_name,
            chain,
            ledger,
            ctx,
            cfg,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// In-memory cursor, as last read from or written to the store
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Create the checkpoint row if absent and load the cursor
    pub async fn init(&mut self) -> Result<()> {
        let deadline = self.cfg.db_write_timeout();
        with_deadline(deadline, self.ctx.checkpoints.initialize(&self.instance, &self.topic_name))
            .await
            .with_context(|| format!("Initializing checkpoint of {}", self.topic_name))?;
        self.reload().await?;

        info!(
            topic = %self.topic_name,
            index = self.checkpoint.index,
            endpoint = %self.ledger.endpoint(),
            "Starting processing"
        );
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.checkpoint = with_deadline(
            self.cfg.db_write_timeout(),
            self.ctx.checkpoints.get(&self.instance, &self.topic_name),
        )
        .await
        .with_context(|| format!("Reading checkpoint of {}", self.topic_name))?;
        self.next_start = self.checkpoint.next_start();
        Ok(())
    }

    /// Read the next range. `None` means the ledger has nothing for us yet.
    async fn fetch(&self) -> Result<Option<Vec<Container>>> {
        let start = self.next_start;
        let read = tokio::time::timeout(
            self.cfg.poll_timeout(),
            self.ledger.get_container_range(start, self.cfg.max_batch),
        )
        .await
        .unwrap_or(Err(LedgerError::Timeout));

        match read {
            Ok(containers) if containers.is_empty() => Ok(None),
            Ok(containers) => Ok(Some(containers)),
            Err(LedgerError::Timeout) => {
                debug!(topic = %self.topic_name, start, "Ledger read deadline exceeded");
                Ok(None)
            }
            Err(e) if e.is_not_ready() => {
                debug!(topic = %self.topic_name, start, "Ledger index not ready: {e}");
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Reading {} from {start}", self.topic_name)),
        }
    }

    /// Enqueue a whole batch, then advance the checkpoint past it
    async fn drain(&mut self, containers: Vec<Container>) -> Result<PollOutcome> {
        let start = self.next_start;
        let entries: Vec<QueueEntry> = containers
            .iter()
            .map(|c| QueueEntry::from_container(&self.topic, self.chain, c))
            .collect();

        let deadline = self.cfg.db_write_timeout();
        let summary = with_deadline(deadline, self.ctx.queue.enqueue_batch(&entries))
            .await
            .with_context(|| format!("Enqueuing batch of {} at {start}", self.topic_name))?;

        let index = Checkpoint::advanced_to(start, containers.len());
        with_deadline(
            deadline,
            self.ctx.checkpoints.advance(&self.instance, &self.topic_name, index),
        )
        .await
        .with_context(|| format!("Advancing checkpoint of {} to {index}", self.topic_name))?;
        self.checkpoint.index = index;
        self.next_start = start + containers.len() as u64;

        self.ctx.metrics.counter_add(&self.keys.processed, summary.inserted as u64);
        self.ctx.metrics.counter_add(PRODUCE_PROCESSED, summary.inserted as u64);
        self.ctx.metrics.counter_inc(&self.keys.success);
        self.ctx.metrics.counter_inc(PRODUCE_SUCCESS);

        if summary.inserted > 0 {
            self.ctx.notifier.enqueued(&self.topic, summary.inserted).await;
        }

        debug!(
            topic = %self.topic_name,
            start,
            count = containers.len(),
            inserted = summary.inserted,
            index,
            "Batch drained"
        );
        Ok(PollOutcome::Drained {
            count: containers.len(),
            inserted: summary.inserted,
        })
    }

    /// Poll the ledger once and drain whatever it returned
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        match self.fetch().await? {
            Some(containers) => self.drain(containers).await,
            None => Ok(PollOutcome::NotReady),
        }
    }

    fn failure(&self) {
        self.ctx.metrics.counter_inc(&self.keys.failure);
        self.ctx.metrics.counter_inc(PRODUCE_FAILURE);
    }

    /// Poll until `shutdown` is cancelled. A batch that was read before the
    /// cancellation is drained completely before returning.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(id = %self.id, "Starting worker");

        while !shutdown.is_cancelled() {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.fetch() => fetched,
            };

            let result = match fetched {
                Ok(Some(containers)) => self.drain(containers).await,
                Ok(None) => Ok(PollOutcome::NotReady),
                Err(e) => Err(e),
            };

            let pause = match &result {
                Ok(PollOutcome::Drained { count, .. }) if *count >= self.cfg.max_batch => continue,
                Ok(_) => self.cfg.idle_interval(),
                Err(e) => {
                    self.failure();
                    error!(id = %self.id, "Error running worker: {e:#}");
                    self.cfg.failure_retry_interval()
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }

            if result.is_err() {
                if let Err(e) = self.reload().await {
                    warn!(id = %self.id, "Could not reload checkpoint: {e:#}");
                }
            }
        }

        info!(id = %self.id, index = self.checkpoint.index, "Exiting worker");
    }
}
