//! Quarry chain producer module for Caryatid
//!
//! Runs one producer worker per (chain, event type) stream of every
//! configured chain. Each worker drains its ledger index into the durable
//! queue and announces freshly enqueued entries on the message bus.

pub mod configuration;
pub mod ledger_client;
pub mod producer;

use anyhow::{Context as _, Result};
use caryatid_sdk::{async_trait, Context, Module};
use config::Config;
use quarry_common::{
    messages::{Message, QueueMessage},
    IndexerConfig, MetricsSink, QueueNotifier, Topic,
};
use quarry_store::{CheckpointStore, QueueStore};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, info_span, warn, Instrument};

use crate::{
    configuration::ChainProducerConfig,
    ledger_client::{index_endpoint, IndexClient},
    producer::{ChainProducer, ProducerContext},
};

/// Publishes `QueueMessage::Enqueued` for every durably enqueued batch
pub struct BusQueueNotifier {
    context: Arc<Context<Message>>,
    topic: String,
}

impl BusQueueNotifier {
    pub fn new(context: Arc<Context<Message>>, topic: impl Into<String>) -> Self {
        Self {
            context,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl QueueNotifier for BusQueueNotifier {
    async fn enqueued(&self, topic: &Topic, count: usize) {
        let message = Message::Queue(QueueMessage::Enqueued {
            topic: topic.to_string(),
            count,
        });
        // Best effort, consumers poll as well
        if let Err(e) = self.context.publish(&self.topic, Arc::new(message)).await {
            warn!(topic = %topic, "Could not publish enqueue notification: {e:#}");
        }
    }
}

/// One producer per ledger stream of every configured chain
pub fn build_producers(
    indexer: &IndexerConfig,
    cfg: &ChainProducerConfig,
    ctx: &ProducerContext,
) -> Result<Vec<ChainProducer>> {
    let mut producers = Vec::new();
    for chain in &indexer.chains {
        for stream in chain.vm.streams() {
            let topic = Topic::new(indexer.network_id, chain.id.clone(), stream.event_type);
            let endpoint = index_endpoint(&indexer.node_url, stream.chain, stream.index_type);
            let client = IndexClient::new(endpoint, cfg.poll_timeout())
                .with_context(|| format!("Creating index client for {topic}"))?;

            producers.push(ChainProducer::new(
                indexer.node_instance.clone(),
                topic,
                stream.chain,
                Arc::new(client),
                ctx.clone(),
                cfg.clone(),
            ));
        }
    }
    Ok(producers)
}

pub struct ChainProducerModule {
    indexer: IndexerConfig,
    pool: SqlitePool,
    metrics: Arc<dyn MetricsSink>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ChainProducerModule {
    pub fn new(
        indexer: IndexerConfig,
        pool: SqlitePool,
        metrics: Arc<dyn MetricsSink>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            indexer,
            pool,
            metrics,
            shutdown,
            tracker,
        }
    }
}

#[async_trait]
impl Module<Message> for ChainProducerModule {
    fn get_name(&self) -> &'static str {
        "chain-producer"
    }

    fn get_description(&self) -> &'static str {
        "Ledger index to durable queue producer"
    }

    async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let cfg = ChainProducerConfig::try_load(&config)?;
        info!(
            "Chain producer: {} chains, max batch {}, publishing on '{}'",
            self.indexer.chains.len(),
            cfg.max_batch,
            cfg.enqueued_topic
        );

        let ctx = ProducerContext {
            checkpoints: CheckpointStore::new(self.pool.clone()),
            queue: QueueStore::new(self.pool.clone()),
            notifier: Arc::new(BusQueueNotifier::new(context.clone(), &cfg.enqueued_topic)),
            metrics: self.metrics.clone(),
        };

        for mut producer in build_producers(&self.indexer, &cfg, &ctx)? {
            // Startup failures are fatal for the process
            producer.init().await?;

            let shutdown = self.shutdown.clone();
            let span = info_span!("chain_producer", id = %producer.id());
            context.run(self.tracker.track_future(
                async move {
                    producer.run(shutdown).await;
                }
                .instrument(span),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::{ChainConfig, ChainId, CounterRegistry, NoopNotifier, VmType};
    use quarry_test_utils::TestDb;

    fn indexer() -> IndexerConfig {
        IndexerConfig {
            network_id: 5,
            node_instance: "node-1".to_string(),
            node_url: "http://127.0.0.1:9650".to_string(),
            chains: vec![
                ChainConfig {
                    id: ChainId::new("xchain").unwrap(),
                    vm: VmType::Avm,
                },
                ChainConfig {
                    id: ChainId::new("pchain").unwrap(),
                    vm: VmType::Pvm,
                },
                ChainConfig {
                    id: ChainId::new("cchain").unwrap(),
                    vm: VmType::Evm,
                },
            ],
        }
    }

    #[tokio::test]
    async fn one_producer_per_stream() {
        let db = TestDb::new().await;
        let ctx = ProducerContext {
            checkpoints: db.checkpoints(),
            queue: db.queue(),
            notifier: Arc::new(NoopNotifier),
            metrics: Arc::new(CounterRegistry::new()),
        };

        let producers =
            build_producers(&indexer(), &ChainProducerConfig::default(), &ctx).unwrap();
        let topics: Vec<String> = producers.iter().map(|p| p.topic().to_string()).collect();

        assert_eq!(
            topics,
            vec![
                "5-xchain-decisions",
                "5-xchain-consensus",
                "5-pchain-decisions",
                "5-cchain-decisions",
            ]
        );
        assert_eq!(producers[1].id(), "producer 5 xchain consensus");
    }
}
