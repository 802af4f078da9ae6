//! Quarry queue consumer module for Caryatid
//!
//! Decoders are registered as factories keyed by VM and event type. At init
//! one consumer worker is started for every configured chain a registration
//! matches. Workers wake on `QueueMessage::Enqueued` bus messages and also
//! poll on a timer.

pub mod configuration;
pub mod consumer;
pub mod decoder;
pub mod worker;

use anyhow::{Context as _, Result};
use caryatid_sdk::{async_trait, Context, Module};
use config::Config;
use quarry_common::{
    messages::{Message, QueueMessage},
    EventType, IndexerConfig, LocalQueueSignal, MetricsSink, Topic, VmType,
};
use quarry_store::QueueStore;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    configuration::QueueConsumerConfig,
    consumer::QueueConsumer,
    decoder::{ChainDecoder, DecoderRegistration},
    worker::ConsumerWorker,
};

/// One worker per (registration, matching chain)
pub fn build_workers(
    indexer: &IndexerConfig,
    cfg: &QueueConsumerConfig,
    registrations: &[DecoderRegistration],
    pool: &SqlitePool,
    metrics: &Arc<dyn MetricsSink>,
    signals: &LocalQueueSignal,
) -> Result<Vec<ConsumerWorker>> {
    let mut workers = Vec::new();
    for registration in registrations {
        let kind = registration.kind()?;
        for chain in indexer.chains_with_vm(registration.vm) {
            let decoder = (registration.factory)(chain, indexer)
                .with_context(|| format!("Creating decoder for chain {}", chain.id))?;
            let topic = Topic::new(indexer.network_id, chain.id.clone(), registration.event_type);
            let wake = signals.subscribe(&topic.to_string());

            let consumer = QueueConsumer::new(
                topic,
                kind,
                decoder,
                pool.clone(),
                metrics.clone(),
                cfg.retry_policy(),
                cfg.write_timeout(),
            );
            workers.push(ConsumerWorker::new(
                consumer,
                QueueStore::new(pool.clone()),
                wake,
                cfg.batch_size,
                cfg.poll_interval(),
            ));
        }
    }
    Ok(workers)
}

pub struct QueueConsumerModule {
    indexer: IndexerConfig,
    pool: SqlitePool,
    metrics: Arc<dyn MetricsSink>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    signals: Arc<LocalQueueSignal>,
    registrations: Mutex<Vec<DecoderRegistration>>,
}

impl QueueConsumerModule {
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
            signals: Arc::new(LocalQueueSignal::new()),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Register a decoder factory for every chain of `vm`, on `event_type`
    pub async fn add_decoder_factory<F>(&self, vm: VmType, event_type: EventType, factory: F)
    where
        F: Fn(
                &quarry_common::ChainConfig,
                &IndexerConfig,
            ) -> Result<Arc<dyn ChainDecoder>>
            + Send
            + Sync
            + 'static,
    {
        let mut registrations = self.registrations.lock().await;
        registrations.push(DecoderRegistration::new(vm, event_type, factory));
        debug!("Queue consumer: {} decoder factories registered", registrations.len());
    }

    async fn registrations(&self) -> Vec<DecoderRegistration> {
        self.registrations.lock().await.clone()
    }
}

#[async_trait]
impl Module<Message> for QueueConsumerModule {
    fn get_name(&self) -> &'static str {
        "queue-consumer"
    }

    fn get_description(&self) -> &'static str {
        "Durable queue to chain decoder consumer"
    }

    async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let cfg = QueueConsumerConfig::try_load(&config)?;
        let registrations = self.registrations().await;
        if registrations.is_empty() {
            warn!("Queue consumer: no decoder factories registered");
        }

        let workers = build_workers(
            &self.indexer,
            &cfg,
            &registrations,
            &self.pool,
            &self.metrics,
            &self.signals,
        )?;
        info!(
            "Queue consumer: {} workers, listening on '{}'",
            workers.len(),
            cfg.enqueued_topic
        );

        // Bridge bus notifications to the per-topic wake-ups
        let mut subscription = context.subscribe(&cfg.enqueued_topic).await?;
        let signals = self.signals.clone();
        let shutdown = self.shutdown.clone();
        context.run(async move {
            loop {
                let read = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    read = subscription.read() => read,
                };
                let Ok((_, message)) = read else {
                    return;
                };
                if let Message::Queue(QueueMessage::Enqueued { topic, count }) = message.as_ref() {
                    debug!(topic = %topic, count, "Enqueue notification");
                    signals.signal(topic);
                }
            }
        });

        for worker in workers {
            let shutdown = self.shutdown.clone();
            let span = info_span!("queue_consumer", id = %worker.id());
            context.run(self.tracker.track_future(
                async move {
                    worker.run(shutdown).await;
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
    use crate::decoder::DecodeContext;
    use quarry_common::{ChainConfig, ChainId, CounterRegistry};
    use quarry_test_utils::TestDb;

    struct Nop;

    #[async_trait]
    impl ChainDecoder for Nop {
        fn name(&self) -> String {
            "nop".to_string()
        }

        async fn consume(&self, _ctx: &mut DecodeContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn nop(_: &ChainConfig, _: &IndexerConfig) -> Result<Arc<dyn ChainDecoder>> {
        Ok(Arc::new(Nop))
    }

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
                    id: ChainId::new("cchain").unwrap(),
                    vm: VmType::Evm,
                },
            ],
        }
    }

    #[tokio::test]
    async fn workers_follow_registrations_and_chains() {
        let db = TestDb::new().await;
        let registrations = vec![
            DecoderRegistration::new(VmType::Avm, EventType::Decisions, nop),
            DecoderRegistration::new(VmType::Avm, EventType::Consensus, nop),
            DecoderRegistration::new(VmType::Evm, EventType::Decisions, nop),
            DecoderRegistration::new(VmType::Pvm, EventType::Decisions, nop),
        ];
        let metrics: Arc<dyn MetricsSink> = Arc::new(CounterRegistry::new());

        let workers = build_workers(
            &indexer(),
            &QueueConsumerConfig::default(),
            &registrations,
            &db.pool,
            &metrics,
            &LocalQueueSignal::new(),
        )
        .unwrap();

        let ids: Vec<&str> = workers.iter().map(|w| w.id()).collect();
        assert_eq!(
            ids,
            vec![
                "consumer 5 xchain decisions nop",
                "consumer 5 xchain consensus nop",
                "consumer 5 cchain decisions nop",
            ]
        );
    }

    #[tokio::test]
    async fn every_added_factory_is_kept() {
        let db = TestDb::new().await;
        let metrics: Arc<dyn MetricsSink> = Arc::new(CounterRegistry::new());
        let module = QueueConsumerModule::new(
            indexer(),
            db.pool.clone(),
            metrics.clone(),
            CancellationToken::new(),
            TaskTracker::new(),
        );

        module.add_decoder_factory(VmType::Avm, EventType::Decisions, nop).await;
        module.add_decoder_factory(VmType::Avm, EventType::Decisions, nop).await;
        module.add_decoder_factory(VmType::Evm, EventType::Decisions, nop).await;

        let registrations = module.registrations().await;
        assert_eq!(registrations.len(), 3);

        let workers = build_workers(
            &indexer(),
            &QueueConsumerConfig::default(),
            &registrations,
            &db.pool,
            &metrics,
            &LocalQueueSignal::new(),
        )
        .unwrap();
        assert_eq!(workers.len(), 3);
    }

    #[tokio::test]
    async fn impossible_registration_fails_startup() {
        let db = TestDb::new().await;
        let registrations = vec![DecoderRegistration::new(VmType::Evm, EventType::Consensus, nop)];
        let metrics: Arc<dyn MetricsSink> = Arc::new(CounterRegistry::new());

        let result = build_workers(
            &indexer(),
            &QueueConsumerConfig::default(),
            &registrations,
            &db.pool,
            &metrics,
            &LocalQueueSignal::new(),
        );
        assert!(result.is_err());
    }
}
