use anyhow::{bail, Result};
use async_trait::async_trait;
use quarry_common::{ChainConfig, ContainerKind, EventType, IndexerConfig, QueueEntry, VmType};
use sqlx::SqliteConnection;
use std::sync::Arc;

/// What a decoder is handed for one queue entry
pub struct DecodeContext<'a> {
    /// Connection inside the decode transaction. Every business write must go
    /// through it so it commits or rolls back with the decode.
    pub conn: &'a mut SqliteConnection,
    pub entry: &'a QueueEntry,
    pub kind: ContainerKind,
}

/// Chain specific decoding of queue entries into business tables.
///
/// Entries are delivered at least once, so implementations must write
/// through the idempotent persistence contract.
#[async_trait]
pub trait ChainDecoder: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Decode a decisions entry
    async fn consume(&self, ctx: &mut DecodeContext<'_>) -> Result<()>;

    /// Decode a consensus entry carrying DAG vertex metadata
    async fn consume_consensus(&self, ctx: &mut DecodeContext<'_>) -> Result<()> {
        bail!("{} does not decode consensus entries ({})", self.name(), ctx.entry.topic)
    }
}

pub type DecoderFactory =
    Arc<dyn Fn(&ChainConfig, &IndexerConfig) -> Result<Arc<dyn ChainDecoder>> + Send + Sync>;

/// A decoder factory and the streams it serves
#[derive(Clone)]
pub struct DecoderRegistration {
    pub vm: VmType,
    pub event_type: EventType,
    pub factory: DecoderFactory,
}

impl DecoderRegistration {
    pub fn new<F>(vm: VmType, event_type: EventType, factory: F) -> Self
    where
        F: Fn(&ChainConfig, &IndexerConfig) -> Result<Arc<dyn ChainDecoder>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            vm,
            event_type,
            factory: Arc::new(factory),
        }
    }

    /// Kind of container this registration's decoders receive
    pub fn kind(&self) -> Result<ContainerKind> {
        match ContainerKind::of(self.vm, self.event_type) {
            Some(kind) => Ok(kind),
            None => bail!("{} chains have no {} stream", self.vm, self.event_type),
        }
    }
}
