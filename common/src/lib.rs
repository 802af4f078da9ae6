// Quarry common library - main library exports

pub mod chain;
pub mod configuration;
pub mod hash;
pub mod ledger;
pub mod messages;
pub mod metrics;
pub mod notify;
pub mod retry;
pub mod topic;
pub mod types;

// Flattened re-exports
pub use self::chain::{ContainerKind, IndexType, IndexedChain, StreamSpec, VmType};
pub use self::configuration::{ChainConfig, IndexerConfig};
pub use self::ledger::{LedgerError, LedgerReader};
pub use self::messages::{Message, QueueMessage};
pub use self::metrics::{ConsumerKeys, CounterRegistry, MetricsSink, ProducerKeys};
pub use self::notify::{LocalQueueSignal, NoopNotifier, QueueNotifier};
pub use self::retry::{RetryPolicy, RetrySleeper};
pub use self::topic::{ChainId, EventType, NetworkId, Topic, TopicError};
pub use self::types::*;
