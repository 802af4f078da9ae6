//! Counter sink handed to pipeline workers at construction

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::topic::EventType;

pub const PRODUCE_PROCESSED: &str = "produce_records_processed";
pub const PRODUCE_SUCCESS: &str = "produce_records_success";
pub const PRODUCE_FAILURE: &str = "produce_records_failure";
pub const CONSUME_PROCESSED: &str = "consume_records_processed";
pub const CONSUME_SUCCESS: &str = "consume_records_success";
pub const CONSUME_FAILURE: &str = "consume_records_failure";
const CONSUME_PREFIX: &str = "consume_records";
const CONSUME_CONSENSUS_PREFIX: &str = "consume_consensus_records";

pub trait MetricsSink: Send + Sync + 'static {
    fn counter_inc(&self, key: &str);

    fn counter_add(&self, key: &str, value: u64);

    fn observe_millis(&self, key: &str, millis: u64) {
        self.counter_add(key, millis);
    }
}

/// In-process counters keyed by name
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<String, AtomicU64>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Sorted copy of every counter
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

impl MetricsSink for CounterRegistry {
    fn counter_inc(&self, key: &str) {
        self.counter_add(key, 1);
    }

    fn counter_add(&self, key: &str, value: u64) {
        if let Some(counter) = self.counters.get(key) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }
}

/// Counter keys of one producer worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerKeys {
    pub processed: String,
    pub success: String,
    pub failure: String,
}

impl ProducerKeys {
    pub fn new(chain_id: &str, event_type: EventType) -> Self {
        Self {
            processed: format!("{PRODUCE_PROCESSED}_{chain_id}_{event_type}"),
            success: format!("{PRODUCE_SUCCESS}_{chain_id}_{event_type}"),
            failure: format!("{PRODUCE_FAILURE}_{chain_id}_{event_type}"),
        }
    }
}

/// Counter keys of one consumer worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerKeys {
    pub processed: String,
    pub success: String,
    pub failure: String,
    pub process_millis: String,
}

impl ConsumerKeys {
    pub fn new(chain_id: &str, event_type: EventType) -> Self {
        let prefix = match event_type {
            EventType::Decisions => CONSUME_PREFIX,
            EventType::Consensus => CONSUME_CONSENSUS_PREFIX,
        };
        Self {
            processed: format!("{prefix}_processed_{chain_id}"),
            success: format!("{prefix}_success_{chain_id}"),
            failure: format!("{prefix}_failure_{chain_id}"),
            process_millis: format!("{prefix}_process_millis_{chain_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_counts_per_key() {
        let registry = CounterRegistry::new();
        registry.counter_inc("a");
        registry.counter_inc("a");
        registry.counter_add("b", 5);
        registry.observe_millis("b", 10);

        assert_eq!(registry.get("a"), 2);
        assert_eq!(registry.get("b"), 15);
        assert_eq!(registry.get("missing"), 0);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn consumer_keys_differ_by_event_type() {
        let decisions = ConsumerKeys::new("X", EventType::Decisions);
        let consensus = ConsumerKeys::new("X", EventType::Consensus);
        assert_eq!(decisions.failure, "consume_records_failure_X");
        assert_eq!(consensus.failure, "consume_consensus_records_failure_X");
    }

    #[test]
    fn producer_keys_carry_chain_and_event() {
        let keys = ProducerKeys::new("P", EventType::Decisions);
        assert_eq!(keys.processed, "produce_records_processed_P_decisions");
    }
}
