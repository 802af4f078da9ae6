//! Definition of Quarry pipeline types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    chain::IndexedChain,
    hash::{queue_entry_id, sha256_hex},
    topic::{ChainId, NetworkId, Topic},
};

/// Durable read cursor of one producer instance over one topic.
///
/// `index` is the ledger position of the last container enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub instance: String,
    pub topic: String,
    pub index: u64,
}

impl Checkpoint {
    pub fn new(instance: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            topic: topic.into(),
            index: 0,
        }
    }

    /// Ledger position the next read starts from.
    ///
    /// Index 0 is both "fresh" and "container 0 enqueued", so a worker
    /// loading it re-reads from 0 once and relies on the idempotent enqueue
    /// to absorb the repeat. A running worker keeps its own cursor.
    pub fn next_start(&self) -> u64 {
        if self.index == 0 {
            0
        } else {
            self.index + 1
        }
    }

    /// Checkpoint index after enqueuing `count` containers read from `start`
    pub fn advanced_to(start: u64, count: usize) -> u64 {
        start + (count as u64).saturating_sub(1)
    }
}

/// One opaque container as returned by the ledger index API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Position in the ledger's container sequence
    pub index: u64,
    /// Ledger-native container identifier
    pub id: String,
    pub bytes: Vec<u8>,
    /// Ledger-reported acceptance time
    pub timestamp: DateTime<Utc>,
}

/// A durably stored, not yet decoded container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub network_id: NetworkId,
    pub chain_id: ChainId,
    pub source_key: String,
    pub payload: Vec<u8>,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        topic: &Topic,
        source_key: impl Into<String>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let source_key = source_key.into();
        Self {
            id: queue_entry_id(&source_key, topic),
            network_id: topic.network_id,
            chain_id: topic.chain_id.clone(),
            source_key,
            payload,
            topic: topic.to_string(),
            created_at,
        }
    }

    /// Build the entry for a container read from the given chain's index
    pub fn from_container(topic: &Topic, chain: IndexedChain, container: &Container) -> Self {
        let source_key = if chain.has_native_ids() {
            container.id.clone()
        } else {
            sha256_hex(&container.bytes)
        };
        Self::new(topic, source_key, container.bytes.clone(), container.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::EventType;
    use chrono::TimeZone;

    fn container(index: u64) -> Container {
        Container {
            index,
            id: format!("native-{index}"),
            bytes: vec![index as u8, 0xAB],
            timestamp: Utc.timestamp_opt(1_700_000_000 + index as i64, 0).unwrap(),
        }
    }

    #[test]
    fn next_start_skips_the_last_enqueued_container() {
        let mut cp = Checkpoint::new("node", "1-X-decisions");
        assert_eq!(cp.next_start(), 0);
        cp.index = 1;
        assert_eq!(cp.next_start(), 2);
        cp.index = 4;
        assert_eq!(cp.next_start(), 5);
    }

    #[test]
    fn advanced_to_is_position_of_last_container() {
        assert_eq!(Checkpoint::advanced_to(0, 2), 1);
        assert_eq!(Checkpoint::advanced_to(2, 2), 3);
        assert_eq!(Checkpoint::advanced_to(4, 1), 4);
    }

    #[test]
    fn x_chain_entries_are_keyed_by_content_hash() {
        let topic = Topic::new(1, ChainId::new("X").unwrap(), EventType::Decisions);
        let entry = QueueEntry::from_container(&topic, IndexedChain::X, &container(3));
        assert_eq!(entry.source_key, sha256_hex(&[3, 0xAB]));
        assert_eq!(entry.topic, "1-X-decisions");
        assert_eq!(entry.created_at, container(3).timestamp);
    }

    #[test]
    fn c_chain_entries_are_keyed_by_native_id() {
        let topic = Topic::new(1, ChainId::new("C").unwrap(), EventType::Decisions);
        let entry = QueueEntry::from_container(&topic, IndexedChain::C, &container(7));
        assert_eq!(entry.source_key, "native-7");
        assert_eq!(entry.id, queue_entry_id("native-7", &topic));
    }

    #[test]
    fn same_container_gives_same_entry_id() {
        let topic = Topic::new(1, ChainId::new("X").unwrap(), EventType::Decisions);
        let a = QueueEntry::from_container(&topic, IndexedChain::X, &container(1));
        let b = QueueEntry::from_container(&topic, IndexedChain::X, &container(1));
        assert_eq!(a.id, b.id);
    }
}
