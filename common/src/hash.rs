//! Content-addressed identifiers
//!
//! The queue entry identifier is part of the on-disk contract: it is the
//! lower-case hex SHA-256 of `"{source_key}:{topic}"`. Changing the input
//! serialisation would break deduplication against existing rows.

use sha2::{Digest, Sha256};

use crate::topic::Topic;

/// Lower-case hex SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic queue entry identifier for a source key within a topic
pub fn queue_entry_id(source_key: &str, topic: &Topic) -> String {
    sha256_hex(format!("{source_key}:{topic}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::{ChainId, EventType};

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn entry_id_is_stable_and_topic_scoped() {
        let decisions = Topic::new(1, ChainId::new("X").unwrap(), EventType::Decisions);
        let consensus = Topic::new(1, ChainId::new("X").unwrap(), EventType::Consensus);

        let a = queue_entry_id("key", &decisions);
        let b = queue_entry_id("key", &decisions);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, sha256_hex(b"key:1-X-decisions"));
        assert_ne!(a, queue_entry_id("key", &consensus));
        assert_ne!(a, queue_entry_id("other", &decisions));
    }
}
