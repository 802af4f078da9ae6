//! Ledger read API consumed by the producers

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Container;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The upstream has not produced data at this offset yet, or the chain
    /// API is not reachable yet. This is the steady "caught up" condition.
    #[error("ledger index not ready: {0}")]
    NotReady(String),

    #[error("ledger request deadline exceeded")]
    Timeout,

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Classify an error message reported by the ledger API
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if index_not_ready(&message) || no_accepted_containers(&message) {
            LedgerError::NotReady(message)
        } else {
            LedgerError::Transport(message)
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, LedgerError::NotReady(_))
    }
}

/// The requested start index is past the last accepted container, or the
/// chain endpoint does not exist yet.
pub fn index_not_ready(message: &str) -> bool {
    (message.starts_with("start index") && message.contains("last accepted index"))
        || message.starts_with("received status code '404'")
}

/// The index exists but has not accepted any container yet
pub fn no_accepted_containers(message: &str) -> bool {
    message.contains("no containers have been accepted")
}

/// Bounded range reads over one ledger index
#[async_trait]
pub trait LedgerReader: Send + Sync + 'static {
    /// Human readable location of the index, for logging
    fn endpoint(&self) -> String;

    /// Fetch up to `max_count` containers starting at `start_index`,
    /// both ends inclusive.
    async fn get_container_range(
        &self,
        start_index: u64,
        max_count: usize,
    ) -> Result<Vec<Container>, LedgerError>;
}
