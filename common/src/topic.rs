//! Stream identity: the (network, chain, event-type) tuple and its topic string.
//!
//! A topic is rendered as `{network_id}-{chain_id}-{event_type}` and decoded by
//! splitting on `-`, so chain ids must never contain a hyphen.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub type NetworkId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("invalid topic name '{0}'")]
    InvalidTopicName(String),

    #[error("wrong topic event type '{0}'")]
    WrongEventType(String),

    #[error("wrong topic network id '{0}'")]
    WrongNetworkId(String),

    #[error("invalid chain id '{0}': must be non-empty and hyphen-free")]
    InvalidChainId(String),
}

/// Ledger chain identifier, guaranteed hyphen-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Result<Self, TopicError> {
        let id = id.into();
        if id.is_empty() || id.contains('-') {
            return Err(TopicError::InvalidChainId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChainId {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of stream carried by a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Finalized transactions and blocks
    Decisions,
    /// Vertex / epoch metadata of DAG chains
    Consensus,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Decisions => "decisions",
            EventType::Consensus => "consensus",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decisions" => Ok(EventType::Decisions),
            "consensus" => Ok(EventType::Consensus),
            other => Err(TopicError::WrongEventType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub network_id: NetworkId,
    pub chain_id: ChainId,
    pub event_type: EventType,
}

impl Topic {
    pub fn new(network_id: NetworkId, chain_id: ChainId, event_type: EventType) -> Self {
        Self {
            network_id,
            chain_id,
            event_type,
        }
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.network_id, self.chain_id, self.event_type)
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let [network, chain, event] = parts.as_slice() else {
            return Err(TopicError::InvalidTopicName(s.to_string()));
        };

        let network_id = network
            .parse::<NetworkId>()
            .map_err(|_| TopicError::WrongNetworkId(network.to_string()))?;
        let chain_id = ChainId::new(*chain)?;
        let event_type = event.parse::<EventType>()?;

        Ok(Topic::new(network_id, chain_id, event_type))
    }
}
