//! Indexed chain kinds and the streams each virtual machine produces

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::topic::EventType;

/// Which ledger chain an index endpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexedChain {
    /// UTXO / DAG exchange chain
    X,
    /// Platform chain
    P,
    /// Account-model contract chain
    C,
}

impl IndexedChain {
    /// Whether containers carry a ledger-native identifier that is unique
    /// before decoding. Otherwise the identifier is the hash of the bytes.
    pub fn has_native_ids(&self) -> bool {
        matches!(self, IndexedChain::C)
    }
}

impl Display for IndexedChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexedChain::X => "X",
            IndexedChain::P => "P",
            IndexedChain::C => "C",
        };
        f.write_str(s)
    }
}

/// Which index of a chain is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    Transactions,
    Vertices,
    Blocks,
}

impl Display for IndexType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexType::Transactions => "tx",
            IndexType::Vertices => "vtx",
            IndexType::Blocks => "block",
        };
        f.write_str(s)
    }
}

/// Virtual machine of a configured chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    Avm,
    Pvm,
    Evm,
}

/// One ledger stream read by a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub event_type: EventType,
    pub index_type: IndexType,
    pub chain: IndexedChain,
}

impl VmType {
    /// The ledger streams a chain of this VM is indexed from
    pub fn streams(&self) -> Vec<StreamSpec> {
        match self {
            VmType::Avm => vec![
                StreamSpec {
                    event_type: EventType::Decisions,
                    index_type: IndexType::Transactions,
                    chain: IndexedChain::X,
                },
                StreamSpec {
                    event_type: EventType::Consensus,
                    index_type: IndexType::Vertices,
                    chain: IndexedChain::X,
                },
            ],
            VmType::Pvm => vec![StreamSpec {
                event_type: EventType::Decisions,
                index_type: IndexType::Blocks,
                chain: IndexedChain::P,
            }],
            VmType::Evm => vec![StreamSpec {
                event_type: EventType::Decisions,
                index_type: IndexType::Blocks,
                chain: IndexedChain::C,
            }],
        }
    }
}

impl Display for VmType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmType::Avm => "avm",
            VmType::Pvm => "pvm",
            VmType::Evm => "evm",
        };
        f.write_str(s)
    }
}

/// Closed set of container kinds a decoder can be handed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    Transaction,
    Block,
    Vertex,
}

impl ContainerKind {
    /// Kind of container carried by a stream of the given VM and event type,
    /// or None if the VM never produces that event type.
    pub fn of(vm: VmType, event_type: EventType) -> Option<Self> {
        match (vm, event_type) {
            (VmType::Avm, EventType::Decisions) => Some(ContainerKind::Transaction),
            (VmType::Avm, EventType::Consensus) => Some(ContainerKind::Vertex),
            (VmType::Pvm, EventType::Decisions) => Some(ContainerKind::Block),
            (VmType::Evm, EventType::Decisions) => Some(ContainerKind::Block),
            (VmType::Pvm, EventType::Consensus) | (VmType::Evm, EventType::Consensus) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avm_reads_transactions_and_vertices_from_x() {
        let streams = VmType::Avm.streams();
        assert_eq!(streams.len(), 2);
        assert!(streams.iter().all(|s| s.chain == IndexedChain::X));
        assert_eq!(streams[0].index_type.to_string(), "tx");
        assert_eq!(streams[1].index_type.to_string(), "vtx");
        assert_eq!(streams[1].event_type, EventType::Consensus);
    }

    #[test]
    fn only_c_chain_has_native_ids() {
        assert!(IndexedChain::C.has_native_ids());
        assert!(!IndexedChain::X.has_native_ids());
        assert!(!IndexedChain::P.has_native_ids());
    }

    #[test]
    fn container_kind_follows_vm_and_event() {
        assert_eq!(
            ContainerKind::of(VmType::Avm, EventType::Consensus),
            Some(ContainerKind::Vertex)
        );
        assert_eq!(
            ContainerKind::of(VmType::Evm, EventType::Decisions),
            Some(ContainerKind::Block)
        );
        assert_eq!(ContainerKind::of(VmType::Pvm, EventType::Consensus), None);
    }
}
