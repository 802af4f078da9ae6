use anyhow::{bail, Context, Result};
use config::Config;
use serde::{Deserialize, Serialize};

use crate::{chain::VmType, topic::ChainId, topic::NetworkId};

pub const CONFIG_KEY_INDEXER: &str = "indexer";

/// One ledger chain to index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub id: ChainId,
    pub vm: VmType,
}

/// Process-wide `[indexer]` section shared by producer and consumer modules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexerConfig {
    pub network_id: NetworkId,
    /// Identity of this process in the checkpoint table
    pub node_instance: String,
    /// Base URL of the ledger node, e.g. `http://127.0.0.1:9650`
    pub node_url: String,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl IndexerConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let cfg: IndexerConfig = config
            .get(CONFIG_KEY_INDEXER)
            .with_context(|| format!("Missing or invalid [{CONFIG_KEY_INDEXER}] section"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_instance.is_empty() {
            bail!("node-instance must not be empty");
        }
        // Topics are keyed by chain id alone, so one id may only appear once
        for (i, chain) in self.chains.iter().enumerate() {
            if let Some(other) = self.chains[..i].iter().find(|c| c.id == chain.id) {
                bail!("chain {} is configured twice ({} and {})", chain.id, other.vm, chain.vm);
            }
        }
        Ok(())
    }

    /// Configured chains running the given virtual machine
    pub fn chains_with_vm(&self, vm: VmType) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(move |c| c.vm == vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    const TOML: &str = r#"
        [indexer]
        network-id = 1
        node-instance = "node-a"
        node-url = "http://localhost:9650"
        chains = [
            { id = "X", vm = "avm" },
            { id = "P", vm = "pvm" },
            { id = "C", vm = "evm" },
        ]
    "#;

    fn load(s: &str) -> Result<IndexerConfig> {
        let config = Config::builder().add_source(File::from_str(s, FileFormat::Toml)).build()?;
        IndexerConfig::from_config(&config)
    }

    #[test]
    fn indexer_section_deserialises() {
        let cfg = load(TOML).unwrap();
        assert_eq!(cfg.network_id, 1);
        assert_eq!(cfg.chains.len(), 3);
        assert_eq!(cfg.chains_with_vm(VmType::Evm).next().unwrap().id.as_str(), "C");
    }

    #[test]
    fn hyphenated_chain_id_is_rejected() {
        let bad = TOML.replace(r#"id = "X""#, r#"id = "X-1""#);
        assert!(load(&bad).is_err());
    }

    #[test]
    fn duplicate_chain_is_rejected() {
        let bad = TOML.replace(r#"{ id = "P", vm = "pvm" }"#, r#"{ id = "X", vm = "avm" }"#);
        assert!(load(&bad).is_err());
    }

    #[test]
    fn same_chain_id_on_two_vms_is_rejected() {
        let bad = TOML.replace(r#"{ id = "C", vm = "evm" }"#, r#"{ id = "X", vm = "evm" }"#);
        let err = load(&bad).unwrap_err();
        assert!(err.to_string().contains("configured twice"), "{err:#}");
    }

    #[test]
    fn missing_section_is_an_error() {
        assert!(load("").is_err());
    }
}
