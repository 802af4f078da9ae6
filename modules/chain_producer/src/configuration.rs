use anyhow::{bail, Result};
use config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainProducerConfig {
    pub max_batch: usize,
    pub poll_timeout_secs: u64,
    pub idle_interval_ms: u64,
    pub failure_retry_interval_ms: u64,
    pub db_write_timeout_secs: u64,
    pub enqueued_topic: String,
}

impl ChainProducerConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let cfg: Self = full_config.try_deserialize()?;
        if cfg.max_batch == 0 {
            bail!("max-batch must be at least 1");
        }
        Ok(cfg)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn failure_retry_interval(&self) -> Duration {
        Duration::from_millis(self.failure_retry_interval_ms)
    }

    pub fn db_write_timeout(&self) -> Duration {
        Duration::from_secs(self.db_write_timeout_secs)
    }
}

impl Default for ChainProducerConfig {
    fn default() -> Self {
        Self {
            max_batch: 500,
            poll_timeout_secs: 180,
            idle_interval_ms: 500,
            failure_retry_interval_ms: 200,
            db_write_timeout_secs: 60,
            enqueued_topic: "quarry.queue.enqueued".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_match_default_impl() {
        let cfg = ChainProducerConfig::try_load(&Config::default()).unwrap();
        assert_eq!(cfg, ChainProducerConfig::default());
        assert_eq!(cfg.poll_timeout(), Duration::from_secs(180));
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = Config::builder()
            .set_override("max-batch", 2)
            .unwrap()
            .set_override("idle-interval-ms", 10)
            .unwrap()
            .build()
            .unwrap();
        let cfg = ChainProducerConfig::try_load(&overrides).unwrap();
        assert_eq!(cfg.max_batch, 2);
        assert_eq!(cfg.idle_interval(), Duration::from_millis(10));
        assert_eq!(cfg.db_write_timeout_secs, 60);
    }

    #[test]
    fn zero_batch_is_rejected() {
        let overrides = Config::builder().set_override("max-batch", 0).unwrap().build().unwrap();
        assert!(ChainProducerConfig::try_load(&overrides).is_err());
    }
}
