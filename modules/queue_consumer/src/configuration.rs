use anyhow::{bail, Result};
use config::Config;
use quarry_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueConsumerConfig {
    pub batch_size: u32,
    pub poll_interval_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub write_timeout_secs: u64,
    pub enqueued_topic: String,
}

impl QueueConsumerConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let cfg: Self = full_config.try_deserialize()?;
        if cfg.batch_size == 0 {
            bail!("batch-size must be at least 1");
        }
        if cfg.retry_initial_ms > cfg.retry_max_ms {
            bail!("retry-initial-ms must not exceed retry-max-ms");
        }
        Ok(cfg)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(self.retry_initial_ms),
            max: Duration::from_millis(self.retry_max_ms),
        }
    }
}

impl Default for QueueConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 1000,
            retry_initial_ms: 100,
            retry_max_ms: 1000,
            write_timeout_secs: 60,
            enqueued_topic: "quarry.queue.enqueued".to_string(),
        }
    }
}
