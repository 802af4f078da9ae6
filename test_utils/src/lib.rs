//! Test helpers for Quarry modules

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quarry_common::{
    ChainId, Container, EventType, LedgerError, LedgerReader, QueueNotifier, Topic,
};
use quarry_store::{CheckpointStore, QueueStore, StoreConfig};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEST_NETWORK: u32 = 12345;

pub fn topic(chain: &str, event_type: EventType) -> Topic {
    Topic::new(TEST_NETWORK, ChainId::new(chain).unwrap(), event_type)
}

pub fn timestamp(index: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + index as i64, 0).unwrap()
}

/// Container at `index` with distinct bytes and a native id
pub fn container(index: u64) -> Container {
    Container {
        index,
        id: format!("container-{index}"),
        bytes: format!("payload-{index}").into_bytes(),
        timestamp: timestamp(index),
    }
}

pub fn containers(count: u64) -> Vec<Container> {
    (0..count).map(container).collect()
}

/// Throw-away SQLite database with the pipeline schema
pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            dsn: format!("sqlite://{}", dir.path().join("quarry.db").display()),
            max_connections: 4,
            ..StoreConfig::default()
        };
        let pool = quarry_store::open(&config).await.unwrap();
        Self { _dir: dir, pool }
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.pool.clone())
    }

    pub fn queue(&self) -> QueueStore {
        QueueStore::new(self.pool.clone())
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

#[derive(Default)]
struct FakeLedgerState {
    containers: Vec<Container>,
    failures: VecDeque<LedgerError>,
    calls: Vec<(u64, usize)>,
}

/// Scripted ledger index answering range reads from memory.
///
/// Reads past the last container answer with the ledger's not-ready message.
#[derive(Clone, Default)]
pub struct FakeLedger {
    state: Arc<Mutex<FakeLedgerState>>,
}

impl FakeLedger {
    pub fn new(containers: Vec<Container>) -> Self {
        let ledger = Self::default();
        ledger.state.lock().unwrap().containers = containers;
        ledger
    }

    pub fn push(&self, container: Container) {
        self.state.lock().unwrap().containers.push(container);
    }

    /// Answer the next read with `err` instead of data
    pub fn fail_next(&self, err: LedgerError) {
        self.state.lock().unwrap().failures.push_back(err);
    }

    /// Every (start_index, max_count) requested so far
    pub fn calls(&self) -> Vec<(u64, usize)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl LedgerReader for FakeLedger {
    fn endpoint(&self) -> String {
        "fake://ledger".to_string()
    }

    async fn get_container_range(
        &self,
        start_index: u64,
        max_count: usize,
    ) -> Result<Vec<Container>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((start_index, max_count));
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let len = state.containers.len() as u64;
        if len == 0 {
            return Err(LedgerError::from_message("no containers have been accepted"));
        }
        if start_index >= len {
            return Err(LedgerError::from_message(format!(
                "start index ({start_index}) > last accepted index ({})",
                len - 1
            )));
        }

        let start = start_index as usize;
        let end = (start + max_count).min(state.containers.len());
        Ok(state.containers[start..end].to_vec())
    }
}

/// Notifier remembering every (topic, count) it was told about
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<(String, usize)>>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(String, usize)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueNotifier for RecordingNotifier {
    async fn enqueued(&self, topic: &Topic, count: usize) {
        self.events.lock().unwrap().push((topic.to_string(), count));
    }
}
