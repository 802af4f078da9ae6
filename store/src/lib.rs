//! Quarry relational store: checkpoint cursors, the durable queue and the
//! idempotent persistence contract every pipeline write follows.

pub mod checkpoint;
pub mod error;
pub mod persist;
pub mod pool;
pub mod queue;
pub mod schema;

pub use checkpoint::CheckpointStore;
pub use error::{classify, is_contention, ErrorClass, StoreError};
pub use persist::{persist, Persistable, WriteOutcome};
pub use pool::{open, StoreConfig};
pub use queue::{EnqueueSummary, QueueCursor, QueueStore};

#[cfg(test)]
pub(crate) async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        dsn: format!("sqlite://{}", dir.path().join("quarry.db").display()),
        max_connections: 4,
        busy_timeout_ms: 50,
        ..StoreConfig::default()
    };
    let pool = open(&config).await.unwrap();
    (dir, pool)
}
