//! Durable queue of raw containers awaiting decode

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_common::{ChainId, QueueEntry};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::{
    error::StoreError,
    persist::{persist, Persistable, WriteOutcome},
};

#[derive(Debug, FromRow)]
struct QueueRow {
    id: String,
    network_id: i64,
    chain_id: String,
    msg_key: String,
    serialization: Vec<u8>,
    topic: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let network_id = u32::try_from(row.network_id)
            .map_err(|_| StoreError::Malformed(format!("network id {}", row.network_id)))?;
        let chain_id =
            ChainId::new(row.chain_id).map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(QueueEntry {
            id: row.id,
            network_id,
            chain_id,
            source_key: row.msg_key,
            payload: row.serialization,
            topic: row.topic,
            created_at: row.created_at,
        })
    }
}

const SELECT_ENTRY: &str =
    "SELECT id, network_id, chain_id, msg_key, serialization, topic, created_at FROM tx_pool";

#[async_trait]
impl Persistable for QueueEntry {
    fn table(&self) -> &'static str {
        "tx_pool"
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tx_pool
                 (id, network_id, chain_id, msg_key, serialization, topic, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(i64::from(self.network_id))
        .bind(self.chain_id.as_str())
        .bind(&self.source_key)
        .bind(&self.payload)
        .bind(&self.topic)
        .bind(self.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tx_pool SET serialization = ?, created_at = ? WHERE id = ?")
            .bind(&self.payload)
            .bind(self.created_at)
            .bind(&self.id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Position of an entry in the consumer scan order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl From<&QueueEntry> for QueueCursor {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            created_at: entry.created_at,
            id: entry.id.clone(),
        }
    }
}

/// Result of enqueuing a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one entry; an existing id is a successful no-op
    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<WriteOutcome, StoreError> {
        let mut conn = self.pool.acquire().await?;
        persist(&mut conn, entry, false).await
    }

    /// Insert a batch in ledger order, durable once this returns
    pub async fn enqueue_batch(
        &self,
        entries: &[QueueEntry],
    ) -> Result<EnqueueSummary, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut summary = EnqueueSummary::default();
        for entry in entries {
            match persist(&mut *tx, entry, false).await? {
                WriteOutcome::Duplicate => summary.duplicates += 1,
                _ => summary.inserted += 1,
            }
        }
        tx.commit().await?;

        debug!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "Batch enqueued"
        );
        Ok(summary)
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<QueueEntry>, StoreError> {
        let row: Option<QueueRow> = sqlx::query_as(&format!("{SELECT_ENTRY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    /// Oldest pending entry of a topic
    pub async fn dequeue_next(&self, topic: &str) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self.pending(topic, None, 1).await?.into_iter().next())
    }

    /// Up to `limit` entries of a topic strictly after `after`, in
    /// (created_at, id) order
    pub async fn pending(
        &self,
        topic: &str,
        after: Option<&QueueCursor>,
        limit: u32,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let rows: Vec<QueueRow> = match after {
            None => {
                sqlx::query_as(&format!(
                    "{SELECT_ENTRY} WHERE topic = ? ORDER BY created_at, id LIMIT ?"
                ))
                .bind(topic)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Some(cursor) => {
                sqlx::query_as(&format!(
                    "{SELECT_ENTRY} WHERE topic = ?
                     AND (created_at > ? OR (created_at = ? AND id > ?))
                     ORDER BY created_at, id LIMIT ?"
                ))
                .bind(topic)
                .bind(cursor.created_at)
                .bind(cursor.created_at)
                .bind(&cursor.id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    /// Delete a decoded entry. Returns false if it was already gone.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tx_pool WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of undecoded entries of a topic
    pub async fn depth(&self, topic: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tx_pool WHERE topic = ?")
            .bind(topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Undecoded entries per topic, for topics with at least one
    pub async fn depths(&self) -> Result<Vec<(String, u64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT topic, COUNT(*) FROM tx_pool GROUP BY topic ORDER BY topic")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(topic, count)| (topic, count.max(0) as u64)).collect())
    }
}
