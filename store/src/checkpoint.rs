//! Durable producer cursors, one row per (instance, topic)

use async_trait::async_trait;
use quarry_common::Checkpoint;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::{
    error::StoreError,
    persist::{persist, Persistable, WriteOutcome},
};

#[derive(Debug, FromRow)]
struct CheckpointRow {
    instance: String,
    topic: String,
    idx: i64,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let index = u64::try_from(row.idx)
            .map_err(|_| StoreError::Malformed(format!("negative checkpoint index {}", row.idx)))?;
        Ok(Checkpoint {
            instance: row.instance,
            topic: row.topic,
            index,
        })
    }
}

fn to_sql_index(index: u64) -> Result<i64, StoreError> {
    i64::try_from(index)
        .map_err(|_| StoreError::Malformed(format!("checkpoint index {index} out of range")))
}

#[async_trait]
impl Persistable for Checkpoint {
    fn table(&self) -> &'static str {
        "node_index"
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO node_index (instance, topic, idx) VALUES (?, ?, ?)")
            .bind(&self.instance)
            .bind(&self.topic)
            .bind(self.index as i64)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE node_index SET idx = ? WHERE instance = ? AND topic = ?")
            .bind(self.index as i64)
            .bind(&self.instance)
            .bind(&self.topic)
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the cursor at index 0 if it does not exist yet
    pub async fn initialize(
        &self,
        instance: &str,
        topic: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let mut conn = self.pool.acquire().await?;
        persist(&mut conn, &Checkpoint::new(instance, topic), false).await
    }

    pub async fn get(&self, instance: &str, topic: &str) -> Result<Checkpoint, StoreError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT instance, topic, idx FROM node_index WHERE instance = ? AND topic = ?",
        )
        .bind(instance)
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::NotInitialized {
                instance: instance.to_string(),
                topic: topic.to_string(),
            }),
        }
    }

    /// Move the cursor. The single writer of the key guarantees monotonicity.
    pub async fn advance(&self, instance: &str, topic: &str, index: u64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE node_index SET idx = ? WHERE instance = ? AND topic = ?")
            .bind(to_sql_index(index)?)
            .bind(instance)
            .bind(topic)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotInitialized {
                instance: instance.to_string(),
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    /// Every cursor, ordered by instance and topic
    pub async fn list(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let rows: Vec<CheckpointRow> =
            sqlx::query_as("SELECT instance, topic, idx FROM node_index ORDER BY instance, topic")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Checkpoint::try_from).collect()
    }
}
