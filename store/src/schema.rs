//! Checkpoint and queue tables

use sqlx::SqlitePool;

use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS node_index (
        instance TEXT NOT NULL,
        topic    TEXT NOT NULL,
        idx      INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (instance, topic)
    )",
    "CREATE TABLE IF NOT EXISTS tx_pool (
        id            TEXT PRIMARY KEY NOT NULL,
        network_id    INTEGER NOT NULL,
        chain_id      TEXT NOT NULL,
        msg_key       TEXT NOT NULL,
        serialization BLOB NOT NULL,
        topic         TEXT NOT NULL,
        created_at    TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS tx_pool_topic_created_at
        ON tx_pool (topic, created_at, id)",
];

/// Create the pipeline tables if they are missing
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
