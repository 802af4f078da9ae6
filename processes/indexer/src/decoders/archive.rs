//! Reference decoder recording every container it is handed

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_common::{hash::sha256_hex, ChainConfig, ChainId, ContainerKind, QueueEntry};
use quarry_module_queue_consumer::decoder::{ChainDecoder, DecodeContext};
use quarry_store::{persist, Persistable};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS container_archive (
        id           TEXT PRIMARY KEY NOT NULL,
        chain_id     TEXT NOT NULL,
        topic        TEXT NOT NULL,
        kind         TEXT NOT NULL,
        msg_key      TEXT NOT NULL,
        size         INTEGER NOT NULL,
        payload_hash TEXT NOT NULL,
        created_at   TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS consensus_archive (
        id          TEXT PRIMARY KEY NOT NULL,
        chain_id    TEXT NOT NULL,
        vertex_hash TEXT NOT NULL,
        size        INTEGER NOT NULL,
        created_at  TEXT NOT NULL
    )",
];

fn kind_name(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Transaction => "transaction",
        ContainerKind::Block => "block",
        ContainerKind::Vertex => "vertex",
    }
}

struct ArchivedContainer<'a> {
    entry: &'a QueueEntry,
    kind: ContainerKind,
    payload_hash: String,
}

#[async_trait]
impl Persistable for ArchivedContainer<'_> {
    fn table(&self) -> &'static str {
        "container_archive"
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO container_archive
                 (id, chain_id, topic, kind, msg_key, size, payload_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.entry.id)
        .bind(self.entry.chain_id.as_str())
        .bind(&self.entry.topic)
        .bind(kind_name(self.kind))
        .bind(&self.entry.source_key)
        .bind(self.entry.payload.len() as i64)
        .bind(&self.payload_hash)
        .bind(self.entry.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE container_archive SET size = ?, payload_hash = ?, created_at = ? WHERE id = ?",
        )
        .bind(self.entry.payload.len() as i64)
        .bind(&self.payload_hash)
        .bind(self.entry.created_at)
        .bind(&self.entry.id)
        .execute(conn)
        .await?;
        Ok(())
    }
}

struct ArchivedVertex<'a> {
    id: &'a str,
    chain_id: &'a ChainId,
    vertex_hash: String,
    size: i64,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl Persistable for ArchivedVertex<'_> {
    fn table(&self) -> &'static str {
        "consensus_archive"
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO consensus_archive (id, chain_id, vertex_hash, size, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(self.id)
        .bind(self.chain_id.as_str())
        .bind(&self.vertex_hash)
        .bind(self.size)
        .bind(self.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE consensus_archive SET vertex_hash = ?, size = ? WHERE id = ?")
            .bind(&self.vertex_hash)
            .bind(self.size)
            .bind(self.id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Records each decisions container in `container_archive` and each
/// consensus vertex in `consensus_archive`
pub struct ContainerArchive {
    chain_id: ChainId,
}

impl ContainerArchive {
    pub fn new(chain: &ChainConfig) -> Self {
        Self {
            chain_id: chain.id.clone(),
        }
    }

    pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    fn check_chain(&self, entry: &QueueEntry) -> Result<()> {
        if entry.chain_id != self.chain_id {
            bail!(
                "Entry {} belongs to chain {}, not {}",
                entry.id,
                entry.chain_id,
                self.chain_id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChainDecoder for ContainerArchive {
    fn name(&self) -> String {
        "archive".to_string()
    }

    async fn consume(&self, ctx: &mut DecodeContext<'_>) -> Result<()> {
        self.check_chain(ctx.entry)?;
        match ctx.kind {
            ContainerKind::Transaction | ContainerKind::Block => {
                let record = ArchivedContainer {
                    entry: ctx.entry,
                    kind: ctx.kind,
                    payload_hash: sha256_hex(&ctx.entry.payload),
                };
                let outcome = persist(&mut *ctx.conn, &record, false).await?;
                debug!(id = %ctx.entry.id, ?outcome, "Archived container");
                Ok(())
            }
            ContainerKind::Vertex => bail!("Vertex {} on a decisions stream", ctx.entry.id),
        }
    }

    async fn consume_consensus(&self, ctx: &mut DecodeContext<'_>) -> Result<()> {
        self.check_chain(ctx.entry)?;
        let ContainerKind::Vertex = ctx.kind else {
            bail!("Consensus entry {} is not a vertex", ctx.entry.id);
        };
        let record = ArchivedVertex {
            id: &ctx.entry.id,
            chain_id: &ctx.entry.chain_id,
            vertex_hash: sha256_hex(&ctx.entry.payload),
            size: ctx.entry.payload.len() as i64,
            created_at: ctx.entry.created_at,
        };
        let outcome = persist(&mut *ctx.conn, &record, false).await?;
        debug!(id = %ctx.entry.id, ?outcome, "Archived vertex");
        Ok(())
    }
}
