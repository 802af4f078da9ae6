//! Idempotent persistence
//!
//! Every pipeline write goes through [`persist`]: attempt the insert, treat a
//! duplicate key as success, and only when the caller asks for it run a
//! separate update keyed by the same deterministic identifier. Insert and
//! update stay separate statements; the duplicate-key check of the storage
//! layer is what serialises concurrent writers of the same row.

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::trace;

use crate::error::{is_duplicate, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// Row already present, nothing written
    Duplicate,
    Updated,
}

impl WriteOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, WriteOutcome::Duplicate)
    }
}

/// An entity with a deterministic primary key
#[async_trait]
pub trait Persistable: Send + Sync {
    /// Table name, for logging
    fn table(&self) -> &'static str;

    /// Plain insert; must fail with a unique violation if the key exists
    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error>;

    /// Update of the non-key columns of an existing row
    async fn update(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error>;
}

pub async fn persist<P: Persistable + ?Sized>(
    conn: &mut SqliteConnection,
    item: &P,
    upd: bool,
) -> Result<WriteOutcome, StoreError> {
    match item.insert(conn).await {
        Ok(()) => Ok(WriteOutcome::Inserted),
        Err(e) if is_duplicate(&e) => {
            if upd {
                item.update(conn).await?;
                Ok(WriteOutcome::Updated)
            } else {
                trace!(table = item.table(), "Duplicate insert ignored");
                Ok(WriteOutcome::Duplicate)
            }
        }
        Err(e) => Err(e.into()),
    }
}
