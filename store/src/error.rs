//! Store error taxonomy

use thiserror::Error;

// SQLite result codes, primary and extended
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";
const SQLITE_LOCKED_SHAREDCACHE: &str = "262";
const SQLITE_BUSY_RECOVERY: &str = "261";
const SQLITE_BUSY_SNAPSHOT: &str = "517";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// How the pipeline reacts to a database failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Duplicate key, swallowed at the point of insert
    Duplicate,
    /// Lock or busy condition, retried
    Contention,
    /// Deadline exceeded, retried
    Timeout,
    Fatal,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint for instance '{instance}' topic '{topic}' is not initialized")]
    NotInitialized { instance: String, topic: String },

    #[error("database contention: {0}")]
    Contention(String),

    #[error("database deadline exceeded")]
    Timeout,

    #[error("malformed row: {0}")]
    Malformed(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Contention(_) | StoreError::Timeout)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match classify(&err) {
            ErrorClass::Contention => StoreError::Contention(err.to_string()),
            ErrorClass::Timeout => StoreError::Timeout,
            ErrorClass::Duplicate | ErrorClass::Fatal => StoreError::Database(err),
        }
    }
}

pub fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            classify_code(code.as_deref(), db.message())
        }
        sqlx::Error::PoolTimedOut => ErrorClass::Timeout,
        _ => ErrorClass::Fatal,
    }
}

fn classify_code(code: Option<&str>, message: &str) -> ErrorClass {
    match code {
        Some(SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE) => ErrorClass::Duplicate,
        Some(
            SQLITE_BUSY
            | SQLITE_LOCKED
            | SQLITE_LOCKED_SHAREDCACHE
            | SQLITE_BUSY_RECOVERY
            | SQLITE_BUSY_SNAPSHOT,
        ) => ErrorClass::Contention,
        _ if message.contains("database is locked") => ErrorClass::Contention,
        _ if message.contains("UNIQUE constraint failed") => ErrorClass::Duplicate,
        _ => ErrorClass::Fatal,
    }
}

pub fn is_duplicate(err: &sqlx::Error) -> bool {
    classify(err) == ErrorClass::Duplicate
}

/// Whether anywhere in the error chain the database reported lock contention
pub fn is_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return matches!(store, StoreError::Contention(_));
        }
        if let Some(sqlx) = cause.downcast_ref::<sqlx::Error>() {
            return classify(sqlx) == ErrorClass::Contention;
        }
        false
    })
}
