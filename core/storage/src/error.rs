use chill_journal_schemas::UserId;
use chrono::NaiveDate;
use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::AppendMode;

/// Errors surfaced by the journal store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lookup that needs exactly one event matched none.
    #[error("no event for user {user_id} on {date}")]
    NotFound { user_id: UserId, date: NaiveDate },

    /// SQLite rejected an insert or update.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[source] rusqlite::Error),

    /// A one-time schema change was applied again.
    #[error("column {column} already exists on table {table}")]
    SchemaAlreadyMigrated {
        table: &'static str,
        column: &'static str,
    },

    /// The store was laid out for a different append mode than configured.
    #[error("store uses {stored:?} append mode but {configured:?} was configured")]
    AppendModeMismatch {
        stored: AppendMode,
        configured: AppendMode,
    },

    #[error("invalid page number {token:?}")]
    InvalidPage { token: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("failed to create store directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::ConstraintViolation(err),
            _ => StoreError::Sqlite(err),
        }
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
