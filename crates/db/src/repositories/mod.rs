use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use receiptpath_core::errors::ApplicationError;

pub mod directory;
pub mod expense;
pub mod memory;
pub mod policy;

pub use memory::InMemoryWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Database(error),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict(message) => ApplicationError::Conflict(message),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// SQL-backed implementation of the directory and workflow stores.
#[derive(Clone)]
pub struct SqlWorkflowStore {
    pool: crate::DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: crate::DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &crate::DbPool {
        &self.pool
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{name} `{raw}`: {error}")))
}

pub(crate) fn parse_decimal(name: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("{name} `{raw}`: {error}")))
}

pub(crate) fn parse_order(name: &str, raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name} `{raw}` out of range")))
}
