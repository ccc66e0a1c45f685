//! Data-access capability consumed by [`RestHandler`](crate::handler::RestHandler).
//!
//! A [`Repository`] finds, lists, writes and removes entities of one type. Two
//! implementations ship with the crate: [`SeaOrmRepository`] over a `sea-orm` connection and
//! [`MemoryRepository`] for tests and prototypes.

pub mod database;
pub mod memory;
pub mod violation;

pub use database::{SeaOrmRepository, SeaOrmResource};
pub use memory::MemoryRepository;

use async_trait::async_trait;
use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::resource::RestResource;

/// Equality filters keyed by field name. A `null` value matches absent values.
pub type Criteria = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parses `ASC`/`DESC` in any case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ASC" => Some(Self::Asc),
            "DESC" => Some(Self::Desc),
            _ => None,
        }
    }
}

impl From<SortDirection> for sea_orm::Order {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => Self::Asc,
            SortDirection::Desc => Self::Desc,
        }
    }
}

/// Ordering instructions, applied in sequence.
pub type OrderBy = Vec<(String, SortDirection)>;

/// Storage operations for one entity type.
#[async_trait]
pub trait Repository<T: RestResource>: Send + Sync {
    async fn find(&self, id: i64) -> Result<Option<T>, StoreError>;

    async fn find_by(
        &self,
        criteria: &Criteria,
        order_by: &[(String, SortDirection)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<T>, StoreError>;

    /// Inserts the entity when it has no identity, updates it otherwise. Returns the stored
    /// entity with its identity assigned.
    async fn persist(&self, entity: T) -> Result<T, StoreError>;

    async fn remove(&self, entity: &T) -> Result<(), StoreError>;

    /// Commits pending writes. Stores that write through on `persist` keep the default.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Failure reported by a [`Repository`].
#[derive(Debug)]
pub enum StoreError {
    /// A required column received no value.
    NotNullViolation {
        column: Option<String>,
        message: String,
    },
    /// A unique constraint rejected the write.
    UniqueViolation { message: String },
    /// Criteria or ordering named a field the store does not know.
    UnknownField(String),
    Database(DbErr),
    Other(String),
}

impl StoreError {
    /// Classifies a raw driver message by its constraint-violation wording.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if let Some(column) = violation::not_null_column(&message) {
            return Self::NotNullViolation {
                column: Some(column),
                message,
            };
        }
        if violation::is_duplicate_entry(&message) {
            return Self::UniqueViolation { message };
        }
        Self::Other(message)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNullViolation { message, .. }
            | Self::UniqueViolation { message }
            | Self::Other(message) => f.write_str(message),
            Self::UnknownField(field) => write!(f, "Unrecognized field '{field}'"),
            Self::Database(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() {
            return Self::UniqueViolation { message };
        }
        match Self::classify(err.to_string()) {
            Self::Other(_) => Self::Database(err),
            classified => classified,
        }
    }
}
