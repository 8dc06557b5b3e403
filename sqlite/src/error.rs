//! Error types for SQLite persistence.
//!
//! Provides a unified error type covering database access, configuration,
//! statement construction, hydration and configuration-file failures.

use relmap_core::{ConfigError, HydrationError};
use thiserror::Error;

/// Errors that can occur while persisting or loading entities.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// Entity or relationship configuration failure.
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// A stored value could not be converted back into an entity.
    #[error("hydration error: {0}")]
    HydrationError(#[from] HydrationError),

    /// A `NOT NULL` column had no value and no default.
    #[error("column {entity}.{column} is NOT NULL but has no value and no default")]
    NotNull { entity: String, column: String },

    /// A caller-keyed entity was stored without its key.
    #[error("entity {entity} has no autoincrement key and its key field is unset")]
    MissingKey { entity: String },

    /// A parent was supplied for an entity that does not belong to it.
    #[error("{entity} is not contained by {container}")]
    NotContained { entity: String, container: String },

    /// An update sample had no populated columns to set.
    #[error("update of {entity} has no populated columns")]
    EmptyUpdate { entity: String },

    /// A statement failed under the strict transaction policy.
    #[error("statement failed: {sql}: {source}")]
    ExecutionError {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON encoding of a preference value failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Convenience alias for results with [`PersistError`].
pub type Result<T> = std::result::Result<T, PersistError>;
