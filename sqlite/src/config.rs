//! Runtime configuration for a [`Database`](crate::Database).
//!
//! Controls when batch stores switch to multi-row inserts and how failing
//! statements are treated. Every field has a default, so a YAML file only
//! needs the settings it changes.
//!
//! # Example YAML
//!
//! ```yaml
//! bulk_threshold: 50
//! bulk_chunk_rows: 200
//! transaction_policy: strict
//! foreign_keys: false
//! ```

use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What happens when a statement fails inside a store or delete call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPolicy {
    /// Log the failure, count it, keep going and commit what succeeded.
    ///
    /// When the statement storing an object itself fails, the object's
    /// nested collections are skipped.
    #[default]
    BestEffort,
    /// Roll back the whole call and return the error.
    Strict,
}

/// Database runtime settings.
///
/// # Examples
///
/// ```
/// use relmap_sqlite::{DatabaseConfig, TransactionPolicy};
///
/// let config = DatabaseConfig::from_yaml_str("transaction_policy: strict\n").unwrap();
/// assert_eq!(config.transaction_policy, TransactionPolicy::Strict);
/// assert_eq!(config.bulk_threshold, DatabaseConfig::default().bulk_threshold);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Minimum batch size for the multi-row insert path.
    pub bulk_threshold: usize,
    /// Upper bound on rows per multi-row insert; further capped by SQLite's
    /// parameter and compound-select limits.
    pub bulk_chunk_rows: usize,
    /// Failure handling inside a call.
    pub transaction_policy: TransactionPolicy,
    /// Turns on `PRAGMA foreign_keys` when the database opens.
    pub foreign_keys: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            bulk_threshold: 20,
            bulk_chunk_rows: 500,
            transaction_policy: TransactionPolicy::BestEffort,
            foreign_keys: false,
        }
    }
}

impl DatabaseConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::PersistError::IoError) if the file cannot
    /// be read, or [`YamlError`](crate::PersistError::YamlError) if parsing
    /// fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Rows per multi-row insert for rows of `width` bound columns.
    pub fn chunk_rows(&self, width: usize) -> usize {
        use crate::statement::{MAX_BOUND_PARAMS, MAX_COMPOUND_SELECT};

        let by_params = MAX_BOUND_PARAMS / width.max(1);
        self.bulk_chunk_rows
            .min(by_params)
            .min(MAX_COMPOUND_SELECT)
            .max(1)
    }
}
