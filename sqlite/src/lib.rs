//! SQLite persistence for relmap entities.
//!
//! This crate stores entities described with `relmap-core` in SQLite. Table
//! layouts are derived from each entity's metadata; has-many children carry
//! a synthetic foreign key to their container and many-to-many pairs share
//! a join table named after both entity tables.
//!
//! # Architecture
//!
//! The crate is organized into these modules:
//!
//! - **`statement`** — pure SQL synthesis (DDL, DML, queries) with bound parameters
//! - **`engine`** — the [`SqlEngine`] seam and its rusqlite implementation
//! - **`hydrate`** — rows back into records, following relationships
//! - **`database`** — the transactional orchestrator ([`Database`])
//! - **`config`** — YAML-loadable runtime settings
//! - **`preferences`** — key-value storage for singleton settings objects
//!
//! # Quick start
//!
//! ```no_run
//! use relmap_core::DatabaseDefinition;
//! use relmap_sqlite::{Database, DatabaseConfig, SqliteEngine};
//!
//! let definition = DatabaseDefinition::new("library", 1);
//! // register entities and relationships here
//!
//! let config = DatabaseConfig::load("relmap.yml").unwrap();
//! let db = Database::open(SqliteEngine::open("library.db").unwrap(), definition, config).unwrap();
//! println!("{} tables", db.definition().registry().entities().count());
//! ```
//!
//! # Failure policy
//!
//! By default a failing statement inside a store or delete is logged,
//! counted in the returned [`StoreReport`] and skipped; the rest of the call
//! still commits. An object whose own row could not be written has its
//! nested collections skipped. [`TransactionPolicy::Strict`] rolls the call
//! back instead.

mod config;
mod database;
mod engine;
mod error;
mod hydrate;
mod preferences;
pub mod statement;

pub use config::{DatabaseConfig, TransactionPolicy};
pub use database::{Database, StoreReport};
pub use engine::{Row, SqlEngine, SqliteEngine};
pub use error::{PersistError, Result};
pub use hydrate::Hydrator;
pub use preferences::{KeyValueStore, Preferences, SqliteKeyValueStore};
pub use statement::{KeyRef, ParentLink, Query, Statement, WhereClause};
