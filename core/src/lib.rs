//! Entity metadata, relationship registry and record model.
//!
//! This crate holds everything about a relational mapping that does not
//! touch a database connection:
//!
//! - [`EntitySchema`] and the [`Entity`] trait: how a persisted type
//!   describes its fields and converts to and from a [`Record`].
//! - [`EntityMetadata`]: the derived table layout (columns, primary key,
//!   autoincrement), memoized per type by [`MetadataCache`].
//! - [`RelationshipRegistry`]: validated has-many and many-to-many
//!   relationships with O(1) lookups.
//! - [`TraversalGuard`]: cycle detection for walks over the relationship
//!   graph.
//! - [`DatabaseDefinition`]: the startup-time builder tying the above
//!   together.
//!
//! Configuration problems are reported as [`ConfigError`] while the
//! definition is built, never later.
//!
//! # Example
//!
//! ```
//! use relmap_core::*;
//!
//! struct Author;
//! struct Book;
//!
//! impl Entity for Author {
//!     fn schema() -> EntitySchema {
//!         EntitySchema::new("Author")
//!             .field("id", FieldType::Long)
//!             .field("name", FieldType::Text)
//!             .collection("books", "Book")
//!     }
//!     fn to_record(&self) -> Record { Record::new("Author") }
//!     fn from_record(_: &Record) -> std::result::Result<Author, HydrationError> { Ok(Author) }
//! }
//!
//! impl Entity for Book {
//!     fn schema() -> EntitySchema {
//!         EntitySchema::new("Book")
//!             .field("id", FieldType::Long)
//!             .field("name", FieldType::Text)
//!             .collection("authors", "Author")
//!     }
//!     fn to_record(&self) -> Record { Record::new("Book") }
//!     fn from_record(_: &Record) -> std::result::Result<Book, HydrationError> { Ok(Book) }
//! }
//!
//! let mut definition = DatabaseDefinition::new("library", 1);
//! definition.register::<Author>().unwrap().register::<Book>().unwrap();
//! definition.many_to_many::<Author, Book>().unwrap();
//!
//! // the same pair cannot be declared twice
//! assert!(definition.many_to_many::<Book, Author>().is_err());
//! assert!(definition.validate().is_ok());
//! ```

mod definition;
mod error;
mod metadata;
pub mod naming;
mod record;
mod registry;
mod schema;
mod traversal;
mod value;

pub use definition::DatabaseDefinition;
pub use error::{ConfigError, HydrationError, Result};
pub use metadata::{CANONICAL_ID, CollectionField, ColumnDescriptor, EntityMetadata, MetadataCache};
pub use record::Record;
pub use registry::{HasMany, JoinColumn, JoinTable, ManyToMany, Relationship, RelationshipRegistry};
pub use schema::{Entity, EntitySchema, FieldSchema};
pub use traversal::{NodeId, TraversalGuard};
pub use value::{FieldType, SqlType, Value, quote_literal};
