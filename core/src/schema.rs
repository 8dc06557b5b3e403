//! Entity descriptors and the [`Entity`] trait.
//!
//! Persisted types describe themselves once with an [`EntitySchema`] built
//! from [`FieldSchema`] entries, and convert to and from the type-erased
//! [`Record`] form the engine works with. Nothing is discovered at runtime:
//! the descriptor is the whole truth about a type's layout.
//!
//! # Examples
//!
//! ```
//! use relmap_core::{Entity, EntitySchema, FieldSchema, FieldType, HydrationError, Record};
//!
//! struct Author {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Author {
//!     fn schema() -> EntitySchema {
//!         EntitySchema::new("Author")
//!             .field("id", FieldType::Long)
//!             .with_field(FieldSchema::new("name", FieldType::Text).not_null())
//!     }
//!
//!     fn to_record(&self) -> Record {
//!         Record::new("Author").with("id", self.id).with("name", self.name.as_str())
//!     }
//!
//!     fn from_record(record: &Record) -> Result<Self, HydrationError> {
//!         Ok(Self {
//!             id: record.get_i64("id")?,
//!             name: record.get_string("name")?,
//!         })
//!     }
//! }
//!
//! let schema = Author::schema();
//! assert_eq!(schema.fields.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::HydrationError;
use crate::record::Record;
use crate::value::{FieldType, Value};

/// Descriptor for one field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name; also the column name.
    pub name: String,
    /// Native type of the field.
    pub field_type: FieldType,
    /// Explicit primary-key marker.
    pub primary_key: bool,
    /// Excluded from persistence.
    pub ignored: bool,
    /// Constant (static) value; excluded from persistence.
    pub constant: bool,
    /// Column is declared `NOT NULL`.
    pub not_null: bool,
    /// Value substituted for `NULL` in `NOT NULL` columns.
    pub default_value: Option<Value>,
}

impl FieldSchema {
    /// Creates a plain nullable field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
            ignored: false,
            constant: false,
            not_null: false,
            default_value: None,
        }
    }

    /// Marks the field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Excludes the field from persistence.
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Marks the field as a constant; constants are never persisted.
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    /// Declares the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the default used when a `NOT NULL` column has no value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Whether the field is persisted at all (as a column or a relation).
    pub fn is_persisted(&self) -> bool {
        !self.ignored && !self.constant
    }

    /// Whether the field is a collection of a related entity.
    pub fn is_collection(&self) -> bool {
        self.field_type.related_entity().is_some()
    }
}

/// Descriptor for an entity type.
///
/// Fields keep their declaration order, which becomes the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Simple type name (e.g. `"Author"`).
    pub name: String,
    /// Explicit table name; derived from `name` when absent.
    pub table_name: Option<String>,
    /// Set to `false` to keep the store from assigning integer keys.
    pub autoincrement: bool,
    /// Declared fields in order.
    pub fields: Vec<FieldSchema>,
}

impl EntitySchema {
    /// Starts a descriptor for the named type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            autoincrement: true,
            fields: Vec::new(),
        }
    }

    /// Overrides the derived table name.
    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    /// Disables autoincrement for integer keys.
    pub fn without_autoincrement(mut self) -> Self {
        self.autoincrement = false;
        self
    }

    /// Adds a plain field.
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.with_field(FieldSchema::new(name, field_type))
    }

    /// Adds a field carrying the primary-key marker.
    pub fn key(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.with_field(FieldSchema::new(name, field_type).primary_key())
    }

    /// Adds a collection of another entity type.
    pub fn collection(self, name: impl Into<String>, entity: impl Into<String>) -> Self {
        self.with_field(FieldSchema::new(name, FieldType::Collection(entity.into())))
    }

    /// Adds a fully configured field.
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by name.
    pub fn find_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A type that can be persisted.
///
/// Implementors describe their layout once and convert to and from
/// [`Record`]s. Nested collections are carried inside the record, so
/// `to_record` should include them and `from_record` should rebuild them
/// with [`Record::get_collection`].
pub trait Entity: Sized + 'static {
    /// The type's descriptor.
    fn schema() -> EntitySchema;

    /// Converts the instance into a record.
    fn to_record(&self) -> Record;

    /// Rebuilds an instance from a hydrated record.
    ///
    /// # Errors
    ///
    /// Returns a [`HydrationError`] when a field is missing or holds a value
    /// the field cannot accept.
    fn from_record(record: &Record) -> Result<Self, HydrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let schema = EntitySchema::new("Author")
            .field("id", FieldType::Long)
            .field("name", FieldType::Text)
            .collection("books", "Book");
        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "books"]);
        assert!(schema.find_field("books").unwrap().is_collection());
        assert!(schema.autoincrement);
    }

    #[test]
    fn test_field_flags() {
        let field = FieldSchema::new("surname", FieldType::Text)
            .not_null()
            .with_default("Castiblanco");
        assert!(field.not_null);
        assert_eq!(field.default_value, Some(Value::from("Castiblanco")));
        assert!(field.is_persisted());
        assert!(!FieldSchema::new("cache", FieldType::Text).ignored().is_persisted());
        assert!(!FieldSchema::new("VERSION", FieldType::Integer).constant().is_persisted());
    }
}
