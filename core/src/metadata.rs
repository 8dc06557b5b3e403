//! Entity metadata extraction.
//!
//! [`EntityMetadata::describe`] turns an [`EntitySchema`] into the immutable
//! description every other component works from: the table name, ordered
//! columns, the primary key and whether the store assigns it. Collections
//! are listed separately because they never become columns.
//!
//! [`MetadataCache`] memoizes descriptions per Rust type with a
//! compute-if-absent map, so concurrent first use from several threads
//! describes a type exactly once.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{ConfigError, Result};
use crate::naming::{table_name_for, validate_identifier};
use crate::record::Record;
use crate::schema::{Entity, EntitySchema};
use crate::value::{FieldType, SqlType, Value};

/// Conventional name of the primary-key field when none is marked.
pub const CANONICAL_ID: &str = "id";

/// One stored column of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    /// Column (and field) name.
    pub name: String,
    /// Storage class.
    pub sql_type: SqlType,
    /// Native field type, used to convert cells back.
    pub field_type: FieldType,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
    /// Substitute for `NULL` in non-nullable columns.
    pub default_value: Option<Value>,
    /// Whether this is the primary key.
    pub primary_key: bool,
}

/// A collection field resolved through the relationship registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionField {
    /// Field name on the owning entity.
    pub name: String,
    /// Entity the collection holds.
    pub related: String,
}

/// Immutable description of one entity type.
///
/// # Examples
///
/// ```
/// use relmap_core::{EntityMetadata, EntitySchema, FieldType, SqlType};
///
/// let schema = EntitySchema::new("Author")
///     .field("id", FieldType::Long)
///     .field("name", FieldType::Text)
///     .collection("books", "Book");
/// let meta = EntityMetadata::describe(&schema).unwrap();
///
/// assert_eq!(meta.table_name(), "authors");
/// assert_eq!(meta.primary_key(), "id");
/// assert!(meta.autoincrement());
/// assert_eq!(meta.columns().len(), 2);
/// assert_eq!(meta.column("name").unwrap().sql_type, SqlType::Text);
/// assert_eq!(meta.collections()[0].related, "Book");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMetadata {
    entity: String,
    table_name: String,
    columns: Vec<ColumnDescriptor>,
    primary_key: usize,
    autoincrement: bool,
    collections: Vec<CollectionField>,
}

impl EntityMetadata {
    /// Describes an entity from its schema.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the schema has no primary key, more
    /// than one explicit key, a key that cannot be stored, duplicate field
    /// names, or names that are not plain SQL identifiers.
    pub fn describe(schema: &EntitySchema) -> Result<Self> {
        let entity = schema.name.clone();
        let table_name = match &schema.table_name {
            Some(table) => table.clone(),
            None => table_name_for(&entity),
        };
        validate_identifier(&table_name)?;

        let mut columns = Vec::new();
        let mut collections = Vec::new();
        let mut marked_key: Option<String> = None;

        for (i, field) in schema.fields.iter().enumerate() {
            if schema.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(ConfigError::DuplicateField {
                    entity,
                    field: field.name.clone(),
                });
            }
            if field.primary_key {
                if marked_key.is_some() {
                    return Err(ConfigError::MultiplePrimaryKeys { entity });
                }
                if !field.is_persisted() || field.is_collection() {
                    return Err(ConfigError::InvalidPrimaryKey {
                        entity,
                        field: field.name.clone(),
                    });
                }
                marked_key = Some(field.name.clone());
            }
            if !field.is_persisted() {
                continue;
            }
            validate_identifier(&field.name)?;

            if let Some(related) = field.field_type.related_entity() {
                collections.push(CollectionField {
                    name: field.name.clone(),
                    related: related.to_string(),
                });
                continue;
            }
            let Some(sql_type) = field.field_type.sql_type() else {
                continue;
            };
            columns.push(ColumnDescriptor {
                name: field.name.clone(),
                sql_type,
                field_type: field.field_type.clone(),
                nullable: !field.not_null,
                default_value: field.default_value.clone(),
                primary_key: false,
            });
        }

        let key_name = marked_key.as_deref().unwrap_or(CANONICAL_ID);
        let primary_key = columns
            .iter()
            .position(|c| c.name == key_name)
            .ok_or_else(|| ConfigError::MissingPrimaryKey {
                entity: entity.clone(),
            })?;
        let key = &mut columns[primary_key];
        key.primary_key = true;
        key.nullable = false;
        let autoincrement = schema.autoincrement && key.field_type.is_integer_family();

        Ok(Self {
            entity,
            table_name,
            columns,
            primary_key,
            autoincrement,
            collections,
        })
    }

    /// Entity (type) name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Table the entity is stored in.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Stored columns in declaration order.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Name of the primary-key column.
    pub fn primary_key(&self) -> &str {
        &self.columns[self.primary_key].name
    }

    /// The primary-key column.
    pub fn primary_key_column(&self) -> &ColumnDescriptor {
        &self.columns[self.primary_key]
    }

    /// Whether the store assigns the primary key on insert.
    pub fn autoincrement(&self) -> bool {
        self.autoincrement
    }

    /// Collection fields, resolved through the registry.
    pub fn collections(&self) -> &[CollectionField] {
        &self.collections
    }

    /// Looks up a collection field by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionField> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// First collection field holding `related`.
    pub fn collection_of(&self, related: &str) -> Option<&CollectionField> {
        self.collections.iter().find(|c| c.related == related)
    }

    /// Reads the primary-key value of a record.
    pub fn key_value<'r>(&self, record: &'r Record) -> &'r Value {
        record.value(self.primary_key())
    }

    /// A copy that leaves key assignment to the caller.
    pub(crate) fn without_autoincrement(&self) -> Self {
        Self {
            autoincrement: false,
            ..self.clone()
        }
    }
}

/// Per-type memo of [`EntityMetadata`], safe for concurrent first use.
///
/// # Examples
///
/// ```
/// use relmap_core::{Entity, EntitySchema, FieldType, HydrationError, MetadataCache, Record};
///
/// struct Tag;
///
/// impl Entity for Tag {
///     fn schema() -> EntitySchema {
///         EntitySchema::new("Tag").field("id", FieldType::Long)
///     }
///     fn to_record(&self) -> Record {
///         Record::new("Tag")
///     }
///     fn from_record(_: &Record) -> Result<Self, HydrationError> {
///         Ok(Tag)
///     }
/// }
///
/// let cache = MetadataCache::new();
/// let first = cache.describe::<Tag>().unwrap();
/// let second = cache.describe::<Tag>().unwrap();
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<TypeId, Arc<EntityMetadata>>,
}

impl MetadataCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached description of `T`, describing it on first use.
    ///
    /// # Errors
    ///
    /// Propagates the [`ConfigError`] from [`EntityMetadata::describe`];
    /// failed descriptions are not cached.
    pub fn describe<T: Entity>(&self) -> Result<Arc<EntityMetadata>> {
        let entry = self
            .entries
            .entry(TypeId::of::<T>())
            .or_try_insert_with(|| EntityMetadata::describe(&T::schema()).map(Arc::new))?;
        Ok(Arc::clone(entry.value()))
    }

    /// Number of described types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been described yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    #[test]
    fn test_key_by_convention() {
        let schema = EntitySchema::new("Book")
            .field("name", FieldType::Text)
            .field("id", FieldType::Long);
        let meta = EntityMetadata::describe(&schema).unwrap();
        assert_eq!(meta.primary_key(), "id");
        assert!(!meta.primary_key_column().nullable);
        // declaration order is kept
        assert_eq!(meta.columns()[0].name, "name");
    }

    #[test]
    fn test_explicit_key_wins_over_id() {
        let schema = EntitySchema::new("Country")
            .field("id", FieldType::Long)
            .key("code", FieldType::Text);
        let meta = EntityMetadata::describe(&schema).unwrap();
        assert_eq!(meta.primary_key(), "code");
        assert!(!meta.autoincrement());
        assert!(!meta.column("id").unwrap().primary_key);
    }

    #[test]
    fn test_missing_primary_key_is_rejected() {
        let schema = EntitySchema::new("Orphan").field("name", FieldType::Text);
        assert_eq!(
            EntityMetadata::describe(&schema),
            Err(ConfigError::MissingPrimaryKey {
                entity: "Orphan".into()
            })
        );
    }

    #[test]
    fn test_multiple_keys_are_rejected() {
        let schema = EntitySchema::new("Twice")
            .key("a", FieldType::Long)
            .key("b", FieldType::Long);
        assert!(matches!(
            EntityMetadata::describe(&schema),
            Err(ConfigError::MultiplePrimaryKeys { .. })
        ));
    }

    #[test]
    fn test_autoincrement_only_for_integer_keys() {
        for (field_type, expected) in [
            (FieldType::Integer, true),
            (FieldType::Long, true),
            (FieldType::Text, false),
            (FieldType::Boolean, false),
            (FieldType::Double, false),
            (FieldType::Float, false),
        ] {
            let schema = EntitySchema::new("Keyed").field("id", field_type.clone());
            let meta = EntityMetadata::describe(&schema).unwrap();
            assert_eq!(meta.autoincrement(), expected, "{field_type:?}");
        }

        let disabled = EntitySchema::new("Manual")
            .field("id", FieldType::Long)
            .without_autoincrement();
        assert!(!EntityMetadata::describe(&disabled).unwrap().autoincrement());
    }

    #[test]
    fn test_ignored_constant_and_collection_fields_are_not_columns() {
        let schema = EntitySchema::new("Author")
            .field("id", FieldType::Long)
            .with_field(FieldSchema::new("cache", FieldType::Text).ignored())
            .with_field(FieldSchema::new("VERSION", FieldType::Integer).constant())
            .collection("books", "Book");
        let meta = EntityMetadata::describe(&schema).unwrap();
        let names: Vec<_> = meta.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id"]);
        assert_eq!(meta.collections().len(), 1);
        assert!(meta.collection_of("Book").is_some());
    }

    #[test]
    fn test_ignored_key_is_invalid() {
        let schema = EntitySchema::new("Ghost")
            .with_field(FieldSchema::new("id", FieldType::Long).primary_key().ignored());
        assert!(matches!(
            EntityMetadata::describe(&schema),
            Err(ConfigError::InvalidPrimaryKey { .. })
        ));
    }

    #[test]
    fn test_table_name_override_and_validation() {
        let schema = EntitySchema::new("Person")
            .with_table_name("people")
            .field("id", FieldType::Long);
        assert_eq!(EntityMetadata::describe(&schema).unwrap().table_name(), "people");

        let bad = EntitySchema::new("Person")
            .with_table_name("people; DROP TABLE x")
            .field("id", FieldType::Long);
        assert!(matches!(
            EntityMetadata::describe(&bad),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let schema = EntitySchema::new("Dup")
            .field("id", FieldType::Long)
            .field("id", FieldType::Text);
        assert!(matches!(
            EntityMetadata::describe(&schema),
            Err(ConfigError::DuplicateField { .. })
        ));
    }

    struct Sample;

    impl Entity for Sample {
        fn schema() -> EntitySchema {
            EntitySchema::new("Sample").field("id", FieldType::Long)
        }
        fn to_record(&self) -> Record {
            Record::new("Sample")
        }
        fn from_record(_: &Record) -> std::result::Result<Self, crate::HydrationError> {
            Ok(Sample)
        }
    }

    #[test]
    fn test_cache_describes_once_across_threads() {
        let cache = Arc::new(MetadataCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.describe::<Sample>().unwrap())
            })
            .collect();
        let described: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.len(), 1);
        assert!(described.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
