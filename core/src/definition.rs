//! Database definitions.
//!
//! A [`DatabaseDefinition`] is the application's declaration of what it
//! stores: a name, a schema version, the entity types and the
//! relationships between them. It is built once at startup; every
//! registration is validated on the spot. Handing the finished definition
//! to a database wraps it in an `Arc`, after which it can only be read.

use std::sync::Arc;

use crate::error::Result;
use crate::metadata::{EntityMetadata, MetadataCache};
use crate::registry::RelationshipRegistry;
use crate::schema::Entity;

/// Entity types and relationships of one database.
///
/// # Examples
///
/// ```
/// use relmap_core::{DatabaseDefinition, Entity, EntitySchema, FieldType, HydrationError, Record};
///
/// struct Author;
/// struct Book;
///
/// impl Entity for Author {
///     fn schema() -> EntitySchema {
///         EntitySchema::new("Author")
///             .field("id", FieldType::Long)
///             .collection("books", "Book")
///     }
///     fn to_record(&self) -> Record { Record::new("Author") }
///     fn from_record(_: &Record) -> Result<Self, HydrationError> { Ok(Author) }
/// }
///
/// impl Entity for Book {
///     fn schema() -> EntitySchema {
///         EntitySchema::new("Book")
///             .field("id", FieldType::Long)
///             .collection("authors", "Author")
///     }
///     fn to_record(&self) -> Record { Record::new("Book") }
///     fn from_record(_: &Record) -> Result<Self, HydrationError> { Ok(Book) }
/// }
///
/// let mut definition = DatabaseDefinition::new("library", 1);
/// definition
///     .register::<Author>()?
///     .register::<Book>()?
///     .many_to_many::<Author, Book>()?;
/// definition.validate()?;
///
/// assert_eq!(definition.metadata_of::<Book>()?.table_name(), "books");
/// # Ok::<(), relmap_core::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct DatabaseDefinition {
    name: String,
    version: u32,
    registry: RelationshipRegistry,
    cache: MetadataCache,
}

impl DatabaseDefinition {
    /// Starts an empty definition.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            registry: RelationshipRegistry::new(),
            cache: MetadataCache::new(),
        }
    }

    /// Registers entity type `T`.
    pub fn register<T: Entity>(&mut self) -> Result<&mut Self> {
        let metadata = self.cache.describe::<T>()?;
        self.registry.register_entity(metadata)?;
        Ok(self)
    }

    /// Declares that `C` has many `E` through the collection field `through`.
    pub fn has_many<C: Entity, E: Entity>(&mut self, through: &str) -> Result<&mut Self> {
        let (container, contained) = (self.entity_name::<C>()?, self.entity_name::<E>()?);
        self.registry.register_has_many(&container, &contained, through)?;
        Ok(self)
    }

    /// Declares a has-many even though `E` also holds a collection of `C`.
    pub fn forced_has_many<C: Entity, E: Entity>(&mut self, through: &str) -> Result<&mut Self> {
        let (container, contained) = (self.entity_name::<C>()?, self.entity_name::<E>()?);
        self.registry
            .register_forced_has_many(&container, &contained, through)?;
        Ok(self)
    }

    /// Declares `A` and `B` many-to-many.
    pub fn many_to_many<A: Entity, B: Entity>(&mut self) -> Result<&mut Self> {
        let (a, b) = (self.entity_name::<A>()?, self.entity_name::<B>()?);
        self.registry.register_many_to_many(&a, &b)?;
        Ok(self)
    }

    /// Checks that every collection field is covered by a relationship.
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()
    }

    /// Effective metadata of `T`, including registry adjustments.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnregisteredEntity`](crate::ConfigError::UnregisteredEntity)
    /// when `T` was never registered.
    pub fn metadata_of<T: Entity>(&self) -> Result<Arc<EntityMetadata>> {
        let described = self.cache.describe::<T>()?;
        self.registry.require(described.entity()).map(Arc::clone)
    }

    /// The relationship registry.
    pub fn registry(&self) -> &RelationshipRegistry {
        &self.registry
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    fn entity_name<T: Entity>(&self) -> Result<String> {
        Ok(self.cache.describe::<T>()?.entity().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, HydrationError};
    use crate::record::Record;
    use crate::schema::EntitySchema;
    use crate::value::FieldType;

    struct Country;
    struct City;

    impl Entity for Country {
        fn schema() -> EntitySchema {
            EntitySchema::new("Country")
                .key("code", FieldType::Text)
                .collection("cities", "City")
        }
        fn to_record(&self) -> Record {
            Record::new("Country")
        }
        fn from_record(_: &Record) -> std::result::Result<Self, HydrationError> {
            Ok(Country)
        }
    }

    impl Entity for City {
        fn schema() -> EntitySchema {
            EntitySchema::new("City")
                .field("id", FieldType::Long)
                .field("name", FieldType::Text)
        }
        fn to_record(&self) -> Record {
            Record::new("City")
        }
        fn from_record(_: &Record) -> std::result::Result<Self, HydrationError> {
            Ok(City)
        }
    }

    #[test]
    fn test_metadata_reflects_registry_adjustments() {
        let mut definition = DatabaseDefinition::new("atlas", 3);
        definition
            .register::<Country>()
            .unwrap()
            .register::<City>()
            .unwrap()
            .has_many::<Country, City>("cities")
            .unwrap();
        definition.validate().unwrap();

        assert_eq!(definition.name(), "atlas");
        assert_eq!(definition.version(), 3);
        // City's integer key is assigned by the caller under a text-keyed container
        assert!(!definition.metadata_of::<City>().unwrap().autoincrement());
    }

    #[test]
    fn test_relationship_before_registration_fails() {
        let mut definition = DatabaseDefinition::new("atlas", 1);
        definition.register::<Country>().unwrap();
        assert_eq!(
            definition.has_many::<Country, City>("cities").err(),
            Some(ConfigError::UnregisteredEntity("City".into()))
        );
        assert!(definition.metadata_of::<City>().is_err());
    }

    #[test]
    fn test_validate_catches_undeclared_collection() {
        let mut definition = DatabaseDefinition::new("atlas", 1);
        definition
            .register::<Country>()
            .unwrap()
            .register::<City>()
            .unwrap();
        assert!(matches!(
            definition.validate(),
            Err(ConfigError::UnresolvedCollection { .. })
        ));
    }
}
