//! Configuration and hydration error types.
//!
//! [`ConfigError`] covers everything that can be wrong with entity
//! descriptors and relationship declarations; it is raised synchronously
//! while a [`DatabaseDefinition`](crate::DatabaseDefinition) is being built.
//! [`HydrationError`] covers converting stored values back into entities.

use thiserror::Error;

/// Errors raised while registering entities and relationships.
///
/// Each variant names the offending entity (and field, where there is one)
/// so the message points at the declaration that needs fixing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No field is marked as primary key and none is named `id`.
    #[error("entity {entity} has no primary key: mark a field as key or name it 'id'")]
    MissingPrimaryKey { entity: String },

    /// More than one field carries the primary-key marker.
    #[error("entity {entity} declares more than one primary key")]
    MultiplePrimaryKeys { entity: String },

    /// The primary-key field cannot act as a key (collection or ignored).
    #[error("field {entity}.{field} cannot be a primary key")]
    InvalidPrimaryKey { entity: String, field: String },

    /// Two fields share a name.
    #[error("entity {entity} declares field '{field}' twice")]
    DuplicateField { entity: String, field: String },

    /// A table or column name is not a plain SQL identifier.
    #[error("invalid identifier '{0}': must start with a letter or underscore and contain only alphanumerics and underscores")]
    InvalidIdentifier(String),

    /// The entity name was registered already.
    #[error("entity {0} is already registered")]
    DuplicateEntity(String),

    /// Two entities map to the same table.
    #[error("table {table} is used by both {first} and {second}")]
    DuplicateTable {
        table: String,
        first: String,
        second: String,
    },

    /// A relationship or lookup references an entity that was never registered.
    #[error("entity {0} is not registered")]
    UnregisteredEntity(String),

    /// An entity was declared to have many of itself.
    #[error("entity {0} cannot have many of itself")]
    SelfContainment(String),

    /// The inverse has-many pair is already registered.
    #[error("{contained} already has many {container}; {container} cannot also have many {contained}")]
    InvertedHasMany { container: String, contained: String },

    /// The pair is already related.
    #[error("a relationship between {first} and {second} is already registered")]
    DuplicateRelationship { first: String, second: String },

    /// The has-many `through` field is missing or not a collection of the contained type.
    #[error("{container} has no collection field '{through}' of {contained}")]
    MissingThroughField {
        container: String,
        contained: String,
        through: String,
    },

    /// The contained type already belongs to a container.
    #[error("{entity} already belongs to {container}")]
    AlreadyContained { entity: String, container: String },

    /// The contained type points back at its container without the relation being forced.
    #[error("{contained} holds a collection of {container}; declare many-to-many or force the has-many")]
    AmbiguousHasMany { container: String, contained: String },

    /// An entity was declared many-to-many with itself.
    #[error("entity {0} cannot be many-to-many with itself")]
    SelfManyToMany(String),

    /// The peer lacks the reciprocal collection field a many-to-many requires.
    #[error("{entity} has no collection field of {peer} required by the many-to-many relationship")]
    MissingReciprocal { entity: String, peer: String },

    /// A collection field is not covered by any registered relationship.
    #[error("collection field {entity}.{field} is not covered by any relationship")]
    UnresolvedCollection { entity: String, field: String },
}

/// Errors raised while turning stored values back into entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
    /// A required field had no value.
    #[error("missing value for {entity}.{field}")]
    MissingValue { entity: String, field: String },

    /// A value could not be represented as the field's native type.
    #[error("cannot convert {found} into {expected} for {entity}.{field}")]
    TypeMismatch {
        entity: String,
        field: String,
        expected: String,
        found: String,
    },

    /// An integer did not fit the field's width.
    #[error("value for {entity}.{field} is out of range")]
    OutOfRange { entity: String, field: String },

    /// A record of one entity was handed to another entity's constructor.
    #[error("expected a {expected} record, found {found}")]
    EntityMismatch { expected: String, found: String },
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
