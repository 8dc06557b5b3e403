//! Relationship registry.
//!
//! Holds the effective metadata of every registered entity and the has-many
//! and many-to-many relationships between them. Declarations are validated
//! as they arrive and fail fast with a [`ConfigError`]; once registration is
//! over the registry is only read.
//!
//! Lookups go through per-type hash indices, so resolving the relationship
//! behind a collection field is O(1) regardless of how many relationships
//! are registered.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ConfigError, Result};
use crate::metadata::{ColumnDescriptor, EntityMetadata};
use crate::naming::{foreign_key_column, join_table_name};

/// One-to-many relationship: each `contained` row carries a foreign key to
/// its `container`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HasMany {
    /// Entity holding the collection.
    pub container: String,
    /// Entity stored in the collection.
    pub contained: String,
    /// Collection field on the container.
    pub through: String,
    /// Declared even though the contained type points back at the container.
    pub forced: bool,
}

/// Many-to-many relationship mediated by a join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManyToMany {
    /// First entity, as declared.
    pub a: String,
    /// Primary-key column of `a`.
    pub a_key: String,
    /// Collection field on `a` holding `b`.
    pub a_field: String,
    /// Second entity, as declared.
    pub b: String,
    /// Primary-key column of `b`.
    pub b_key: String,
    /// Collection field on `b` holding `a`.
    pub b_field: String,
}

impl ManyToMany {
    /// The other side of the relationship, if `entity` takes part in it.
    pub fn peer_of(&self, entity: &str) -> Option<&str> {
        if entity == self.a {
            Some(&self.b)
        } else if entity == self.b {
            Some(&self.a)
        } else {
            None
        }
    }

    /// Collection field `entity` uses for this relationship.
    pub fn field_on(&self, entity: &str) -> Option<&str> {
        if entity == self.a {
            Some(&self.a_field)
        } else if entity == self.b {
            Some(&self.b_field)
        } else {
            None
        }
    }
}

/// A registered relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Relationship {
    /// One-to-many.
    HasMany(HasMany),
    /// Many-to-many.
    ManyToMany(ManyToMany),
}

/// One foreign-key column of a join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinColumn {
    /// Entity the column references.
    pub entity: String,
    /// Column name, `<table>_<pk>`.
    pub column: String,
}

/// Derived layout of a many-to-many join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinTable {
    /// Both entity tables, sorted, joined by `_`.
    pub table: String,
    /// Column referencing the relationship's `a` side.
    pub first: JoinColumn,
    /// Column referencing the relationship's `b` side.
    pub second: JoinColumn,
}

impl JoinTable {
    /// Column referencing `entity`.
    pub fn column_for(&self, entity: &str) -> Option<&str> {
        if self.first.entity == entity {
            Some(&self.first.column)
        } else if self.second.entity == entity {
            Some(&self.second.column)
        } else {
            None
        }
    }

    /// `(own, peer)` columns as seen from `entity`.
    pub fn sides(&self, entity: &str) -> Option<(&JoinColumn, &JoinColumn)> {
        if self.first.entity == entity {
            Some((&self.first, &self.second))
        } else if self.second.entity == entity {
            Some((&self.second, &self.first))
        } else {
            None
        }
    }
}

/// Validated index of entities and relationships.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use relmap_core::{EntityMetadata, EntitySchema, FieldType, Relationship, RelationshipRegistry};
///
/// let author = EntitySchema::new("Author")
///     .field("id", FieldType::Long)
///     .collection("books", "Book");
/// let book = EntitySchema::new("Book")
///     .field("id", FieldType::Long)
///     .collection("authors", "Author");
///
/// let mut registry = RelationshipRegistry::new();
/// registry.register_entity(Arc::new(EntityMetadata::describe(&author).unwrap())).unwrap();
/// registry.register_entity(Arc::new(EntityMetadata::describe(&book).unwrap())).unwrap();
/// registry.register_many_to_many("Author", "Book").unwrap();
///
/// assert!(matches!(
///     registry.relationship_between("Book", "Author"),
///     Some(Relationship::ManyToMany(_))
/// ));
/// // declaring the pair again, in either order, is rejected
/// assert!(registry.register_many_to_many("Book", "Author").is_err());
/// ```
#[derive(Debug, Default)]
pub struct RelationshipRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
    order: Vec<String>,
    relationships: Vec<Relationship>,
    pairs: HashMap<String, HashMap<String, usize>>,
    belongs_to: HashMap<String, usize>,
    containers: HashMap<String, Vec<usize>>,
    peers: HashMap<String, Vec<usize>>,
}

impl RelationshipRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateEntity`] when the name is taken, or
    /// [`ConfigError::DuplicateTable`] when another entity uses the table.
    pub fn register_entity(&mut self, metadata: Arc<EntityMetadata>) -> Result<()> {
        let name = metadata.entity().to_string();
        if self.entities.contains_key(&name) {
            return Err(ConfigError::DuplicateEntity(name));
        }
        if let Some(other) = self
            .entities
            .values()
            .find(|m| m.table_name() == metadata.table_name())
        {
            return Err(ConfigError::DuplicateTable {
                table: metadata.table_name().to_string(),
                first: other.entity().to_string(),
                second: name,
            });
        }
        self.order.push(name.clone());
        self.entities.insert(name, metadata);
        Ok(())
    }

    /// Declares that `container` has many `contained` through the
    /// collection field `through`.
    ///
    /// # Errors
    ///
    /// Rejects self-containment, an already registered inverse or duplicate
    /// pair, a missing `through` field, a contained type that already
    /// belongs elsewhere, and a contained type that points back at the
    /// container (use [`register_forced_has_many`](Self::register_forced_has_many)
    /// for that).
    pub fn register_has_many(&mut self, container: &str, contained: &str, through: &str) -> Result<()> {
        self.add_has_many(container, contained, through, false)
    }

    /// Like [`register_has_many`](Self::register_has_many), but allowed when
    /// `contained` also holds a collection of `container`.
    pub fn register_forced_has_many(
        &mut self,
        container: &str,
        contained: &str,
        through: &str,
    ) -> Result<()> {
        self.add_has_many(container, contained, through, true)
    }

    fn add_has_many(&mut self, container: &str, contained: &str, through: &str, forced: bool) -> Result<()> {
        if container == contained {
            return Err(ConfigError::SelfContainment(container.to_string()));
        }
        let container_meta = Arc::clone(self.require(container)?);
        let contained_meta = Arc::clone(self.require(contained)?);

        if let Some(existing) = self.relationship_between(container, contained) {
            return Err(match existing {
                Relationship::HasMany(rel) if rel.container == contained => ConfigError::InvertedHasMany {
                    container: container.to_string(),
                    contained: contained.to_string(),
                },
                _ => ConfigError::DuplicateRelationship {
                    first: container.to_string(),
                    second: contained.to_string(),
                },
            });
        }

        match container_meta.collection(through) {
            Some(field) if field.related == contained => {}
            _ => {
                return Err(ConfigError::MissingThroughField {
                    container: container.to_string(),
                    contained: contained.to_string(),
                    through: through.to_string(),
                });
            }
        }

        if let Some(current) = self.belongs_to(contained) {
            return Err(ConfigError::AlreadyContained {
                entity: contained.to_string(),
                container: current.container.clone(),
            });
        }

        if !forced && contained_meta.collection_of(container).is_some() {
            return Err(ConfigError::AmbiguousHasMany {
                container: container.to_string(),
                contained: contained.to_string(),
            });
        }

        // children of a container with a non-integer key carry caller-assigned keys
        if contained_meta.autoincrement() && !container_meta.primary_key_column().field_type.is_integer_family() {
            self.entities.insert(
                contained.to_string(),
                Arc::new(contained_meta.without_autoincrement()),
            );
        }

        let idx = self.push(
            container,
            contained,
            Relationship::HasMany(HasMany {
                container: container.to_string(),
                contained: contained.to_string(),
                through: through.to_string(),
                forced,
            }),
        );
        self.belongs_to.insert(contained.to_string(), idx);
        self.containers.entry(container.to_string()).or_default().push(idx);
        Ok(())
    }

    /// Declares a many-to-many relationship between `a` and `b`.
    ///
    /// # Errors
    ///
    /// Rejects a self relationship, a pair that is already related in
    /// either order, and a missing collection field on either side.
    pub fn register_many_to_many(&mut self, a: &str, b: &str) -> Result<()> {
        if a == b {
            return Err(ConfigError::SelfManyToMany(a.to_string()));
        }
        let a_meta = Arc::clone(self.require(a)?);
        let b_meta = Arc::clone(self.require(b)?);

        if self.relationship_between(a, b).is_some() {
            return Err(ConfigError::DuplicateRelationship {
                first: a.to_string(),
                second: b.to_string(),
            });
        }

        let a_field = a_meta
            .collection_of(b)
            .ok_or_else(|| ConfigError::MissingReciprocal {
                entity: a.to_string(),
                peer: b.to_string(),
            })?;
        let b_field = b_meta
            .collection_of(a)
            .ok_or_else(|| ConfigError::MissingReciprocal {
                entity: b.to_string(),
                peer: a.to_string(),
            })?;

        let idx = self.push(
            a,
            b,
            Relationship::ManyToMany(ManyToMany {
                a: a.to_string(),
                a_key: a_meta.primary_key().to_string(),
                a_field: a_field.name.clone(),
                b: b.to_string(),
                b_key: b_meta.primary_key().to_string(),
                b_field: b_field.name.clone(),
            }),
        );
        self.peers.entry(a.to_string()).or_default().push(idx);
        self.peers.entry(b.to_string()).or_default().push(idx);
        Ok(())
    }

    fn push(&mut self, x: &str, y: &str, relationship: Relationship) -> usize {
        let idx = self.relationships.len();
        self.relationships.push(relationship);
        self.pairs.entry(x.to_string()).or_default().insert(y.to_string(), idx);
        self.pairs.entry(y.to_string()).or_default().insert(x.to_string(), idx);
        idx
    }

    /// Checks that every collection field is covered by a relationship.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnresolvedCollection`] naming the first uncovered field.
    pub fn validate(&self) -> Result<()> {
        for meta in self.entities() {
            let entity = meta.entity();
            for field in meta.collections() {
                let covered = match self.relationship_between(entity, &field.related) {
                    Some(Relationship::HasMany(rel)) => {
                        (rel.container == entity && rel.through == field.name) || rel.contained == entity
                    }
                    Some(Relationship::ManyToMany(rel)) => rel.field_on(entity) == Some(field.name.as_str()),
                    None => false,
                };
                if !covered {
                    return Err(ConfigError::UnresolvedCollection {
                        entity: entity.to_string(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Effective metadata of a registered entity.
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityMetadata>> {
        self.entities.get(name)
    }

    /// Like [`entity`](Self::entity), failing for unregistered names.
    pub fn require(&self, name: &str) -> Result<&Arc<EntityMetadata>> {
        self.entities
            .get(name)
            .ok_or_else(|| ConfigError::UnregisteredEntity(name.to_string()))
    }

    /// Registered entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityMetadata>> + '_ {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// All relationships in registration order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// The relationship between `x` and `y`, in either direction.
    pub fn relationship_between(&self, x: &str, y: &str) -> Option<&Relationship> {
        self.pairs
            .get(x)
            .and_then(|peers| peers.get(y))
            .map(|&idx| &self.relationships[idx])
    }

    /// The has-many relationship in which `entity` is contained.
    pub fn belongs_to(&self, entity: &str) -> Option<&HasMany> {
        self.belongs_to
            .get(entity)
            .and_then(|&idx| self.has_many_at(idx))
    }

    /// Has-many relationships in which `entity` is the container.
    pub fn has_many<'a>(&'a self, entity: &str) -> impl Iterator<Item = &'a HasMany> + 'a {
        self.containers
            .get(entity)
            .into_iter()
            .flatten()
            .filter_map(|&idx| self.has_many_at(idx))
    }

    /// Many-to-many relationships `entity` takes part in.
    pub fn many_to_many<'a>(&'a self, entity: &str) -> impl Iterator<Item = &'a ManyToMany> + 'a {
        self.peers
            .get(entity)
            .into_iter()
            .flatten()
            .filter_map(|&idx| match &self.relationships[idx] {
                Relationship::ManyToMany(rel) => Some(rel),
                Relationship::HasMany(_) => None,
            })
    }

    /// Every many-to-many relationship, in registration order.
    pub fn all_many_to_many(&self) -> impl Iterator<Item = &ManyToMany> + '_ {
        self.relationships.iter().filter_map(|rel| match rel {
            Relationship::ManyToMany(rel) => Some(rel),
            Relationship::HasMany(_) => None,
        })
    }

    /// Whether `entity` takes part in any relationship.
    pub fn has_relationships(&self, entity: &str) -> bool {
        self.pairs.get(entity).is_some_and(|peers| !peers.is_empty())
    }

    /// Synthetic foreign-key column the contained side of `relation` carries.
    pub fn foreign_key_column(&self, relation: &HasMany) -> Result<String> {
        let container = self.require(&relation.container)?;
        Ok(foreign_key_column(container.table_name(), container.primary_key()))
    }

    /// Key column of the container, whose type the foreign key copies.
    pub fn container_key(&self, relation: &HasMany) -> Result<&ColumnDescriptor> {
        Ok(self.require(&relation.container)?.primary_key_column())
    }

    /// Join-table layout for a many-to-many relationship.
    pub fn join_table(&self, relation: &ManyToMany) -> Result<JoinTable> {
        let a = self.require(&relation.a)?;
        let b = self.require(&relation.b)?;
        Ok(JoinTable {
            table: join_table_name(a.table_name(), b.table_name()),
            first: JoinColumn {
                entity: relation.a.clone(),
                column: foreign_key_column(a.table_name(), &relation.a_key),
            },
            second: JoinColumn {
                entity: relation.b.clone(),
                column: foreign_key_column(b.table_name(), &relation.b_key),
            },
        })
    }

    fn has_many_at(&self, idx: usize) -> Option<&HasMany> {
        match &self.relationships[idx] {
            Relationship::HasMany(rel) => Some(rel),
            Relationship::ManyToMany(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntitySchema;
    use crate::value::FieldType;

    fn describe(schema: EntitySchema) -> Arc<EntityMetadata> {
        Arc::new(EntityMetadata::describe(&schema).unwrap())
    }

    fn library() -> RelationshipRegistry {
        let mut registry = RelationshipRegistry::new();
        registry
            .register_entity(describe(
                EntitySchema::new("Author")
                    .field("id", FieldType::Long)
                    .field("name", FieldType::Text)
                    .collection("books", "Book"),
            ))
            .unwrap();
        registry
            .register_entity(describe(
                EntitySchema::new("Book")
                    .field("id", FieldType::Long)
                    .field("name", FieldType::Text)
                    .collection("authors", "Author"),
            ))
            .unwrap();
        registry
            .register_entity(describe(
                EntitySchema::new("Publisher")
                    .field("id", FieldType::Long)
                    .collection("catalog", "Book")
                    .collection("staff", "Editor"),
            ))
            .unwrap();
        registry
            .register_entity(describe(
                EntitySchema::new("Editor")
                    .field("id", FieldType::Long)
                    .collection("publishers", "Publisher"),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_self_has_many_is_rejected() {
        let mut registry = RelationshipRegistry::new();
        registry
            .register_entity(describe(
                EntitySchema::new("Node")
                    .field("id", FieldType::Long)
                    .collection("children", "Node"),
            ))
            .unwrap();
        assert_eq!(
            registry.register_has_many("Node", "Node", "children"),
            Err(ConfigError::SelfContainment("Node".into()))
        );
    }

    #[test]
    fn test_inverted_has_many_is_rejected() {
        let mut registry = library();
        registry
            .register_forced_has_many("Publisher", "Editor", "staff")
            .unwrap();
        assert!(matches!(
            registry.register_has_many("Editor", "Publisher", "publishers"),
            Err(ConfigError::InvertedHasMany { .. })
        ));
    }

    #[test]
    fn test_has_many_pointing_back_needs_force() {
        let mut registry = library();
        assert!(matches!(
            registry.register_has_many("Publisher", "Editor", "staff"),
            Err(ConfigError::AmbiguousHasMany { .. })
        ));
        assert!(registry
            .register_forced_has_many("Publisher", "Editor", "staff")
            .is_ok());
        assert!(registry.belongs_to("Editor").unwrap().forced);
    }

    #[test]
    fn test_has_many_through_field_must_exist() {
        let mut registry = library();
        assert!(matches!(
            registry.register_has_many("Publisher", "Book", "missing"),
            Err(ConfigError::MissingThroughField { .. })
        ));
        // field exists but holds another type
        assert!(matches!(
            registry.register_has_many("Publisher", "Book", "staff"),
            Err(ConfigError::MissingThroughField { .. })
        ));
    }

    #[test]
    fn test_many_to_many_twice_is_rejected() {
        let mut registry = library();
        registry.register_many_to_many("Author", "Book").unwrap();
        assert!(matches!(
            registry.register_many_to_many("Author", "Book"),
            Err(ConfigError::DuplicateRelationship { .. })
        ));
        assert!(matches!(
            registry.register_many_to_many("Book", "Author"),
            Err(ConfigError::DuplicateRelationship { .. })
        ));
    }

    #[test]
    fn test_many_to_many_requires_reciprocal_field() {
        let mut registry = library();
        // Publisher holds Books, but Book holds no Publishers
        assert_eq!(
            registry.register_many_to_many("Publisher", "Book"),
            Err(ConfigError::MissingReciprocal {
                entity: "Book".into(),
                peer: "Publisher".into()
            })
        );
    }

    #[test]
    fn test_unregistered_entities_are_rejected() {
        let mut registry = library();
        assert_eq!(
            registry.register_many_to_many("Author", "Ghost"),
            Err(ConfigError::UnregisteredEntity("Ghost".into()))
        );
    }

    #[test]
    fn test_type_belongs_to_one_container() {
        let mut registry = library();
        registry
            .register_entity(describe(
                EntitySchema::new("Shelf")
                    .field("id", FieldType::Long)
                    .collection("books", "Book"),
            ))
            .unwrap();
        registry.register_has_many("Publisher", "Book", "catalog").unwrap();
        assert_eq!(
            registry.register_has_many("Shelf", "Book", "books"),
            Err(ConfigError::AlreadyContained {
                entity: "Book".into(),
                container: "Publisher".into()
            })
        );
    }

    #[test]
    fn test_belongs_to_and_has_many_indices() {
        let mut registry = library();
        registry.register_many_to_many("Author", "Book").unwrap();
        registry
            .register_forced_has_many("Publisher", "Editor", "staff")
            .unwrap();

        let rel = registry.belongs_to("Editor").unwrap();
        assert_eq!(rel.container, "Publisher");
        assert_eq!(registry.has_many("Publisher").count(), 1);
        assert_eq!(registry.has_many("Author").count(), 0);
        assert_eq!(registry.many_to_many("Book").count(), 1);
        assert!(registry.belongs_to("Book").is_none());
        assert_eq!(
            registry.foreign_key_column(rel).unwrap(),
            "publishers_id"
        );
    }

    #[test]
    fn test_join_table_is_symmetric() {
        let mut forward = library();
        forward.register_many_to_many("Author", "Book").unwrap();
        let mut backward = library();
        backward.register_many_to_many("Book", "Author").unwrap();

        let f = forward.join_table(forward.all_many_to_many().next().unwrap()).unwrap();
        let b = backward.join_table(backward.all_many_to_many().next().unwrap()).unwrap();
        assert_eq!(f.table, "authors_books");
        assert_eq!(f.table, b.table);
        assert_eq!(f.column_for("Author"), Some("authors_id"));
        assert_eq!(b.column_for("Book"), Some("books_id"));
    }

    #[test]
    fn test_text_keyed_container_disables_child_autoincrement() {
        let mut registry = RelationshipRegistry::new();
        registry
            .register_entity(describe(
                EntitySchema::new("Country")
                    .key("code", FieldType::Text)
                    .collection("cities", "City"),
            ))
            .unwrap();
        registry
            .register_entity(describe(EntitySchema::new("City").field("id", FieldType::Long)))
            .unwrap();
        assert!(registry.entity("City").unwrap().autoincrement());
        registry.register_has_many("Country", "City", "cities").unwrap();
        assert!(!registry.entity("City").unwrap().autoincrement());
    }

    #[test]
    fn test_validate_reports_uncovered_collections() {
        let mut registry = library();
        registry.register_many_to_many("Author", "Book").unwrap();
        registry
            .register_forced_has_many("Publisher", "Editor", "staff")
            .unwrap();
        // Publisher.catalog has no relationship yet
        assert_eq!(
            registry.validate(),
            Err(ConfigError::UnresolvedCollection {
                entity: "Publisher".into(),
                field: "catalog".into()
            })
        );
    }

    #[test]
    fn test_duplicate_entity_and_table() {
        let mut registry = library();
        assert!(matches!(
            registry.register_entity(describe(
                EntitySchema::new("Author").field("id", FieldType::Long)
            )),
            Err(ConfigError::DuplicateEntity(_))
        ));
        assert!(matches!(
            registry.register_entity(describe(
                EntitySchema::new("Writer")
                    .with_table_name("authors")
                    .field("id", FieldType::Long)
            )),
            Err(ConfigError::DuplicateTable { .. })
        ));
    }
}
