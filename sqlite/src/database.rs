//! Batch and transaction orchestration.
//!
//! [`Database`] ties a frozen [`DatabaseDefinition`] to an [`SqlEngine`].
//! Every mutating call runs in one transaction and walks the object graph
//! under a [`TraversalGuard`]: has-many children are stored with their
//! container's key, many-to-many peers are matched to existing rows or
//! inserted, then linked. Reads hydrate rows back into entities, nested
//! collections included.
//!
//! # Example
//!
//! ```no_run
//! use relmap_core::{DatabaseDefinition, Entity};
//! use relmap_sqlite::Database;
//! # use relmap_core::{EntitySchema, FieldType, HydrationError, Record};
//! # struct Author { id: i64, name: String }
//! # impl Entity for Author {
//! #     fn schema() -> EntitySchema {
//! #         EntitySchema::new("Author").field("id", FieldType::Long).field("name", FieldType::Text)
//! #     }
//! #     fn to_record(&self) -> Record {
//! #         Record::new("Author").with("id", self.id).with("name", self.name.as_str())
//! #     }
//! #     fn from_record(r: &Record) -> Result<Self, HydrationError> {
//! #         Ok(Self { id: r.get_i64("id")?, name: r.get_string("name")? })
//! #     }
//! # }
//!
//! let mut definition = DatabaseDefinition::new("library", 1);
//! definition.register::<Author>().unwrap();
//!
//! let db = Database::open_path("library.db", definition).unwrap();
//! db.store_one(&Author { id: 0, name: "Vallejo".into() }).unwrap();
//!
//! let found: Vec<Author> = db.find_all().unwrap();
//! println!("{} authors", found.len());
//! ```

use std::path::Path;
use std::sync::Arc;

use relmap_core::{
    DatabaseDefinition, Entity, EntityMetadata, NodeId, Record, Relationship, TraversalGuard, Value,
};
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, TransactionPolicy};
use crate::engine::{SqlEngine, SqliteEngine};
use crate::error::{PersistError, Result};
use crate::hydrate::Hydrator;
use crate::statement::{self, KeyRef, ParentLink, Statement, WhereClause};

/// Outcome of a mutating call.
///
/// Under [`TransactionPolicy::BestEffort`] failed statements are counted
/// here instead of aborting the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Statements that ran successfully.
    pub statements_executed: usize,
    /// Statements that failed and were skipped.
    pub statements_failed: usize,
    /// Rows changed by the successful statements.
    pub rows_affected: usize,
}

impl StoreReport {
    /// Whether no statement failed.
    pub fn is_clean(&self) -> bool {
        self.statements_failed == 0
    }
}

/// Statement runner for one transaction, applying the failure policy.
struct Session<'e, E: SqlEngine> {
    engine: &'e E,
    policy: TransactionPolicy,
    report: StoreReport,
}

impl<E: SqlEngine> Session<'_, E> {
    fn run(&mut self, statement: &Statement) -> Result<usize> {
        match self.engine.execute(statement) {
            Ok(rows) => {
                self.report.statements_executed += 1;
                self.report.rows_affected += rows;
                Ok(rows)
            }
            Err(PersistError::DatabaseError(source)) => match self.policy {
                TransactionPolicy::BestEffort => {
                    warn!(sql = %statement.render(), error = %source, "statement failed, continuing");
                    self.report.statements_failed += 1;
                    Ok(0)
                }
                TransactionPolicy::Strict => Err(PersistError::ExecutionError {
                    sql: statement.render(),
                    source,
                }),
            },
            Err(other) => Err(other),
        }
    }

    /// Runs `statement`, returning whether it succeeded.
    fn applied(&mut self, statement: &Statement) -> Result<bool> {
        let failed = self.report.statements_failed;
        self.run(statement)?;
        Ok(self.report.statements_failed == failed)
    }
}

/// Entity persistence over an [`SqlEngine`].
///
/// Opening a database validates the definition, records its version in
/// `PRAGMA user_version` and creates every entity and join table.
///
/// # Examples
///
/// ```
/// use relmap_core::{DatabaseDefinition, Entity, EntitySchema, FieldType, HydrationError, Record};
/// use relmap_sqlite::Database;
///
/// #[derive(Debug, PartialEq)]
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Entity for Tag {
///     fn schema() -> EntitySchema {
///         EntitySchema::new("Tag")
///             .field("id", FieldType::Long)
///             .field("label", FieldType::Text)
///     }
///     fn to_record(&self) -> Record {
///         Record::new("Tag").with("id", self.id).with("label", self.label.as_str())
///     }
///     fn from_record(r: &Record) -> Result<Self, HydrationError> {
///         Ok(Tag { id: r.get_i64("id")?, label: r.get_string("label")? })
///     }
/// }
///
/// let mut definition = DatabaseDefinition::new("tags", 1);
/// definition.register::<Tag>().unwrap();
/// let db = Database::open_in_memory(definition).unwrap();
///
/// db.store_one(&Tag { id: 0, label: "rust".into() }).unwrap();
/// let tags: Vec<Tag> = db.find_all().unwrap();
/// assert_eq!(tags, vec![Tag { id: 1, label: "rust".into() }]);
/// ```
#[derive(Debug)]
pub struct Database<E: SqlEngine = SqliteEngine> {
    engine: E,
    definition: Arc<DatabaseDefinition>,
    config: DatabaseConfig,
}

impl Database<SqliteEngine> {
    /// Opens a private in-memory database with the default configuration.
    pub fn open_in_memory(definition: impl Into<Arc<DatabaseDefinition>>) -> Result<Self> {
        Self::open(SqliteEngine::open_in_memory()?, definition, DatabaseConfig::default())
    }

    /// Opens (or creates) a database file with the default configuration.
    pub fn open_path(path: impl AsRef<Path>, definition: impl Into<Arc<DatabaseDefinition>>) -> Result<Self> {
        Self::open(SqliteEngine::open(path)?, definition, DatabaseConfig::default())
    }
}

impl<E: SqlEngine> Database<E> {
    /// Opens a database over `engine`.
    ///
    /// # Errors
    ///
    /// [`PersistError::ConfigError`] when a collection field is not covered
    /// by a relationship; engine errors while creating tables.
    pub fn open(
        engine: E,
        definition: impl Into<Arc<DatabaseDefinition>>,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let definition = definition.into();
        definition.validate()?;
        let db = Self {
            engine,
            definition,
            config,
        };
        if db.config.foreign_keys {
            db.engine.execute_batch("PRAGMA foreign_keys = ON")?;
        }
        db.sync_version()?;
        let tables = db.create_tables()?;
        info!(
            database = %db.definition.name(),
            version = db.definition.version(),
            tables,
            "opened database"
        );
        Ok(db)
    }

    /// The frozen definition.
    pub fn definition(&self) -> &DatabaseDefinition {
        &self.definition
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runtime configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn sync_version(&self) -> Result<()> {
        let rows = self.engine.raw_query(&Statement::new("PRAGMA user_version"))?;
        let stored = rows
            .first()
            .and_then(|row| row.get_index(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let expected = i64::from(self.definition.version());
        if stored != expected {
            if stored != 0 {
                warn!(
                    database = %self.definition.name(),
                    stored,
                    expected,
                    "schema version mismatch"
                );
            }
            self.engine
                .execute_batch(&format!("PRAGMA user_version = {expected}"))?;
        }
        Ok(())
    }

    fn create_tables(&self) -> Result<usize> {
        let registry = self.definition.registry();
        let mut statements = Vec::new();
        for meta in registry.entities() {
            statements.push(statement::create_table(meta, registry)?);
        }
        for relation in registry.all_many_to_many() {
            statements.push(statement::create_join_table(relation, registry)?);
        }

        self.engine.begin_transaction()?;
        for stmt in &statements {
            if let Err(e) = self.engine.execute(stmt) {
                self.rollback_quietly();
                return Err(e);
            }
        }
        self.engine.commit()?;
        Ok(statements.len())
    }

    /// Drops every entity and join table.
    pub fn drop_tables(&self) -> Result<StoreReport> {
        let registry = self.definition.registry();
        let mut tables: Vec<String> = Vec::new();
        for relation in registry.all_many_to_many() {
            tables.push(registry.join_table(relation)?.table);
        }
        tables.extend(registry.entities().map(|m| m.table_name().to_string()));

        self.in_transaction(|session| {
            for table in &tables {
                session.run(&statement::drop_table(table))?;
            }
            Ok(())
        })
    }

    fn metadata<T: Entity>(&self) -> Result<Arc<EntityMetadata>> {
        Ok(self.definition.metadata_of::<T>()?)
    }

    fn rollback_quietly(&self) {
        if let Err(e) = self.engine.rollback() {
            warn!(error = %e, "rollback failed");
        }
    }

    fn in_transaction<F>(&self, work: F) -> Result<StoreReport>
    where
        F: FnOnce(&mut Session<'_, E>) -> Result<()>,
    {
        self.engine.begin_transaction()?;
        let mut session = Session {
            engine: &self.engine,
            policy: self.config.transaction_policy,
            report: StoreReport::default(),
        };
        match work(&mut session) {
            Ok(()) => {
                self.engine.commit()?;
                Ok(session.report)
            }
            Err(e) => {
                self.rollback_quietly();
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Storing
    // ------------------------------------------------------------------

    /// Stores one entity and its nested collections.
    ///
    /// An entity with an autoincrement key is always inserted. A caller-keyed
    /// entity whose key already exists is updated instead.
    pub fn store_one<T: Entity>(&self, instance: &T) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        let record = instance.to_record();
        let report = self.in_transaction(|session| {
            self.store_tree(session, &meta, &record, None).map(drop)
        })?;
        debug!(entity = %meta.entity(), ?report, "stored entity");
        Ok(report)
    }

    /// Stores one entity as a child of `parent`.
    ///
    /// # Errors
    ///
    /// [`PersistError::NotContained`] when `T` does not belong to `P`;
    /// [`PersistError::MissingKey`] when `parent` has no key.
    pub fn store_one_under<T: Entity, P: Entity>(&self, instance: &T, parent: &P) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        let link = self.parent_link(&meta, parent)?;
        let record = instance.to_record();
        self.in_transaction(|session| {
            self.store_tree(session, &meta, &record, Some(&link)).map(drop)
        })
    }

    /// Stores a batch in one transaction.
    ///
    /// Flat batches of autoincrement entities at or above the configured
    /// threshold use multi-row inserts; everything else is stored one
    /// entity at a time.
    pub fn store_many<T: Entity>(&self, instances: &[T]) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        let records: Vec<Record> = instances.iter().map(Entity::to_record).collect();
        self.store_batch(&meta, &records, None)
    }

    /// Stores a batch of children of `parent` in one transaction.
    pub fn store_many_under<T: Entity, P: Entity>(&self, instances: &[T], parent: &P) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        let link = self.parent_link(&meta, parent)?;
        let records: Vec<Record> = instances.iter().map(Entity::to_record).collect();
        self.store_batch(&meta, &records, Some(&link))
    }

    fn store_batch(
        &self,
        meta: &EntityMetadata,
        records: &[Record],
        parent: Option<&ParentLink>,
    ) -> Result<StoreReport> {
        let bulk = parent.is_none()
            && meta.autoincrement()
            && statement::bulk_row_width(meta) > 0
            && !self.definition.registry().has_relationships(meta.entity())
            && records.len() >= self.config.bulk_threshold;

        let report = if bulk {
            let rows_per_chunk = self.config.chunk_rows(statement::bulk_row_width(meta));
            self.in_transaction(|session| {
                for chunk in records.chunks(rows_per_chunk) {
                    if let Some(stmt) = statement::bulk_insert(meta, chunk)? {
                        session.run(&stmt)?;
                    }
                }
                Ok(())
            })?
        } else {
            self.in_transaction(|session| {
                for record in records {
                    self.store_tree(session, meta, record, parent)?;
                }
                Ok(())
            })?
        };
        debug!(entity = %meta.entity(), count = records.len(), bulk, ?report, "stored batch");
        Ok(report)
    }

    fn store_tree(
        &self,
        session: &mut Session<'_, E>,
        meta: &EntityMetadata,
        record: &Record,
        parent: Option<&ParentLink>,
    ) -> Result<Option<KeyRef>> {
        let mut guard = TraversalGuard::new(meta.entity());
        let root = guard.root();
        self.store_record(session, meta, record, parent, &mut guard, root)
    }

    fn store_record(
        &self,
        session: &mut Session<'_, E>,
        meta: &EntityMetadata,
        record: &Record,
        parent: Option<&ParentLink>,
        guard: &mut TraversalGuard,
        node: NodeId,
    ) -> Result<Option<KeyRef>> {
        record.expect_entity(meta.entity())?;

        let own_key = if meta.autoincrement() {
            if !session.applied(&statement::insert(meta, record, parent)?)? {
                return Ok(None);
            }
            KeyRef::Pending {
                table: meta.table_name().to_string(),
            }
        } else {
            let key = meta.key_value(record).clone();
            if !key.is_populated() {
                return Err(PersistError::MissingKey {
                    entity: meta.entity().to_string(),
                });
            }
            let stored = if self.key_exists(meta, &key)? {
                let filter = WhereClause::default().key_equals(meta.primary_key(), &KeyRef::Known(key.clone()));
                match statement::update(meta, record, parent, &filter) {
                    Ok(stmt) => session.applied(&stmt)?,
                    // nothing but the key to write
                    Err(PersistError::EmptyUpdate { .. }) => true,
                    Err(e) => return Err(e),
                }
            } else {
                session.applied(&statement::insert(meta, record, parent)?)?
            };
            if !stored {
                return Ok(None);
            }
            KeyRef::Known(key)
        };

        self.store_collections(session, meta, record, &own_key, guard, node)?;
        Ok(Some(own_key))
    }

    fn store_collections(
        &self,
        session: &mut Session<'_, E>,
        meta: &EntityMetadata,
        record: &Record,
        own_key: &KeyRef,
        guard: &mut TraversalGuard,
        node: NodeId,
    ) -> Result<()> {
        let registry = self.definition.registry();
        let entity = meta.entity();

        for field in meta.collections() {
            let items = record.collection(&field.name);
            if items.is_empty() {
                continue;
            }
            let Some(relationship) = registry.relationship_between(entity, &field.related) else {
                continue;
            };
            let Some(child) = guard.enter(node, &field.related) else {
                debug!(entity, field = %field.name, "skipping collection of a type already on the path");
                continue;
            };
            let related = registry.require(&field.related)?;

            match relationship {
                Relationship::HasMany(rel) if rel.container == entity && rel.through == field.name => {
                    let link = ParentLink {
                        fk_column: registry.foreign_key_column(rel)?,
                        key: own_key.clone(),
                    };
                    for item in items {
                        self.store_record(session, related, item, Some(&link), guard, child)?;
                    }
                }
                Relationship::ManyToMany(rel) => {
                    let join = registry.join_table(rel)?;
                    if let Some((own, peer)) = join.sides(entity) {
                        for item in items {
                            let Some(peer_key) = self.resolve_peer(session, related, item, guard, child)? else {
                                continue;
                            };
                            session.run(&statement::join_insert(
                                &join.table,
                                &own.column,
                                own_key,
                                &peer.column,
                                &peer_key,
                            ))?;
                        }
                    }
                }
                // the container of a forced has-many is not stored from its child
                Relationship::HasMany(_) => {}
            }
            guard.leave(node, child);
        }
        Ok(())
    }

    /// Finds the row a many-to-many peer refers to, storing it when absent.
    ///
    /// An existing row must equal the peer on every populated column.
    fn resolve_peer(
        &self,
        session: &mut Session<'_, E>,
        meta: &EntityMetadata,
        record: &Record,
        guard: &mut TraversalGuard,
        node: NodeId,
    ) -> Result<Option<KeyRef>> {
        let key = meta.key_value(record);
        if key.is_populated() && self.key_exists(meta, key)? {
            return Ok(Some(KeyRef::Known(key.clone())));
        }
        let filter = statement::identity_clause(meta, record);
        if !filter.is_empty() {
            let rows = self
                .engine
                .query(&statement::select_keys(meta, filter).limit(1))?;
            if let Some(found) = rows.first().and_then(|row| row.get_index(0)) {
                return Ok(Some(KeyRef::Known(found.clone())));
            }
        }
        self.store_record(session, meta, record, None, guard, node)
    }

    fn key_exists(&self, meta: &EntityMetadata, key: &Value) -> Result<bool> {
        let filter = WhereClause::default().key_equals(meta.primary_key(), &KeyRef::Known(key.clone()));
        Ok(self.count_matching(meta, &filter)? > 0)
    }

    fn parent_link<P: Entity>(&self, child: &EntityMetadata, parent: &P) -> Result<ParentLink> {
        let registry = self.definition.registry();
        let container = self.metadata::<P>()?;
        let relation = registry
            .belongs_to(child.entity())
            .filter(|rel| rel.container == container.entity())
            .ok_or_else(|| PersistError::NotContained {
                entity: child.entity().to_string(),
                container: container.entity().to_string(),
            })?;
        let key = container.key_value(&parent.to_record()).clone();
        if !key.is_populated() {
            return Err(PersistError::MissingKey {
                entity: container.entity().to_string(),
            });
        }
        Ok(ParentLink {
            fk_column: registry.foreign_key_column(relation)?,
            key: KeyRef::Known(key),
        })
    }

    // ------------------------------------------------------------------
    // Updating and deleting
    // ------------------------------------------------------------------

    /// Sets the populated fields of `instance` on every row matching `sample`.
    ///
    /// Collections are not touched.
    pub fn update<T: Entity>(&self, instance: &T, sample: &T) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        let filter = statement::where_clause(&meta, &sample.to_record(), None);
        let stmt = statement::update(&meta, &instance.to_record(), None, &filter)?;
        self.in_transaction(|session| session.run(&stmt).map(drop))
    }

    /// Deletes every row matching `sample`, with its has-many children and
    /// join rows. Many-to-many peers are kept.
    pub fn delete<T: Entity>(&self, sample: &T) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        let filter = statement::where_clause(&meta, &sample.to_record(), None);
        self.delete_matching(&meta, filter)
    }

    /// Deletes every row of `T`, with children and join rows.
    pub fn delete_all<T: Entity>(&self) -> Result<StoreReport> {
        let meta = self.metadata::<T>()?;
        self.delete_matching(&meta, WhereClause::default())
    }

    fn delete_matching(&self, meta: &EntityMetadata, filter: WhereClause) -> Result<StoreReport> {
        let report = self.in_transaction(|session| {
            let keys = self.keys_matching(meta, filter)?;
            for key in &keys {
                let mut guard = TraversalGuard::new(meta.entity());
                let root = guard.root();
                self.delete_record(session, meta, key, &mut guard, root)?;
            }
            Ok(())
        })?;
        debug!(entity = %meta.entity(), ?report, "deleted");
        Ok(report)
    }

    fn delete_record(
        &self,
        session: &mut Session<'_, E>,
        meta: &EntityMetadata,
        key: &Value,
        guard: &mut TraversalGuard,
        node: NodeId,
    ) -> Result<()> {
        let registry = self.definition.registry();
        let entity = meta.entity();

        for rel in registry.has_many(entity) {
            let Some(child) = guard.enter(node, &rel.contained) else {
                continue;
            };
            let child_meta = registry.require(&rel.contained)?;
            let fk = registry.foreign_key_column(rel)?;
            let filter = WhereClause::default().key_equals(&fk, &KeyRef::Known(key.clone()));
            for child_key in self.keys_matching(child_meta, filter)? {
                self.delete_record(session, child_meta, &child_key, guard, child)?;
            }
            guard.leave(node, child);
        }

        for rel in registry.many_to_many(entity) {
            let join = registry.join_table(rel)?;
            if let Some((own, _)) = join.sides(entity) {
                session.run(&statement::delete_join_rows(&join.table, &own.column, key))?;
            }
        }

        session.run(&statement::delete_by_key(meta, key))?;
        Ok(())
    }

    fn keys_matching(&self, meta: &EntityMetadata, filter: WhereClause) -> Result<Vec<Value>> {
        let rows = self.engine.query(&statement::select_keys(meta, filter))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_index(0).cloned())
            .collect())
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Every stored `T`, in insertion order.
    pub fn find_all<T: Entity>(&self) -> Result<Vec<T>> {
        let meta = self.metadata::<T>()?;
        self.find_matching(&meta, WhereClause::default())
    }

    /// Every `T` matching the populated fields of `sample`.
    pub fn find_where<T: Entity>(&self, sample: &T) -> Result<Vec<T>> {
        let meta = self.metadata::<T>()?;
        let filter = statement::where_clause(&meta, &sample.to_record(), None);
        self.find_matching(&meta, filter)
    }

    /// Like [`find_where`](Self::find_where), restricted to children of `parent`.
    pub fn find_where_under<T: Entity, P: Entity>(&self, sample: &T, parent: &P) -> Result<Vec<T>> {
        let meta = self.metadata::<T>()?;
        let link = self.parent_link(&meta, parent)?;
        let filter = statement::where_clause(&meta, &sample.to_record(), Some(&link));
        self.find_matching(&meta, filter)
    }

    /// The `T` with primary key `key`.
    pub fn find_by_key<T: Entity>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        let meta = self.metadata::<T>()?;
        let rows = self
            .engine
            .query(&statement::select_by_key(&meta, &key.into()))?;
        let records = Hydrator::new(&self.engine, self.definition.registry()).hydrate_all(&meta, &rows)?;
        records
            .first()
            .map(|record| T::from_record(record).map_err(PersistError::from))
            .transpose()
    }

    /// Number of stored `T`.
    pub fn count<T: Entity>(&self) -> Result<usize> {
        let meta = self.metadata::<T>()?;
        self.count_matching(&meta, &WhereClause::default())
    }

    /// Number of stored `T` matching `sample`.
    pub fn count_where<T: Entity>(&self, sample: &T) -> Result<usize> {
        let meta = self.metadata::<T>()?;
        let filter = statement::where_clause(&meta, &sample.to_record(), None);
        self.count_matching(&meta, &filter)
    }

    fn count_matching(&self, meta: &EntityMetadata, filter: &WhereClause) -> Result<usize> {
        let rows = self.engine.raw_query(&statement::count(meta, filter))?;
        let count = rows
            .first()
            .and_then(|row| row.get_index(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn find_matching<T: Entity>(&self, meta: &EntityMetadata, filter: WhereClause) -> Result<Vec<T>> {
        let rows = self.engine.query(&statement::select_where(meta, filter))?;
        let records = Hydrator::new(&self.engine, self.definition.registry()).hydrate_all(meta, &rows)?;
        records
            .iter()
            .map(|record| T::from_record(record).map_err(PersistError::from))
            .collect()
    }
}
