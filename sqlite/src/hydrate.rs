//! Result hydration.
//!
//! Turns flat rows back into [`Record`]s, converting each cell to its
//! field's native type and loading collection fields with follow-up
//! queries. Recursion into related types goes through a
//! [`TraversalGuard`]: a related type already on the path is left empty.

use relmap_core::{
    CollectionField, EntityMetadata, HydrationError, NodeId, Record, Relationship,
    RelationshipRegistry, TraversalGuard, Value,
};
use tracing::trace;

use crate::engine::{Row, SqlEngine};
use crate::error::Result;
use crate::statement;

/// Rebuilds records from rows, following relationships.
pub struct Hydrator<'a, E: SqlEngine> {
    engine: &'a E,
    registry: &'a RelationshipRegistry,
}

impl<'a, E: SqlEngine> Hydrator<'a, E> {
    /// Creates a hydrator reading through `engine`.
    pub fn new(engine: &'a E, registry: &'a RelationshipRegistry) -> Self {
        Self { engine, registry }
    }

    /// Hydrates every row with a fresh guard per row.
    pub fn hydrate_all(&self, meta: &EntityMetadata, rows: &[Row]) -> Result<Vec<Record>> {
        rows.iter()
            .map(|row| {
                let mut guard = TraversalGuard::new(meta.entity());
                let root = guard.root();
                self.hydrate(meta, row, &mut guard, root)
            })
            .collect()
    }

    /// Hydrates one row of `meta`'s table positioned at `node` of `guard`.
    ///
    /// # Errors
    ///
    /// [`HydrationError::TypeMismatch`] when a cell cannot be represented as
    /// its field's type; engine errors from collection queries.
    pub fn hydrate(
        &self,
        meta: &EntityMetadata,
        row: &Row,
        guard: &mut TraversalGuard,
        node: NodeId,
    ) -> Result<Record> {
        let mut record = Record::new(meta.entity());
        for column in meta.columns() {
            let cell = row.get(&column.name).cloned().unwrap_or_default();
            let found = cell.kind();
            let value = column
                .field_type
                .from_cell(cell)
                .ok_or_else(|| HydrationError::TypeMismatch {
                    entity: meta.entity().to_string(),
                    field: column.name.clone(),
                    expected: column.field_type.name().to_string(),
                    found: found.to_string(),
                })?;
            record.set(column.name.clone(), value);
        }

        let key = meta.key_value(&record).clone();
        for field in meta.collections() {
            let related = self.load_collection(meta, field, &key, guard, node)?;
            record.set_collection(field.name.clone(), related);
        }
        Ok(record)
    }

    fn load_collection(
        &self,
        meta: &EntityMetadata,
        field: &CollectionField,
        key: &Value,
        guard: &mut TraversalGuard,
        node: NodeId,
    ) -> Result<Vec<Record>> {
        if key.is_null() {
            return Ok(Vec::new());
        }
        let entity = meta.entity();
        let Some(relationship) = self.registry.relationship_between(entity, &field.related) else {
            return Ok(Vec::new());
        };
        let Some(child) = guard.enter(node, &field.related) else {
            trace!(entity, field = %field.name, path = ?guard.path(node), "related type already on path");
            return Ok(Vec::new());
        };
        let related = self.registry.require(&field.related)?;

        let rows = match relationship {
            Relationship::HasMany(rel) if rel.container == entity && rel.through == field.name => {
                let fk = self.registry.foreign_key_column(rel)?;
                self.engine
                    .query(&statement::select_children(related, &fk, key))?
            }
            Relationship::HasMany(rel) if rel.contained == entity => {
                let fk = self.registry.foreign_key_column(rel)?;
                self.engine
                    .raw_query(&statement::select_container(related, meta, &fk, key))?
            }
            Relationship::ManyToMany(rel) => {
                let join = self.registry.join_table(rel)?;
                match join.sides(entity) {
                    Some((own, peer)) => self.engine.raw_query(&statement::select_peers(
                        related,
                        &join,
                        &own.column,
                        &peer.column,
                        key,
                    ))?,
                    None => Vec::new(),
                }
            }
            Relationship::HasMany(_) => Vec::new(),
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.hydrate(related, row, guard, child)?);
        }
        guard.leave(node, child);
        Ok(records)
    }
}
