//! SQL statement synthesis.
//!
//! Every function here is a pure function of entity metadata, registry facts
//! and records; nothing touches a connection. Values travel as bound
//! parameters. The one exception is a *pending* key: the key of a row
//! inserted earlier in the same operation whose autoincrement value is not
//! known yet. It is embedded as a sub-query against `sqlite_sequence`:
//!
//! ```sql
//! (SELECT seq FROM sqlite_sequence WHERE name = 'authors')
//! ```
//!
//! # Example
//!
//! ```
//! use relmap_core::{EntityMetadata, EntitySchema, FieldSchema, FieldType, Record};
//! use relmap_sqlite::statement;
//!
//! let schema = EntitySchema::new("Author")
//!     .field("id", FieldType::Long)
//!     .with_field(FieldSchema::new("name", FieldType::Text).not_null());
//! let meta = EntityMetadata::describe(&schema).unwrap();
//!
//! let insert = statement::insert(&meta, &Record::new("Author").with("name", "Vallejo"), None).unwrap();
//! assert_eq!(insert.sql(), "INSERT INTO authors (name) VALUES (?)");
//! assert_eq!(insert.render(), "INSERT INTO authors (name) VALUES ('Vallejo')");
//! ```

use std::fmt;

use relmap_core::{
    EntityMetadata, JoinTable, ManyToMany, Record, RelationshipRegistry, Value, quote_literal,
};

use crate::error::{PersistError, Result};

/// SQLite's default limit on bound parameters per statement.
pub const MAX_BOUND_PARAMS: usize = 999;

/// SQLite's default limit on terms in a compound `SELECT`.
pub const MAX_COMPOUND_SELECT: usize = 500;

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    /// A statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A statement with bound parameters, one per `?`.
    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// SQL text with `?` placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// SQL text with every parameter inlined as an escaped literal.
    ///
    /// Used for logging. Placeholders inside quoted literals are left alone.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        let mut quoted = false;
        for c in self.sql.chars() {
            match c {
                '\'' => {
                    quoted = !quoted;
                    out.push(c);
                }
                '?' if !quoted => match params.next() {
                    Some(value) => out.push_str(&value.sql_literal()),
                    None => out.push('?'),
                },
                _ => out.push(c),
            }
        }
        out
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A key referenced by a foreign-key or join column.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRef {
    /// The key value is known.
    Known(Value),
    /// The row was just inserted into `table` with an autoincrement key.
    Pending { table: String },
}

impl KeyRef {
    /// SQL expression for the key, pushing its parameter when bound.
    fn expr(&self, params: &mut Vec<Value>) -> String {
        match self {
            KeyRef::Known(value) => {
                params.push(value.clone().into_storage());
                "?".to_string()
            }
            KeyRef::Pending { table } => pending_key(table),
        }
    }
}

/// Sub-query yielding the last autoincrement key assigned in `table`.
pub fn pending_key(table: &str) -> String {
    format!(
        "(SELECT seq FROM sqlite_sequence WHERE name = {})",
        quote_literal(table)
    )
}

/// Link from a contained row to its container.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentLink {
    /// Synthetic foreign-key column on the contained table.
    pub fk_column: String,
    /// Container key.
    pub key: KeyRef,
}

/// An `AND`ed list of conditions with their parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl WhereClause {
    /// Whether the clause has no conditions (matches every row).
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Adds `column = <key>`.
    pub fn key_equals(mut self, column: &str, key: &KeyRef) -> Self {
        let expr = key.expr(&mut self.params);
        self.conditions.push(format!("{column} = {expr}"));
        self
    }

    /// ` WHERE ...`, or the empty string for an empty clause.
    fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// A single-table `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    columns: Vec<String>,
    filter: WhereClause,
    group_by: Vec<String>,
    order_by: Option<String>,
    limit: Option<usize>,
}

impl Query {
    /// `SELECT * FROM table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: WhereClause::default(),
            group_by: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Restricts the selected columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the `WHERE` clause.
    pub fn filter(mut self, filter: WhereClause) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the `GROUP BY` columns.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the `ORDER BY` expression.
    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by = Some(expr.into());
        self
    }

    /// Sets a `LIMIT`.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Table queried.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Builds the statement.
    pub fn to_statement(&self) -> Statement {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}{}", self.table, self.filter.to_sql());
        if !self.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }
        if let Some(order) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Statement::with_params(sql, self.filter.params.clone())
    }
}

fn column_names(meta: &EntityMetadata) -> Vec<String> {
    meta.columns().iter().map(|c| c.name.clone()).collect()
}

fn qualified_columns(meta: &EntityMetadata, alias: &str) -> String {
    meta.columns()
        .iter()
        .map(|c| format!("{alias}.{}", c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE IF NOT EXISTS` for an entity.
///
/// The primary key comes first, then the declared columns in order, then
/// the synthetic foreign key when the entity belongs to a container.
pub fn create_table(meta: &EntityMetadata, registry: &RelationshipRegistry) -> Result<Statement> {
    let key = meta.primary_key_column();
    let mut defs = vec![if meta.autoincrement() {
        format!("{} {} PRIMARY KEY AUTOINCREMENT", key.name, key.sql_type)
    } else {
        format!("{} {} PRIMARY KEY NOT NULL", key.name, key.sql_type)
    }];

    for column in meta.columns().iter().filter(|c| !c.primary_key) {
        let mut def = format!("{} {}", column.name, column.sql_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {}", default.sql_literal()));
        }
        defs.push(def);
    }

    if let Some(relation) = registry.belongs_to(meta.entity()) {
        let fk = registry.foreign_key_column(relation)?;
        let container_key = registry.container_key(relation)?;
        defs.push(format!("{fk} {}", container_key.sql_type));
    }

    Ok(Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        meta.table_name(),
        defs.join(", ")
    )))
}

/// `CREATE TABLE IF NOT EXISTS` for a many-to-many join table.
pub fn create_join_table(relation: &ManyToMany, registry: &RelationshipRegistry) -> Result<Statement> {
    let join = registry.join_table(relation)?;
    Ok(Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {} TEXT NOT NULL, {} TEXT NOT NULL)",
        join.table, join.first.column, join.second.column
    )))
}

/// `DROP TABLE IF EXISTS`.
pub fn drop_table(table: &str) -> Statement {
    Statement::new(format!("DROP TABLE IF EXISTS {table}"))
}

/// Column/value pairs an insert writes for `record`.
///
/// Autoincrement keys are skipped. `NULL` in a non-nullable column takes
/// the column default or fails.
fn insert_values(meta: &EntityMetadata, record: &Record) -> Result<Vec<(String, Value)>> {
    let mut values = Vec::with_capacity(meta.columns().len());
    for column in meta.columns() {
        if column.primary_key && meta.autoincrement() {
            continue;
        }
        let mut value = record.value(&column.name).clone();
        if column.primary_key && !value.is_populated() {
            return Err(PersistError::MissingKey {
                entity: meta.entity().to_string(),
            });
        }
        if value.is_null() && !column.nullable {
            value = column
                .default_value
                .clone()
                .ok_or_else(|| PersistError::NotNull {
                    entity: meta.entity().to_string(),
                    column: column.name.clone(),
                })?;
        }
        values.push((column.name.clone(), value.into_storage()));
    }
    Ok(values)
}

/// `INSERT` for one record, optionally linked to its container.
///
/// # Errors
///
/// [`PersistError::NotNull`] for a non-nullable column without value or
/// default; [`PersistError::MissingKey`] for a caller-keyed entity whose
/// key is unset.
pub fn insert(meta: &EntityMetadata, record: &Record, parent: Option<&ParentLink>) -> Result<Statement> {
    let mut columns = Vec::new();
    let mut exprs = Vec::new();
    let mut params = Vec::new();
    for (column, value) in insert_values(meta, record)? {
        columns.push(column);
        exprs.push("?".to_string());
        params.push(value);
    }
    if let Some(link) = parent {
        columns.push(link.fk_column.clone());
        exprs.push(link.key.expr(&mut params));
    }

    if columns.is_empty() {
        return Ok(Statement::new(format!(
            "INSERT INTO {} DEFAULT VALUES",
            meta.table_name()
        )));
    }
    Ok(Statement::with_params(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            meta.table_name(),
            columns.join(", "),
            exprs.join(", ")
        ),
        params,
    ))
}

/// Multi-row `INSERT ... SELECT ... UNION ALL SELECT ...` for a flat batch.
///
/// The caller keeps the batch within [`MAX_BOUND_PARAMS`] and
/// [`MAX_COMPOUND_SELECT`].
pub fn bulk_insert(meta: &EntityMetadata, records: &[Record]) -> Result<Option<Statement>> {
    let mut columns: Vec<String> = Vec::new();
    let mut selects = Vec::with_capacity(records.len());
    let mut params = Vec::new();
    for record in records {
        let values = insert_values(meta, record)?;
        if columns.is_empty() {
            columns = values.iter().map(|(c, _)| c.clone()).collect();
        }
        selects.push(format!("SELECT {}", vec!["?"; values.len()].join(", ")));
        params.extend(values.into_iter().map(|(_, v)| v));
    }
    if selects.is_empty() || columns.is_empty() {
        return Ok(None);
    }
    Ok(Some(Statement::with_params(
        format!(
            "INSERT INTO {} ({}) {}",
            meta.table_name(),
            columns.join(", "),
            selects.join(" UNION ALL ")
        ),
        params,
    )))
}

/// Number of columns a bulk insert writes per row.
pub fn bulk_row_width(meta: &EntityMetadata) -> usize {
    meta.columns()
        .iter()
        .filter(|c| !(c.primary_key && meta.autoincrement()))
        .count()
}

/// `UPDATE ... SET` over the populated columns of `record`.
///
/// The primary key is never set. A parent link rewrites the synthetic
/// foreign key.
///
/// # Errors
///
/// [`PersistError::EmptyUpdate`] when nothing would be set.
pub fn update(
    meta: &EntityMetadata,
    record: &Record,
    parent: Option<&ParentLink>,
    filter: &WhereClause,
) -> Result<Statement> {
    let mut sets = Vec::new();
    let mut params = Vec::new();
    for column in meta.columns().iter().filter(|c| !c.primary_key) {
        let value = record.value(&column.name);
        if value.is_populated() {
            sets.push(format!("{} = ?", column.name));
            params.push(value.clone().into_storage());
        }
    }
    if let Some(link) = parent {
        let expr = link.key.expr(&mut params);
        sets.push(format!("{} = {expr}", link.fk_column));
    }
    if sets.is_empty() {
        return Err(PersistError::EmptyUpdate {
            entity: meta.entity().to_string(),
        });
    }
    params.extend(filter.params.iter().cloned());
    Ok(Statement::with_params(
        format!(
            "UPDATE {} SET {}{}",
            meta.table_name(),
            sets.join(", "),
            filter.to_sql()
        ),
        params,
    ))
}

/// Conditions matching the populated fields of `sample`.
///
/// Text compares with `LIKE`, everything else with `=`. Booleans always
/// count as populated; only `NULL` omits one. A parent adds the synthetic
/// foreign-key condition.
pub fn where_clause(meta: &EntityMetadata, sample: &Record, parent: Option<&ParentLink>) -> WhereClause {
    let mut clause = WhereClause::default();
    for column in meta.columns() {
        let value = sample.value(&column.name);
        if !value.is_populated() {
            continue;
        }
        let op = if column.field_type.is_text() { "LIKE" } else { "=" };
        clause.conditions.push(format!("{} {op} ?", column.name));
        clause.params.push(value.clone().into_storage());
    }
    match parent {
        Some(link) => clause.key_equals(&link.fk_column, &link.key),
        None => clause,
    }
}

/// Conditions identifying the row `sample` describes.
///
/// Unlike [`where_clause`] every populated column compares with `=`, so
/// text matches exactly: case matters and `%`/`_` are plain characters.
pub fn identity_clause(meta: &EntityMetadata, sample: &Record) -> WhereClause {
    let mut clause = WhereClause::default();
    for column in meta.columns() {
        let value = sample.value(&column.name);
        if value.is_populated() {
            clause.conditions.push(format!("{} = ?", column.name));
            clause.params.push(value.clone().into_storage());
        }
    }
    clause
}

/// Rows matching `filter`, in insertion order.
pub fn select_where(meta: &EntityMetadata, filter: WhereClause) -> Query {
    Query::new(meta.table_name())
        .columns(column_names(meta))
        .filter(filter)
        .order_by("rowid")
}

/// Primary keys of the rows matching `filter`.
pub fn select_keys(meta: &EntityMetadata, filter: WhereClause) -> Query {
    Query::new(meta.table_name())
        .columns([meta.primary_key()])
        .filter(filter)
        .order_by("rowid")
}

/// The row with primary key `key`.
pub fn select_by_key(meta: &EntityMetadata, key: &Value) -> Query {
    let filter = WhereClause::default().key_equals(meta.primary_key(), &KeyRef::Known(key.clone()));
    Query::new(meta.table_name())
        .columns(column_names(meta))
        .filter(filter)
}

/// Children of the container with key `key`.
pub fn select_children(child: &EntityMetadata, fk_column: &str, key: &Value) -> Query {
    let filter = WhereClause::default().key_equals(fk_column, &KeyRef::Known(key.clone()));
    select_where(child, filter)
}

/// The container row of the contained row with key `child_key`.
pub fn select_container(
    container: &EntityMetadata,
    child: &EntityMetadata,
    fk_column: &str,
    child_key: &Value,
) -> Statement {
    Statement::with_params(
        format!(
            "SELECT {} FROM {} c JOIN {} x ON x.{fk_column} = c.{} WHERE x.{} = ?",
            qualified_columns(container, "c"),
            container.table_name(),
            child.table_name(),
            container.primary_key(),
            child.primary_key()
        ),
        vec![child_key.clone().into_storage()],
    )
}

/// Peers linked to the row with key `key` through `join`, in link order.
pub fn select_peers(peer: &EntityMetadata, join: &JoinTable, own_column: &str, peer_column: &str, key: &Value) -> Statement {
    Statement::with_params(
        format!(
            "SELECT {} FROM {} p JOIN {} j ON j.{peer_column} = p.{} WHERE j.{own_column} = ? ORDER BY j.id",
            qualified_columns(peer, "p"),
            peer.table_name(),
            join.table,
            peer.primary_key()
        ),
        vec![key.clone().into_storage()],
    )
}

/// Links two rows in a join table unless they are linked already.
///
/// The first value is `NULL` when the pair exists, which the `NOT NULL`
/// constraint plus `OR IGNORE` turns into a no-op.
pub fn join_insert(join_table: &str, own_column: &str, own_key: &KeyRef, peer_column: &str, peer_key: &KeyRef) -> Statement {
    let mut params = Vec::new();
    let own_probe = own_key.expr(&mut params);
    let peer_probe = peer_key.expr(&mut params);
    let own = own_key.expr(&mut params);
    let peer = peer_key.expr(&mut params);
    Statement::with_params(
        format!(
            "INSERT OR IGNORE INTO {join_table} ({own_column}, {peer_column}) VALUES (\
             CASE WHEN (SELECT COUNT(*) FROM {join_table} WHERE {own_column} = {own_probe} AND {peer_column} = {peer_probe}) = 0 \
             THEN {own} ELSE NULL END, {peer})"
        ),
        params,
    )
}

/// Deletes the row with primary key `key`.
pub fn delete_by_key(meta: &EntityMetadata, key: &Value) -> Statement {
    Statement::with_params(
        format!("DELETE FROM {} WHERE {} = ?", meta.table_name(), meta.primary_key()),
        vec![key.clone().into_storage()],
    )
}

/// Deletes every join row referencing `key` in `column`.
pub fn delete_join_rows(join_table: &str, column: &str, key: &Value) -> Statement {
    Statement::with_params(
        format!("DELETE FROM {join_table} WHERE {column} = ?"),
        vec![key.clone().into_storage()],
    )
}

/// `SELECT COUNT(*)` over the rows matching `filter`.
pub fn count(meta: &EntityMetadata, filter: &WhereClause) -> Statement {
    Statement::with_params(
        format!("SELECT COUNT(*) FROM {}{}", meta.table_name(), filter.to_sql()),
        filter.params.clone(),
    )
}
