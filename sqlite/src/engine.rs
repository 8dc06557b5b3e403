//! SQL execution engine seam.
//!
//! [`SqlEngine`] is the narrow interface the orchestrator and hydrator
//! execute through; [`SqliteEngine`] implements it over a
//! [`rusqlite::Connection`]. Rows come back as [`Row`]s of core
//! [`Value`]s so nothing above this module sees rusqlite types.

use std::path::Path;

use relmap_core::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use crate::error::Result;
use crate::statement::{Query, Statement};

/// One result row, addressable by column name or position.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Builds a row from parallel column and value lists.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Cell of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Cell at `index`.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cells in result order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Executes statements and queries against a relational store.
pub trait SqlEngine {
    /// Runs a statement, returning the number of affected rows.
    fn execute(&self, statement: &Statement) -> Result<usize>;

    /// Runs a statement that yields rows.
    fn raw_query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Runs a single-table query.
    fn query(&self, query: &Query) -> Result<Vec<Row>> {
        self.raw_query(&query.to_statement())
    }

    /// Runs parameterless SQL, possibly several statements.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Opens a transaction.
    fn begin_transaction(&self) -> Result<()>;

    /// Commits the open transaction.
    fn commit(&self) -> Result<()>;

    /// Rolls back the open transaction.
    fn rollback(&self) -> Result<()>;
}

/// [`SqlEngine`] over a rusqlite connection.
///
/// # Examples
///
/// ```
/// use relmap_sqlite::{SqlEngine, SqliteEngine, Statement};
///
/// let engine = SqliteEngine::open_in_memory().unwrap();
/// engine.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
/// engine
///     .execute(&Statement::with_params("INSERT INTO t (name) VALUES (?)", vec!["a".into()]))
///     .unwrap();
///
/// let rows = engine.raw_query(&Statement::new("SELECT name FROM t")).unwrap();
/// assert_eq!(rows[0].get("name").and_then(|v| v.as_str()), Some("a"));
/// ```
#[derive(Debug)]
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    /// Wraps an open connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Connection::open(path)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl SqlEngine for SqliteEngine {
    fn execute(&self, statement: &Statement) -> Result<usize> {
        debug!(sql = %statement.render(), "execute");
        let params = statement.params().iter().map(to_sql_value);
        Ok(self.conn.execute(statement.sql(), params_from_iter(params))?)
    }

    fn raw_query(&self, statement: &Statement) -> Result<Vec<Row>> {
        debug!(sql = %statement.render(), "query");
        let mut stmt = self.conn.prepare(statement.sql())?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let params = statement.params().iter().map(to_sql_value);
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_value_ref(row.get_ref(i)?));
            }
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(sql, "execute batch");
        Ok(self.conn.execute_batch(sql)?)
    }

    fn begin_transaction(&self) -> Result<()> {
        Ok(self.conn.execute_batch("BEGIN")?)
    }

    fn commit(&self) -> Result<()> {
        Ok(self.conn.execute_batch("COMMIT")?)
    }

    fn rollback(&self) -> Result<()> {
        Ok(self.conn.execute_batch("ROLLBACK")?)
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_value_ref(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_round_trip_through_sqlite() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch("CREATE TABLE cells (i INTEGER, r REAL, t TEXT, b BLOB, n TEXT)")
            .unwrap();
        let inserted = engine
            .execute(&Statement::with_params(
                "INSERT INTO cells VALUES (?, ?, ?, ?, ?)",
                vec![
                    Value::Boolean(true),
                    Value::Real(1.25),
                    Value::from("ñandú"),
                    Value::Blob(vec![1, 2, 3]),
                    Value::Null,
                ],
            ))
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = engine.raw_query(&Statement::new("SELECT * FROM cells")).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("i"), Some(&Value::Integer(1)));
        assert_eq!(row.get("r"), Some(&Value::Real(1.25)));
        assert_eq!(row.get("t"), Some(&Value::from("ñandú")));
        assert_eq!(row.get("b"), Some(&Value::Blob(vec![1, 2, 3])));
        assert_eq!(row.get("n"), Some(&Value::Null));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.columns().len(), 5);
    }

    #[test]
    fn test_rollback_discards_changes() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        engine.begin_transaction().unwrap();
        engine.execute(&Statement::new("INSERT INTO t VALUES (1)")).unwrap();
        engine.rollback().unwrap();

        let rows = engine
            .query(&Query::new("t").columns(["COUNT(*)"]))
            .unwrap();
        assert_eq!(rows[0].get_index(0), Some(&Value::Integer(0)));
    }
}
