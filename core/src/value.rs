//! Dynamically typed values and field type descriptors.
//!
//! A [`Value`] is what a single entity field holds once it leaves its Rust
//! struct: the scalar columns of a [`Record`](crate::Record) and the cells of
//! a query row are both expressed with it. [`FieldType`] describes the
//! native type a field was declared with, and [`SqlType`] the storage class
//! it maps to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single scalar value as stored in, or read from, a table cell.
///
/// # Examples
///
/// ```
/// use relmap_core::Value;
///
/// assert!(Value::from(42i64).is_populated());
/// assert!(!Value::from(0i64).is_populated());
/// assert!(Value::from(false).is_populated());
/// assert!(!Value::Null.is_populated());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// SQL `NULL` (or an unset optional field).
    #[default]
    Null,
    /// Integer-family value (`INTEGER` storage).
    Integer(i64),
    /// Boolean value, stored as `0`/`1`.
    Boolean(bool),
    /// Floating point value (`REAL` storage).
    Real(f64),
    /// Text value.
    Text(String),
    /// Binary value.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value counts as "set" when a record is used as a sample.
    ///
    /// Numbers are populated when non-zero, blobs when non-empty, text when
    /// non-null. Booleans are always populated: an unset `bool` cannot be
    /// told apart from `false`, so callers wanting to omit a boolean must
    /// pass [`Value::Null`].
    pub fn is_populated(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Integer(v) => *v != 0,
            Value::Real(v) => *v != 0.0,
            Value::Blob(bytes) => !bytes.is_empty(),
            Value::Boolean(_) | Value::Text(_) => true,
        }
    }

    /// Returns the value as an `i64` for integer and boolean values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the value as an `f64` for real and integer values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the value as a boolean for boolean and integer values.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Returns the text content for text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes for blob values.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Converts the value to the form it takes in storage.
    ///
    /// Booleans become `0`/`1` integers; everything else is unchanged.
    pub fn into_storage(self) -> Value {
        match self {
            Value::Boolean(b) => Value::Integer(i64::from(b)),
            other => other,
        }
    }

    /// Renders the value as an inline SQL literal.
    ///
    /// Text is single-quoted with embedded quotes doubled; blobs use the
    /// `X'..'` hex form. Non-finite reals render as `NULL`.
    ///
    /// # Examples
    ///
    /// ```
    /// use relmap_core::Value;
    ///
    /// assert_eq!(Value::from("O'Brien").sql_literal(), "'O''Brien'");
    /// assert_eq!(Value::from(true).sql_literal(), "1");
    /// assert_eq!(Value::Blob(vec![0xde, 0xad]).sql_literal(), "X'DEAD'");
    /// ```
    pub fn sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Boolean(b) => i64::from(*b).to_string(),
            Value::Real(v) if v.is_finite() => format!("{v:?}"),
            Value::Real(_) => "NULL".to_string(),
            Value::Text(s) => quote_literal(s),
            Value::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

/// Quotes a string as an SQL text literal, doubling embedded single quotes.
///
/// # Examples
///
/// ```
/// use relmap_core::quote_literal;
///
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// ```
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// SQLite storage class a column is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// `INTEGER`
    Integer,
    /// `REAL`
    Real,
    /// `TEXT`
    Text,
    /// `BLOB`
    Blob,
}

impl SqlType {
    /// The SQL keyword for this type.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Native type of an entity field.
///
/// # Examples
///
/// ```
/// use relmap_core::{FieldType, SqlType};
///
/// assert_eq!(FieldType::Boolean.sql_type(), Some(SqlType::Integer));
/// assert_eq!(FieldType::Double.sql_type(), Some(SqlType::Real));
/// assert_eq!(FieldType::Collection("Book".into()).sql_type(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// Boolean, stored as `0`/`1`.
    Boolean,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Text.
    Text,
    /// Binary data.
    Blob,
    /// Ordered collection of one related entity type, named here.
    ///
    /// Collections never become columns; they are resolved through the
    /// relationship registry.
    Collection(String),
}

impl FieldType {
    /// Storage class for scalar fields, `None` for collections.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            FieldType::Integer | FieldType::Long | FieldType::Boolean => Some(SqlType::Integer),
            FieldType::Float | FieldType::Double => Some(SqlType::Real),
            FieldType::Blob => Some(SqlType::Blob),
            FieldType::Text => Some(SqlType::Text),
            FieldType::Collection(_) => None,
        }
    }

    /// Integer and long fields; the only types eligible for autoincrement.
    pub fn is_integer_family(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Long)
    }

    /// Whether text sample values compare with `LIKE` instead of `=`.
    pub fn is_text(&self) -> bool {
        matches!(self, FieldType::Text)
    }

    /// Name of the related entity for collection fields.
    pub fn related_entity(&self) -> Option<&str> {
        match self {
            FieldType::Collection(entity) => Some(entity),
            _ => None,
        }
    }

    /// Converts a raw cell into this field's native representation.
    ///
    /// Returns `None` when the cell cannot be represented (e.g. text in an
    /// integer field). `NULL` converts to [`Value::Null`] for every type.
    pub fn from_cell(&self, cell: Value) -> Option<Value> {
        match (self, cell) {
            (_, Value::Null) => Some(Value::Null),
            (FieldType::Integer | FieldType::Long, Value::Integer(v)) => Some(Value::Integer(v)),
            (FieldType::Integer | FieldType::Long, Value::Boolean(b)) => {
                Some(Value::Integer(i64::from(b)))
            }
            (FieldType::Boolean, Value::Integer(v)) => Some(Value::Boolean(v != 0)),
            (FieldType::Boolean, Value::Boolean(b)) => Some(Value::Boolean(b)),
            (FieldType::Float | FieldType::Double, Value::Real(v)) => Some(Value::Real(v)),
            (FieldType::Float | FieldType::Double, Value::Integer(v)) => {
                Some(Value::Real(v as f64))
            }
            (FieldType::Text, Value::Text(s)) => Some(Value::Text(s)),
            (FieldType::Text, Value::Integer(v)) => Some(Value::Text(v.to_string())),
            (FieldType::Text, Value::Real(v)) => Some(Value::Text(v.to_string())),
            (FieldType::Blob, Value::Blob(b)) => Some(Value::Blob(b)),
            (FieldType::Blob, Value::Text(s)) => Some(Value::Blob(s.into_bytes())),
            _ => None,
        }
    }

    /// Short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::Boolean => "boolean",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Text => "text",
            FieldType::Blob => "blob",
            FieldType::Collection(_) => "collection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populated_rules() {
        assert!(!Value::Integer(0).is_populated());
        assert!(!Value::Real(0.0).is_populated());
        assert!(!Value::Blob(Vec::new()).is_populated());
        assert!(Value::Text(String::new()).is_populated());
        assert!(Value::Boolean(false).is_populated());
        assert!(Value::Boolean(true).is_populated());
        assert!(!Value::from(None::<bool>).is_populated());
    }

    #[test]
    fn test_storage_form_of_booleans() {
        assert_eq!(Value::Boolean(true).into_storage(), Value::Integer(1));
        assert_eq!(Value::Boolean(false).into_storage(), Value::Integer(0));
        assert_eq!(Value::from("x").into_storage(), Value::from("x"));
    }

    #[test]
    fn test_sql_literal_escaping() {
        assert_eq!(Value::from("a'b''c").sql_literal(), "'a''b''''c'");
        assert_eq!(Value::Null.sql_literal(), "NULL");
        assert_eq!(Value::Real(1.5).sql_literal(), "1.5");
        assert_eq!(Value::Real(f64::NAN).sql_literal(), "NULL");
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(FieldType::Integer.sql_type(), Some(SqlType::Integer));
        assert_eq!(FieldType::Long.sql_type(), Some(SqlType::Integer));
        assert_eq!(FieldType::Boolean.sql_type(), Some(SqlType::Integer));
        assert_eq!(FieldType::Float.sql_type(), Some(SqlType::Real));
        assert_eq!(FieldType::Blob.sql_type(), Some(SqlType::Blob));
        assert_eq!(FieldType::Text.sql_type(), Some(SqlType::Text));
    }

    #[test]
    fn test_collections_have_no_column_type() {
        let books = FieldType::Collection("Book".into());
        assert_eq!(books.sql_type(), None);
        assert_eq!(books.related_entity(), Some("Book"));
        assert_eq!(FieldType::Text.related_entity(), None);
    }

    #[test]
    fn test_from_cell_conversions() {
        assert_eq!(
            FieldType::Boolean.from_cell(Value::Integer(1)),
            Some(Value::Boolean(true))
        );
        assert_eq!(
            FieldType::Double.from_cell(Value::Integer(3)),
            Some(Value::Real(3.0))
        );
        assert_eq!(FieldType::Long.from_cell(Value::from("x")), None);
        assert_eq!(FieldType::Text.from_cell(Value::Null), Some(Value::Null));
    }

    #[test]
    fn test_value_serde_round_trip() {
        let value = Value::Text("Castiblanco".into());
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
