//! Type-erased entity instances.
//!
//! A [`Record`] carries one entity's scalar values by field name plus its
//! nested collections. Statement synthesis reads records; hydration produces
//! them. The typed getters are what [`Entity::from_record`](crate::Entity)
//! implementations use to rebuild their structs.

use std::collections::HashMap;

use crate::error::HydrationError;
use crate::schema::Entity;
use crate::value::Value;

static NULL: Value = Value::Null;

/// A type-erased entity instance.
///
/// # Examples
///
/// ```
/// use relmap_core::{Record, Value};
///
/// let book = Record::new("Book").with("id", 7i64).with("name", "Bar");
/// let author = Record::new("Author")
///     .with("name", "Ospina")
///     .with_collection("books", vec![book]);
///
/// assert_eq!(author.value("name"), &Value::from("Ospina"));
/// assert_eq!(author.value("missing"), &Value::Null);
/// assert_eq!(author.collection("books").len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entity: String,
    values: HashMap<String, Value>,
    collections: HashMap<String, Vec<Record>>,
}

impl Record {
    /// Creates an empty record for the named entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            values: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    /// Name of the entity this record belongs to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Sets a scalar value, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a nested collection, builder style.
    pub fn with_collection(mut self, field: impl Into<String>, records: Vec<Record>) -> Self {
        self.set_collection(field, records);
        self
    }

    /// Sets a scalar value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Sets a nested collection.
    pub fn set_collection(&mut self, field: impl Into<String>, records: Vec<Record>) {
        self.collections.insert(field.into(), records);
    }

    /// Returns a scalar value, or [`Value::Null`] when the field is absent.
    pub fn value(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }

    /// Returns a nested collection, empty when absent.
    pub fn collection(&self, field: &str) -> &[Record] {
        self.collections.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns an `i64` field.
    ///
    /// # Errors
    ///
    /// [`HydrationError::MissingValue`] for `NULL`, or
    /// [`HydrationError::TypeMismatch`] for non-integer values.
    pub fn get_i64(&self, field: &str) -> Result<i64, HydrationError> {
        self.get_opt_i64(field)?
            .ok_or_else(|| self.missing(field))
    }

    /// Returns an optional `i64` field.
    pub fn get_opt_i64(&self, field: &str) -> Result<Option<i64>, HydrationError> {
        match self.value(field) {
            Value::Null => Ok(None),
            other => other
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.mismatch(field, "integer", other)),
        }
    }

    /// Returns an `i32` field, checking the range.
    pub fn get_i32(&self, field: &str) -> Result<i32, HydrationError> {
        let wide = self.get_i64(field)?;
        i32::try_from(wide).map_err(|_| HydrationError::OutOfRange {
            entity: self.entity.clone(),
            field: field.to_string(),
        })
    }

    /// Returns a boolean field.
    pub fn get_bool(&self, field: &str) -> Result<bool, HydrationError> {
        self.get_opt_bool(field)?
            .ok_or_else(|| self.missing(field))
    }

    /// Returns an optional boolean field.
    pub fn get_opt_bool(&self, field: &str) -> Result<Option<bool>, HydrationError> {
        match self.value(field) {
            Value::Null => Ok(None),
            other => other
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.mismatch(field, "boolean", other)),
        }
    }

    /// Returns an `f64` field.
    pub fn get_f64(&self, field: &str) -> Result<f64, HydrationError> {
        self.get_opt_f64(field)?
            .ok_or_else(|| self.missing(field))
    }

    /// Returns an optional `f64` field.
    pub fn get_opt_f64(&self, field: &str) -> Result<Option<f64>, HydrationError> {
        match self.value(field) {
            Value::Null => Ok(None),
            other => other
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.mismatch(field, "real", other)),
        }
    }

    /// Returns a text field.
    pub fn get_string(&self, field: &str) -> Result<String, HydrationError> {
        self.get_opt_string(field)?
            .ok_or_else(|| self.missing(field))
    }

    /// Returns an optional text field.
    pub fn get_opt_string(&self, field: &str) -> Result<Option<String>, HydrationError> {
        match self.value(field) {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            other => Err(self.mismatch(field, "text", other)),
        }
    }

    /// Returns a binary field; `NULL` reads as empty.
    pub fn get_bytes(&self, field: &str) -> Result<Vec<u8>, HydrationError> {
        match self.value(field) {
            Value::Null => Ok(Vec::new()),
            Value::Blob(bytes) => Ok(bytes.clone()),
            other => Err(self.mismatch(field, "blob", other)),
        }
    }

    /// Rebuilds a nested collection as typed entities.
    pub fn get_collection<T: Entity>(&self, field: &str) -> Result<Vec<T>, HydrationError> {
        self.collection(field).iter().map(T::from_record).collect()
    }

    /// Checks that this record belongs to `expected`.
    pub fn expect_entity(&self, expected: &str) -> Result<(), HydrationError> {
        if self.entity != expected {
            return Err(HydrationError::EntityMismatch {
                expected: expected.to_string(),
                found: self.entity.clone(),
            });
        }
        Ok(())
    }

    fn missing(&self, field: &str) -> HydrationError {
        HydrationError::MissingValue {
            entity: self.entity.clone(),
            field: field.to_string(),
        }
    }

    fn mismatch(&self, field: &str, expected: &str, found: &Value) -> HydrationError {
        HydrationError::TypeMismatch {
            entity: self.entity.clone(),
            field: field.to_string(),
            expected: expected.to_string(),
            found: found.kind().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let record = Record::new("Person")
            .with("id", 3i64)
            .with("name", "Ana")
            .with("active", true)
            .with("score", 2.5)
            .with("nickname", None::<String>);

        assert_eq!(record.get_i64("id").unwrap(), 3);
        assert_eq!(record.get_i32("id").unwrap(), 3);
        assert_eq!(record.get_string("name").unwrap(), "Ana");
        assert!(record.get_bool("active").unwrap());
        assert_eq!(record.get_f64("score").unwrap(), 2.5);
        assert_eq!(record.get_opt_string("nickname").unwrap(), None);
    }

    #[test]
    fn test_getter_errors_name_the_field() {
        let record = Record::new("Person")
            .with("name", "Ana")
            .with("big", i64::MAX);

        let err = record.get_i64("name").unwrap_err();
        assert!(matches!(err, HydrationError::TypeMismatch { ref field, .. } if field == "name"));

        let err = record.get_string("missing").unwrap_err();
        assert_eq!(err.to_string(), "missing value for Person.missing");

        assert!(matches!(
            record.get_i32("big"),
            Err(HydrationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_expect_entity() {
        let record = Record::new("Book");
        assert!(record.expect_entity("Book").is_ok());
        assert!(record.expect_entity("Author").is_err());
    }
}
