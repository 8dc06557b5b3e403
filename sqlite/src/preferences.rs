//! Key-value preference storage for singleton settings objects.
//!
//! [`Preferences`] saves the scalar fields of one entity under
//! `<Entity>.<field>` keys, each value JSON-encoded, in any
//! [`KeyValueStore`]. [`SqliteKeyValueStore`] keeps them in a
//! `preferences` table. Relationships are not supported here; collection
//! fields are skipped.
//!
//! # Example
//!
//! ```
//! use relmap_core::{Entity, EntitySchema, FieldType, HydrationError, Record};
//! use relmap_sqlite::{Preferences, SqliteKeyValueStore};
//! use rusqlite::Connection;
//!
//! #[derive(Debug, PartialEq)]
//! struct Settings {
//!     theme: String,
//!     volume: i64,
//! }
//!
//! impl Entity for Settings {
//!     fn schema() -> EntitySchema {
//!         EntitySchema::new("Settings")
//!             .field("theme", FieldType::Text)
//!             .field("volume", FieldType::Integer)
//!     }
//!     fn to_record(&self) -> Record {
//!         Record::new("Settings").with("theme", self.theme.as_str()).with("volume", self.volume)
//!     }
//!     fn from_record(r: &Record) -> Result<Self, HydrationError> {
//!         Ok(Settings { theme: r.get_string("theme")?, volume: r.get_i64("volume")? })
//!     }
//! }
//!
//! let store = SqliteKeyValueStore::new(Connection::open_in_memory().unwrap()).unwrap();
//! let prefs = Preferences::new(store);
//! prefs.save(&Settings { theme: "dark".into(), volume: 7 }).unwrap();
//! assert_eq!(
//!     prefs.load::<Settings>().unwrap(),
//!     Some(Settings { theme: "dark".into(), volume: 7 })
//! );
//! ```

use relmap_core::{Entity, HydrationError, Record, Value};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

/// String key-value storage.
pub trait KeyValueStore {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`, returning whether it existed.
    fn remove(&self, key: &str) -> Result<bool>;
}

/// [`KeyValueStore`] backed by a SQLite `preferences` table.
#[derive(Debug)]
pub struct SqliteKeyValueStore {
    conn: Connection,
}

impl SqliteKeyValueStore {
    /// Wraps `conn`, creating the `preferences` table if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS preferences (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);",
        )?;
        Ok(Self { conn })
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}

/// Saves and loads one settings entity field by field.
#[derive(Debug)]
pub struct Preferences<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> Preferences<S> {
    /// Wraps a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Saves every scalar field of `value`; `NULL` fields are removed.
    ///
    /// Returns the number of keys written.
    pub fn save<T: Entity>(&self, value: &T) -> Result<usize> {
        let schema = T::schema();
        let record = value.to_record();
        let mut written = 0;
        for field in schema.fields.iter().filter(|f| f.is_persisted() && !f.is_collection()) {
            let key = preference_key(&schema.name, &field.name);
            match record.value(&field.name) {
                Value::Null => {
                    self.store.remove(&key)?;
                }
                other => {
                    self.store.put(&key, &serde_json::to_string(other)?)?;
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Loads the entity, or `None` when nothing was ever saved for it.
    ///
    /// # Errors
    ///
    /// [`HydrationError::TypeMismatch`] when a stored value no longer fits
    /// its field.
    pub fn load<T: Entity>(&self) -> Result<Option<T>> {
        let schema = T::schema();
        let mut record = Record::new(schema.name.clone());
        let mut found = false;
        for field in schema.fields.iter().filter(|f| f.is_persisted() && !f.is_collection()) {
            let Some(raw) = self.store.get(&preference_key(&schema.name, &field.name))? else {
                continue;
            };
            let stored: Value = serde_json::from_str(&raw)?;
            let kind = stored.kind();
            let value = field
                .field_type
                .from_cell(stored)
                .ok_or_else(|| HydrationError::TypeMismatch {
                    entity: schema.name.clone(),
                    field: field.name.clone(),
                    expected: field.field_type.name().to_string(),
                    found: kind.to_string(),
                })?;
            record.set(field.name.clone(), value);
            found = true;
        }
        if !found {
            return Ok(None);
        }
        Ok(Some(T::from_record(&record)?))
    }

    /// Removes every saved field of `T`.
    pub fn clear<T: Entity>(&self) -> Result<usize> {
        let schema = T::schema();
        let mut removed = 0;
        for field in &schema.fields {
            if self.store.remove(&preference_key(&schema.name, &field.name))? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn preference_key(entity: &str, field: &str) -> String {
    format!("{entity}.{field}")
}

#[cfg(test)]
mod tests {
    use relmap_core::{EntitySchema, FieldSchema, FieldType};

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Screen {
        brightness: f64,
        night_mode: bool,
        profile: Option<String>,
    }

    impl Entity for Screen {
        fn schema() -> EntitySchema {
            EntitySchema::new("Screen")
                .field("brightness", FieldType::Double)
                .field("night_mode", FieldType::Boolean)
                .field("profile", FieldType::Text)
                .with_field(FieldSchema::new("cached", FieldType::Text).ignored())
        }
        fn to_record(&self) -> Record {
            Record::new("Screen")
                .with("brightness", self.brightness)
                .with("night_mode", self.night_mode)
                .with("profile", self.profile.clone())
                .with("cached", "never stored")
        }
        fn from_record(r: &Record) -> std::result::Result<Self, HydrationError> {
            Ok(Screen {
                brightness: r.get_f64("brightness")?,
                night_mode: r.get_bool("night_mode")?,
                profile: r.get_opt_string("profile")?,
            })
        }
    }

    fn prefs() -> Preferences<SqliteKeyValueStore> {
        Preferences::new(SqliteKeyValueStore::new(Connection::open_in_memory().unwrap()).unwrap())
    }

    #[test]
    fn test_round_trip_and_null_removal() {
        let prefs = prefs();
        assert_eq!(prefs.load::<Screen>().unwrap(), None);

        let first = Screen {
            brightness: 0.8,
            night_mode: true,
            profile: Some("office".into()),
        };
        assert_eq!(prefs.save(&first).unwrap(), 3);
        assert_eq!(prefs.load::<Screen>().unwrap(), Some(first));
        assert!(prefs.store().get("Screen.cached").unwrap().is_none());

        let second = Screen {
            brightness: 0.5,
            night_mode: false,
            profile: None,
        };
        assert_eq!(prefs.save(&second).unwrap(), 2);
        assert!(prefs.store().get("Screen.profile").unwrap().is_none());
        assert_eq!(prefs.load::<Screen>().unwrap(), Some(second));
    }

    #[test]
    fn test_mismatched_stored_value_is_reported() {
        let prefs = prefs();
        prefs
            .store()
            .put("Screen.night_mode", &serde_json::to_string(&Value::from("yes")).unwrap())
            .unwrap();
        assert!(prefs.load::<Screen>().is_err());
    }

    #[test]
    fn test_clear() {
        let prefs = prefs();
        prefs
            .save(&Screen {
                brightness: 1.0,
                night_mode: false,
                profile: None,
            })
            .unwrap();
        assert_eq!(prefs.clear::<Screen>().unwrap(), 2);
        assert_eq!(prefs.load::<Screen>().unwrap(), None);
    }
}
