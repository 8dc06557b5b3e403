//! Table and column naming rules.
//!
//! Table names are derived from the entity's simple name: CamelCase becomes
//! snake_case and the last word is pluralized (`BookReview` ->
//! `book_reviews`). Synthetic columns and join tables are built from table
//! and key names so that both sides of a relationship agree on them.

use crate::error::{ConfigError, Result};

/// Validates that a name is a plain SQL identifier.
///
/// Names must start with an ASCII letter or underscore and contain only
/// ASCII alphanumerics and underscores.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Derives the table name for an entity.
///
/// # Examples
///
/// ```
/// use relmap_core::naming::table_name_for;
///
/// assert_eq!(table_name_for("Author"), "authors");
/// assert_eq!(table_name_for("BookReview"), "book_reviews");
/// assert_eq!(table_name_for("Category"), "categories");
/// assert_eq!(table_name_for("Box"), "boxes");
/// ```
pub fn table_name_for(entity: &str) -> String {
    pluralize(&to_snake_case(entity))
}

/// Converts CamelCase to snake_case, keeping acronyms together.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Pluralizes an English noun with the regular rules.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return word.to_string();
    }
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// Name of a foreign-key column referencing `table`'s `key` column.
pub fn foreign_key_column(table: &str, key: &str) -> String {
    format!("{table}_{key}")
}

/// Name of the join table between two entity tables.
///
/// The names are ordered lexicographically so both declaration orders
/// produce the same table.
///
/// # Examples
///
/// ```
/// use relmap_core::naming::join_table_name;
///
/// assert_eq!(join_table_name("books", "authors"), "authors_books");
/// assert_eq!(join_table_name("authors", "books"), "authors_books");
/// ```
pub fn join_table_name(first: &str, second: &str) -> String {
    if first <= second {
        format!("{first}_{second}")
    } else {
        format!("{second}_{first}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("Author"), "author");
        assert_eq!(to_snake_case("BookReview"), "book_review");
        assert_eq!(to_snake_case("HTTPRequest"), "http_request");
        assert_eq!(to_snake_case("Item2Go"), "item2_go");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("book"), "books");
        assert_eq!(pluralize("key"), "keys");
        assert_eq!(pluralize("city"), "cities");
        assert_eq!(pluralize("match"), "matches");
        assert_eq!(pluralize("wish"), "wishes");
        assert_eq!(pluralize("bus"), "buses");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("authors").is_ok());
        assert!(validate_identifier("_hidden1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("drop;--").is_err());
        assert!(validate_identifier("with space").is_err());
    }

    #[test]
    fn test_join_table_symmetry() {
        assert_eq!(
            join_table_name("people", "groups"),
            join_table_name("groups", "people")
        );
        assert_eq!(foreign_key_column("authors", "id"), "authors_id");
    }
}
