//! Model trait for ORM-style struct mapping.
//!
//! The `Model` trait binds a plain struct to a table and primary key. It is
//! typically derived with `#[derive(Model)]` from `unisql-macros`; CRUD
//! operations built on top of it live in the `unisql` crate.

use crate::Result;
use crate::field::FieldInfo;
use crate::row::Row;
use crate::value::Value;

/// Trait for types that map to a database table.
///
/// # Example
///
/// ```ignore
/// use unisql::prelude::*;
///
/// #[derive(Model, Debug)]
/// #[unisql(table = "users")]
/// struct User {
///     #[unisql(primary_key)]
///     id: Option<i64>,
///     name: String,
///     email: Option<String>,
/// }
/// ```
pub trait Model: Sized + Send + Sync {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name.
    const PRIMARY_KEY: &'static str;

    /// Field metadata for all mapped columns, in declaration order.
    fn fields() -> &'static [FieldInfo];

    /// Column/value pairs for every mapped field.
    fn to_values(&self) -> Vec<(&'static str, Value)>;

    /// Construct an instance from a materialized row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Current value of the primary key (`Value::Null` when unsaved).
    fn primary_key_value(&self) -> Value;

    /// Whether this instance has not been persisted yet.
    fn is_new(&self) -> bool {
        self.primary_key_value().is_null()
    }

    /// Column names in declaration order.
    fn column_names() -> Vec<&'static str> {
        Self::fields().iter().map(|f| f.column_name).collect()
    }

    /// Metadata for the primary key field.
    fn primary_key_field() -> Option<&'static FieldInfo> {
        Self::fields().iter().find(|f| f.column_name == Self::PRIMARY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag {
        id: Option<i64>,
        label: String,
    }

    static TAG_FIELDS: [FieldInfo; 2] = [
        FieldInfo::new("id", "Option<i64>")
            .nullable(true)
            .primary_key(true)
            .auto_increment(true),
        FieldInfo::new("label", "String"),
    ];

    impl Model for Tag {
        const TABLE_NAME: &'static str = "tags";
        const PRIMARY_KEY: &'static str = "id";

        fn fields() -> &'static [FieldInfo] {
            &TAG_FIELDS
        }

        fn to_values(&self) -> Vec<(&'static str, Value)> {
            vec![("id", self.id.into()), ("label", self.label.clone().into())]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_parsed("id")?,
                label: row.get_parsed("label")?.unwrap_or_default(),
            })
        }

        fn primary_key_value(&self) -> Value {
            self.id.into()
        }
    }

    #[test]
    fn test_default_methods() {
        let tag = Tag {
            id: None,
            label: "rust".into(),
        };
        assert!(tag.is_new());
        assert_eq!(Tag::column_names(), vec!["id", "label"]);
        assert!(Tag::primary_key_field().is_some_and(|f| f.auto_increment));
    }

    #[test]
    fn test_from_row() {
        let row = Row::new(
            vec!["id".into(), "label".into()],
            vec![Some("3".into()), Some("db".into())],
        );
        let tag = Tag::from_row(&row).unwrap();
        assert_eq!(tag.id, Some(3));
        assert_eq!(tag.label, "db");
        assert!(!tag.is_new());
    }
}
