//! CRUD operations and relation helpers for [`Model`] types.
//!
//! Every operation takes the [`Connection`] explicitly; inside a
//! [`with_connection`](crate::with_connection) scope pass
//! `&current_connection()?`. SQL is assembled with [`QueryBuilder`] or from
//! the model's static field table, and values are always bound.

use std::marker::PhantomData;

use unisql_core::{Dialect, Error, Model, Result, ResultSet, Value};
use unisql_query::{Direction, Op, QueryBuilder};

use crate::connection::Connection;

/// CRUD helpers, implemented for every [`Model`].
pub trait Crud: Model {
    /// Insert `record` and load it back, generated key included.
    fn create(conn: &Connection, record: &Self) -> Result<Self> {
        let id = record.insert(conn)?;
        Self::find(conn, id)?.ok_or_else(|| {
            Error::query(format!(
                "inserted row not found in {} after insert",
                Self::TABLE_NAME
            ))
        })
    }

    /// Insert this record and return its primary key.
    ///
    /// A NULL auto-increment key is left to the database and the generated
    /// value is returned.
    #[tracing::instrument(level = "debug", skip_all, fields(table = Self::TABLE_NAME))]
    fn insert(&self, conn: &Connection) -> Result<Value> {
        let pk_value = self.primary_key_value();
        let generated = pk_value.is_null()
            && Self::primary_key_field().is_some_and(|f| f.auto_increment);

        let (columns, params): (Vec<&str>, Vec<Value>) = self
            .to_values()
            .into_iter()
            .filter(|(column, _)| !(generated && *column == Self::PRIMARY_KEY))
            .unzip();

        let dialect = conn.dialect();
        let mut sql = if columns.is_empty() {
            match dialect {
                Dialect::MySql => format!("INSERT INTO {} () VALUES ()", Self::TABLE_NAME),
                Dialect::Sqlite | Dialect::Postgres => {
                    format!("INSERT INTO {} DEFAULT VALUES", Self::TABLE_NAME)
                }
            }
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                Self::TABLE_NAME,
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        if generated && dialect.needs_returning() {
            sql.push_str(" RETURNING ");
            sql.push_str(Self::PRIMARY_KEY);
        }

        let result = conn.query_with_params(&sql, &params)?;
        if !generated {
            return Ok(pk_value);
        }
        generated_key(&result)
            .map(Value::Int)
            .ok_or_else(|| Error::query(format!("{} insert returned no generated key", Self::TABLE_NAME)))
    }

    /// Load the record with primary key `id`, or `None`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = Self::TABLE_NAME))]
    fn find(conn: &Connection, id: impl Into<Value>) -> Result<Option<Self>> {
        Self::query(conn)
            .filter(Self::PRIMARY_KEY, Op::Eq, id)
            .limit(1)
            .first()
    }

    /// Every row of the table, in primary key order.
    fn all(conn: &Connection) -> Result<Vec<Self>> {
        Self::query(conn).order_by(Self::PRIMARY_KEY, Direction::Asc).all()
    }

    /// Set `fields` on the record with primary key `id`.
    ///
    /// Column names are checked against the model, so only mapped columns
    /// can be written. Returns the affected row count.
    #[tracing::instrument(level = "debug", skip_all, fields(table = Self::TABLE_NAME))]
    fn update(conn: &Connection, id: impl Into<Value>, fields: &[(&str, Value)]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut assignments = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len() + 1);
        for (column, value) in fields {
            let known = Self::fields().iter().any(|f| f.column_name == *column);
            if !known || *column == Self::PRIMARY_KEY {
                return Err(Error::config(format!(
                    "cannot update column '{column}' of {}",
                    Self::TABLE_NAME
                )));
            }
            assignments.push(format!("{column} = ?"));
            params.push(value.clone());
        }
        params.push(id.into());

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            Self::TABLE_NAME,
            assignments.join(", "),
            Self::PRIMARY_KEY
        );
        conn.exec_with_params(&sql, &params)
    }

    /// Write every non-key field of this record back to its row.
    fn save(&self, conn: &Connection) -> Result<u64> {
        let fields: Vec<(&str, Value)> = self
            .to_values()
            .into_iter()
            .filter(|(column, _)| *column != Self::PRIMARY_KEY)
            .collect();
        Self::update(conn, self.primary_key_value(), &fields)
    }

    /// Delete the record with primary key `id`. Returns the affected row count.
    #[tracing::instrument(level = "debug", skip_all, fields(table = Self::TABLE_NAME))]
    fn destroy(conn: &Connection, id: impl Into<Value>) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            Self::TABLE_NAME,
            Self::PRIMARY_KEY
        );
        conn.exec_with_params(&sql, &[id.into()])
    }

    fn count(conn: &Connection) -> Result<u64> {
        Self::query(conn).count()
    }

    /// Whether a record with primary key `id` exists.
    fn exists(conn: &Connection, id: impl Into<Value>) -> Result<bool> {
        let count = Self::query(conn)
            .filter(Self::PRIMARY_KEY, Op::Eq, id)
            .count()?;
        Ok(count > 0)
    }

    /// The record with the lowest primary key, or `None` for an empty table.
    fn first(conn: &Connection) -> Result<Option<Self>> {
        Self::query(conn).order_by(Self::PRIMARY_KEY, Direction::Asc).first()
    }

    /// Start a filtered query over this model's table.
    fn query(conn: &Connection) -> ModelQuery<'_, Self> {
        ModelQuery::new(conn)
    }

    /// Records of `R` whose `foreign_key` column equals this record's key.
    fn has_many<R: Model>(&self, conn: &Connection, foreign_key: &str) -> Result<Vec<R>> {
        ModelQuery::<R>::new(conn)
            .filter(foreign_key, Op::Eq, self.primary_key_value())
            .order_by(R::PRIMARY_KEY, Direction::Asc)
            .all()
    }

    /// The `P` record referenced by this record's `foreign_key` column.
    ///
    /// `None` when the column is NULL or the parent does not exist.
    fn belongs_to<P: Model>(&self, conn: &Connection, foreign_key: &str) -> Result<Option<P>> {
        let Some((_, value)) = self
            .to_values()
            .into_iter()
            .find(|(column, _)| *column == foreign_key)
        else {
            return Err(Error::config(format!(
                "{} has no column '{foreign_key}'",
                Self::TABLE_NAME
            )));
        };
        if value.is_null() {
            return Ok(None);
        }
        ModelQuery::<P>::new(conn)
            .filter(P::PRIMARY_KEY, Op::Eq, value)
            .limit(1)
            .first()
    }
}

impl<M: Model> Crud for M {}

/// Key generated by the last insert: `RETURNING` row first, then the
/// backend's own report.
fn generated_key(result: &ResultSet) -> Option<i64> {
    result
        .last_insert_id
        .or_else(|| result.first().and_then(|row| row.get(0)).and_then(|s| s.parse().ok()))
}

/// A [`QueryBuilder`] bound to a connection that materializes `M` records.
#[derive(Debug)]
pub struct ModelQuery<'c, M: Model> {
    conn: &'c Connection,
    builder: QueryBuilder,
    _marker: PhantomData<M>,
}

impl<'c, M: Model> ModelQuery<'c, M> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            builder: QueryBuilder::table(M::TABLE_NAME),
            _marker: PhantomData,
        }
    }

    /// `column op ?`, joined to earlier filters with `AND`.
    pub fn filter(mut self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.builder = self.builder.where_op(column, op, value);
        self
    }

    pub fn or_filter(mut self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.builder = self.builder.or_where(column, op, value);
        self
    }

    pub fn filter_null(mut self, column: &str) -> Self {
        self.builder = self.builder.where_null(column);
        self
    }

    pub fn filter_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.builder = self.builder.where_in(column, values);
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.builder = self.builder.order_by(column, direction);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.builder = self.builder.limit(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.builder = self.builder.offset(n);
        self
    }

    pub fn page(mut self, n: u64, size: u64) -> Self {
        self.builder = self.builder.page(n, size);
        self
    }

    /// The underlying builder, e.g. for logging the SQL.
    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    /// Run the query and materialize every row.
    pub fn all(self) -> Result<Vec<M>> {
        let (sql, params) = self.builder.build();
        let rows = self.conn.query_with_params(&sql, &params)?;
        rows.rows().iter().map(M::from_row).collect()
    }

    /// First matching record, or `None`.
    pub fn first(self) -> Result<Option<M>> {
        let (sql, params) = self.builder.limit(1).build();
        let rows = self.conn.query_with_params(&sql, &params)?;
        rows.first().map(M::from_row).transpose()
    }

    /// Number of matching rows, ignoring order and pagination.
    pub fn count(self) -> Result<u64> {
        let (sql, params) = self.builder.count_sql();
        let rows = self.conn.query_with_params(&sql, &params)?;
        let count = rows
            .first()
            .and_then(|row| row.get_int("count"))
            .ok_or_else(|| Error::query(format!("no count returned for {}", M::TABLE_NAME)))?;
        u64::try_from(count).map_err(|_| Error::query(format!("negative count: {count}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unisql_core::{FieldInfo, Row};

    #[derive(Debug, Clone, PartialEq)]
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

    fn memory() -> Connection {
        let conn = crate::Driver::embedded(&unisql_core::DatabaseConfig::sqlite_memory()).unwrap();
        conn.exec("CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT NOT NULL)")
            .unwrap();
        conn
    }

    fn tag(label: &str) -> Tag {
        Tag {
            id: None,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_create_and_find() {
        let conn = memory();
        let created = Tag::create(&conn, &tag("rust")).unwrap();
        assert_eq!(created.id, Some(1));
        assert_eq!(created.label, "rust");
        assert_eq!(Tag::find(&conn, 1).unwrap(), Some(created));
        assert_eq!(Tag::find(&conn, 99).unwrap(), None);
    }

    #[test]
    fn test_insert_with_explicit_key() {
        let conn = memory();
        let explicit = Tag {
            id: Some(40),
            label: "db".into(),
        };
        assert_eq!(explicit.insert(&conn).unwrap(), Value::Int(40));
        assert!(Tag::exists(&conn, 40).unwrap());
    }

    #[test]
    fn test_update_rejects_unknown_columns() {
        let conn = memory();
        Tag::create(&conn, &tag("a")).unwrap();
        let err = Tag::update(&conn, 1, &[("label; DROP TABLE tags", "x".into())]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = Tag::update(&conn, 1, &[("id", 5.into())]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(Tag::update(&conn, 1, &[]).unwrap(), 0);
        assert_eq!(Tag::update(&conn, 1, &[("label", "b".into())]).unwrap(), 1);
        assert_eq!(Tag::find(&conn, 1).unwrap().unwrap().label, "b");
    }

    #[test]
    fn test_query_paging_and_count() {
        let conn = memory();
        for label in ["a", "b", "c", "d", "e"] {
            Tag::create(&conn, &tag(label)).unwrap();
        }
        let page: Vec<String> = Tag::query(&conn)
            .order_by("label", Direction::Desc)
            .page(2, 2)
            .all()
            .unwrap()
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(page, vec!["c", "b"]);

        let count = Tag::query(&conn)
            .filter("label", Op::Ne, "a")
            .limit(1)
            .count()
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(Tag::count(&conn).unwrap(), 5);
    }

    #[test]
    fn test_generated_key_from_returning_row() {
        let rs = ResultSet::from_cells(vec!["id".into()], vec![vec![Some("12".into())]]);
        assert_eq!(generated_key(&rs), Some(12));
        assert_eq!(generated_key(&ResultSet::empty(1, Some(3))), Some(3));
        assert_eq!(generated_key(&ResultSet::empty(1, None)), None);
    }
}
