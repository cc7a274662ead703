//! Fluent SELECT builder.

use unisql_core::Value;

use crate::clause::{Condition, Connector, Direction, Op, OrderBy, Where};
use crate::join::Join;

/// `LIMIT` emitted when only an offset is set.
///
/// MySQL and SQLite reject a bare `OFFSET`; the largest `BIGINT` works on all
/// three backends.
const NO_LIMIT: u64 = i64::MAX as u64;

/// Accumulates the clauses of one SELECT statement.
///
/// Identifiers (table, columns, join targets, raw fragments) are emitted as
/// given. Values always become `?` placeholders, collected in the order they
/// appear in the rendered SQL.
///
/// Rendering borrows the builder, so it can be rendered any number of times
/// and keeps accepting clauses afterwards.
///
/// # Example
///
/// ```
/// use unisql_query::{Direction, Op, QueryBuilder};
///
/// let (sql, params) = QueryBuilder::table("users")
///     .select(&["id", "name"])
///     .where_op("age", Op::Ge, 18)
///     .order_by("name", Direction::Asc)
///     .limit(10)
///     .build();
///
/// assert_eq!(
///     sql,
///     "SELECT id, name FROM users WHERE age >= ? ORDER BY name ASC LIMIT 10"
/// );
/// assert_eq!(params.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    table: String,
    columns: Vec<String>,
    distinct: bool,
    joins: Vec<Join>,
    where_clause: Where,
    group_by: Vec<String>,
    having: Vec<String>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    /// Start a query against `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            where_clause: Where::default(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Replace the select list (empty means `*`).
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|&c| c.to_string()).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn and(mut self, condition: Condition) -> Self {
        self.where_clause.push(Connector::And, condition);
        self
    }

    // ==================== WHERE ====================

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Op::Eq, value)
    }

    pub fn where_op(self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.and(Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        })
    }

    /// Attach a comparison with `OR` instead of `AND`.
    pub fn or_where(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.where_clause.push(
            Connector::Or,
            Condition::Compare {
                column: column.into(),
                op,
                value: value.into(),
            },
        );
        self
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.and(Condition::Null {
            column: column.into(),
            negated: false,
        })
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.and(Condition::Null {
            column: column.into(),
            negated: true,
        })
    }

    pub fn where_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(column, Op::Like, pattern.into())
    }

    pub fn where_not_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(column, Op::NotLike, pattern.into())
    }

    /// `column IN (?, ...)`. An empty list matches nothing.
    pub fn where_in<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.and(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        })
    }

    /// `column NOT IN (?, ...)`. An empty list matches everything.
    pub fn where_not_in<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.and(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        })
    }

    /// `column IN (<sql>)` with a caller-written subquery.
    pub fn where_in_raw(self, column: impl Into<String>, sql: impl Into<String>) -> Self {
        self.and(Condition::InSubquery {
            column: column.into(),
            sql: sql.into(),
            params: Vec::new(),
            negated: false,
        })
    }

    /// `column IN (<sub>)`; the subquery's values are bound in place.
    pub fn where_in_query(self, column: impl Into<String>, sub: &QueryBuilder) -> Self {
        let (sql, params) = sub.build();
        self.and(Condition::InSubquery {
            column: column.into(),
            sql,
            params,
            negated: false,
        })
    }

    pub fn where_exists(self, sub: &QueryBuilder) -> Self {
        let (sql, params) = sub.build();
        self.and(Condition::Exists {
            sql,
            params,
            negated: false,
        })
    }

    pub fn where_not_exists(self, sub: &QueryBuilder) -> Self {
        let (sql, params) = sub.build();
        self.and(Condition::Exists {
            sql,
            params,
            negated: true,
        })
    }

    pub fn where_exists_raw(self, sql: impl Into<String>) -> Self {
        self.and(Condition::Exists {
            sql: sql.into(),
            params: Vec::new(),
            negated: false,
        })
    }

    /// Compare two columns, e.g. `orders.user_id = users.id`.
    pub fn where_column(
        self,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.and(Condition::Columns {
            left: left.into(),
            op,
            right: right.into(),
        })
    }

    // ==================== JOIN / GROUP / ORDER ====================

    /// Same as [`inner_join`](Self::inner_join).
    pub fn join(
        self,
        table: impl Into<String>,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.inner_join(table, left, op, right)
    }

    pub fn inner_join(
        mut self,
        table: impl Into<String>,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.joins.push(Join::inner(table, left, op, right));
        self
    }

    pub fn left_join(
        mut self,
        table: impl Into<String>,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.joins.push(Join::left(table, left, op, right));
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|&c| c.to_string()));
        self
    }

    /// Raw HAVING fragment; several are joined with `AND`.
    pub fn having_raw(mut self, sql: impl Into<String>) -> Self {
        self.having.push(sql.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy::new(column, direction));
        self
    }

    pub fn order_by_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, Direction::Asc)
    }

    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, Direction::Desc)
    }

    // ==================== Pagination ====================

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// One-based page of `size` rows. Pages below 1 are treated as 1.
    pub fn page(self, n: u64, size: u64) -> Self {
        let n = n.max(1);
        self.limit(size).offset((n - 1).saturating_mul(size))
    }

    // ==================== Rendering ====================

    /// Render the SQL text.
    pub fn to_sql(&self) -> String {
        self.build().0
    }

    /// Bound values in placeholder order.
    pub fn params(&self) -> Vec<Value> {
        self.build().1
    }

    /// Render the SQL text and its bound values.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = self.render_body(&mut params);

        if !self.order_by.is_empty() {
            let terms: Vec<_> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => {
                sql.push_str(&format!(" LIMIT {NO_LIMIT} OFFSET {offset}"));
            }
            (None, None) => {}
        }

        (sql, params)
    }

    /// `SELECT COUNT(*) AS count` over the same rows, ignoring ORDER BY and
    /// pagination.
    ///
    /// Grouped or DISTINCT queries are wrapped in a derived table so the
    /// count is of result rows.
    pub fn count_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        if self.distinct || !self.group_by.is_empty() {
            let inner = self.render_body(&mut params);
            return (
                format!("SELECT COUNT(*) AS count FROM ({inner}) AS unisql_count"),
                params,
            );
        }

        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.table);
        self.render_filters(&mut sql, &mut params);
        (sql, params)
    }

    /// Log the rendered query at debug level and return the builder.
    pub fn debug(self) -> Self {
        self.debug_with("query")
    }

    /// Like [`debug`](Self::debug), tagging the log line with `label`.
    pub fn debug_with(self, label: &str) -> Self {
        let (sql, params) = self.build();
        let values: Vec<String> = params.iter().map(Value::to_sql_literal).collect();
        tracing::debug!(label, sql = %sql, params = ?values, "QueryBuilder");
        self
    }

    /// SELECT list, FROM, joins, WHERE, GROUP BY and HAVING.
    fn render_body(&self, params: &mut Vec<Value>) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        self.render_filters(&mut sql, params);

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.having.join(" AND "));
        }
        sql
    }

    fn render_filters(&self, sql: &mut String, params: &mut Vec<Value>) {
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }
        if !self.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            self.where_clause.render(sql, params);
        }
    }
}
