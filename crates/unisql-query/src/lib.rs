//! Fluent SQL query builder for unisql.
//!
//! `unisql-query` turns clause calls into one SQL string plus its bound
//! values. It never executes anything; the result goes to any backend
//! through `Backend::query`.
//!
//! - [`QueryBuilder`]: select list, WHERE predicates, joins, grouping,
//!   ordering and pagination
//! - [`Op`]: the allow-listed comparison operators
//! - [`Direction`]: ORDER BY direction
//!
//! Placeholders are always `?`. The PostgreSQL backend rewrites them to
//! `$n` before sending, so one rendering serves every dialect.

pub mod builder;
pub mod clause;
pub mod join;

pub use builder::QueryBuilder;
pub use clause::{Condition, Connector, Direction, Op, OrderBy, Where};
pub use join::{Join, JoinType};
