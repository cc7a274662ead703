//! JOIN clause types.

use crate::clause::Op;

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN on a column-to-column condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub left: String,
    pub op: Op,
    pub right: String,
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(
        table: impl Into<String>,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        Self {
            join_type: JoinType::Inner,
            table: table.into(),
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(
        table: impl Into<String>,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        Self {
            join_type: JoinType::Left,
            ..Self::inner(table, left, op, right)
        }
    }

    /// Generate the SQL for this join, without a leading space.
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} ON {} {} {}",
            self.join_type.as_str(),
            self.table,
            self.left,
            self.op,
            self.right
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_join() {
        let join = Join::inner("posts", "posts.user_id", Op::Eq, "users.id");
        assert_eq!(
            join.to_sql(),
            "INNER JOIN posts ON posts.user_id = users.id"
        );
    }

    #[test]
    fn test_left_join() {
        let join = Join::left("profiles p", "p.user_id", Op::Eq, "users.id");
        assert_eq!(join.join_type, JoinType::Left);
        assert_eq!(
            join.to_sql(),
            "LEFT JOIN profiles p ON p.user_id = users.id"
        );
    }
}
