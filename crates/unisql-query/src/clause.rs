//! WHERE conditions, comparison operators and ORDER BY terms.

use std::fmt;
use std::str::FromStr;

use unisql_core::{Error, Value};

/// Comparison operators accepted by the builder.
///
/// This is the complete allow-list; anything else is rejected when parsed
/// from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl Op {
    pub const fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(Op::Eq),
            "!=" | "<>" => Ok(Op::Ne),
            "<" => Ok(Op::Lt),
            "<=" => Ok(Op::Le),
            ">" => Ok(Op::Gt),
            ">=" => Ok(Op::Ge),
            "LIKE" => Ok(Op::Like),
            "NOT LIKE" => Ok(Op::NotLike),
            _ => Err(Error::config(format!("unsupported comparison operator: {s:?}"))),
        }
    }
}

impl TryFrom<&str> for Op {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// How a condition attaches to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    const fn as_str(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// A single predicate in a WHERE clause.
///
/// Subqueries are rendered when the condition is added, so a condition owns
/// its SQL text and its bound values outright.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `col op ?`
    Compare { column: String, op: Op, value: Value },
    /// `a op b`, both identifiers
    Columns { left: String, op: Op, right: String },
    /// `col IS [NOT] NULL`
    Null { column: String, negated: bool },
    /// `col [NOT] IN (?, ?, ...)`
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// `col [NOT] IN (subquery)`; `params` are the subquery's bound values
    InSubquery {
        column: String,
        sql: String,
        params: Vec<Value>,
        negated: bool,
    },
    /// `[NOT] EXISTS (subquery)`
    Exists {
        sql: String,
        params: Vec<Value>,
        negated: bool,
    },
}

impl Condition {
    /// Append this condition's SQL to `sql` and its values to `params`.
    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Condition::Compare { column, op, value } => {
                sql.push_str(&format!("{column} {op} ?"));
                params.push(value.clone());
            }
            Condition::Columns { left, op, right } => {
                sql.push_str(&format!("{left} {op} {right}"));
            }
            Condition::Null { column, negated } => {
                let not = if *negated { "NOT " } else { "" };
                sql.push_str(&format!("{column} IS {not}NULL"));
            }
            Condition::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // `IN ()` is not valid SQL anywhere
                    sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
                    return;
                }
                let not = if *negated { "NOT " } else { "" };
                let marks = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{column} {not}IN ({marks})"));
                params.extend(values.iter().cloned());
            }
            Condition::InSubquery {
                column,
                sql: sub,
                params: sub_params,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                sql.push_str(&format!("{column} {not}IN ({sub})"));
                params.extend(sub_params.iter().cloned());
            }
            Condition::Exists {
                sql: sub,
                params: sub_params,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                sql.push_str(&format!("{not}EXISTS ({sub})"));
                params.extend(sub_params.iter().cloned());
            }
        }
    }
}

/// Ordered list of conditions with their connectors.
///
/// Conditions render left to right with no added grouping, so
/// `a AND b OR c` follows the database's usual precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    terms: Vec<(Connector, Condition)>,
}

impl Where {
    pub fn push(&mut self, connector: Connector, condition: Condition) {
        self.terms.push((connector, condition));
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Render the clause body (without the `WHERE` keyword).
    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        for (i, (connector, condition)) in self.terms.iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(connector.as_str());
                sql.push(' ');
            }
            condition.render(sql, params);
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            _ => Err(Error::config(format!("unsupported sort direction: {s:?}"))),
        }
    }
}

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: Direction) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn to_sql(&self) -> String {
        format!("{} {}", self.column, self.direction.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(condition: &Condition) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        condition.render(&mut sql, &mut params);
        (sql, params)
    }

    #[test]
    fn test_operator_allow_list() {
        assert_eq!("=".parse::<Op>().unwrap(), Op::Eq);
        assert_eq!("<>".parse::<Op>().unwrap(), Op::Ne);
        assert_eq!(">=".parse::<Op>().unwrap(), Op::Ge);
        assert_eq!("like".parse::<Op>().unwrap(), Op::Like);
        assert_eq!("not   like".parse::<Op>().unwrap(), Op::NotLike);
        assert_eq!(Op::try_from("<").unwrap(), Op::Lt);

        for bad in ["", "=>", "; DROP TABLE users", "IS", "OR 1=1"] {
            let err = bad.parse::<Op>().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_compare_uses_placeholder() {
        let (sql, params) = render(&Condition::Compare {
            column: "name".into(),
            op: Op::Like,
            value: "A%".into(),
        });
        assert_eq!(sql, "name LIKE ?");
        assert_eq!(params, vec![Value::Text("A%".into())]);
    }

    #[test]
    fn test_empty_in_list() {
        let (sql, params) = render(&Condition::In {
            column: "id".into(),
            values: vec![],
            negated: false,
        });
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());

        let (sql, _) = render(&Condition::In {
            column: "id".into(),
            values: vec![],
            negated: true,
        });
        assert_eq!(sql, "1 = 1");
    }

    #[test]
    fn test_where_connectors() {
        let mut clause = Where::default();
        clause.push(
            Connector::Or,
            Condition::Null {
                column: "deleted_at".into(),
                negated: false,
            },
        );
        clause.push(
            Connector::Or,
            Condition::Columns {
                left: "a.x".into(),
                op: Op::Ne,
                right: "b.y".into(),
            },
        );
        let mut sql = String::new();
        let mut params = Vec::new();
        clause.render(&mut sql, &mut params);
        assert_eq!(sql, "deleted_at IS NULL OR a.x != b.y");
        assert_eq!(clause.len(), 2);
    }

    #[test]
    fn test_order_by() {
        assert_eq!(OrderBy::new("name", Direction::Desc).to_sql(), "name DESC");
        assert_eq!("desc".parse::<Direction>().unwrap(), Direction::Desc);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
