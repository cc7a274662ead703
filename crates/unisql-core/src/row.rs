//! Materialized rows and result sets.
//!
//! Every backend copies cell data out of its own buffers before handing back
//! a [`ResultSet`], so rows stay valid after the statement, the physical
//! connection or even the whole [`Connection`](crate::Backend) is gone.
//! Cells are kept as text; typed access parses on demand.

use crate::Result;
use crate::error::{ConversionError, Error};
use std::sync::Arc;

/// A single row returned from a query.
///
/// Column names are shared by all rows of the same result set. Lookups by
/// name are a linear scan; result sets are narrow enough that no index is
/// kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Create a row with its own copy of the column names.
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        Self::with_columns(columns.into(), values)
    }

    /// Create a row sharing column names with its siblings.
    pub fn with_columns(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw cell by position. `None` for out-of-range or NULL.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(Option::as_deref)
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn cell(&self, column: &str) -> Option<&str> {
        self.index_of(column).and_then(|i| self.get(i))
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.index_of(column).is_some()
    }

    /// True when the column exists and holds SQL NULL.
    pub fn is_null(&self, column: &str) -> bool {
        self.index_of(column)
            .is_some_and(|i| self.values.get(i).is_some_and(Option::is_none))
    }

    pub fn get_string(&self, column: &str) -> Option<&str> {
        self.cell(column)
    }

    pub fn get_int(&self, column: &str) -> Option<i64> {
        self.cell(column).and_then(|s| i64::from_cell(s).ok())
    }

    pub fn get_float(&self, column: &str) -> Option<f64> {
        self.cell(column).and_then(|s| f64::from_cell(s).ok())
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.cell(column).and_then(|s| bool::from_cell(s).ok())
    }

    /// Parse a cell into `T`.
    ///
    /// Returns `Ok(None)` for a missing column or NULL, and a
    /// [`Error::Conversion`] when the text does not parse.
    pub fn get_parsed<T: FromCell>(&self, column: &str) -> Result<Option<T>> {
        match self.cell(column) {
            None => Ok(None),
            Some(text) => T::from_cell(text).map(Some).map_err(|()| {
                Error::Conversion(ConversionError {
                    column: column.to_string(),
                    expected: T::TYPE_NAME,
                    value: text.to_string(),
                })
            }),
        }
    }

    /// Iterate `(column, cell)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }
}

/// Types that can be parsed from a text cell.
pub trait FromCell: Sized {
    /// Name used in conversion errors.
    const TYPE_NAME: &'static str;

    #[allow(clippy::result_unit_err)]
    fn from_cell(text: &str) -> std::result::Result<Self, ()>;
}

macro_rules! impl_from_cell_parse {
    ($($t:ty),*) => {
        $(
            impl FromCell for $t {
                const TYPE_NAME: &'static str = stringify!($t);

                fn from_cell(text: &str) -> std::result::Result<Self, ()> {
                    text.trim().parse().map_err(|_| ())
                }
            }
        )*
    };
}

impl_from_cell_parse!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl FromCell for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_cell(text: &str) -> std::result::Result<Self, ()> {
        match text.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" | "on" => Ok(true),
            "0" | "f" | "false" | "n" | "no" | "off" => Ok(false),
            _ => Err(()),
        }
    }
}

impl FromCell for String {
    const TYPE_NAME: &'static str = "String";

    fn from_cell(text: &str) -> std::result::Result<Self, ()> {
        Ok(text.to_string())
    }
}

/// A fully drained query result.
///
/// Holds every row in memory. `next` walks forward once; `reset` rewinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Row>,
    /// Rows changed by the statement, when the backend reports it
    pub affected_rows: u64,
    /// Id generated by the statement, when the backend reports it
    pub last_insert_id: Option<i64>,
    cursor: usize,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
            last_insert_id: None,
            cursor: 0,
        }
    }

    /// Result of a statement that returned no rows.
    pub fn empty(affected_rows: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            ..Self::default()
        }
    }

    /// Build from column names and raw cells, sharing the name list.
    pub fn from_cells(columns: Vec<String>, cells: Vec<Vec<Option<String>>>) -> Self {
        let shared: Arc<[String]> = columns.clone().into();
        let rows = cells
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&shared), values))
            .collect();
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Advance the cursor. `None` once every row has been returned.
    pub fn next(&mut self) -> Option<&Row> {
        let row = self.rows.get(self.cursor)?;
        self.cursor += 1;
        Some(row)
    }

    /// Rewind the cursor to the first row.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::from_cells(
            vec!["id".into(), "name".into(), "score".into(), "active".into()],
            vec![
                vec![
                    Some("1".into()),
                    Some("Alice".into()),
                    Some("9.5".into()),
                    Some("1".into()),
                ],
                vec![Some("2".into()), None, Some("abc".into()), Some("false".into())],
            ],
        )
    }

    #[test]
    fn test_typed_access() {
        let rs = sample();
        let row = &rs.rows()[0];
        assert_eq!(row.get_int("id"), Some(1));
        assert_eq!(row.get_string("name"), Some("Alice"));
        assert_eq!(row.get_float("score"), Some(9.5));
        assert_eq!(row.get_bool("active"), Some(true));
    }

    #[test]
    fn test_missing_and_null_are_none() {
        let rs = sample();
        let row = &rs.rows()[1];
        assert_eq!(row.get_string("name"), None);
        assert!(row.is_null("name"));
        assert_eq!(row.get_string("nope"), None);
        assert!(!row.is_null("nope"));
        assert_eq!(row.get_float("score"), None);
        assert_eq!(row.get_bool("active"), Some(false));
    }

    #[test]
    fn test_get_parsed_reports_bad_cells() {
        let rs = sample();
        let row = &rs.rows()[1];
        let err = row.get_parsed::<f64>("score").unwrap_err();
        assert!(matches!(err, Error::Conversion(ref c) if c.column == "score"));
        assert_eq!(row.get_parsed::<String>("name").unwrap(), None);
        assert_eq!(row.get_parsed::<i32>("id").unwrap(), Some(2));
    }

    #[test]
    fn test_next_and_reset() {
        let mut rs = sample();
        assert_eq!(rs.next().and_then(|r| r.get_int("id")), Some(1));
        assert_eq!(rs.next().and_then(|r| r.get_int("id")), Some(2));
        assert!(rs.next().is_none());
        assert!(rs.next().is_none());
        rs.reset();
        assert_eq!(rs.next().and_then(|r| r.get_int("id")), Some(1));
    }

    #[test]
    fn test_rows_share_columns() {
        let rs = sample();
        let a = rs.rows()[0].columns().as_ptr();
        let b = rs.rows()[1].columns().as_ptr();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rows_outlive_result_set() {
        let row = sample().into_rows().remove(0);
        assert_eq!(row.get_string("name"), Some("Alice"));
    }

    #[test]
    fn test_bool_spellings() {
        for t in ["1", "t", "TRUE", "yes", "On"] {
            assert_eq!(bool::from_cell(t), Ok(true));
        }
        for f in ["0", "f", "False", "no", "OFF"] {
            assert_eq!(bool::from_cell(f), Ok(false));
        }
        assert!(bool::from_cell("2").is_err());
    }

    #[test]
    fn test_empty_result() {
        let rs = ResultSet::empty(3, Some(10));
        assert!(rs.is_empty());
        assert_eq!(rs.affected_rows, 3);
        assert_eq!(rs.last_insert_id, Some(10));
    }
}
