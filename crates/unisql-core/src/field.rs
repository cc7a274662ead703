//! Column metadata generated for each model field.

/// Metadata about a model field/column.
///
/// Built in `const` context by `#[derive(Model)]`, so the table of fields for
/// a type lives in a `static` and is computed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// Rust type as written in the struct, for diagnostics
    pub rust_type: &'static str,
    /// Whether the field is an `Option<_>`
    pub nullable: bool,
    /// Whether this is the primary key
    pub primary_key: bool,
    /// Whether the database generates the value on insert
    pub auto_increment: bool,
}

impl FieldInfo {
    /// Create a field whose column name matches the field name.
    pub const fn new(name: &'static str, rust_type: &'static str) -> Self {
        Self {
            name,
            column_name: name,
            rust_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}
