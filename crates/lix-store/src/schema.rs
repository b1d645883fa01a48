use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Primary key column carried by every history table.
pub const ID_COLUMN: &str = "id";

/// Version column carried by every history table.
pub const STATE_VERSION_COLUMN: &str = "from_state_version";

/// Store-side type of a column, which fixes its binary encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int8,
    Int4,
    Bool,
    Text,
    Bytea,
    Jsonb,
    Int8Array,
    /// A named store enum, written as its label text.
    Enum(&'static str),
}

impl ColumnType {
    /// The SQL type name, used for parameter casts.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Int8 => "bigint",
            Self::Int4 => "integer",
            Self::Bool => "boolean",
            Self::Text => "text",
            Self::Bytea => "bytea",
            Self::Jsonb => "jsonb",
            Self::Int8Array => "bigint[]",
            Self::Enum(name) => name,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// One destination column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    /// A `NOT NULL` column.
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    /// A column that accepts `NULL`.
    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

/// Exact schema of a destination table: name plus ordered columns.
///
/// Column order here is the order rows are encoded in. Tables are declared
/// as `static` items so rows and queries can borrow them for `'static`.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl TableSpec {
    /// Describe a table. Column order is the COPY order.
    pub const fn new(name: &'static str, columns: &'static [Column]) -> Self {
        Self { name, columns }
    }

    /// Number of columns in a row.
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Position of a named column.
    pub fn column_index(&self, name: &str) -> StoreResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name.to_string(),
                column: name.to_string(),
            })
    }

    /// Column named `name`, or [`StoreError::UnknownColumn`].
    pub fn column(&self, name: &str) -> StoreResult<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Column names in COPY order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Name of the id sequence backing this table.
    pub fn sequence_name(&self) -> String {
        format!("{}_id_seq", self.name)
    }

    /// The bulk-load statement for this table.
    pub fn copy_statement(&self) -> String {
        let columns: Vec<&str> = self.column_names().collect();
        format!(
            "COPY {} ({}) FROM STDIN (FORMAT BINARY)",
            self.name,
            columns.join(", ")
        )
    }

    /// DDL for this table. Enum types must already exist.
    pub fn create_statement(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("    {} {}", c.name, c.ty.sql_name());
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE {} (\n{},\n    PRIMARY KEY ({})\n);",
            self.name,
            columns.join(",\n"),
            ID_COLUMN
        )
    }
}

impl fmt::Display for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
