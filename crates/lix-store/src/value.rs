use lix_types::EntityId;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::schema::ColumnType;

/// One row of field values, in table column order.
pub type Row = Vec<ColumnValue>;

/// A typed, nullable field value.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    Null,
    Int8(i64),
    Int4(i32),
    Bool(bool),
    Text(String),
    Bytea(Vec<u8>),
    Jsonb(Value),
    Int8Array(Vec<i64>),
    /// Label of a store enum value.
    Enum(String),
}

impl ColumnValue {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int8(_) => "bigint",
            Self::Int4(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::Text(_) => "text",
            Self::Bytea(_) => "bytea",
            Self::Jsonb(_) => "jsonb",
            Self::Int8Array(_) => "bigint[]",
            Self::Enum(_) => "enum",
        }
    }

    /// Whether this is SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if this non-null value can be written to a column of `ty`.
    pub fn conforms_to(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Self::Int8(_), ColumnType::Int8)
                | (Self::Int4(_), ColumnType::Int4)
                | (Self::Bool(_), ColumnType::Bool)
                | (Self::Text(_), ColumnType::Text)
                | (Self::Bytea(_), ColumnType::Bytea)
                | (Self::Jsonb(_), ColumnType::Jsonb)
                | (Self::Int8Array(_), ColumnType::Int8Array)
                | (Self::Enum(_), ColumnType::Enum(_))
        )
    }

    fn mismatch(&self, expected: &'static str) -> StoreError {
        StoreError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    /// The value of an `int8` column.
    pub fn as_i64(&self) -> StoreResult<i64> {
        match self {
            Self::Int8(v) => Ok(*v),
            other => Err(other.mismatch("bigint")),
        }
    }

    /// The value of a `bool` column.
    pub fn as_bool(&self) -> StoreResult<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// Text or enum label.
    pub fn as_str(&self) -> StoreResult<&str> {
        match self {
            Self::Text(v) | Self::Enum(v) => Ok(v),
            other => Err(other.mismatch("text")),
        }
    }

    /// The ids of an `int8[]` column.
    pub fn as_i64_array(&self) -> StoreResult<&[i64]> {
        match self {
            Self::Int8Array(v) => Ok(v),
            other => Err(other.mismatch("bigint[]")),
        }
    }

    /// An `int8` column read as an entity id.
    pub fn as_entity_id(&self) -> StoreResult<EntityId> {
        self.as_i64().map(EntityId)
    }

    /// A nullable `int8` column.
    pub fn opt_i64(&self) -> StoreResult<Option<i64>> {
        match self {
            Self::Null => Ok(None),
            other => other.as_i64().map(Some),
        }
    }

    /// A nullable `bytea` column.
    pub fn opt_bytes(&self) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Null => Ok(None),
            Self::Bytea(v) => Ok(Some(v.clone())),
            other => Err(other.mismatch("bytea")),
        }
    }

    /// A nullable `jsonb` column.
    pub fn opt_json(&self) -> StoreResult<Option<Value>> {
        match self {
            Self::Null => Ok(None),
            Self::Jsonb(v) => Ok(Some(v.clone())),
            other => Err(other.mismatch("jsonb")),
        }
    }

    /// A nullable `text` or enum column.
    pub fn opt_str(&self) -> StoreResult<Option<&str>> {
        match self {
            Self::Null => Ok(None),
            other => other.as_str().map(Some),
        }
    }

    /// Wrap a store enum label.
    pub fn label(label: impl Into<String>) -> Self {
        Self::Enum(label.into())
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        Self::Int8(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        Self::Int4(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytea(v)
    }
}

impl From<Value> for ColumnValue {
    fn from(v: Value) -> Self {
        Self::Jsonb(v)
    }
}

impl From<Vec<i64>> for ColumnValue {
    fn from(v: Vec<i64>) -> Self {
        Self::Int8Array(v)
    }
}

impl From<EntityId> for ColumnValue {
    fn from(v: EntityId) -> Self {
        Self::Int8(v.get())
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
