//! Binary COPY wire format.
//!
//! Stream layout:
//! ```text
//! Header:  "PGCOPY\n\xff\r\n\0" | flags: i32 = 0 | extension length: i32 = 0
//! Tuple:   field count: i16 | per field: length: i32 (-1 = null) | payload
//! Trailer: i16 = -1
//! ```
//!
//! All integers are big-endian. `jsonb` payloads carry a leading version
//! byte (1). `bigint[]` payloads use the array header (ndim, has-null flag,
//! element OID 20, then size and lower bound per dimension) followed by
//! length-prefixed elements; an empty array has zero dimensions.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::schema::{Column, ColumnType, TableSpec};
use crate::value::{ColumnValue, Row};

/// Signature opening every binary COPY stream.
pub const COPY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

const TRAILER: i16 = -1;
const NULL_LENGTH: i32 = -1;
const JSONB_VERSION: u8 = 1;
const INT8_OID: i32 = 20;

/// Encodes rows of one table into a binary COPY stream.
///
/// Every row is checked against the [`TableSpec`] before any of its bytes
/// are written, so a rejected row leaves the buffer untouched.
pub struct CopyWriter<'a> {
    table: &'a TableSpec,
    buf: BytesMut,
    rows: u64,
}

impl<'a> CopyWriter<'a> {
    /// Start a stream for `table`, writing the COPY header.
    pub fn new(table: &'a TableSpec) -> Self {
        let mut buf = BytesMut::with_capacity(1024);
        buf.put_slice(COPY_SIGNATURE);
        buf.put_i32(0);
        buf.put_i32(0);
        Self { table, buf, rows: 0 }
    }

    /// Table the stream is being written for.
    pub fn table(&self) -> &TableSpec {
        self.table
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one tuple.
    ///
    /// Values must match the table's columns in number, order and type;
    /// `NULL` is only accepted for nullable columns. A rejected row leaves the
    /// stream unchanged.
    pub fn write_row(&mut self, values: &[ColumnValue]) -> StoreResult<()> {
        if values.len() != self.table.arity() {
            return Err(StoreError::Encoding {
                table: self.table.name.to_string(),
                column: "*".to_string(),
                reason: format!(
                    "expected {} fields, got {}",
                    self.table.arity(),
                    values.len()
                ),
            });
        }
        for (column, value) in self.table.columns.iter().zip(values) {
            self.check(column, value)?;
        }

        let mut row = BytesMut::new();
        row.put_i16(self.table.arity() as i16);
        for (column, value) in self.table.columns.iter().zip(values) {
            encode_field(&mut row, value).map_err(|reason| self.encoding_error(column, reason))?;
        }
        self.buf.put(row);
        self.rows += 1;
        Ok(())
    }

    /// Append the trailer and hand back the finished stream.
    pub fn finish(mut self) -> Bytes {
        self.buf.put_i16(TRAILER);
        self.buf.freeze()
    }

    fn check(&self, column: &Column, value: &ColumnValue) -> StoreResult<()> {
        if value.is_null() {
            if column.nullable {
                return Ok(());
            }
            return Err(self.encoding_error(column, "null in non-nullable column".to_string()));
        }
        if !value.conforms_to(column.ty) {
            return Err(self.encoding_error(
                column,
                format!("expected {}, got {}", column.ty, value.type_name()),
            ));
        }
        Ok(())
    }

    fn encoding_error(&self, column: &Column, reason: String) -> StoreError {
        StoreError::Encoding {
            table: self.table.name.to_string(),
            column: column.name.to_string(),
            reason,
        }
    }
}

fn field_length(len: usize) -> Result<i32, String> {
    i32::try_from(len).map_err(|_| format!("field of {len} bytes exceeds the format limit"))
}

fn encode_field(buf: &mut BytesMut, value: &ColumnValue) -> Result<(), String> {
    match value {
        ColumnValue::Null => buf.put_i32(NULL_LENGTH),
        ColumnValue::Int8(v) => {
            buf.put_i32(8);
            buf.put_i64(*v);
        }
        ColumnValue::Int4(v) => {
            buf.put_i32(4);
            buf.put_i32(*v);
        }
        ColumnValue::Bool(v) => {
            buf.put_i32(1);
            buf.put_u8(u8::from(*v));
        }
        ColumnValue::Text(s) | ColumnValue::Enum(s) => {
            buf.put_i32(field_length(s.len())?);
            buf.put_slice(s.as_bytes());
        }
        ColumnValue::Bytea(b) => {
            buf.put_i32(field_length(b.len())?);
            buf.put_slice(b);
        }
        ColumnValue::Jsonb(v) => {
            let text = serde_json::to_vec(v).map_err(|e| e.to_string())?;
            buf.put_i32(field_length(text.len() + 1)?);
            buf.put_u8(JSONB_VERSION);
            buf.put_slice(&text);
        }
        ColumnValue::Int8Array(items) => {
            if items.is_empty() {
                buf.put_i32(12);
                buf.put_i32(0);
                buf.put_i32(0);
                buf.put_i32(INT8_OID);
            } else {
                let len = field_length(20 + 12 * items.len())?;
                let count = field_length(items.len())?;
                buf.put_i32(len);
                buf.put_i32(1);
                buf.put_i32(0);
                buf.put_i32(INT8_OID);
                buf.put_i32(count);
                buf.put_i32(1);
                for item in items {
                    buf.put_i32(8);
                    buf.put_i64(*item);
                }
            }
        }
    }
    Ok(())
}

/// Decodes a binary COPY stream back into typed rows.
pub struct CopyReader<'a> {
    table: &'a TableSpec,
    data: &'a [u8],
    pos: usize,
}

impl<'a> CopyReader<'a> {
    /// Reader over a complete stream produced for `table`.
    pub fn new(table: &'a TableSpec, data: &'a [u8]) -> Self {
        Self { table, data, pos: 0 }
    }

    /// Decode a whole stream in one call.
    pub fn decode(table: &'a TableSpec, data: &'a [u8]) -> StoreResult<Vec<Row>> {
        Self::new(table, data).read_all()
    }

    /// Decode every tuple up to the trailer, checking the header first.
    pub fn read_all(mut self) -> StoreResult<Vec<Row>> {
        let signature = self.take(COPY_SIGNATURE.len())?;
        if signature != COPY_SIGNATURE {
            return Err(self.corrupt("bad signature"));
        }
        let flags = self.i32()?;
        if flags != 0 {
            return Err(self.corrupt(format!("unsupported flags {flags:#x}")));
        }
        let extension = self.i32()?;
        let extension = usize::try_from(extension).map_err(|_| self.corrupt("negative header extension"))?;
        self.take(extension)?;

        let mut rows = Vec::new();
        loop {
            let fields = self.i16()?;
            if fields == TRAILER {
                break;
            }
            if fields as usize != self.table.arity() {
                return Err(self.corrupt(format!(
                    "expected {} fields, got {fields}",
                    self.table.arity()
                )));
            }
            let mut row = Vec::with_capacity(self.table.arity());
            for column in self.table.columns {
                row.push(self.field(column.ty)?);
            }
            rows.push(row);
        }
        if self.pos != self.data.len() {
            return Err(self.corrupt("trailing bytes after trailer"));
        }
        Ok(rows)
    }

    fn field(&mut self, ty: ColumnType) -> StoreResult<ColumnValue> {
        let len = self.i32()?;
        if len == NULL_LENGTH {
            return Ok(ColumnValue::Null);
        }
        let len = usize::try_from(len).map_err(|_| self.corrupt(format!("bad field length {len}")))?;
        let start = self.pos;
        let mut payload = self.take(len)?;
        let value = match ty {
            ColumnType::Int8 if len == 8 => ColumnValue::Int8(payload.get_i64()),
            ColumnType::Int4 if len == 4 => ColumnValue::Int4(payload.get_i32()),
            ColumnType::Bool if len == 1 => ColumnValue::Bool(payload.get_u8() != 0),
            ColumnType::Text => ColumnValue::Text(self.utf8(payload)?),
            ColumnType::Enum(_) => ColumnValue::Enum(self.utf8(payload)?),
            ColumnType::Bytea => ColumnValue::Bytea(payload.to_vec()),
            ColumnType::Jsonb if len >= 1 => {
                if payload.get_u8() != JSONB_VERSION {
                    return Err(self.corrupt_at(start, "unsupported jsonb version"));
                }
                let value: Value = serde_json::from_slice(payload)
                    .map_err(|e| self.corrupt_at(start, e.to_string()))?;
                ColumnValue::Jsonb(value)
            }
            ColumnType::Int8Array => ColumnValue::Int8Array(self.int8_array(payload, start)?),
            other => {
                return Err(self.corrupt_at(start, format!("length {len} is invalid for {other}")));
            }
        };
        Ok(value)
    }

    fn int8_array(&self, mut payload: &[u8], start: usize) -> StoreResult<Vec<i64>> {
        if payload.len() < 12 {
            return Err(self.corrupt_at(start, "short array header"));
        }
        let ndim = payload.get_i32();
        let _has_null = payload.get_i32();
        let oid = payload.get_i32();
        if oid != INT8_OID {
            return Err(self.corrupt_at(start, format!("array element oid {oid}")));
        }
        match ndim {
            0 => return Ok(Vec::new()),
            1 => {}
            n => return Err(self.corrupt_at(start, format!("{n}-dimensional array"))),
        }
        if payload.len() < 8 {
            return Err(self.corrupt_at(start, "short array dimension"));
        }
        let count = payload.get_i32();
        let _lower_bound = payload.get_i32();
        let count = usize::try_from(count).map_err(|_| self.corrupt_at(start, "negative array size"))?;
        if payload.len() != count * 12 {
            return Err(self.corrupt_at(start, "array size does not match payload"));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            if payload.get_i32() != 8 {
                return Err(self.corrupt_at(start, "array element is not a bigint"));
            }
            items.push(payload.get_i64());
        }
        Ok(items)
    }

    fn utf8(&self, payload: &[u8]) -> StoreResult<String> {
        String::from_utf8(payload.to_vec()).map_err(|e| self.corrupt(e.to_string()))
    }

    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.corrupt("unexpected end of stream"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn i16(&mut self) -> StoreResult<i16> {
        Ok(self.take(2)?.get_i16())
    }

    fn i32(&mut self) -> StoreResult<i32> {
        Ok(self.take(4)?.get_i32())
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        self.corrupt_at(self.pos, reason)
    }

    fn corrupt_at(&self, offset: usize, reason: impl Into<String>) -> StoreError {
        StoreError::CorruptStream {
            table: self.table.name.to_string(),
            offset,
            reason: reason.into(),
        }
    }
}
