use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnType, TableSpec, ID_COLUMN, STATE_VERSION_COLUMN};
use crate::value::{ColumnValue, Row};

/// "Most recent row per key" lookup for a batch of composite keys.
///
/// For each key tuple, selects the row with the greatest
/// `from_state_version` (ties broken by greatest `id`), optionally bounded
/// above by `up_to_state_version`. Keys with no row produce nothing.
/// Backends answer the whole batch in one round-trip.
#[derive(Clone, Debug)]
pub struct MostRecentQuery<'a> {
    pub table: &'a TableSpec,
    pub key_columns: &'a [&'a str],
    pub keys: Vec<Vec<ColumnValue>>,
    pub up_to_state_version: Option<i64>,
}

impl<'a> MostRecentQuery<'a> {
    /// A query over `table` matching rows on `key_columns`, with no keys yet.
    pub fn new(table: &'a TableSpec, key_columns: &'a [&'a str]) -> Self {
        Self {
            table,
            key_columns,
            keys: Vec::new(),
            up_to_state_version: None,
        }
    }

    /// Replace the key tuples. Each tuple lists values in `key_columns` order.
    pub fn with_keys(mut self, keys: Vec<Vec<ColumnValue>>) -> Self {
        self.keys = keys;
        self
    }

    /// Ignore rows newer than `state_version`.
    pub fn up_to(mut self, state_version: i64) -> Self {
        self.up_to_state_version = Some(state_version);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of key tuples.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    fn malformed(&self, reason: impl Into<String>) -> StoreError {
        StoreError::MalformedQuery {
            table: self.table.name.to_string(),
            reason: reason.into(),
        }
    }

    /// Key column types, checking every key tuple against them.
    pub fn validate(&self) -> StoreResult<Vec<ColumnType>> {
        if self.key_columns.is_empty() {
            return Err(self.malformed("no key columns"));
        }
        let columns = self
            .key_columns
            .iter()
            .map(|name| self.table.column(name))
            .collect::<StoreResult<Vec<_>>>()?;
        for key in &self.keys {
            if key.len() != columns.len() {
                return Err(self.malformed(format!(
                    "key has {} values for {} columns",
                    key.len(),
                    columns.len()
                )));
            }
            let mismatch = key
                .iter()
                .zip(&columns)
                .find(|(v, c)| !(v.conforms_to(c.ty) || (c.nullable && v.is_null())));
            if let Some((value, column)) = mismatch {
                return Err(self.malformed(format!(
                    "key value of type {} for {} column",
                    value.type_name(),
                    column.ty
                )));
            }
        }
        Ok(columns.iter().map(|c| c.ty).collect())
    }

    /// Key tuples transposed into one array per key column, in bind order.
    pub fn key_arrays(&self) -> Vec<Vec<ColumnValue>> {
        (0..self.key_columns.len())
            .map(|i| self.keys.iter().map(|key| key[i].clone()).collect())
            .collect()
    }

    /// SQL text answering the whole batch with one lateral join.
    ///
    /// Parameters `$1..$n` are the [`key_arrays`](Self::key_arrays); the
    /// optional version bound is the last parameter. Nullable key columns
    /// match NULL against NULL.
    pub fn to_sql(&self) -> StoreResult<String> {
        let types = self.validate()?;
        let columns = self.key_columns.join(", ");
        let unnest: Vec<String> = types
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("UNNEST(${}::{}[])", i + 1, ty.sql_name()))
            .collect();
        let mut predicate: Vec<String> = self
            .key_columns
            .iter()
            .map(|c| match self.table.column(c) {
                Ok(column) if column.nullable => format!("{c} IS NOT DISTINCT FROM variables.{c}"),
                _ => format!("{c} = variables.{c}"),
            })
            .collect();
        if self.up_to_state_version.is_some() {
            predicate.push(format!(
                "{STATE_VERSION_COLUMN} <= ${}",
                self.key_columns.len() + 1
            ));
        }
        Ok(format!(
            "WITH variables ({columns}) AS (\n    SELECT {}\n)\n\
             SELECT t.*\n\
             FROM variables\n\
             INNER JOIN LATERAL (\n    SELECT *\n    FROM {}\n    WHERE {}\n    \
             ORDER BY {STATE_VERSION_COLUMN} DESC, {ID_COLUMN} DESC\n    LIMIT 1\n) t ON true;",
            unnest.join(", "),
            self.table.name,
            predicate.join(" AND "),
        ))
    }

    /// Answer the query against rows already in memory.
    ///
    /// Results come back in key order, one row at most per key.
    pub fn evaluate<'r>(&self, rows: impl IntoIterator<Item = &'r Row> + Clone) -> StoreResult<Vec<Row>> {
        self.validate()?;
        let key_idx = self
            .key_columns
            .iter()
            .map(|name| self.table.column_index(name))
            .collect::<StoreResult<Vec<_>>>()?;
        let version_idx = self.table.column_index(STATE_VERSION_COLUMN)?;
        let id_idx = self.table.column_index(ID_COLUMN)?;

        let mut found = Vec::new();
        for key in &self.keys {
            let mut best: Option<(&Row, i64, i64)> = None;
            for row in rows.clone() {
                if !key_idx.iter().zip(key).all(|(i, v)| &row[*i] == v) {
                    continue;
                }
                let version = row[version_idx].as_i64()?;
                if self.up_to_state_version.is_some_and(|bound| version > bound) {
                    continue;
                }
                let id = row[id_idx].as_i64()?;
                if best.map_or(true, |(_, v, i)| (version, id) > (v, i)) {
                    best = Some((row, version, id));
                }
            }
            if let Some((row, _, _)) = best {
                found.push(row.clone());
            }
        }
        Ok(found)
    }
}
