use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use lix_store::{ColumnValue, MostRecentQuery, Row, StoreResult, TableSpec};
use tracing::debug;

use crate::error::{ProjectionError, ProjectionResult};
use crate::session::Session;

/// How to query and decode one history table by an in-process key.
pub trait HistoryLookup: Sync {
    type Key: Clone + Eq + Hash + Send + Sync;
    type Value: Send;

    fn table(&self) -> &'static TableSpec;

    /// Columns identifying a key, in the order of [`key_values`](Self::key_values).
    fn key_columns(&self) -> &'static [&'static str];

    fn key_values(&self, key: &Self::Key) -> Vec<ColumnValue>;

    /// Decode a row into the key it answers and its typed value.
    fn decode(&self, row: &Row) -> StoreResult<(Self::Key, Self::Value)>;
}

/// Most recent row per key, for every distinct key in `keys`.
///
/// Issues one query regardless of how many keys there are, and none at all
/// when `keys` is empty. Keys with no stored row are absent from the result.
pub async fn load_most_recent<L, I>(
    session: &mut Session<'_>,
    lookup: &L,
    keys: I,
    up_to_state_version: Option<i64>,
) -> ProjectionResult<HashMap<L::Key, L::Value>>
where
    L: HistoryLookup,
    I: IntoIterator<Item = L::Key>,
{
    let mut seen = HashSet::new();
    let key_values: Vec<Vec<ColumnValue>> = keys
        .into_iter()
        .filter(|key| seen.insert(key.clone()))
        .map(|key| lookup.key_values(&key))
        .collect();
    if key_values.is_empty() {
        return Ok(HashMap::new());
    }

    let requested = key_values.len();
    let mut query = MostRecentQuery::new(lookup.table(), lookup.key_columns()).with_keys(key_values);
    query.up_to_state_version = up_to_state_version;
    let rows = session.most_recent(&query).await?;
    debug!(
        table = lookup.table().name,
        requested,
        found = rows.len(),
        "prior state loaded"
    );

    rows.iter()
        .map(|row| lookup.decode(row))
        .collect::<StoreResult<HashMap<_, _>>>()
        .map_err(ProjectionError::store("load_prior_state"))
}
