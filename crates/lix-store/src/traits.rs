use async_trait::async_trait;
use bytes::Bytes;
use lix_types::{EntityAddress, ReferencedEntity};

use crate::error::StoreResult;
use crate::query::MostRecentQuery;
use crate::schema::TableSpec;
use crate::value::Row;

/// A relational store that can hand out write transactions.
///
/// All implementations must satisfy these invariants:
/// - Nothing written through a transaction is visible to readers until
///   [`StoreTransaction::commit`] returns `Ok`.
/// - A transaction that is rolled back (or dropped) leaves no trace.
/// - Sequences only move forward, even across rolled-back transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Transaction: StoreTransaction + EntityDirectory;

    /// Open a new write transaction.
    async fn begin(&self) -> StoreResult<Self::Transaction>;
}

/// Operations available inside one write transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Advance each table's id sequence once and return the fresh values,
    /// aligned with `tables`.
    async fn next_sequence_values(&mut self, tables: &[&'static TableSpec]) -> StoreResult<Vec<i64>>;

    /// Record the last issued id of each table's sequence.
    ///
    /// A value lower than the sequence's current position is ignored.
    async fn set_sequence_values(&mut self, values: &[(&'static TableSpec, i64)]) -> StoreResult<()>;

    /// Batched point-in-time lookup. See [`MostRecentQuery`].
    async fn most_recent(&mut self, query: &MostRecentQuery<'_>) -> StoreResult<Vec<Row>>;

    /// Bulk-load one binary COPY stream into `table`. Returns rows written.
    async fn copy_in(&mut self, table: &'static TableSpec, stream: Bytes) -> StoreResult<u64>;

    /// Make every write of this transaction visible atomically.
    async fn commit(self) -> StoreResult<()>
    where
        Self: Sized;

    /// Discard every write of this transaction.
    async fn rollback(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// Maps ledger addresses to internal entity identifiers.
#[async_trait]
pub trait EntityDirectory: Send {
    /// Resolve `address`, registering it if it has never been seen.
    ///
    /// `state_version` is recorded as the first-seen version of a newly
    /// registered entity and is ignored for known ones. The same address
    /// always yields the same `database_id`.
    async fn resolve_entity(
        &mut self,
        address: &EntityAddress,
        state_version: i64,
    ) -> StoreResult<ReferencedEntity>;
}
