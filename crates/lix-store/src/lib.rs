//! Store boundary for the ledger indexer.
//!
//! Everything the projection engine needs from a relational store, and
//! nothing more: sequence reads and writes, batched "most recent row per key"
//! lookups, binary bulk loading, and entity resolution.
//!
//! # Components
//!
//! - [`TableSpec`] / [`Column`] / [`ColumnType`] -- exact destination schemas
//! - [`ColumnValue`] -- a typed, nullable field value
//! - [`CopyWriter`] / [`CopyReader`] -- the binary COPY wire format
//! - [`MostRecentQuery`] -- one round-trip point-in-time lookup
//! - [`LedgerStore`] / [`StoreTransaction`] / [`EntityDirectory`] -- backend traits
//! - [`InMemoryStore`] -- transactional in-memory backend for tests and replay
//!
//! # Design Rules
//!
//! 1. Column order and type tags always come from the [`TableSpec`]; a row
//!    that does not match it is rejected before anything reaches the wire.
//! 2. Nothing becomes visible to readers until the transaction commits.
//! 3. Sequences only move forward.
//! 4. All backend errors are propagated, never silently ignored.

pub mod copy;
pub mod error;
pub mod memory;
pub mod query;
pub mod schema;
pub mod traits;
pub mod value;

pub use copy::{CopyReader, CopyWriter, COPY_SIGNATURE};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use query::MostRecentQuery;
pub use schema::{Column, ColumnType, TableSpec, ID_COLUMN, STATE_VERSION_COLUMN};
pub use traits::{EntityDirectory, LedgerStore, StoreTransaction};
pub use value::{ColumnValue, Row};
