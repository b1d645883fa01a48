//! Incremental aggregate-projection engine for the ledger indexer.
//!
//! One invocation takes a contiguous run of committed ledger transactions
//! and, inside a single store transaction, appends two kinds of immutable
//! history rows per domain: one entry row per substate event, and one
//! aggregate row per (entity, state version) listing the entity's live
//! entries with the most recently changed first.
//!
//! # Pipeline
//!
//! 1. [`SequenceAllocator::load`] reads every output table's sequence once.
//! 2. [`EntityResolver`] maps each event's address to a database id.
//! 3. Each [`Projector`] groups its events in a [`ChangeTracker`] and loads
//!    prior state with [`load_most_recent`].
//! 4. [`aggregate::project`] applies move-to-front and assigns ids.
//! 5. [`BulkSink`] writes every row as binary COPY.
//! 6. Sequences are persisted and the transaction commits.
//!
//! [`ProjectionEngine`] runs the whole pipeline; the pieces are public so a
//! domain can be tested on its own.

pub mod aggregate;
pub mod config;
pub mod domains;
pub mod engine;
pub mod error;
pub mod history;
pub mod loader;
pub mod projector;
pub mod resolver;
pub mod sequences;
pub mod session;
pub mod sink;
pub mod tracker;

pub use aggregate::{
    AggregateDomain, AggregateHistory, AggregateList, DomainChanges, DomainProjector, PriorState,
};
pub use config::{DomainToggles, EngineConfig};
pub use engine::{ExtensionReport, ProjectionEngine, StageTiming};
pub use error::{ProjectionError, ProjectionResult};
pub use history::{HistoryDomain, HistoryProjector};
pub use loader::{load_most_recent, HistoryLookup};
pub use projector::Projector;
pub use resolver::EntityResolver;
pub use sequences::SequenceAllocator;
pub use session::{cancellable, LedgerTransaction, Session};
pub use sink::BulkSink;
pub use tracker::ChangeTracker;
