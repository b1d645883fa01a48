use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use lix_store::TableSpec;
use tracing::debug;

use crate::error::{ProjectionError, ProjectionResult};
use crate::session::Session;

struct Counter {
    table: &'static TableSpec,
    start: i64,
    next: AtomicI64,
}

/// Per-table id counters for one invocation.
///
/// Initialised from the store's sequences in a single round-trip, then
/// advanced in memory. Ids are never reused; gaps are acceptable.
pub struct SequenceAllocator {
    counters: HashMap<&'static str, Counter>,
}

impl SequenceAllocator {
    /// Read the next value of every table's sequence in one call.
    pub async fn load(session: &mut Session<'_>, tables: &[&'static TableSpec]) -> ProjectionResult<Self> {
        let mut unique: Vec<&'static TableSpec> = Vec::with_capacity(tables.len());
        for table in tables {
            if !unique.iter().any(|t| t.name == table.name) {
                unique.push(*table);
            }
        }
        let values = session.next_sequence_values(&unique).await?;
        debug!(sequences = unique.len(), "sequences loaded");
        Ok(Self::from_values(unique.into_iter().zip(values)))
    }

    /// Start each table's counter at the given value.
    pub fn from_values(values: impl IntoIterator<Item = (&'static TableSpec, i64)>) -> Self {
        let counters = values
            .into_iter()
            .map(|(table, start)| {
                (
                    table.name,
                    Counter {
                        table,
                        start,
                        next: AtomicI64::new(start),
                    },
                )
            })
            .collect();
        Self { counters }
    }

    fn counter(&self, table: &TableSpec) -> ProjectionResult<&Counter> {
        self.counters
            .get(table.name)
            .ok_or_else(|| ProjectionError::UnknownSequence(table.name.to_string()))
    }

    /// Issue the next id for `table`.
    pub fn next(&self, table: &TableSpec) -> ProjectionResult<i64> {
        Ok(self.counter(table)?.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Ids issued for `table` so far.
    pub fn allocated(&self, table: &TableSpec) -> ProjectionResult<i64> {
        let counter = self.counter(table)?;
        Ok(counter.next.load(Ordering::Relaxed) - counter.start)
    }

    /// Ids handed out across all tables since [`load`](Self::load).
    pub fn total_allocated(&self) -> i64 {
        self.counters
            .values()
            .map(|c| c.next.load(Ordering::Relaxed) - c.start)
            .sum()
    }

    /// Write the last issued id of every used sequence back to the store.
    pub async fn persist(&self, session: &mut Session<'_>) -> ProjectionResult<()> {
        let mut values: Vec<(&'static TableSpec, i64)> = self
            .counters
            .values()
            .filter_map(|c| {
                let next = c.next.load(Ordering::Relaxed);
                (next > c.start).then_some((c.table, next - 1))
            })
            .collect();
        if values.is_empty() {
            return Ok(());
        }
        values.sort_by_key(|(table, _)| table.name);
        session.set_sequence_values(&values).await
    }
}
