use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use lix_types::{EntityAddress, EntityId, ReferencedEntity};
use tracing::debug;

use crate::copy::CopyReader;
use crate::error::{StoreError, StoreResult};
use crate::query::MostRecentQuery;
use crate::schema::{TableSpec, ID_COLUMN};
use crate::traits::{EntityDirectory, LedgerStore, StoreTransaction};
use crate::value::Row;

/// Sequence backing the entity directory.
const ENTITY_SEQUENCE: &str = "entities_id_seq";

#[derive(Clone, Default)]
struct StoredTable {
    rows: Vec<Row>,
    ids: HashSet<i64>,
}

#[derive(Clone, Default)]
struct StoreState {
    tables: HashMap<&'static str, StoredTable>,
    /// Last value handed out per sequence.
    sequences: HashMap<String, i64>,
    entities: HashMap<EntityAddress, ReferencedEntity>,
}

impl StoreState {
    fn nextval(&mut self, name: &str) -> i64 {
        let last = self.sequences.entry(name.to_string()).or_insert(0);
        *last += 1;
        *last
    }
}

/// In-memory transactional store.
///
/// Intended for tests and offline replay. Each transaction works on a private
/// copy of the committed state which replaces it on commit. Sequence advances
/// are applied to the shared state immediately so they survive rollback, as
/// they would in a relational store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    fail_next_copy: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// An empty store with no tables, sequences or entities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.read().expect("lock poisoned");
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Last value handed out by a sequence, if it has ever been used.
    pub fn sequence_value(&self, name: &str) -> Option<i64> {
        let state = self.state.read().expect("lock poisoned");
        state.sequences.get(name).copied()
    }

    /// Number of registered entities.
    pub fn entity_count(&self) -> usize {
        self.state.read().expect("lock poisoned").entities.len()
    }

    /// Register an entity directly, bypassing the directory sequence.
    pub fn register_entity(&self, entity: ReferencedEntity) {
        let mut state = self.state.write().expect("lock poisoned");
        let last = state.sequences.entry(ENTITY_SEQUENCE.to_string()).or_insert(0);
        *last = (*last).max(entity.database_id.get());
        state.entities.insert(entity.address.clone(), entity);
    }

    /// Seed committed rows, as if loaded by an earlier invocation.
    pub fn seed(&self, table: &'static TableSpec, rows: Vec<Row>) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        insert_rows(&mut state, table, rows)?;
        Ok(())
    }

    /// Make the next `copy_in` on any transaction fail with a transport error.
    pub fn fail_next_copy(&self) {
        self.fail_next_copy.store(true, Ordering::SeqCst);
    }
}

fn insert_rows(state: &mut StoreState, table: &'static TableSpec, rows: Vec<Row>) -> StoreResult<u64> {
    let id_idx = table.column_index(ID_COLUMN)?;
    let stored = state.tables.entry(table.name).or_default();
    let mut batch = HashSet::with_capacity(rows.len());
    for row in &rows {
        let id = row[id_idx].as_i64()?;
        if stored.ids.contains(&id) || !batch.insert(id) {
            return Err(StoreError::DuplicateKey {
                table: table.name.to_string(),
                id,
            });
        }
    }
    let count = rows.len() as u64;
    stored.ids.extend(batch);
    stored.rows.extend(rows);
    Ok(count)
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> StoreResult<InMemoryTransaction> {
        let working = self.state.read().expect("lock poisoned").clone();
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.state),
            fail_next_copy: Arc::clone(&self.fail_next_copy),
            working,
        })
    }
}

/// A write transaction against an [`InMemoryStore`].
///
/// Dropping it without committing discards its writes.
pub struct InMemoryTransaction {
    shared: Arc<RwLock<StoreState>>,
    fail_next_copy: Arc<AtomicBool>,
    working: StoreState,
}

impl InMemoryTransaction {
    fn advance_shared(&mut self, name: &str) -> i64 {
        let mut shared = self.shared.write().expect("lock poisoned");
        let value = shared.nextval(name);
        self.working.sequences.insert(name.to_string(), value);
        value
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn next_sequence_values(&mut self, tables: &[&'static TableSpec]) -> StoreResult<Vec<i64>> {
        Ok(tables
            .iter()
            .map(|t| self.advance_shared(&t.sequence_name()))
            .collect())
    }

    async fn set_sequence_values(&mut self, values: &[(&'static TableSpec, i64)]) -> StoreResult<()> {
        for (table, value) in values {
            let last = self
                .working
                .sequences
                .entry(table.sequence_name())
                .or_insert(0);
            *last = (*last).max(*value);
        }
        Ok(())
    }

    async fn most_recent(&mut self, query: &MostRecentQuery<'_>) -> StoreResult<Vec<Row>> {
        match self.working.tables.get(query.table.name) {
            Some(stored) => query.evaluate(&stored.rows),
            None => {
                query.validate()?;
                Ok(Vec::new())
            }
        }
    }

    async fn copy_in(&mut self, table: &'static TableSpec, stream: Bytes) -> StoreResult<u64> {
        if self.fail_next_copy.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Transport(format!(
                "connection reset during copy into {}",
                table.name
            )));
        }
        let rows = CopyReader::decode(table, &stream)?;
        let count = insert_rows(&mut self.working, table, rows)?;
        debug!(table = table.name, rows = count, bytes = stream.len(), "copy complete");
        Ok(count)
    }

    async fn commit(self) -> StoreResult<()> {
        let mut shared = self.shared.write().expect("lock poisoned");
        let mut working = self.working;
        // Sequences advanced by concurrent transactions must not move back.
        for (name, value) in shared.sequences.drain() {
            let last = working.sequences.entry(name).or_insert(0);
            *last = (*last).max(value);
        }
        *shared = working;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl EntityDirectory for InMemoryTransaction {
    async fn resolve_entity(
        &mut self,
        address: &EntityAddress,
        state_version: i64,
    ) -> StoreResult<ReferencedEntity> {
        if let Some(entity) = self.working.entities.get(address) {
            return Ok(entity.clone());
        }
        let id = EntityId(self.advance_shared(ENTITY_SEQUENCE));
        let entity = if address.is_global() {
            ReferencedEntity::new_global(address.clone(), id, state_version)
        } else {
            ReferencedEntity::new_internal(address.clone(), id, None, state_version)
        };
        self.working.entities.insert(address.clone(), entity.clone());
        Ok(entity)
    }
}
