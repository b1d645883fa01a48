//! Move-to-front aggregate projection.
//!
//! Each aggregate domain keeps two kinds of immutable history rows:
//!
//! - **entry rows**, one per substate event, recording a sub-key's value (or
//!   its deletion) at a state version;
//! - **aggregate rows**, one per (entity, state version) touched, listing the
//!   ids of the entity's live entry rows, most recently changed first.
//!
//! [`project`] turns grouped changes plus prior state into both, and
//! [`DomainProjector`] runs it against a store.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use lix_store::{
    ColumnValue, Row, StoreError, StoreResult, TableSpec, ID_COLUMN, STATE_VERSION_COLUMN,
};
use lix_types::{EntityId, ReferencedEntity, Substate, SubstateDomain};
use tracing::{debug, warn};

use crate::error::{ProjectionError, ProjectionResult};
use crate::loader::{load_most_recent, HistoryLookup};
use crate::projector::Projector;
use crate::resolver::EntityResolver;
use crate::sequences::SequenceAllocator;
use crate::session::Session;
use crate::sink::BulkSink;
use crate::tracker::ChangeTracker;

// ---------------------------------------------------------------------------
// Aggregate rows
// ---------------------------------------------------------------------------

/// Ordered entry ids, most recently changed first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateList(Vec<i64>);

impl AggregateList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap ids already in most-recent-first order.
    pub fn from_vec(ids: Vec<i64>) -> Self {
        Self(ids)
    }

    /// Ids, most recent first.
    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `id` is currently live in the list.
    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    /// Remove `id` wherever it sits. Returns `true` if it was present.
    pub fn remove_id(&mut self, id: i64) -> bool {
        match self.0.iter().position(|&x| x == id) {
            Some(pos) => {
                self.0.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Make `id` the most recently changed entry.
    pub fn push_front(&mut self, id: i64) {
        self.0.insert(0, id);
    }

    /// Unwrap into the raw id vector, preserving order.
    pub fn into_vec(self) -> Vec<i64> {
        self.0
    }
}

/// Snapshot of an entity's live entries as of one state version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateHistory {
    pub id: i64,
    pub from_state_version: i64,
    pub entity_id: EntityId,
    pub entry_ids: AggregateList,
    /// Id of the singleton facet row, for domains that have one.
    pub singleton_id: Option<i64>,
}

/// Column layout of a domain's aggregate table.
#[derive(Debug)]
pub struct AggregateTable {
    pub spec: &'static TableSpec,
    pub entity_column: &'static str,
    pub list_column: &'static str,
    pub singleton_column: Option<&'static str>,
}

impl AggregateTable {
    /// Columns a most-recent aggregate lookup is keyed by: just the entity.
    pub fn key_columns(&'static self) -> &'static [&'static str] {
        std::slice::from_ref(&self.entity_column)
    }

    /// Encode `aggregate` in the table's column order.
    pub fn encode(&self, aggregate: &AggregateHistory) -> StoreResult<Row> {
        self.spec
            .columns
            .iter()
            .map(|column| match column.name {
                ID_COLUMN => Ok(aggregate.id.into()),
                STATE_VERSION_COLUMN => Ok(aggregate.from_state_version.into()),
                name if name == self.entity_column => Ok(aggregate.entity_id.into()),
                name if name == self.list_column => {
                    Ok(ColumnValue::Int8Array(aggregate.entry_ids.as_slice().to_vec()))
                }
                name if Some(name) == self.singleton_column => Ok(aggregate.singleton_id.into()),
                name => Err(StoreError::UnknownColumn {
                    table: self.spec.name.to_string(),
                    column: name.to_string(),
                }),
            })
            .collect()
    }

    /// Decode a stored aggregate row, locating columns by name.
    pub fn decode(&self, row: &Row) -> StoreResult<AggregateHistory> {
        let at = |name: &str| self.spec.column_index(name).map(|i| &row[i]);
        let singleton_id = match self.singleton_column {
            Some(column) => at(column)?.opt_i64()?,
            None => None,
        };
        Ok(AggregateHistory {
            id: at(ID_COLUMN)?.as_i64()?,
            from_state_version: at(STATE_VERSION_COLUMN)?.as_i64()?,
            entity_id: at(self.entity_column)?.as_entity_id()?,
            entry_ids: AggregateList::from_vec(at(self.list_column)?.as_i64_array()?.to_vec()),
            singleton_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Domain description
// ---------------------------------------------------------------------------

/// An entry-history row type.
pub trait EntryRow: Clone + Debug + Send + Sync + 'static {
    /// What distinguishes two entries of the same entity.
    type SubKey: Clone + Debug + Eq + Hash + Send + Sync + 'static;

    fn table() -> &'static TableSpec;

    /// Entity column followed by the sub-key columns.
    fn key_columns() -> &'static [&'static str];

    fn sub_key_values(sub_key: &Self::SubKey) -> Vec<ColumnValue>;

    fn id(&self) -> i64;
    fn entity_id(&self) -> EntityId;
    fn sub_key(&self) -> Self::SubKey;
    fn encode(&self) -> Row;
    fn decode(row: &Row) -> StoreResult<Self>;
}

/// A singleton facet sharing the aggregate row with the list facet.
pub trait SingletonRow: Clone + Debug + Send + Sync + 'static {
    fn table() -> Option<&'static TableSpec>;
    fn encode(&self, id: i64, entity_id: EntityId, state_version: i64) -> Row;
}

/// Singleton type for domains without a singleton facet.
#[derive(Clone, Debug)]
pub enum NoSingleton {}

impl SingletonRow for NoSingleton {
    fn table() -> Option<&'static TableSpec> {
        None
    }

    fn encode(&self, _: i64, _: EntityId, _: i64) -> Row {
        match *self {}
    }
}

/// What a substate contributes to its domain.
#[derive(Clone, Debug, PartialEq)]
pub enum Classified<C, S> {
    Entry(C),
    Singleton(S),
}

/// A list-valued substate domain: sub-key extraction, row construction,
/// and the deletion predicate. The move-to-front algorithm is shared.
pub trait AggregateDomain: Send + Sync + 'static {
    const DOMAIN: SubstateDomain;

    type Change: Clone + Debug + Send + Sync;
    type Entry: EntryRow;
    type Singleton: SingletonRow;

    fn aggregate_table() -> &'static AggregateTable;

    /// `Ok(None)` if the substate is not a shape this domain handles.
    fn classify(
        substate: &Substate,
        resolver: &EntityResolver,
    ) -> ProjectionResult<Option<Classified<Self::Change, Self::Singleton>>>;

    fn sub_key(change: &Self::Change) -> SubKeyOf<Self>;

    fn is_deletion(change: &Self::Change) -> bool;

    fn build_entry(id: i64, entity_id: EntityId, state_version: i64, change: &Self::Change) -> Self::Entry;
}

pub type SubKeyOf<D> = <<D as AggregateDomain>::Entry as EntryRow>::SubKey;

// ---------------------------------------------------------------------------
// Grouped changes and prior state
// ---------------------------------------------------------------------------

/// Grouping key: one aggregate row per entity per state version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChangeLookup {
    pub entity_id: EntityId,
    pub state_version: i64,
}

/// Changes accumulated for one [`ChangeLookup`], in arrival order.
#[derive(Clone, Debug)]
pub struct ChangePointer<C, S> {
    pub entries: Vec<C>,
    pub singletons: Vec<S>,
}

impl<C, S> Default for ChangePointer<C, S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            singletons: Vec::new(),
        }
    }
}

/// One domain's changes grouped by [`ChangeLookup`], in first-seen order.
pub struct DomainChanges<D: AggregateDomain> {
    groups: ChangeTracker<ChangeLookup, ChangePointer<D::Change, D::Singleton>>,
}

impl<D: AggregateDomain> Default for DomainChanges<D> {
    fn default() -> Self {
        Self {
            groups: ChangeTracker::new(),
        }
    }
}

impl<D: AggregateDomain> DomainChanges<D> {
    /// No groups yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The group for `lookup`, created empty at the end of the order if new.
    pub fn group(&mut self, lookup: ChangeLookup) -> &mut ChangePointer<D::Change, D::Singleton> {
        self.groups.get_or_insert_with(lookup, ChangePointer::default)
    }

    /// Groups in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&ChangeLookup, &ChangePointer<D::Change, D::Singleton>)> {
        self.groups.iter()
    }

    /// Group keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &ChangeLookup> {
        self.groups.keys()
    }

    /// Number of (entity, state version) groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Clone, Debug)]
enum AggregateSlot {
    /// Loaded from the store, or finished by an earlier projection pass.
    Settled(AggregateHistory),
    /// Created by the running pass; index into its output.
    Pending(usize),
}

/// Most recent aggregate per entity and most recent entry per sub-key.
///
/// Starts from what the store holds and is updated as rows are projected,
/// so a later change in the same invocation sees the earlier one's result.
pub struct PriorState<D: AggregateDomain> {
    aggregates: HashMap<EntityId, AggregateSlot>,
    entries: HashMap<(EntityId, SubKeyOf<D>), D::Entry>,
}

impl<D: AggregateDomain> Default for PriorState<D> {
    fn default() -> Self {
        Self {
            aggregates: HashMap::new(),
            entries: HashMap::new(),
        }
    }
}

impl<D: AggregateDomain> PriorState<D> {
    /// Empty prior state: nothing loaded from the store yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stored aggregate as the entity's most recent one.
    pub fn insert_aggregate(&mut self, aggregate: AggregateHistory) {
        self.aggregates
            .insert(aggregate.entity_id, AggregateSlot::Settled(aggregate));
    }

    /// Record a stored entry as the most recent one for its sub-key.
    pub fn insert_entry(&mut self, entry: D::Entry) {
        self.entries
            .insert((entry.entity_id(), entry.sub_key()), entry);
    }

    /// The entity's most recent settled aggregate, if any.
    ///
    /// Aggregates still being built by a running pass are not visible.
    pub fn aggregate(&self, entity_id: EntityId) -> Option<&AggregateHistory> {
        match self.aggregates.get(&entity_id)? {
            AggregateSlot::Settled(aggregate) => Some(aggregate),
            AggregateSlot::Pending(_) => None,
        }
    }

    /// The most recent entry for `sub_key` under `entity_id`.
    pub fn entry(&self, entity_id: EntityId, sub_key: &SubKeyOf<D>) -> Option<&D::Entry> {
        self.entries.get(&(entity_id, sub_key.clone()))
    }

    /// Number of entities with a known aggregate.
    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// A singleton facet row.
#[derive(Clone, Debug, PartialEq)]
pub struct SingletonHistory<S> {
    pub id: i64,
    pub from_state_version: i64,
    pub entity_id: EntityId,
    pub value: S,
}

/// Rows produced by one projection pass, in allocation order.
pub struct ProjectedRows<D: AggregateDomain> {
    pub entries: Vec<D::Entry>,
    pub aggregates: Vec<AggregateHistory>,
    pub singletons: Vec<SingletonHistory<D::Singleton>>,
}

impl<D: AggregateDomain> Default for ProjectedRows<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            aggregates: Vec::new(),
            singletons: Vec::new(),
        }
    }
}

impl<D: AggregateDomain> ProjectedRows<D> {
    /// Total rows across entries, aggregates, and singleton facets.
    pub fn row_count(&self) -> usize {
        self.entries.len() + self.aggregates.len() + self.singletons.len()
    }
}

/// Apply the move-to-front algorithm to every group, in first-seen order.
///
/// A group whose entity has no aggregate at its state version gets a new
/// aggregate carrying the previous list forward; otherwise the aggregate
/// created earlier in this pass is updated in place. Each change then
/// yields one entry row: the sub-key's previous entry id is evicted from the
/// list and, unless the change is a deletion, the new id goes to the front.
pub fn project<D: AggregateDomain>(
    changes: &DomainChanges<D>,
    prior: &mut PriorState<D>,
    sequences: &SequenceAllocator,
) -> ProjectionResult<ProjectedRows<D>> {
    let table = D::aggregate_table();
    let mut out = ProjectedRows::<D>::default();

    for (lookup, pointer) in changes.iter() {
        let ChangeLookup {
            entity_id,
            state_version,
        } = *lookup;
        let violation = |reason: &str| ProjectionError::InvariantViolation {
            domain: D::DOMAIN.name(),
            entity_id,
            state_version,
            reason: reason.to_string(),
        };

        let mut new_singleton = None;
        if !pointer.singletons.is_empty() {
            let singleton_table = <D::Singleton as SingletonRow>::table()
                .ok_or_else(|| violation("singleton change in a domain without a singleton table"))?;
            for value in &pointer.singletons {
                let id = sequences.next(singleton_table)?;
                out.singletons.push(SingletonHistory {
                    id,
                    from_state_version: state_version,
                    entity_id,
                    value: value.clone(),
                });
                new_singleton = Some(id);
            }
        }

        let slot = prior.aggregates.get(&entity_id).cloned();
        let idx = match slot {
            Some(AggregateSlot::Pending(idx)) if out.aggregates[idx].from_state_version == state_version => {
                if new_singleton.is_some() {
                    out.aggregates[idx].singleton_id = new_singleton;
                }
                idx
            }
            Some(AggregateSlot::Settled(ref existing)) if existing.from_state_version == state_version => {
                return Err(violation("aggregate at this state version is already persisted"));
            }
            slot => {
                let previous = match &slot {
                    Some(AggregateSlot::Settled(aggregate)) => Some(aggregate),
                    Some(AggregateSlot::Pending(idx)) => Some(&out.aggregates[*idx]),
                    None => None,
                };
                let singleton_id = new_singleton.or_else(|| previous.and_then(|a| a.singleton_id));
                if table.singleton_column.is_some() && singleton_id.is_none() {
                    return Err(violation("no singleton established and none to carry forward"));
                }
                let aggregate = AggregateHistory {
                    id: sequences.next(table.spec)?,
                    from_state_version: state_version,
                    entity_id,
                    entry_ids: previous.map(|a| a.entry_ids.clone()).unwrap_or_default(),
                    singleton_id,
                };
                out.aggregates.push(aggregate);
                let idx = out.aggregates.len() - 1;
                prior.aggregates.insert(entity_id, AggregateSlot::Pending(idx));
                idx
            }
        };

        for change in &pointer.entries {
            let entry_id = sequences.next(<D::Entry as EntryRow>::table())?;
            let entry = D::build_entry(entry_id, entity_id, state_version, change);
            let key = (entity_id, D::sub_key(change));
            let aggregate = &mut out.aggregates[idx];
            if let Some(previous) = prior.entries.get(&key) {
                aggregate.entry_ids.remove_id(previous.id());
            }
            if !D::is_deletion(change) {
                aggregate.entry_ids.push_front(entry_id);
            }
            prior.entries.insert(key, entry.clone());
            out.entries.push(entry);
        }
    }

    for slot in prior.aggregates.values_mut() {
        if let AggregateSlot::Pending(idx) = *slot {
            *slot = AggregateSlot::Settled(out.aggregates[idx].clone());
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Store lookups
// ---------------------------------------------------------------------------

struct AggregateLookup(&'static AggregateTable);

impl HistoryLookup for AggregateLookup {
    type Key = EntityId;
    type Value = AggregateHistory;

    fn table(&self) -> &'static TableSpec {
        self.0.spec
    }

    fn key_columns(&self) -> &'static [&'static str] {
        self.0.key_columns()
    }

    fn key_values(&self, key: &EntityId) -> Vec<ColumnValue> {
        vec![(*key).into()]
    }

    fn decode(&self, row: &Row) -> StoreResult<(EntityId, AggregateHistory)> {
        let aggregate = self.0.decode(row)?;
        Ok((aggregate.entity_id, aggregate))
    }
}

struct EntryLookup<E>(PhantomData<fn() -> E>);

impl<E: EntryRow> HistoryLookup for EntryLookup<E> {
    type Key = (EntityId, E::SubKey);
    type Value = E;

    fn table(&self) -> &'static TableSpec {
        E::table()
    }

    fn key_columns(&self) -> &'static [&'static str] {
        E::key_columns()
    }

    fn key_values(&self, (entity_id, sub_key): &Self::Key) -> Vec<ColumnValue> {
        let mut values = vec![(*entity_id).into()];
        values.extend(E::sub_key_values(sub_key));
        values
    }

    fn decode(&self, row: &Row) -> StoreResult<(Self::Key, E)> {
        let entry = E::decode(row)?;
        Ok(((entry.entity_id(), entry.sub_key()), entry))
    }
}

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

/// Runs one aggregate domain through visit, load, process, and write.
pub struct DomainProjector<D: AggregateDomain> {
    changes: DomainChanges<D>,
    prior: PriorState<D>,
    output: ProjectedRows<D>,
    max_state_version: Option<i64>,
    max_aggregate_warn_len: usize,
}

impl<D: AggregateDomain> DomainProjector<D> {
    /// A projector with no pending changes. Aggregates whose list grows past
    /// `max_aggregate_warn_len` ids are logged at `warn`.
    pub fn new(max_aggregate_warn_len: usize) -> Self {
        Self {
            changes: DomainChanges::new(),
            prior: PriorState::new(),
            output: ProjectedRows::default(),
            max_state_version: None,
            max_aggregate_warn_len,
        }
    }

    /// Changes visited so far, grouped by entity and state version.
    pub fn changes(&self) -> &DomainChanges<D> {
        &self.changes
    }

    /// Prior state as loaded and updated by the last [`project`] pass.
    pub fn prior(&self) -> &PriorState<D> {
        &self.prior
    }

    /// Rows produced by the last `process` call.
    pub fn output(&self) -> &ProjectedRows<D> {
        &self.output
    }
}

#[async_trait]
impl<D: AggregateDomain> Projector for DomainProjector<D> {
    fn domain(&self) -> SubstateDomain {
        D::DOMAIN
    }

    fn tables(&self) -> Vec<&'static TableSpec> {
        let mut tables = vec![<D::Entry as EntryRow>::table(), D::aggregate_table().spec];
        tables.extend(<D::Singleton as SingletonRow>::table());
        tables
    }

    fn visit(
        &mut self,
        state_version: i64,
        entity: &ReferencedEntity,
        substate: &Substate,
        resolver: &EntityResolver,
    ) -> ProjectionResult<()> {
        let classified = D::classify(substate, resolver)?.ok_or_else(|| {
            ProjectionError::UnsupportedSubstateShape {
                domain: D::DOMAIN.name(),
                entity: entity.address.clone(),
                state_version,
                type_name: substate.type_name(),
            }
        })?;
        let lookup = ChangeLookup {
            entity_id: entity.database_id,
            state_version,
        };
        let pointer = self.changes.group(lookup);
        match classified {
            Classified::Entry(change) => pointer.entries.push(change),
            Classified::Singleton(value) => pointer.singletons.push(value),
        }
        self.max_state_version = self.max_state_version.max(Some(state_version));
        Ok(())
    }

    async fn load_prior_state(&mut self, session: &mut Session<'_>) -> ProjectionResult<()> {
        let entity_ids: Vec<EntityId> = self.changes.keys().map(|k| k.entity_id).collect();
        let entry_keys: Vec<(EntityId, SubKeyOf<D>)> = self
            .changes
            .iter()
            .flat_map(|(lookup, pointer)| {
                pointer
                    .entries
                    .iter()
                    .map(move |change| (lookup.entity_id, D::sub_key(change)))
            })
            .collect();
        let bound = self.max_state_version;

        let aggregates = load_most_recent(
            session,
            &AggregateLookup(D::aggregate_table()),
            entity_ids,
            bound,
        )
        .await?;
        let entries = load_most_recent(
            session,
            &EntryLookup::<D::Entry>(PhantomData),
            entry_keys,
            bound,
        )
        .await?;

        for aggregate in aggregates.into_values() {
            self.prior.insert_aggregate(aggregate);
        }
        for entry in entries.into_values() {
            self.prior.insert_entry(entry);
        }
        Ok(())
    }

    fn process(&mut self, sequences: &SequenceAllocator) -> ProjectionResult<()> {
        self.output = project(&self.changes, &mut self.prior, sequences)?;
        for aggregate in &self.output.aggregates {
            if aggregate.entry_ids.len() > self.max_aggregate_warn_len {
                warn!(
                    domain = D::DOMAIN.name(),
                    entity_id = %aggregate.entity_id,
                    state_version = aggregate.from_state_version,
                    len = aggregate.entry_ids.len(),
                    "aggregate list exceeds warning threshold"
                );
            }
        }
        debug!(
            domain = D::DOMAIN.name(),
            groups = self.changes.len(),
            rows = self.output.row_count(),
            "domain processed"
        );
        Ok(())
    }

    async fn write(&mut self, session: &mut Session<'_>, sink: &mut BulkSink) -> ProjectionResult<()> {
        let table = D::aggregate_table();
        sink.write_batch(session, <D::Entry as EntryRow>::table(), &self.output.entries, |e| {
            Ok(e.encode())
        })
        .await?;
        sink.write_batch(session, table.spec, &self.output.aggregates, |a| table.encode(a))
            .await?;
        if let Some(singleton_table) = <D::Singleton as SingletonRow>::table() {
            sink.write_batch(session, singleton_table, &self.output.singletons, |s| {
                Ok(s.value.encode(s.id, s.entity_id, s.from_state_version))
            })
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lix_store::{Column, ColumnType};
    use proptest::prelude::*;

    // A minimal list domain: string sub-keys, optional text values.

    const ENTRY_COLUMNS: &[Column] = &[
        Column::required("id", ColumnType::Int8),
        Column::required("from_state_version", ColumnType::Int8),
        Column::required("entity_id", ColumnType::Int8),
        Column::required("key", ColumnType::Text),
        Column::nullable("value", ColumnType::Text),
        Column::required("is_deleted", ColumnType::Bool),
    ];
    static ENTRIES: TableSpec = TableSpec::new("test_entry_history", ENTRY_COLUMNS);

    const AGGREGATE_COLUMNS: &[Column] = &[
        Column::required("id", ColumnType::Int8),
        Column::required("from_state_version", ColumnType::Int8),
        Column::required("entity_id", ColumnType::Int8),
        Column::required("entry_ids", ColumnType::Int8Array),
    ];
    static AGGREGATE_SPEC: TableSpec = TableSpec::new("test_aggregate_history", AGGREGATE_COLUMNS);
    static AGGREGATES: AggregateTable = AggregateTable {
        spec: &AGGREGATE_SPEC,
        entity_column: "entity_id",
        list_column: "entry_ids",
        singleton_column: None,
    };

    #[derive(Clone, Debug, PartialEq)]
    struct Entry {
        id: i64,
        from_state_version: i64,
        entity_id: EntityId,
        key: String,
        value: Option<String>,
    }

    impl EntryRow for Entry {
        type SubKey = String;

        fn table() -> &'static TableSpec {
            &ENTRIES
        }

        fn key_columns() -> &'static [&'static str] {
            &["entity_id", "key"]
        }

        fn sub_key_values(sub_key: &String) -> Vec<ColumnValue> {
            vec![sub_key.as_str().into()]
        }

        fn id(&self) -> i64 {
            self.id
        }

        fn entity_id(&self) -> EntityId {
            self.entity_id
        }

        fn sub_key(&self) -> String {
            self.key.clone()
        }

        fn encode(&self) -> Row {
            vec![
                self.id.into(),
                self.from_state_version.into(),
                self.entity_id.into(),
                self.key.as_str().into(),
                self.value.clone().into(),
                self.value.is_none().into(),
            ]
        }

        fn decode(row: &Row) -> StoreResult<Self> {
            Ok(Self {
                id: row[0].as_i64()?,
                from_state_version: row[1].as_i64()?,
                entity_id: row[2].as_entity_id()?,
                key: row[3].as_str()?.to_string(),
                value: row[4].opt_str()?.map(str::to_string),
            })
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Change {
        key: String,
        value: Option<String>,
    }

    struct TestDomain;

    impl AggregateDomain for TestDomain {
        const DOMAIN: SubstateDomain = SubstateDomain::Metadata;
        type Change = Change;
        type Entry = Entry;
        type Singleton = NoSingleton;

        fn aggregate_table() -> &'static AggregateTable {
            &AGGREGATES
        }

        fn classify(
            _: &Substate,
            _: &EntityResolver,
        ) -> ProjectionResult<Option<Classified<Change, NoSingleton>>> {
            Ok(None)
        }

        fn sub_key(change: &Change) -> String {
            change.key.clone()
        }

        fn is_deletion(change: &Change) -> bool {
            change.value.is_none()
        }

        fn build_entry(id: i64, entity_id: EntityId, state_version: i64, change: &Change) -> Entry {
            Entry {
                id,
                from_state_version: state_version,
                entity_id,
                key: change.key.clone(),
                value: change.value.clone(),
            }
        }
    }

    fn set(key: &str, value: &str) -> Change {
        Change {
            key: key.to_string(),
            value: Some(value.to_string()),
        }
    }

    fn delete(key: &str) -> Change {
        Change {
            key: key.to_string(),
            value: None,
        }
    }

    fn sequences(entry_start: i64, aggregate_start: i64) -> SequenceAllocator {
        SequenceAllocator::from_values([(&ENTRIES, entry_start), (&AGGREGATE_SPEC, aggregate_start)])
    }

    fn track(events: &[(i64, i64, Change)]) -> DomainChanges<TestDomain> {
        let mut changes = DomainChanges::<TestDomain>::new();
        for (entity, version, change) in events {
            let lookup = ChangeLookup {
                entity_id: EntityId(*entity),
                state_version: *version,
            };
            changes.group(lookup).entries.push(change.clone());
        }
        changes
    }

    fn run(
        events: &[(i64, i64, Change)],
        prior: &mut PriorState<TestDomain>,
    ) -> ProjectedRows<TestDomain> {
        project(&track(events), prior, &sequences(1, 1)).unwrap()
    }

    fn ids(aggregate: &AggregateHistory) -> Vec<i64> {
        aggregate.entry_ids.as_slice().to_vec()
    }

    // -----------------------------------------------------------------------
    // AggregateList
    // -----------------------------------------------------------------------

    #[test]
    fn list_surgery() {
        let mut list = AggregateList::from_vec(vec![3, 2, 1]);
        assert!(list.remove_id(2));
        assert!(!list.remove_id(9));
        list.push_front(4);
        assert_eq!(list.as_slice(), &[4, 3, 1]);
        assert!(list.contains(1));
    }

    // -----------------------------------------------------------------------
    // Move-to-front
    // -----------------------------------------------------------------------

    #[test]
    fn distinct_keys_in_reverse_order() {
        let mut prior = PriorState::<TestDomain>::new();
        let out = run(
            &[(7, 10, set("a", "1")), (7, 10, set("b", "2")), (7, 10, set("c", "3"))],
            &mut prior,
        );
        assert_eq!(out.entries.len(), 3);
        assert_eq!(out.aggregates.len(), 1);
        assert_eq!(ids(&out.aggregates[0]), vec![3, 2, 1]);
    }

    #[test]
    fn retouch_moves_to_front() {
        let mut prior = PriorState::<TestDomain>::new();
        let out = run(
            &[(7, 10, set("a", "1")), (7, 10, set("b", "2")), (7, 10, set("a", "3"))],
            &mut prior,
        );
        // Earlier "a" (id 1) evicted; both of its rows remain in history.
        assert_eq!(ids(&out.aggregates[0]), vec![3, 2]);
        assert_eq!(out.entries.len(), 3);
        assert_eq!(prior.entry(EntityId(7), &"a".to_string()).unwrap().id, 3);
    }

    #[test]
    fn deletion_removes_but_records() {
        let mut prior = PriorState::<TestDomain>::new();
        let out = run(&[(7, 10, set("a", "1")), (7, 10, delete("a"))], &mut prior);
        assert!(out.aggregates[0].entry_ids.is_empty());
        assert_eq!(out.entries.len(), 2);
        assert_eq!(out.entries[1].value, None);
        assert!(out.entries[1].encode()[5] == ColumnValue::Bool(true));
    }

    #[test]
    fn carry_forward_creates_new_row_per_version() {
        let mut prior = PriorState::<TestDomain>::new();
        let out = run(
            &[(7, 10, set("a", "1")), (7, 11, set("b", "2")), (7, 11, set("a", "3"))],
            &mut prior,
        );
        assert_eq!(out.aggregates.len(), 2);
        let (v10, v11) = (&out.aggregates[0], &out.aggregates[1]);
        assert_eq!((v10.from_state_version, ids(v10)), (10, vec![1]));
        assert_eq!((v11.from_state_version, ids(v11)), (11, vec![3, 2]));
        assert_ne!(v10.id, v11.id);
    }

    #[test]
    fn same_version_coalesces_across_groups() {
        // Two entities interleaved: each entity still gets one aggregate.
        let mut prior = PriorState::<TestDomain>::new();
        let out = run(
            &[(7, 10, set("a", "1")), (8, 10, set("a", "2")), (7, 10, set("b", "3"))],
            &mut prior,
        );
        assert_eq!(out.aggregates.len(), 2);
        // Ids follow group order, not event order.
        assert_eq!(ids(&out.aggregates[0]), vec![2, 1]);
        assert_eq!(ids(&out.aggregates[1]), vec![3]);
    }

    #[test]
    fn metadata_scenario_from_prior_state() {
        // Version 10 already stored: aggregate [e1], entry e1 = name.
        let mut prior = PriorState::<TestDomain>::new();
        prior.insert_aggregate(AggregateHistory {
            id: 1,
            from_state_version: 10,
            entity_id: EntityId(1),
            entry_ids: AggregateList::from_vec(vec![1]),
            singleton_id: None,
        });
        prior.insert_entry(Entry {
            id: 1,
            from_state_version: 10,
            entity_id: EntityId(1),
            key: "name".into(),
            value: Some("x".into()),
        });

        let out = project(
            &track(&[(1, 11, delete("name")), (1, 11, set("icon", "y"))]),
            &mut prior,
            &sequences(2, 2),
        )
        .unwrap();

        assert_eq!(out.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(out.entries[0].value, None);
        assert_eq!(out.aggregates.len(), 1);
        assert_eq!(out.aggregates[0].from_state_version, 11);
        assert_eq!(ids(&out.aggregates[0]), vec![3]);
        // The stored row at version 10 is untouched.
        assert_eq!(prior.aggregate(EntityId(1)).unwrap().id, 2);
    }

    #[test]
    fn persisted_aggregate_at_same_version_is_rejected() {
        let mut prior = PriorState::<TestDomain>::new();
        prior.insert_aggregate(AggregateHistory {
            id: 1,
            from_state_version: 10,
            entity_id: EntityId(1),
            entry_ids: AggregateList::new(),
            singleton_id: None,
        });
        let err = project(&track(&[(1, 10, set("a", "1"))]), &mut prior, &sequences(1, 2))
            .err()
            .expect("same-version write must fail");
        assert!(matches!(err, ProjectionError::InvariantViolation { state_version: 10, .. }));
    }

    #[test]
    fn empty_changes_allocate_nothing() {
        let seq = sequences(1, 1);
        let mut prior = PriorState::<TestDomain>::new();
        let out = project(&DomainChanges::new(), &mut prior, &seq).unwrap();
        assert_eq!(out.row_count(), 0);
        assert_eq!(seq.total_allocated(), 0);
    }

    // -----------------------------------------------------------------------
    // Aggregate table codec
    // -----------------------------------------------------------------------

    #[test]
    fn aggregate_table_roundtrip() {
        let aggregate = AggregateHistory {
            id: 5,
            from_state_version: 12,
            entity_id: EntityId(3),
            entry_ids: AggregateList::from_vec(vec![9, 4]),
            singleton_id: None,
        };
        let row = AGGREGATES.encode(&aggregate).unwrap();
        assert_eq!(row[3], ColumnValue::Int8Array(vec![9, 4]));
        assert_eq!(AGGREGATES.decode(&row).unwrap(), aggregate);
        assert_eq!(AGGREGATES.key_columns(), &["entity_id"]);
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn key_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
    }

    fn change_strategy() -> impl Strategy<Value = Change> {
        (key_strategy(), prop::option::weighted(0.8, "[a-z]{1,4}")).prop_map(|(key, value)| Change { key, value })
    }

    proptest! {
        #[test]
        fn distinct_upserts_reverse_order(n in 1usize..20) {
            let events: Vec<_> = (0..n).map(|i| (1, 10, set(&format!("k{i}"), "v"))).collect();
            let out = run(&events, &mut PriorState::<TestDomain>::new());
            let expected: Vec<i64> = (1..=n as i64).rev().collect();
            prop_assert_eq!(ids(&out.aggregates[0]), expected);
        }

        #[test]
        fn list_matches_latest_live_entry_per_key(
            changes in prop::collection::vec((1i64..4, change_strategy()), 1..40)
        ) {
            // Versions increase every few events so both coalescing and
            // carry-forward are exercised.
            let events: Vec<_> = changes
                .iter()
                .enumerate()
                .map(|(i, (v, c))| (1, 10 + (i as i64 / 3) * v, c.clone()))
                .collect();
            let mut sorted = events.clone();
            sorted.sort_by_key(|(_, v, _)| *v);
            let out = run(&sorted, &mut PriorState::<TestDomain>::new());

            // Expected: replay in group order, keep latest id per key, drop deleted.
            let mut latest: Vec<(String, i64, bool)> = Vec::new();
            for entry in &out.entries {
                latest.retain(|(k, _, _)| *k != entry.key);
                latest.insert(0, (entry.key.clone(), entry.id, entry.value.is_none()));
            }
            let expected: Vec<i64> = latest.iter().filter(|(_, _, del)| !del).map(|(_, id, _)| *id).collect();
            let last = out.aggregates.last().unwrap();
            prop_assert_eq!(ids(last), expected);

            // No duplicates, one aggregate per distinct version.
            let mut seen = ids(last);
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), last.entry_ids.len());
            let mut versions: Vec<i64> = sorted.iter().map(|(_, v, _)| *v).collect();
            versions.dedup();
            prop_assert_eq!(out.aggregates.len(), versions.len());
        }

        #[test]
        fn ids_unique_and_increasing(
            changes in prop::collection::vec((1i64..5, change_strategy()), 0..40)
        ) {
            let events: Vec<_> = changes.iter().map(|(e, c)| (*e, 10, c.clone())).collect();
            let out = run(&events, &mut PriorState::<TestDomain>::new());
            let entry_ids: Vec<i64> = out.entries.iter().map(|e| e.id).collect();
            prop_assert!(entry_ids.windows(2).all(|w| w[0] < w[1]));
            let aggregate_ids: Vec<i64> = out.aggregates.iter().map(|a| a.id).collect();
            prop_assert!(aggregate_ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
