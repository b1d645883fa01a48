use lix_store::{Column, ColumnType, ColumnValue, Row, StoreResult, TableSpec};
use lix_types::{EntityId, Substate, SubstateDomain};

use crate::aggregate::{AggregateDomain, AggregateTable, Classified, EntryRow, NoSingleton};
use crate::error::ProjectionResult;
use crate::resolver::EntityResolver;

const ENTRY_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("key", ColumnType::Text),
    Column::nullable("value", ColumnType::Bytea),
    Column::required("is_deleted", ColumnType::Bool),
    Column::required("is_locked", ColumnType::Bool),
];

const AGGREGATE_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("entry_ids", ColumnType::Int8Array),
];

pub static METADATA_ENTRY_HISTORY: TableSpec = TableSpec::new("entity_metadata_entry_history", ENTRY_COLUMNS);

pub static METADATA_AGGREGATE_HISTORY: TableSpec =
    TableSpec::new("entity_metadata_aggregate_history", AGGREGATE_COLUMNS);

static METADATA_AGGREGATE: AggregateTable = AggregateTable {
    spec: &METADATA_AGGREGATE_HISTORY,
    entity_column: "entity_id",
    list_column: "entry_ids",
    singleton_column: None,
};

/// A metadata key set or removed at one state version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntryHistory {
    pub id: i64,
    pub from_state_version: i64,
    pub entity_id: EntityId,
    pub key: String,
    /// `None` records a deletion.
    pub value: Option<Vec<u8>>,
    pub is_locked: bool,
}

impl EntryRow for MetadataEntryHistory {
    type SubKey = String;

    fn table() -> &'static TableSpec {
        &METADATA_ENTRY_HISTORY
    }

    fn key_columns() -> &'static [&'static str] {
        &["entity_id", "key"]
    }

    fn sub_key_values(key: &String) -> Vec<ColumnValue> {
        vec![key.as_str().into()]
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
            self.is_locked.into(),
        ]
    }

    fn decode(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            id: row[0].as_i64()?,
            from_state_version: row[1].as_i64()?,
            entity_id: row[2].as_entity_id()?,
            key: row[3].as_str()?.to_string(),
            value: row[4].opt_bytes()?,
            is_locked: row[6].as_bool()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataChange {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub is_locked: bool,
}

/// Entity metadata: one list entry per key.
pub struct MetadataDomain;

impl AggregateDomain for MetadataDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::Metadata;

    type Change = MetadataChange;
    type Entry = MetadataEntryHistory;
    type Singleton = NoSingleton;

    fn aggregate_table() -> &'static AggregateTable {
        &METADATA_AGGREGATE
    }

    fn classify(
        substate: &Substate,
        _resolver: &EntityResolver,
    ) -> ProjectionResult<Option<Classified<MetadataChange, NoSingleton>>> {
        Ok(match substate {
            Substate::MetadataEntry { key, value, is_locked } => Some(Classified::Entry(MetadataChange {
                key: key.clone(),
                value: value.clone(),
                is_locked: *is_locked,
            })),
            _ => None,
        })
    }

    fn sub_key(change: &MetadataChange) -> String {
        change.key.clone()
    }

    fn is_deletion(change: &MetadataChange) -> bool {
        change.value.is_none()
    }

    fn build_entry(id: i64, entity_id: EntityId, state_version: i64, change: &MetadataChange) -> MetadataEntryHistory {
        MetadataEntryHistory {
            id,
            from_state_version: state_version,
            entity_id,
            key: change.key.clone(),
            value: change.value.clone(),
            is_locked: change.is_locked,
        }
    }
}
