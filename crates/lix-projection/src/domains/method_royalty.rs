use lix_store::{Column, ColumnType, ColumnValue, Row, StoreResult, TableSpec};
use lix_types::{EntityId, Substate, SubstateDomain};
use serde_json::Value;

use crate::aggregate::{AggregateDomain, AggregateTable, Classified, EntryRow, NoSingleton};
use crate::error::ProjectionResult;
use crate::resolver::EntityResolver;

const ENTRY_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("method_name", ColumnType::Text),
    Column::nullable("royalty_amount", ColumnType::Jsonb),
    Column::required("is_locked", ColumnType::Bool),
];

const AGGREGATE_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("entry_ids", ColumnType::Int8Array),
];

pub static METHOD_ROYALTY_ENTRY_HISTORY: TableSpec =
    TableSpec::new("component_method_royalty_entry_history", ENTRY_COLUMNS);

pub static METHOD_ROYALTY_AGGREGATE_HISTORY: TableSpec =
    TableSpec::new("component_method_royalty_aggregate_history", AGGREGATE_COLUMNS);

static METHOD_ROYALTY_AGGREGATE: AggregateTable = AggregateTable {
    spec: &METHOD_ROYALTY_AGGREGATE_HISTORY,
    entity_column: "entity_id",
    list_column: "entry_ids",
    singleton_column: None,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodRoyaltyEntryHistory {
    pub id: i64,
    pub from_state_version: i64,
    pub entity_id: EntityId,
    pub method_name: String,
    /// `None` once the method's royalty is removed.
    pub royalty_amount: Option<Value>,
    pub is_locked: bool,
}

impl EntryRow for MethodRoyaltyEntryHistory {
    type SubKey = String;

    fn table() -> &'static TableSpec {
        &METHOD_ROYALTY_ENTRY_HISTORY
    }

    fn key_columns() -> &'static [&'static str] {
        &["entity_id", "method_name"]
    }

    fn sub_key_values(method_name: &String) -> Vec<ColumnValue> {
        vec![method_name.as_str().into()]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    fn sub_key(&self) -> String {
        self.method_name.clone()
    }

    fn encode(&self) -> Row {
        vec![
            self.id.into(),
            self.from_state_version.into(),
            self.entity_id.into(),
            self.method_name.as_str().into(),
            self.royalty_amount.clone().into(),
            self.is_locked.into(),
        ]
    }

    fn decode(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            id: row[0].as_i64()?,
            from_state_version: row[1].as_i64()?,
            entity_id: row[2].as_entity_id()?,
            method_name: row[3].as_str()?.to_string(),
            royalty_amount: row[4].opt_json()?,
            is_locked: row[5].as_bool()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodRoyaltyChange {
    pub method_name: String,
    pub royalty_amount: Option<Value>,
    pub is_locked: bool,
}

/// Per-method component royalties.
pub struct MethodRoyaltyDomain;

impl AggregateDomain for MethodRoyaltyDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::MethodRoyalty;

    type Change = MethodRoyaltyChange;
    type Entry = MethodRoyaltyEntryHistory;
    type Singleton = NoSingleton;

    fn aggregate_table() -> &'static AggregateTable {
        &METHOD_ROYALTY_AGGREGATE
    }

    fn classify(
        substate: &Substate,
        _resolver: &EntityResolver,
    ) -> ProjectionResult<Option<Classified<MethodRoyaltyChange, NoSingleton>>> {
        Ok(match substate {
            Substate::MethodRoyalty {
                method_name,
                royalty_amount,
                is_locked,
            } => Some(Classified::Entry(MethodRoyaltyChange {
                method_name: method_name.clone(),
                royalty_amount: royalty_amount.clone(),
                is_locked: *is_locked,
            })),
            _ => None,
        })
    }

    fn sub_key(change: &MethodRoyaltyChange) -> String {
        change.method_name.clone()
    }

    fn is_deletion(change: &MethodRoyaltyChange) -> bool {
        change.royalty_amount.is_none()
    }

    fn build_entry(
        id: i64,
        entity_id: EntityId,
        state_version: i64,
        change: &MethodRoyaltyChange,
    ) -> MethodRoyaltyEntryHistory {
        MethodRoyaltyEntryHistory {
            id,
            from_state_version: state_version,
            entity_id,
            method_name: change.method_name.clone(),
            royalty_amount: change.royalty_amount.clone(),
            is_locked: change.is_locked,
        }
    }
}
