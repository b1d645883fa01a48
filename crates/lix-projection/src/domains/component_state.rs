use lix_store::{Column, ColumnType, Row, TableSpec};
use lix_types::{EntityId, Substate, SubstateDomain};
use serde_json::Value;

use crate::history::HistoryDomain;

const COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("json_state", ColumnType::Jsonb),
];

pub static STATE_HISTORY: TableSpec = TableSpec::new("state_history", COLUMNS);

/// Generic component state, stored as a JSON document per version.
pub struct ComponentStateDomain;

impl HistoryDomain for ComponentStateDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::ComponentState;

    type Change = Value;

    fn table() -> &'static TableSpec {
        &STATE_HISTORY
    }

    fn classify(substate: &Substate) -> Option<Value> {
        match substate {
            Substate::ComponentState { state } => Some(state.clone()),
            _ => None,
        }
    }

    fn encode(id: i64, entity_id: EntityId, state_version: i64, state: &Value) -> Row {
        vec![
            id.into(),
            state_version.into(),
            entity_id.into(),
            state.clone().into(),
        ]
    }
}
