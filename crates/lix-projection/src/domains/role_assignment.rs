use lix_store::{Column, ColumnType, ColumnValue, Row, StoreResult, TableSpec};
use lix_types::{EntityId, ModuleId, Substate, SubstateDomain};
use serde_json::Value;

use crate::aggregate::{AggregateDomain, AggregateTable, Classified, EntryRow, SingletonRow};
use crate::domains::parse_label;
use crate::error::ProjectionResult;
use crate::resolver::EntityResolver;

const ENTRY_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("key_role", ColumnType::Text),
    Column::required("key_module", ColumnType::Enum(ModuleId::STORE_TYPE)),
    Column::nullable("role_assignments", ColumnType::Jsonb),
    Column::required("is_deleted", ColumnType::Bool),
];

const OWNER_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("role_assignments", ColumnType::Jsonb),
];

const AGGREGATE_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("entity_id", ColumnType::Int8),
    Column::required("owner_role_id", ColumnType::Int8),
    Column::required("entry_ids", ColumnType::Int8Array),
];

pub static ROLE_ASSIGNMENT_ENTRY_HISTORY: TableSpec =
    TableSpec::new("entity_role_assignments_entry_history", ENTRY_COLUMNS);

pub static OWNER_ROLE_HISTORY: TableSpec =
    TableSpec::new("entity_role_assignments_owner_role_history", OWNER_COLUMNS);

pub static ROLE_ASSIGNMENT_AGGREGATE_HISTORY: TableSpec =
    TableSpec::new("entity_role_assignments_aggregate_history", AGGREGATE_COLUMNS);

static ROLE_ASSIGNMENT_AGGREGATE: AggregateTable = AggregateTable {
    spec: &ROLE_ASSIGNMENT_AGGREGATE_HISTORY,
    entity_column: "entity_id",
    list_column: "entry_ids",
    singleton_column: Some("owner_role_id"),
};

/// A role rule set or removed at one state version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleAssignmentEntryHistory {
    pub id: i64,
    pub from_state_version: i64,
    pub entity_id: EntityId,
    pub key_role: String,
    pub key_module: ModuleId,
    /// `None` records a deletion.
    pub role_assignments: Option<Value>,
}

impl EntryRow for RoleAssignmentEntryHistory {
    type SubKey = (String, ModuleId);

    fn table() -> &'static TableSpec {
        &ROLE_ASSIGNMENT_ENTRY_HISTORY
    }

    fn key_columns() -> &'static [&'static str] {
        &["entity_id", "key_role", "key_module"]
    }

    fn sub_key_values((role, module): &(String, ModuleId)) -> Vec<ColumnValue> {
        vec![role.as_str().into(), ColumnValue::label(module.as_str())]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    fn sub_key(&self) -> (String, ModuleId) {
        (self.key_role.clone(), self.key_module)
    }

    fn encode(&self) -> Row {
        vec![
            self.id.into(),
            self.from_state_version.into(),
            self.entity_id.into(),
            self.key_role.as_str().into(),
            ColumnValue::label(self.key_module.as_str()),
            self.role_assignments.clone().into(),
            self.role_assignments.is_none().into(),
        ]
    }

    fn decode(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            id: row[0].as_i64()?,
            from_state_version: row[1].as_i64()?,
            entity_id: row[2].as_entity_id()?,
            key_role: row[3].as_str()?.to_string(),
            key_module: parse_label(&ROLE_ASSIGNMENT_ENTRY_HISTORY, "key_module", &row[4])?,
            role_assignments: row[5].opt_json()?,
        })
    }
}

/// The owner role of an entity. Every role-assignment aggregate points at one.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnerRole(pub Value);

impl SingletonRow for OwnerRole {
    fn table() -> Option<&'static TableSpec> {
        Some(&OWNER_ROLE_HISTORY)
    }

    fn encode(&self, id: i64, entity_id: EntityId, state_version: i64) -> Row {
        vec![
            id.into(),
            state_version.into(),
            entity_id.into(),
            self.0.clone().into(),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoleAssignmentChange {
    pub role_key: String,
    pub module: ModuleId,
    pub rule: Option<Value>,
}

/// Access rules: one list entry per (role, module), plus the owner role.
pub struct RoleAssignmentDomain;

impl AggregateDomain for RoleAssignmentDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::RoleAssignment;

    type Change = RoleAssignmentChange;
    type Entry = RoleAssignmentEntryHistory;
    type Singleton = OwnerRole;

    fn aggregate_table() -> &'static AggregateTable {
        &ROLE_ASSIGNMENT_AGGREGATE
    }

    fn classify(
        substate: &Substate,
        _resolver: &EntityResolver,
    ) -> ProjectionResult<Option<Classified<RoleAssignmentChange, OwnerRole>>> {
        Ok(match substate {
            Substate::RoleAssignmentOwner { owner_role } => Some(Classified::Singleton(OwnerRole(owner_role.clone()))),
            Substate::RoleAssignmentRule { role_key, module, rule } => Some(Classified::Entry(RoleAssignmentChange {
                role_key: role_key.clone(),
                module: *module,
                rule: rule.clone(),
            })),
            _ => None,
        })
    }

    fn sub_key(change: &RoleAssignmentChange) -> (String, ModuleId) {
        (change.role_key.clone(), change.module)
    }

    fn is_deletion(change: &RoleAssignmentChange) -> bool {
        change.rule.is_none()
    }

    fn build_entry(
        id: i64,
        entity_id: EntityId,
        state_version: i64,
        change: &RoleAssignmentChange,
    ) -> RoleAssignmentEntryHistory {
        RoleAssignmentEntryHistory {
            id,
            from_state_version: state_version,
            entity_id,
            key_role: change.role_key.clone(),
            key_module: change.module,
            role_assignments: change.rule.clone(),
        }
    }
}
