use lix_store::{Column, ColumnType, ColumnValue, Row, StoreResult, TableSpec};
use lix_types::{EntityId, ResourcePreference, Substate, SubstateDomain};

use crate::aggregate::{AggregateDomain, AggregateTable, Classified, EntryRow, NoSingleton};
use crate::domains::parse_opt_label;
use crate::error::ProjectionResult;
use crate::resolver::EntityResolver;

const ENTRY_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("account_entity_id", ColumnType::Int8),
    Column::required("resource_entity_id", ColumnType::Int8),
    Column::nullable(
        "account_resource_preference_rule",
        ColumnType::Enum(ResourcePreference::STORE_TYPE),
    ),
    Column::required("is_deleted", ColumnType::Bool),
];

const AGGREGATE_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("account_entity_id", ColumnType::Int8),
    Column::required("entry_ids", ColumnType::Int8Array),
];

pub static RESOURCE_PREFERENCE_ENTRY_HISTORY: TableSpec =
    TableSpec::new("account_resource_preference_rule_entry_history", ENTRY_COLUMNS);

pub static RESOURCE_PREFERENCE_AGGREGATE_HISTORY: TableSpec =
    TableSpec::new("account_resource_preference_rule_aggregate_history", AGGREGATE_COLUMNS);

static RESOURCE_PREFERENCE_AGGREGATE: AggregateTable = AggregateTable {
    spec: &RESOURCE_PREFERENCE_AGGREGATE_HISTORY,
    entity_column: "account_entity_id",
    list_column: "entry_ids",
    singleton_column: None,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePreferenceEntryHistory {
    pub id: i64,
    pub from_state_version: i64,
    pub account_entity_id: EntityId,
    pub resource_entity_id: EntityId,
    pub preference: Option<ResourcePreference>,
}

impl EntryRow for ResourcePreferenceEntryHistory {
    type SubKey = EntityId;

    fn table() -> &'static TableSpec {
        &RESOURCE_PREFERENCE_ENTRY_HISTORY
    }

    fn key_columns() -> &'static [&'static str] {
        &["account_entity_id", "resource_entity_id"]
    }

    fn sub_key_values(resource: &EntityId) -> Vec<ColumnValue> {
        vec![(*resource).into()]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn entity_id(&self) -> EntityId {
        self.account_entity_id
    }

    fn sub_key(&self) -> EntityId {
        self.resource_entity_id
    }

    fn encode(&self) -> Row {
        vec![
            self.id.into(),
            self.from_state_version.into(),
            self.account_entity_id.into(),
            self.resource_entity_id.into(),
            self.preference.map(|p| ColumnValue::label(p.as_str())).into(),
            self.preference.is_none().into(),
        ]
    }

    fn decode(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            id: row[0].as_i64()?,
            from_state_version: row[1].as_i64()?,
            account_entity_id: row[2].as_entity_id()?,
            resource_entity_id: row[3].as_entity_id()?,
            preference: parse_opt_label(
                &RESOURCE_PREFERENCE_ENTRY_HISTORY,
                "account_resource_preference_rule",
                &row[4],
            )?,
        })
    }
}

/// A preference change with its resource already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePreferenceChange {
    pub resource_entity_id: EntityId,
    pub preference: Option<ResourcePreference>,
}

/// Per-resource deposit rules of an account.
pub struct ResourcePreferenceDomain;

impl AggregateDomain for ResourcePreferenceDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::ResourcePreference;

    type Change = ResourcePreferenceChange;
    type Entry = ResourcePreferenceEntryHistory;
    type Singleton = NoSingleton;

    fn aggregate_table() -> &'static AggregateTable {
        &RESOURCE_PREFERENCE_AGGREGATE
    }

    fn classify(
        substate: &Substate,
        resolver: &EntityResolver,
    ) -> ProjectionResult<Option<Classified<ResourcePreferenceChange, NoSingleton>>> {
        let Substate::ResourcePreference { resource, preference } = substate else {
            return Ok(None);
        };
        let resource = resolver.get_by_global_address(resource)?;
        Ok(Some(Classified::Entry(ResourcePreferenceChange {
            resource_entity_id: resource.database_id,
            preference: *preference,
        })))
    }

    fn sub_key(change: &ResourcePreferenceChange) -> EntityId {
        change.resource_entity_id
    }

    fn is_deletion(change: &ResourcePreferenceChange) -> bool {
        change.preference.is_none()
    }

    fn build_entry(
        id: i64,
        entity_id: EntityId,
        state_version: i64,
        change: &ResourcePreferenceChange,
    ) -> ResourcePreferenceEntryHistory {
        ResourcePreferenceEntryHistory {
            id,
            from_state_version: state_version,
            account_entity_id: entity_id,
            resource_entity_id: change.resource_entity_id,
            preference: change.preference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProjectionError;
    use lix_types::{EntityAddress, ReferencedEntity};

    fn addr(s: &str) -> EntityAddress {
        s.parse().unwrap()
    }

    #[test]
    fn resource_resolved_to_database_id() {
        let mut resolver = EntityResolver::new();
        resolver.insert(ReferencedEntity::new_global(addr("resource_xrd"), EntityId(40), 1));

        let substate = Substate::ResourcePreference {
            resource: addr("resource_xrd"),
            preference: Some(ResourcePreference::Disallowed),
        };
        let Some(Classified::Entry(change)) = ResourcePreferenceDomain::classify(&substate, &resolver).unwrap() else {
            panic!("expected an entry");
        };
        assert_eq!(change.resource_entity_id, EntityId(40));

        let entry = ResourcePreferenceDomain::build_entry(1, EntityId(7), 5, &change);
        let row = entry.encode();
        assert_eq!(row[4], ColumnValue::label("disallowed"));
        assert_eq!(ResourcePreferenceEntryHistory::decode(&row).unwrap(), entry);
    }

    #[test]
    fn unresolved_resource_is_not_found() {
        let substate = Substate::ResourcePreference {
            resource: addr("resource_unknown"),
            preference: None,
        };
        let err = ResourcePreferenceDomain::classify(&substate, &EntityResolver::new()).unwrap_err();
        assert!(matches!(err, ProjectionError::NotFound { kind: "global address", .. }));
    }

    #[test]
    fn aggregate_keyed_by_account() {
        assert_eq!(ResourcePreferenceDomain::aggregate_table().key_columns(), &["account_entity_id"]);
    }
}
