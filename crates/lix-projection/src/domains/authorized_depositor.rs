use lix_store::{Column, ColumnType, ColumnValue, Row, StoreResult, TableSpec};
use lix_types::{BadgeType, DepositorBadge, EntityId, Substate, SubstateDomain};

use crate::aggregate::{AggregateDomain, AggregateTable, Classified, EntryRow, NoSingleton};
use crate::domains::parse_label;
use crate::error::ProjectionResult;
use crate::resolver::EntityResolver;

const ENTRY_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("account_entity_id", ColumnType::Int8),
    Column::required("is_deleted", ColumnType::Bool),
    Column::required("discriminator", ColumnType::Enum(BadgeType::STORE_TYPE)),
    Column::required("resource_entity_id", ColumnType::Int8),
    Column::nullable("non_fungible_id", ColumnType::Text),
];

const AGGREGATE_COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("account_entity_id", ColumnType::Int8),
    Column::required("entry_ids", ColumnType::Int8Array),
];

pub static AUTHORIZED_DEPOSITOR_ENTRY_HISTORY: TableSpec =
    TableSpec::new("account_authorized_depositor_entry_history", ENTRY_COLUMNS);

pub static AUTHORIZED_DEPOSITOR_AGGREGATE_HISTORY: TableSpec =
    TableSpec::new("account_authorized_depositor_aggregate_history", AGGREGATE_COLUMNS);

static AUTHORIZED_DEPOSITOR_AGGREGATE: AggregateTable = AggregateTable {
    spec: &AUTHORIZED_DEPOSITOR_AGGREGATE_HISTORY,
    entity_column: "account_entity_id",
    list_column: "entry_ids",
    singleton_column: None,
};

/// A depositor badge with its resource resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DepositorKey {
    Resource(EntityId),
    NonFungible(EntityId, String),
}

impl DepositorKey {
    /// Resolved id of the badge's resource.
    pub fn resource_entity_id(&self) -> EntityId {
        match self {
            Self::Resource(resource) | Self::NonFungible(resource, _) => *resource,
        }
    }

    /// Value written to the `discriminator` column.
    pub fn badge_type(&self) -> BadgeType {
        match self {
            Self::Resource(_) => BadgeType::Resource,
            Self::NonFungible(..) => BadgeType::NonFungible,
        }
    }

    /// Local id of a non-fungible badge; `None` for resource badges.
    pub fn non_fungible_id(&self) -> Option<&str> {
        match self {
            Self::Resource(_) => None,
            Self::NonFungible(_, local_id) => Some(local_id.as_str()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizedDepositorEntryHistory {
    pub id: i64,
    pub from_state_version: i64,
    pub account_entity_id: EntityId,
    pub key: DepositorKey,
    pub is_deleted: bool,
}

impl EntryRow for AuthorizedDepositorEntryHistory {
    type SubKey = DepositorKey;

    fn table() -> &'static TableSpec {
        &AUTHORIZED_DEPOSITOR_ENTRY_HISTORY
    }

    fn key_columns() -> &'static [&'static str] {
        &["account_entity_id", "discriminator", "resource_entity_id", "non_fungible_id"]
    }

    fn sub_key_values(key: &DepositorKey) -> Vec<ColumnValue> {
        vec![
            ColumnValue::label(key.badge_type().as_str()),
            key.resource_entity_id().into(),
            key.non_fungible_id().into(),
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn entity_id(&self) -> EntityId {
        self.account_entity_id
    }

    fn sub_key(&self) -> DepositorKey {
        self.key.clone()
    }

    fn encode(&self) -> Row {
        vec![
            self.id.into(),
            self.from_state_version.into(),
            self.account_entity_id.into(),
            self.is_deleted.into(),
            ColumnValue::label(self.key.badge_type().as_str()),
            self.key.resource_entity_id().into(),
            self.key.non_fungible_id().into(),
        ]
    }

    fn decode(row: &Row) -> StoreResult<Self> {
        let badge_type: BadgeType = parse_label(&AUTHORIZED_DEPOSITOR_ENTRY_HISTORY, "discriminator", &row[4])?;
        let resource = row[5].as_entity_id()?;
        let key = match badge_type {
            BadgeType::Resource => DepositorKey::Resource(resource),
            BadgeType::NonFungible => DepositorKey::NonFungible(resource, row[6].as_str()?.to_string()),
        };
        Ok(Self {
            id: row[0].as_i64()?,
            from_state_version: row[1].as_i64()?,
            account_entity_id: row[2].as_entity_id()?,
            key,
            is_deleted: row[3].as_bool()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizedDepositorChange {
    pub key: DepositorKey,
    pub is_deleted: bool,
}

/// Badges an account accepts deposits from, one aggregate per account.
pub struct AuthorizedDepositorDomain;

impl AggregateDomain for AuthorizedDepositorDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::AuthorizedDepositor;

    type Change = AuthorizedDepositorChange;
    type Entry = AuthorizedDepositorEntryHistory;
    type Singleton = NoSingleton;

    fn aggregate_table() -> &'static AggregateTable {
        &AUTHORIZED_DEPOSITOR_AGGREGATE
    }

    fn classify(
        substate: &Substate,
        resolver: &EntityResolver,
    ) -> ProjectionResult<Option<Classified<AuthorizedDepositorChange, NoSingleton>>> {
        let Substate::AuthorizedDepositor { badge, is_deleted } = substate else {
            return Ok(None);
        };
        let resource = resolver.get_by_global_address(badge.resource())?.database_id;
        let key = match badge {
            DepositorBadge::Resource { .. } => DepositorKey::Resource(resource),
            DepositorBadge::NonFungible { local_id, .. } => DepositorKey::NonFungible(resource, local_id.clone()),
        };
        Ok(Some(Classified::Entry(AuthorizedDepositorChange {
            key,
            is_deleted: *is_deleted,
        })))
    }

    fn sub_key(change: &AuthorizedDepositorChange) -> DepositorKey {
        change.key.clone()
    }

    fn is_deletion(change: &AuthorizedDepositorChange) -> bool {
        change.is_deleted
    }

    fn build_entry(
        id: i64,
        entity_id: EntityId,
        state_version: i64,
        change: &AuthorizedDepositorChange,
    ) -> AuthorizedDepositorEntryHistory {
        AuthorizedDepositorEntryHistory {
            id,
            from_state_version: state_version,
            account_entity_id: entity_id,
            key: change.key.clone(),
            is_deleted: change.is_deleted,
        }
    }
}
