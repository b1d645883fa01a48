//! Concrete substate domains.
//!
//! List-valued domains implement [`AggregateDomain`](crate::aggregate::AggregateDomain)
//! and share the move-to-front projector; single-valued domains implement
//! [`HistoryDomain`](crate::history::HistoryDomain) and only append history.

use std::str::FromStr;

use lix_store::{ColumnValue, StoreError, StoreResult, TableSpec};
use lix_types::TypeError;

use crate::aggregate::DomainProjector;
use crate::config::EngineConfig;
use crate::history::HistoryProjector;
use crate::projector::Projector;

pub mod authorized_depositor;
pub mod component_state;
pub mod default_deposit_rule;
pub mod metadata;
pub mod method_royalty;
pub mod resource_preference;
pub mod role_assignment;

pub use authorized_depositor::AuthorizedDepositorDomain;
pub use component_state::ComponentStateDomain;
pub use default_deposit_rule::DefaultDepositRuleDomain;
pub use metadata::MetadataDomain;
pub use method_royalty::MethodRoyaltyDomain;
pub use resource_preference::ResourcePreferenceDomain;
pub use role_assignment::RoleAssignmentDomain;

/// Every table the engine can write, grouped by domain.
pub fn all_tables() -> Vec<&'static TableSpec> {
    vec![
        &metadata::METADATA_ENTRY_HISTORY,
        &metadata::METADATA_AGGREGATE_HISTORY,
        &role_assignment::ROLE_ASSIGNMENT_ENTRY_HISTORY,
        &role_assignment::OWNER_ROLE_HISTORY,
        &role_assignment::ROLE_ASSIGNMENT_AGGREGATE_HISTORY,
        &method_royalty::METHOD_ROYALTY_ENTRY_HISTORY,
        &method_royalty::METHOD_ROYALTY_AGGREGATE_HISTORY,
        &resource_preference::RESOURCE_PREFERENCE_ENTRY_HISTORY,
        &resource_preference::RESOURCE_PREFERENCE_AGGREGATE_HISTORY,
        &authorized_depositor::AUTHORIZED_DEPOSITOR_ENTRY_HISTORY,
        &authorized_depositor::AUTHORIZED_DEPOSITOR_AGGREGATE_HISTORY,
        &default_deposit_rule::DEFAULT_DEPOSIT_RULE_HISTORY,
        &component_state::STATE_HISTORY,
    ]
}

/// One fresh projector per domain switched on in `config`.
pub fn enabled_projectors(config: &EngineConfig) -> Vec<Box<dyn Projector>> {
    let warn_len = config.max_aggregate_warn_len;
    let all: Vec<Box<dyn Projector>> = vec![
        Box::new(DomainProjector::<MetadataDomain>::new(warn_len)),
        Box::new(DomainProjector::<RoleAssignmentDomain>::new(warn_len)),
        Box::new(DomainProjector::<MethodRoyaltyDomain>::new(warn_len)),
        Box::new(DomainProjector::<ResourcePreferenceDomain>::new(warn_len)),
        Box::new(DomainProjector::<AuthorizedDepositorDomain>::new(warn_len)),
        Box::new(HistoryProjector::<DefaultDepositRuleDomain>::new()),
        Box::new(HistoryProjector::<ComponentStateDomain>::new()),
    ];
    all.into_iter()
        .filter(|p| config.domains.is_enabled(p.domain()))
        .collect()
}

/// Parse a stored enum label back into its typed value.
pub(crate) fn parse_label<T>(table: &TableSpec, column: &str, value: &ColumnValue) -> StoreResult<T>
where
    T: FromStr<Err = TypeError>,
{
    value.as_str()?.parse().map_err(|e: TypeError| StoreError::Decoding {
        table: table.name.to_string(),
        column: column.to_string(),
        reason: e.to_string(),
    })
}

/// Like [`parse_label`], for nullable columns.
pub(crate) fn parse_opt_label<T>(table: &TableSpec, column: &str, value: &ColumnValue) -> StoreResult<Option<T>>
where
    T: FromStr<Err = TypeError>,
{
    if value.is_null() {
        return Ok(None);
    }
    parse_label(table, column, value).map(Some)
}
