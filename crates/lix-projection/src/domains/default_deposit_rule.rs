use lix_store::{Column, ColumnType, ColumnValue, Row, TableSpec};
use lix_types::{DefaultDepositRule, EntityId, Substate, SubstateDomain};

use crate::history::HistoryDomain;

const COLUMNS: &[Column] = &[
    Column::required("id", ColumnType::Int8),
    Column::required("from_state_version", ColumnType::Int8),
    Column::required("account_entity_id", ColumnType::Int8),
    Column::required("default_deposit_rule", ColumnType::Enum(DefaultDepositRule::STORE_TYPE)),
];

pub static DEFAULT_DEPOSIT_RULE_HISTORY: TableSpec = TableSpec::new("account_default_deposit_rule_history", COLUMNS);

/// Account-wide default deposit rule. The latest row is the current rule.
pub struct DefaultDepositRuleDomain;

impl HistoryDomain for DefaultDepositRuleDomain {
    const DOMAIN: SubstateDomain = SubstateDomain::DefaultDepositRule;

    type Change = DefaultDepositRule;

    fn table() -> &'static TableSpec {
        &DEFAULT_DEPOSIT_RULE_HISTORY
    }

    fn classify(substate: &Substate) -> Option<DefaultDepositRule> {
        match substate {
            Substate::DefaultDepositRule { rule } => Some(*rule),
            _ => None,
        }
    }

    fn encode(id: i64, entity_id: EntityId, state_version: i64, rule: &DefaultDepositRule) -> Row {
        vec![
            id.into(),
            state_version.into(),
            entity_id.into(),
            ColumnValue::label(rule.as_str()),
        ]
    }
}
