use serde::{Deserialize, Serialize};

use crate::entity::EntityAddress;
use crate::substate::Substate;

/// One substate change observed on an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubstateEvent {
    pub entity: EntityAddress,
    pub substate: Substate,
}

impl SubstateEvent {
    /// An event changing `substate` on `entity`.
    pub fn new(entity: EntityAddress, substate: Substate) -> Self {
        Self { entity, substate }
    }
}

/// All substate changes committed at one state version, in emission order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommittedTransaction {
    pub state_version: i64,
    #[serde(default)]
    pub events: Vec<SubstateEvent>,
}

/// A contiguous run of committed transactions processed by one invocation.
///
/// Transactions are expected in ascending state-version order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerExtension {
    #[serde(default)]
    pub transactions: Vec<CommittedTransaction>,
}

impl LedgerExtension {
    /// An extension over `transactions`, assumed ordered by state version.
    pub fn new(transactions: Vec<CommittedTransaction>) -> Self {
        Self { transactions }
    }

    /// Total number of substate events across all transactions.
    pub fn event_count(&self) -> usize {
        self.transactions.iter().map(|t| t.events.len()).sum()
    }

    /// Returns `true` if there is nothing to project.
    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    /// First and last state version covered, if any transactions are present.
    pub fn state_version_range(&self) -> Option<(i64, i64)> {
        let first = self.transactions.first()?.state_version;
        let last = self.transactions.last()?.state_version;
        Some((first, last))
    }

    /// Events in processing order, paired with their state version.
    pub fn events(&self) -> impl Iterator<Item = (i64, &SubstateEvent)> {
        self.transactions
            .iter()
            .flat_map(|t| t.events.iter().map(move |e| (t.state_version, e)))
    }
}
