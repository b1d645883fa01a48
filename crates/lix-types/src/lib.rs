//! Foundation types for the ledger indexer (LIX).
//!
//! This crate provides the identifiers and event shapes shared by every other
//! LIX crate. It knows nothing about storage or projection.
//!
//! # Key Types
//!
//! - [`EntityId`] -- Internal database identifier of a ledger entity
//! - [`EntityAddress`] -- Ledger address string as emitted by the core node
//! - [`ReferencedEntity`] -- An address resolved to its database identifier
//! - [`Substate`] -- Typed substate upsert/delete payload
//! - [`LedgerExtension`] -- The batch of committed transactions one invocation consumes

pub mod entity;
pub mod error;
pub mod ledger;
pub mod substate;

pub use entity::{EntityAddress, EntityId, ReferencedEntity};
pub use error::TypeError;
pub use ledger::{CommittedTransaction, LedgerExtension, SubstateEvent};
pub use substate::{
    BadgeType, DefaultDepositRule, DepositorBadge, ModuleId, ResourcePreference, Substate,
    SubstateDomain,
};
