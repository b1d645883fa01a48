use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Prefix carried by every address that is not addressable at the top level.
const INTERNAL_PREFIX: &str = "internal_";

/// Internal database identifier of a ledger entity.
///
/// Assigned once per entity lifetime by the entity directory and never
/// reused. Stored as `bigint`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    /// The raw integer value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Ledger address of an entity, exactly as emitted by the core node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityAddress(String);

impl EntityAddress {
    /// Parse and validate an address.
    ///
    /// Addresses must be non-empty and free of whitespace.
    pub fn new(address: impl Into<String>) -> Result<Self, TypeError> {
        let address = address.into();
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidAddress(address));
        }
        Ok(Self(address))
    }

    /// Returns `true` if the entity is addressable at the top level.
    pub fn is_global(&self) -> bool {
        !self.0.starts_with(INTERNAL_PREFIX)
    }

    /// The address as written by the ledger.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityAddress({})", self.0)
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityAddress {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityAddress {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityAddress> for String {
    fn from(value: EntityAddress) -> Self {
        value.0
    }
}

/// A ledger entity resolved to its internal database identifier.
///
/// Created on first reference within an invocation and never mutated
/// afterwards. One address maps to exactly one `database_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedEntity {
    pub address: EntityAddress,
    pub database_id: EntityId,
    /// Top-level address owning this entity. Equal to `address` for global
    /// entities; the global ancestor (if known) for internal ones.
    pub global_address: Option<EntityAddress>,
    /// State version at which the entity was first seen.
    pub state_version: i64,
}

impl ReferencedEntity {
    /// A global entity is its own global address.
    pub fn new_global(address: EntityAddress, database_id: EntityId, state_version: i64) -> Self {
        Self {
            global_address: Some(address.clone()),
            address,
            database_id,
            state_version,
        }
    }

    /// An internal entity, optionally owned by a global ancestor.
    pub fn new_internal(
        address: EntityAddress,
        database_id: EntityId,
        global_ancestor: Option<EntityAddress>,
        state_version: i64,
    ) -> Self {
        Self {
            address,
            database_id,
            global_address: global_ancestor,
            state_version,
        }
    }

    /// Whether the entity is addressable on its own.
    pub fn is_global(&self) -> bool {
        self.address.is_global()
    }
}
