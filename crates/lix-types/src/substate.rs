use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityAddress;
use crate::error::TypeError;

/// Object module a role assignment rule is scoped to. Stored as enum `module_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    Main,
    Metadata,
    Royalty,
    RoleAssignment,
}

/// Per-resource deposit preference of an account. Stored as enum
/// `account_resource_preference_rule`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePreference {
    Allowed,
    Disallowed,
}

/// Account-wide default deposit rule. Stored as enum `account_default_deposit_rule`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultDepositRule {
    Accept,
    Reject,
    AllowExisting,
}

/// Kind of badge an account authorizes as a depositor. Stored as enum
/// `authorized_depositor_badge_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeType {
    Resource,
    NonFungible,
}

/// A badge whose holder may deposit into an account that otherwise rejects
/// deposits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DepositorBadge {
    /// Any unit of a resource.
    Resource { resource: EntityAddress },
    /// One non-fungible, by its resource and local id.
    NonFungible { resource: EntityAddress, local_id: String },
}

impl DepositorBadge {
    /// Address of the badge's resource.
    pub fn resource(&self) -> &EntityAddress {
        match self {
            Self::Resource { resource } | Self::NonFungible { resource, .. } => resource,
        }
    }

    /// Value written to the badge discriminator column.
    pub fn badge_type(&self) -> BadgeType {
        match self {
            Self::Resource { .. } => BadgeType::Resource,
            Self::NonFungible { .. } => BadgeType::NonFungible,
        }
    }

    /// Local id of a non-fungible badge.
    pub fn local_id(&self) -> Option<&str> {
        match self {
            Self::Resource { .. } => None,
            Self::NonFungible { local_id, .. } => Some(local_id.as_str()),
        }
    }
}

macro_rules! store_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Name of the store enum type this value is written as.
            pub const STORE_TYPE: &'static str = $kind;

            /// Label stored for this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(TypeError::UnknownEnumValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

store_enum!(ModuleId, "module_id", {
    Main => "main",
    Metadata => "metadata",
    Royalty => "royalty",
    RoleAssignment => "role_assignment",
});

store_enum!(ResourcePreference, "account_resource_preference_rule", {
    Allowed => "allowed",
    Disallowed => "disallowed",
});

store_enum!(DefaultDepositRule, "account_default_deposit_rule", {
    Accept => "accept",
    Reject => "reject",
    AllowExisting => "allow_existing",
});

store_enum!(BadgeType, "authorized_depositor_badge_type", {
    Resource => "resource",
    NonFungible => "non_fungible",
});

/// The projector family a substate belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubstateDomain {
    Metadata,
    RoleAssignment,
    MethodRoyalty,
    ResourcePreference,
    AuthorizedDepositor,
    DefaultDepositRule,
    ComponentState,
}

impl SubstateDomain {
    /// Name used in logs, errors and config toggles.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::RoleAssignment => "role_assignment",
            Self::MethodRoyalty => "method_royalty",
            Self::ResourcePreference => "resource_preference",
            Self::AuthorizedDepositor => "authorized_depositor",
            Self::DefaultDepositRule => "default_deposit_rule",
            Self::ComponentState => "component_state",
        }
    }
}

impl fmt::Display for SubstateDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed piece of entity state as of one state version.
///
/// Key-value substates carry an optional value; `None` records a deletion of
/// that key. Any declared type not listed here decodes as [`Substate::Unknown`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Substate {
    MetadataEntry {
        key: String,
        #[serde(default, with = "hex_value")]
        value: Option<Vec<u8>>,
        #[serde(default)]
        is_locked: bool,
    },
    RoleAssignmentOwner {
        owner_role: Value,
    },
    RoleAssignmentRule {
        role_key: String,
        module: ModuleId,
        #[serde(default)]
        rule: Option<Value>,
    },
    MethodRoyalty {
        method_name: String,
        #[serde(default)]
        royalty_amount: Option<Value>,
        #[serde(default)]
        is_locked: bool,
    },
    ResourcePreference {
        resource: EntityAddress,
        #[serde(default)]
        preference: Option<ResourcePreference>,
    },
    AuthorizedDepositor {
        badge: DepositorBadge,
        #[serde(default)]
        is_deleted: bool,
    },
    DefaultDepositRule {
        rule: DefaultDepositRule,
    },
    ComponentState {
        state: Value,
    },
    #[serde(other)]
    Unknown,
}

impl Substate {
    /// Declared type name, as it appears in the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MetadataEntry { .. } => "metadata_entry",
            Self::RoleAssignmentOwner { .. } => "role_assignment_owner",
            Self::RoleAssignmentRule { .. } => "role_assignment_rule",
            Self::MethodRoyalty { .. } => "method_royalty",
            Self::ResourcePreference { .. } => "resource_preference",
            Self::AuthorizedDepositor { .. } => "authorized_depositor",
            Self::DefaultDepositRule { .. } => "default_deposit_rule",
            Self::ComponentState { .. } => "component_state",
            Self::Unknown => "unknown",
        }
    }

    /// The projector that owns this substate, or `None` for unrecognised shapes.
    pub fn domain(&self) -> Option<SubstateDomain> {
        match self {
            Self::MetadataEntry { .. } => Some(SubstateDomain::Metadata),
            Self::RoleAssignmentOwner { .. } | Self::RoleAssignmentRule { .. } => {
                Some(SubstateDomain::RoleAssignment)
            }
            Self::MethodRoyalty { .. } => Some(SubstateDomain::MethodRoyalty),
            Self::ResourcePreference { .. } => Some(SubstateDomain::ResourcePreference),
            Self::AuthorizedDepositor { .. } => Some(SubstateDomain::AuthorizedDepositor),
            Self::DefaultDepositRule { .. } => Some(SubstateDomain::DefaultDepositRule),
            Self::ComponentState { .. } => Some(SubstateDomain::ComponentState),
            Self::Unknown => None,
        }
    }

    /// Addresses other than the owning entity that must be resolved before
    /// this substate can be projected.
    pub fn referenced_addresses(&self) -> impl Iterator<Item = &EntityAddress> {
        match self {
            Self::ResourcePreference { resource, .. } => Some(resource),
            Self::AuthorizedDepositor { badge, .. } => Some(badge.resource()),
            _ => None,
        }
        .into_iter()
    }

    /// Returns `true` when this substate records the removal of its key.
    pub fn is_deletion(&self) -> bool {
        match self {
            Self::MetadataEntry { value, .. } => value.is_none(),
            Self::RoleAssignmentRule { rule, .. } => rule.is_none(),
            Self::MethodRoyalty { royalty_amount, .. } => royalty_amount.is_none(),
            Self::ResourcePreference { preference, .. } => preference.is_none(),
            Self::AuthorizedDepositor { is_deleted, .. } => *is_deleted,
            _ => false,
        }
    }
}

/// Hex encoding for optional byte values in JSON input.
mod hex_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_entry_decodes_hex_value() {
        let substate: Substate = serde_json::from_value(json!({
            "type": "metadata_entry",
            "key": "name",
            "value": "0x6869",
        }))
        .unwrap();
        assert_eq!(
            substate,
            Substate::MetadataEntry {
                key: "name".into(),
                value: Some(b"hi".to_vec()),
                is_locked: false,
            }
        );
        assert!(!substate.is_deletion());
    }

    #[test]
    fn missing_value_is_a_deletion() {
        let substate: Substate =
            serde_json::from_value(json!({ "type": "metadata_entry", "key": "icon" })).unwrap();
        assert!(substate.is_deletion());
    }

    #[test]
    fn unknown_type_decodes_as_unknown() {
        let substate: Substate =
            serde_json::from_value(json!({ "type": "vault_balance", "amount": "10" })).unwrap();
        assert_eq!(substate, Substate::Unknown);
        assert_eq!(substate.domain(), None);
    }

    #[test]
    fn owner_and_rules_share_a_domain() {
        let owner = Substate::RoleAssignmentOwner { owner_role: json!({"rule": "deny_all"}) };
        let rule = Substate::RoleAssignmentRule {
            role_key: "minter".into(),
            module: ModuleId::Main,
            rule: None,
        };
        assert_eq!(owner.domain(), rule.domain());
        assert_eq!(owner.domain(), Some(SubstateDomain::RoleAssignment));
    }

    #[test]
    fn preference_references_its_resource() {
        let substate = Substate::ResourcePreference {
            resource: "resource_1".parse().unwrap(),
            preference: Some(ResourcePreference::Allowed),
        };
        let addresses: Vec<_> = substate.referenced_addresses().map(|a| a.as_str()).collect();
        assert_eq!(addresses, vec!["resource_1"]);
    }

    #[test]
    fn depositor_badge_decodes_both_shapes() {
        let substate: Substate = serde_json::from_value(json!({
            "type": "authorized_depositor",
            "badge": { "type": "non_fungible", "resource": "resource_nft", "local_id": "#7#" },
        }))
        .unwrap();
        let Substate::AuthorizedDepositor { badge, is_deleted } = &substate else {
            panic!("expected an authorized depositor");
        };
        assert!(!is_deleted);
        assert_eq!(badge.badge_type(), BadgeType::NonFungible);
        assert_eq!(badge.local_id(), Some("#7#"));
        let addresses: Vec<_> = substate.referenced_addresses().map(|a| a.as_str()).collect();
        assert_eq!(addresses, vec!["resource_nft"]);

        let removed: Substate = serde_json::from_value(json!({
            "type": "authorized_depositor",
            "badge": { "type": "resource", "resource": "resource_1" },
            "is_deleted": true,
        }))
        .unwrap();
        assert!(removed.is_deletion());
        assert_eq!(removed.domain(), Some(SubstateDomain::AuthorizedDepositor));
    }

    #[test]
    fn store_enum_names_roundtrip() {
        for module in [ModuleId::Main, ModuleId::Metadata, ModuleId::Royalty, ModuleId::RoleAssignment] {
            assert_eq!(module.as_str().parse::<ModuleId>().unwrap(), module);
        }
        assert_eq!(DefaultDepositRule::AllowExisting.as_str(), "allow_existing");
        assert_eq!("non_fungible".parse::<BadgeType>().unwrap(), BadgeType::NonFungible);
        assert!(matches!(
            "sometimes".parse::<ResourcePreference>(),
            Err(TypeError::UnknownEnumValue { kind: "account_resource_preference_rule", .. })
        ));
    }
}
