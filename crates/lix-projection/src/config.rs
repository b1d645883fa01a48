use std::path::Path;

use lix_types::SubstateDomain;
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, ProjectionResult};

/// Per-domain enable switches. A disabled domain ignores its substates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainToggles {
    pub metadata: bool,
    pub role_assignment: bool,
    pub method_royalty: bool,
    pub resource_preference: bool,
    pub authorized_depositor: bool,
    pub default_deposit_rule: bool,
    pub component_state: bool,
}

impl Default for DomainToggles {
    fn default() -> Self {
        Self {
            metadata: true,
            role_assignment: true,
            method_royalty: true,
            resource_preference: true,
            authorized_depositor: true,
            default_deposit_rule: true,
            component_state: true,
        }
    }
}

impl DomainToggles {
    /// Whether substates of `domain` should be projected.
    pub fn is_enabled(&self, domain: SubstateDomain) -> bool {
        match domain {
            SubstateDomain::Metadata => self.metadata,
            SubstateDomain::RoleAssignment => self.role_assignment,
            SubstateDomain::MethodRoyalty => self.method_royalty,
            SubstateDomain::ResourcePreference => self.resource_preference,
            SubstateDomain::AuthorizedDepositor => self.authorized_depositor,
            SubstateDomain::DefaultDepositRule => self.default_deposit_rule,
            SubstateDomain::ComponentState => self.component_state,
        }
    }
}

/// Configuration for the projection engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub domains: DomainToggles,
    /// Warn when an aggregate list grows beyond this many ids.
    pub max_aggregate_warn_len: usize,
    /// Log elapsed time and row counts per stage at debug level.
    pub stage_timings: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domains: DomainToggles::default(),
            max_aggregate_warn_len: 1000,
            stage_timings: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> ProjectionResult<Self> {
        toml::from_str(text).map_err(|e| ProjectionError::Config(e.to_string()))
    }

    /// Read and parse a TOML file. I/O failures are reported as
    /// [`ProjectionError::Config`] with the offending path.
    pub fn from_file(path: impl AsRef<Path>) -> ProjectionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProjectionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as pretty-printed TOML.
    pub fn to_toml_string(&self) -> ProjectionResult<String> {
        toml::to_string_pretty(self).map_err(|e| ProjectionError::Config(e.to_string()))
    }
}
