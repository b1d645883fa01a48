use lix_store::StoreError;
use lix_types::{EntityAddress, EntityId};

/// Errors that abort a projection invocation.
///
/// None of these are handled locally: each one propagates to the caller,
/// which rolls back the enclosing transaction and decides whether to retry
/// the same ledger range.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// A reverse lookup named an entity never resolved in this invocation.
    #[error("{kind} {key} was not resolved in this invocation")]
    NotFound { kind: &'static str, key: String },

    /// A required facet could neither be built nor carried forward.
    #[error("invariant violated in {domain} for entity {entity_id} at state version {state_version}: {reason}")]
    InvariantViolation {
        domain: &'static str,
        entity_id: EntityId,
        state_version: i64,
        reason: String,
    },

    #[error("unsupported substate `{type_name}` in {domain} for entity {entity} at state version {state_version}")]
    UnsupportedSubstateShape {
        domain: &'static str,
        entity: EntityAddress,
        state_version: i64,
        type_name: &'static str,
    },

    #[error("store failure during {stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("invocation cancelled during {stage}")]
    Cancelled { stage: &'static str },

    /// An id was requested for a table whose sequence was never loaded.
    #[error("no sequence loaded for table {0}")]
    UnknownSequence(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProjectionError {
    pub(crate) fn store(stage: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { stage, source }
    }

    /// Returns `true` if retrying the same range could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Cancelled { .. })
    }
}

/// Result alias for projection operations.
pub type ProjectionResult<T> = Result<T, ProjectionError>;
