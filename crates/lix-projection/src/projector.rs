use async_trait::async_trait;
use lix_store::TableSpec;
use lix_types::{ReferencedEntity, Substate, SubstateDomain};

use crate::error::ProjectionResult;
use crate::resolver::EntityResolver;
use crate::sequences::SequenceAllocator;
use crate::session::Session;
use crate::sink::BulkSink;

/// One substate domain's part in an invocation.
///
/// The engine drives every enabled projector through the same stages:
/// [`visit`](Self::visit) for each event of the domain, then
/// [`load_prior_state`](Self::load_prior_state), [`process`](Self::process)
/// and [`write`](Self::write) once each.
#[async_trait]
pub trait Projector: Send {
    fn domain(&self) -> SubstateDomain;

    /// Every table this projector allocates ids for or writes to.
    fn tables(&self) -> Vec<&'static TableSpec>;

    /// Record one substate event. `entity` is already resolved.
    fn visit(
        &mut self,
        state_version: i64,
        entity: &ReferencedEntity,
        substate: &Substate,
        resolver: &EntityResolver,
    ) -> ProjectionResult<()>;

    /// Fetch whatever stored rows the recorded events depend on.
    async fn load_prior_state(&mut self, session: &mut Session<'_>) -> ProjectionResult<()>;

    /// Build every output row, assigning ids from `sequences`.
    fn process(&mut self, sequences: &SequenceAllocator) -> ProjectionResult<()>;

    /// Bulk-load the rows built by [`process`](Self::process).
    async fn write(&mut self, session: &mut Session<'_>, sink: &mut BulkSink) -> ProjectionResult<()>;
}
