use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use lix_store::{Row, TableSpec};
use lix_types::{EntityId, ReferencedEntity, Substate, SubstateDomain};
use tracing::debug;

use crate::error::{ProjectionError, ProjectionResult};
use crate::projector::Projector;
use crate::resolver::EntityResolver;
use crate::sequences::SequenceAllocator;
use crate::session::Session;
use crate::sink::BulkSink;

/// A single-valued substate domain recorded as plain history.
///
/// Each event becomes one row; nothing is read back from the store.
pub trait HistoryDomain: Send + Sync + 'static {
    const DOMAIN: SubstateDomain;

    type Change: Clone + Debug + Send + Sync;

    fn table() -> &'static TableSpec;

    /// `None` if the substate is not a shape this domain handles.
    fn classify(substate: &Substate) -> Option<Self::Change>;

    fn encode(id: i64, entity_id: EntityId, state_version: i64, change: &Self::Change) -> Row;
}

#[derive(Clone, Debug)]
struct Pending<C> {
    entity_id: EntityId,
    state_version: i64,
    change: C,
}

/// Append-only projector for a [`HistoryDomain`].
pub struct HistoryProjector<H: HistoryDomain> {
    pending: Vec<Pending<H::Change>>,
    rows: Vec<Row>,
    _domain: PhantomData<fn() -> H>,
}

impl<H: HistoryDomain> Default for HistoryProjector<H> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            rows: Vec::new(),
            _domain: PhantomData,
        }
    }
}

impl<H: HistoryDomain> HistoryProjector<H> {
    /// A projector with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded rows from the last `process` call, in id order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

#[async_trait]
impl<H: HistoryDomain> Projector for HistoryProjector<H> {
    fn domain(&self) -> SubstateDomain {
        H::DOMAIN
    }

    fn tables(&self) -> Vec<&'static TableSpec> {
        vec![H::table()]
    }

    fn visit(
        &mut self,
        state_version: i64,
        entity: &ReferencedEntity,
        substate: &Substate,
        _resolver: &EntityResolver,
    ) -> ProjectionResult<()> {
        let change = H::classify(substate).ok_or_else(|| ProjectionError::UnsupportedSubstateShape {
            domain: H::DOMAIN.name(),
            entity: entity.address.clone(),
            state_version,
            type_name: substate.type_name(),
        })?;
        self.pending.push(Pending {
            entity_id: entity.database_id,
            state_version,
            change,
        });
        Ok(())
    }

    async fn load_prior_state(&mut self, _session: &mut Session<'_>) -> ProjectionResult<()> {
        Ok(())
    }

    fn process(&mut self, sequences: &SequenceAllocator) -> ProjectionResult<()> {
        let table = H::table();
        self.rows = self
            .pending
            .iter()
            .map(|p| -> ProjectionResult<Row> {
                Ok(H::encode(sequences.next(table)?, p.entity_id, p.state_version, &p.change))
            })
            .collect::<ProjectionResult<_>>()?;
        debug!(domain = H::DOMAIN.name(), rows = self.rows.len(), "domain processed");
        Ok(())
    }

    async fn write(&mut self, session: &mut Session<'_>, sink: &mut BulkSink) -> ProjectionResult<()> {
        sink.write_batch(session, H::table(), &self.rows, |row| Ok(row.clone()))
            .await?;
        Ok(())
    }
}
