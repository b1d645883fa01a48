use std::future::Future;

use bytes::Bytes;
use lix_store::{EntityDirectory, MostRecentQuery, Row, StoreTransaction, TableSpec};
use tokio_util::sync::CancellationToken;

use crate::error::{ProjectionError, ProjectionResult};

/// A store transaction that can also resolve entities.
pub trait LedgerTransaction: StoreTransaction + EntityDirectory {}

impl<T: StoreTransaction + EntityDirectory> LedgerTransaction for T {}

/// Race `fut` against cancellation. Cancellation wins ties.
pub async fn cancellable<T, F>(cancel: &CancellationToken, stage: &'static str, fut: F) -> ProjectionResult<T>
where
    F: Future<Output = ProjectionResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProjectionError::Cancelled { stage }),
        result = fut => result,
    }
}

/// The invocation's transaction plus its cancellation token.
///
/// Every store call made through a session is cancellable and has its
/// errors tagged with the stage that issued it.
pub struct Session<'a> {
    tx: &'a mut dyn LedgerTransaction,
    cancel: &'a CancellationToken,
}

impl<'a> Session<'a> {
    /// Wrap `tx` so its calls observe `cancel`.
    pub fn new(tx: &'a mut dyn LedgerTransaction, cancel: &'a CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Token cancelling this invocation.
    pub fn cancel_token(&self) -> &CancellationToken {
        self.cancel
    }

    /// Direct access for collaborators that take the transaction itself.
    pub fn transaction(&mut self) -> &mut (dyn LedgerTransaction + 'a) {
        &mut *self.tx
    }

    /// Fail fast if the invocation has been cancelled.
    pub fn checkpoint(&self, stage: &'static str) -> ProjectionResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ProjectionError::Cancelled { stage });
        }
        Ok(())
    }

    /// Advance each table's sequence once. See [`StoreTransaction::next_sequence_values`].
    pub async fn next_sequence_values(&mut self, tables: &[&'static TableSpec]) -> ProjectionResult<Vec<i64>> {
        const STAGE: &str = "load_sequences";
        let fut = self.tx.next_sequence_values(tables);
        cancellable(self.cancel, STAGE, async { fut.await.map_err(ProjectionError::store(STAGE)) }).await
    }

    /// Record the last issued id per table.
    pub async fn set_sequence_values(&mut self, values: &[(&'static TableSpec, i64)]) -> ProjectionResult<()> {
        const STAGE: &str = "persist_sequences";
        let fut = self.tx.set_sequence_values(values);
        cancellable(self.cancel, STAGE, async { fut.await.map_err(ProjectionError::store(STAGE)) }).await
    }

    /// Run a batched most-recent lookup in one round-trip.
    pub async fn most_recent(&mut self, query: &MostRecentQuery<'_>) -> ProjectionResult<Vec<Row>> {
        const STAGE: &str = "load_prior_state";
        let fut = self.tx.most_recent(query);
        cancellable(self.cancel, STAGE, async { fut.await.map_err(ProjectionError::store(STAGE)) }).await
    }

    /// Load one binary COPY stream. Returns rows written.
    pub async fn copy_in(&mut self, table: &'static TableSpec, stream: Bytes) -> ProjectionResult<u64> {
        const STAGE: &str = "write";
        let fut = self.tx.copy_in(table, stream);
        cancellable(self.cancel, STAGE, async { fut.await.map_err(ProjectionError::store(STAGE)) }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lix_store::{InMemoryStore, LedgerStore};

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: ProjectionResult<u8> = cancellable(&cancel, "write", async { Ok(1) }).await;
        assert!(matches!(result, Err(ProjectionError::Cancelled { stage: "write" })));
    }

    #[tokio::test]
    async fn live_token_passes_result_through() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, "write", async { Ok::<_, ProjectionError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn session_calls_observe_cancellation() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let cancel = CancellationToken::new();
        let mut session = Session::new(&mut tx, &cancel);
        assert!(session.checkpoint("resolve").is_ok());

        cancel.cancel();
        assert!(session.checkpoint("resolve").is_err());
        let err = session.next_sequence_values(&[]).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Cancelled { stage: "load_sequences" }));
    }
}
