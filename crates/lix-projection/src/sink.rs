use std::collections::BTreeMap;

use lix_store::{CopyWriter, Row, StoreResult, TableSpec};
use tracing::debug;

use crate::error::{ProjectionError, ProjectionResult};
use crate::session::Session;

const STAGE: &str = "write";

/// Streams typed rows into the store, one binary COPY per batch.
#[derive(Debug, Default)]
pub struct BulkSink {
    written: BTreeMap<&'static str, u64>,
}

impl BulkSink {
    /// A sink that has written nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `rows` and load them into `table`. Returns the count written.
    ///
    /// An empty batch makes no store call. A row failing to encode aborts
    /// the batch before anything is sent.
    pub async fn write_batch<R, F>(
        &mut self,
        session: &mut Session<'_>,
        table: &'static TableSpec,
        rows: &[R],
        mut encode: F,
    ) -> ProjectionResult<u64>
    where
        R: Sync,
        F: FnMut(&R) -> StoreResult<Row> + Send,
    {
        if rows.is_empty() {
            return Ok(0);
        }
        session.checkpoint(STAGE)?;

        let mut writer = CopyWriter::new(table);
        for row in rows {
            let values = encode(row).map_err(ProjectionError::store(STAGE))?;
            writer.write_row(&values).map_err(ProjectionError::store(STAGE))?;
        }
        let stream = writer.finish();
        let bytes = stream.len();
        let count = session.copy_in(table, stream).await?;

        *self.written.entry(table.name).or_default() += count;
        debug!(table = table.name, rows = count, bytes, "batch copied");
        Ok(count)
    }

    /// Rows written so far, by table.
    pub fn written(&self) -> &BTreeMap<&'static str, u64> {
        &self.written
    }

    /// Rows written across all tables.
    pub fn total(&self) -> u64 {
        self.written.values().sum()
    }
}
