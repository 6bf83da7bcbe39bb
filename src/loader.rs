// ABOUTME: Loads destination rows in fixed-size batches with row-by-row fallback
// ABOUTME: A failing batch is retried one row at a time so a single bad row loses only itself

use crate::destination::{Destination, PaddedBatch};
use crate::schema::TableDefinition;
use crate::transform::DestinationRow;

/// Outcome of loading one object type's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub batches: usize,
    pub rows_attempted: usize,
    pub rows_committed: usize,
    /// Batches whose bulk upsert failed and were retried row by row
    pub fallback_batches: usize,
    /// Identities of rows that could not be written at all
    pub failed_ids: Vec<String>,
}

impl LoadReport {
    pub fn has_failures(&self) -> bool {
        !self.failed_ids.is_empty()
    }
}

pub struct BatchLoader<'a> {
    destination: &'a dyn Destination,
    batch_size: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(destination: &'a dyn Destination, batch_size: usize) -> Self {
        Self {
            destination,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn load(&self, table: &TableDefinition, rows: &[DestinationRow]) -> LoadReport {
        let mut report = LoadReport::default();
        let total_batches = rows.len().div_ceil(self.batch_size);

        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            let batch = PaddedBatch::from_rows(chunk);
            report.batches += 1;
            report.rows_attempted += batch.len();

            match self.destination.upsert(table, &batch).await {
                Ok(_) => {
                    report.rows_committed += batch.len();
                    tracing::info!(
                        "Upserted batch {} of {} into {} ({} rows)",
                        index + 1,
                        total_batches,
                        table.name,
                        batch.len()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Batch {} of {} into {} failed, retrying row by row: {:#}",
                        index + 1,
                        total_batches,
                        table.name,
                        e
                    );
                    report.fallback_batches += 1;
                    let committed = self.load_row_by_row(table, &batch, &mut report).await;
                    tracing::info!(
                        "Row-by-row retry committed {} of {} rows",
                        committed,
                        batch.len()
                    );
                }
            }
        }

        report
    }

    async fn load_row_by_row(
        &self,
        table: &TableDefinition,
        batch: &PaddedBatch,
        report: &mut LoadReport,
    ) -> usize {
        let mut committed = 0;

        for index in 0..batch.len() {
            let Some(single) = batch.single(index) else {
                continue;
            };
            let identity = single.rows[0].identity.clone();

            match self.destination.upsert(table, &single).await {
                Ok(_) => committed += 1,
                Err(e) => {
                    tracing::error!("Failed to upsert record {} into {}: {:#}", identity, table.name, e);
                    report.failed_ids.push(identity);
                }
            }
        }

        report.rows_committed += committed;
        committed
    }
}
