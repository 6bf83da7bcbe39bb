// ABOUTME: SyncEngine runs the per-object cycle: watermark, fetch, flatten, load, advance
// ABOUTME: Objects are processed one after another; a failing object never stops the run

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Instant;

use super::{ObjectOutcome, ObjectReport, RunReport, SyncMode, WatermarkStatus};
use crate::config::{ObjectConfig, PropertySelection, SyncConfig};
use crate::destination::Destination;
use crate::hubspot::CrmClient;
use crate::loader::BatchLoader;
use crate::schema::{Readiness, SchemaReconciler, TableDefinition};
use crate::transform::RecordTransformer;
use crate::watermark::{WatermarkStore, WatermarkWrite};

/// Orchestrates incremental syncs from the CRM into the destination.
///
/// One cycle for an object type:
/// 1. Read its watermark (or the default lookback window)
/// 2. Resolve the property list, discovering it when configured as `all`
/// 3. Make sure the destination table exists, else emit its DDL and stop
/// 4. Fetch records modified since the watermark, or every record in [`SyncMode::Full`]
/// 5. Flatten and load them in batches
/// 6. Advance the watermark to the cycle start if every page was fetched
pub struct SyncEngine {
    config: SyncConfig,
    client: CrmClient,
    destination: Box<dyn Destination>,
    watermarks: WatermarkStore,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        client: CrmClient,
        destination: Box<dyn Destination>,
        watermarks: WatermarkStore,
    ) -> Self {
        Self {
            config,
            client,
            destination,
            watermarks,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// Property names to request for an object type.
    pub async fn resolve_properties(&self, object: &ObjectConfig) -> Result<Vec<String>> {
        match &object.properties {
            PropertySelection::List(properties) => Ok(properties.clone()),
            PropertySelection::All => {
                tracing::info!("Discovering properties for {}", object.object_type);
                let properties = self
                    .client
                    .list_properties(&object.object_type)
                    .await
                    .with_context(|| {
                        format!("Failed to discover properties for {}", object.object_type)
                    })?;
                tracing::info!(
                    "Found {} properties for {}",
                    properties.len(),
                    object.object_type
                );
                Ok(properties)
            }
        }
    }

    pub fn table_definition(&self, object_type: &str, properties: &[String]) -> TableDefinition {
        TableDefinition::derive(
            &self.config.destination.schema,
            &self.config.table_name(object_type),
            properties,
        )
    }

    /// Run one sync cycle for a single object type.
    ///
    /// Returns `Err` for failures that prevented any useful work: authorization,
    /// property discovery and destination errors.
    pub async fn sync_object(
        &self,
        object: &ObjectConfig,
        mode: SyncMode,
    ) -> Result<ObjectOutcome> {
        let object_type = object.object_type.as_str();
        // Records modified while this cycle runs are picked up again next time.
        let cycle_start = Utc::now();

        let point = self.watermarks.get(object_type).await;
        let since = match mode {
            SyncMode::Incremental => {
                tracing::info!("Last sync for {} was at {}", object_type, point.since);
                Some(point.since)
            }
            SyncMode::Full => {
                tracing::info!("Full refresh of {}, ignoring the watermark", object_type);
                None
            }
        };

        let properties = self.resolve_properties(object).await?;
        if properties.is_empty() {
            tracing::warn!("No properties found for {}", object_type);
            return Ok(ObjectOutcome::NoProperties);
        }

        let table = self.table_definition(object_type, &properties);
        let reconciler =
            SchemaReconciler::new(self.destination.as_ref(), &self.config.provisioning_dir);
        let table = match reconciler.ensure_table(&table).await? {
            Readiness::Ready { table } => table,
            Readiness::NeedsProvisioning { artifact, ddl } => {
                return Ok(ObjectOutcome::NeedsProvisioning { artifact, ddl });
            }
        };

        let fetch = self
            .client
            .fetch(object_type, &properties, since)
            .await
            .with_context(|| format!("Failed to fetch {}", object_type))?;
        let fetched = fetch.records.len();
        tracing::info!(
            "Fetched {} {} records in {} pages",
            fetched,
            object_type,
            fetch.pages
        );

        let transformer = RecordTransformer::new(&table);
        let output = transformer.flatten_all(&fetch.records);

        let loader = BatchLoader::new(self.destination.as_ref(), self.config.batch_size);
        let load = loader.load(&table, &output.rows).await;

        if let Some(error) = fetch.interruption {
            tracing::warn!(
                "Sync of {} incomplete after {} records; watermark not advanced",
                object_type,
                fetched
            );
            return Ok(ObjectOutcome::Incomplete {
                fetched,
                load,
                error,
            });
        }

        let row_failures = load.has_failures() || !output.skipped.is_empty();
        let watermark = if row_failures && self.config.hold_watermark_on_row_failures {
            tracing::warn!(
                "Holding watermark for {}: {} rows failed to load, {} records skipped",
                object_type,
                load.failed_ids.len(),
                output.skipped.len()
            );
            WatermarkStatus::Held
        } else {
            let cursor = output
                .max_updated_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            match self.watermarks.set(object_type, cycle_start, &cursor).await {
                WatermarkWrite::Advanced => WatermarkStatus::Advanced,
                WatermarkWrite::KeptLater => WatermarkStatus::Unchanged,
                WatermarkWrite::Failed => WatermarkStatus::NotPersisted,
            }
        };

        Ok(ObjectOutcome::Synced {
            fetched,
            transformed: output.rows.len(),
            skipped: output.skipped,
            load,
            watermark,
        })
    }

    /// Sync each object type in order, recording failures and moving on.
    pub async fn run(&self, objects: &[ObjectConfig], mode: SyncMode) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport::default();

        for object in objects {
            tracing::info!("Syncing {}", object.object_type);
            let outcome = self.sync_object(object, mode).await;
            if let Err(e) = &outcome {
                // Log with :? to show the full error chain
                tracing::error!("Failed to sync {}: {:?}", object.object_type, e);
            }
            report.objects.push(ObjectReport {
                object_type: object.object_type.clone(),
                outcome,
            });
        }

        report.duration = start.elapsed();
        report
    }
}
