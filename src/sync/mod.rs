// ABOUTME: Incremental sync of CRM object types into the destination
// ABOUTME: Exposes the engine plus per-object outcomes and the run report

mod engine;

pub use engine::SyncEngine;

use std::path::PathBuf;
use std::time::Duration;

use crate::hubspot::FetchError;
use crate::loader::LoadReport;

/// Which records a cycle fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Records modified since the stored watermark (or the default lookback)
    #[default]
    Incremental,
    /// Every record, ignoring the watermark; the watermark still advances afterwards
    Full,
}

/// What happened to the watermark at the end of a complete cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkStatus {
    Advanced,
    /// Kept on purpose because rows failed to load or transform
    Held,
    /// A later watermark was already stored, so the stored one stays
    Unchanged,
    /// The store could not persist the new value; the next run re-reads the window
    NotPersisted,
}

/// Result of one sync cycle for one object type.
#[derive(Debug)]
pub enum ObjectOutcome {
    /// Every page was fetched and loaded (individual rows may still have failed).
    Synced {
        fetched: usize,
        transformed: usize,
        skipped: Vec<String>,
        load: LoadReport,
        watermark: WatermarkStatus,
    },
    /// The destination table is missing; the DDL to create it was written out.
    NeedsProvisioning { artifact: PathBuf, ddl: String },
    /// Property discovery returned nothing to sync.
    NoProperties,
    /// Paging stopped early. Whatever was fetched was loaded; the watermark was kept.
    Incomplete {
        fetched: usize,
        load: LoadReport,
        error: FetchError,
    },
}

impl ObjectOutcome {
    /// True when the stored watermark covers this cycle.
    pub fn watermark_persisted(&self) -> bool {
        matches!(
            self,
            ObjectOutcome::Synced {
                watermark: WatermarkStatus::Advanced | WatermarkStatus::Unchanged,
                ..
            }
        )
    }
}

#[derive(Debug)]
pub struct ObjectReport {
    pub object_type: String,
    pub outcome: anyhow::Result<ObjectOutcome>,
}

impl ObjectReport {
    /// Errored or stopped paging early. A missing table is not a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self.outcome,
            Ok(ObjectOutcome::Synced { .. })
                | Ok(ObjectOutcome::NeedsProvisioning { .. })
                | Ok(ObjectOutcome::NoProperties)
        )
    }
}

/// Per-object results of a run, in the order the objects were processed.
#[derive(Debug, Default)]
pub struct RunReport {
    pub objects: Vec<ObjectReport>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    pub fn failures(&self) -> usize {
        self.objects.iter().filter(|o| o.is_failure()).count()
    }

    pub fn rows_committed(&self) -> usize {
        self.objects
            .iter()
            .filter_map(|o| match &o.outcome {
                Ok(ObjectOutcome::Synced { load, .. })
                | Ok(ObjectOutcome::Incomplete { load, .. }) => Some(load.rows_committed),
                _ => None,
            })
            .sum()
    }

    pub fn get(&self, object_type: &str) -> Option<&ObjectReport> {
        self.objects.iter().find(|o| o.object_type == object_type)
    }
}
