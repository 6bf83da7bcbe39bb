// ABOUTME: Per-object-type sync watermarks and the store the sync engine talks to
// ABOUTME: Backends persist to PostgreSQL or a local SQLite file behind one trait

pub mod postgres;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use postgres::PgWatermarkBackend;
pub use sqlite::SqliteWatermarkBackend;

/// Last successful sync of one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub object_type: String,
    /// Records modified at or after this time are fetched on the next run
    pub last_sync_time: DateTime<Utc>,
    /// Opaque progress marker stored alongside the time (may be empty)
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

/// Storage for watermarks.
///
/// `save` must be an upsert keyed on the object type that never replaces a stored
/// `last_sync_time` with an earlier one. It returns `false` when the stored value
/// was kept for that reason.
#[async_trait]
pub trait WatermarkBackend: Send + Sync {
    async fn load(&self, object_type: &str) -> Result<Option<Watermark>>;
    async fn save(&self, watermark: &Watermark) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Watermark>>;
    async fn delete(&self, object_type: &str) -> Result<bool>;
}

/// Where the next fetch of an object type starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPoint {
    pub since: DateTime<Utc>,
    pub cursor: String,
    /// False when `since` is the default lookback rather than a stored watermark
    pub stored: bool,
}

/// What [`WatermarkStore::set`] did with a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkWrite {
    Advanced,
    /// A later watermark was already stored and was kept
    KeptLater,
    /// The backend failed; nothing was stored
    Failed,
}

/// Best-effort watermark access for the sync engine.
///
/// Read failures fall back to the default lookback window and write failures are
/// logged rather than propagated, so a broken state store never stops a sync.
pub struct WatermarkStore {
    backend: Box<dyn WatermarkBackend>,
    default_lookback: chrono::Duration,
}

impl WatermarkStore {
    pub fn new(backend: Box<dyn WatermarkBackend>, default_lookback: chrono::Duration) -> Self {
        Self {
            backend,
            default_lookback,
        }
    }

    pub async fn get(&self, object_type: &str) -> SyncPoint {
        match self.backend.load(object_type).await {
            Ok(Some(watermark)) => {
                tracing::debug!(
                    "Watermark for {}: {} (cursor: {:?})",
                    object_type,
                    watermark.last_sync_time,
                    watermark.cursor
                );
                SyncPoint {
                    since: watermark.last_sync_time,
                    cursor: watermark.cursor,
                    stored: true,
                }
            }
            Ok(None) => {
                tracing::info!(
                    "No watermark for {}, fetching the last {} hours",
                    object_type,
                    self.default_lookback.num_hours()
                );
                self.default_point()
            }
            Err(e) => {
                tracing::error!(
                    "Failed to read watermark for {}, using default lookback: {:#}",
                    object_type,
                    e
                );
                self.default_point()
            }
        }
    }

    /// Record a completed cycle.
    pub async fn set(
        &self,
        object_type: &str,
        sync_time: DateTime<Utc>,
        cursor: &str,
    ) -> WatermarkWrite {
        let watermark = Watermark {
            object_type: object_type.to_string(),
            last_sync_time: sync_time,
            cursor: cursor.to_string(),
            updated_at: Utc::now(),
        };

        match self.backend.save(&watermark).await {
            Ok(true) => {
                tracing::info!("Advanced watermark for {} to {}", object_type, sync_time);
                WatermarkWrite::Advanced
            }
            Ok(false) => {
                tracing::warn!(
                    "Kept existing watermark for {}: stored time is later than {}",
                    object_type,
                    sync_time
                );
                WatermarkWrite::KeptLater
            }
            Err(e) => {
                tracing::error!("Failed to persist watermark for {}: {:#}", object_type, e);
                WatermarkWrite::Failed
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<Watermark>> {
        self.backend.list().await
    }

    /// Forget an object type's watermark so its next sync uses the default lookback.
    pub async fn reset(&self, object_type: &str) -> Result<bool> {
        self.backend.delete(object_type).await
    }

    fn default_point(&self) -> SyncPoint {
        SyncPoint {
            since: Utc::now() - self.default_lookback,
            cursor: String::new(),
            stored: false,
        }
    }
}
