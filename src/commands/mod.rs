// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports sync, provision, properties and watermark commands plus shared wiring

pub mod properties;
pub mod provision;
pub mod sync;
pub mod watermark;

pub use properties::properties;
pub use provision::provision;
pub use sync::sync;

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::destination::PgDestination;
use crate::hubspot::CrmClient;
use crate::watermark::{PgWatermarkBackend, SqliteWatermarkBackend, WatermarkStore};

/// Where watermarks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WatermarkBackendKind {
    /// `sync_state` table in the destination database
    Postgres,
    /// Local SQLite file (see --state-file)
    Sqlite,
}

/// Default SQLite watermark file: `~/.crm-replicator/watermarks.db`.
pub fn default_state_file() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".crm-replicator").join("watermarks.db"))
}

/// Everything a command needs to reach the source, the destination and the state store.
pub struct CommandContext {
    pub config: SyncConfig,
    pub api_key: Option<String>,
    pub target_url: Option<String>,
    pub watermark_backend: WatermarkBackendKind,
    pub state_file: Option<PathBuf>,
}

impl CommandContext {
    pub fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("HubSpot API key is required. Pass --api-key or set HUBSPOT_API_KEY")
            })
    }

    pub fn target_url(&self) -> Result<&str> {
        self.target_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("Target database is required. Pass --target or set TARGET_DATABASE_URL")
            })
    }

    pub fn crm_client(&self) -> Result<CrmClient> {
        CrmClient::new(&self.config.source, self.api_key()?.to_string())
    }

    pub async fn destination(&self) -> Result<PgDestination> {
        PgDestination::connect(self.target_url()?)
            .await
            .context("Failed to connect to target database")
    }

    pub async fn watermark_store(&self) -> Result<WatermarkStore> {
        let lookback = self.config.default_lookback();
        match self.watermark_backend {
            WatermarkBackendKind::Postgres => {
                let client = crate::postgres::connect_with_retry(self.target_url()?)
                    .await
                    .context("Failed to connect to target database for watermarks")?;
                let backend =
                    PgWatermarkBackend::new(Arc::new(client), &self.config.destination.schema)
                        .await?;
                Ok(WatermarkStore::new(Box::new(backend), lookback))
            }
            WatermarkBackendKind::Sqlite => {
                let path = match &self.state_file {
                    Some(path) => path.clone(),
                    None => default_state_file()?,
                };
                tracing::info!("Using watermark file {}", path.display());
                let backend = SqliteWatermarkBackend::open(&path)?;
                Ok(WatermarkStore::new(Box::new(backend), lookback))
            }
        }
    }
}
