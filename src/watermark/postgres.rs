// ABOUTME: PostgreSQL watermark backend storing progress in the destination database
// ABOUTME: Uses a sync_state table keyed by object type, upserted after each complete cycle

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::{Client, Row};

use super::{Watermark, WatermarkBackend};
use crate::utils::{quote_ident, validate_postgres_identifier};

pub struct PgWatermarkBackend {
    client: Arc<Client>,
    table: String,
}

impl PgWatermarkBackend {
    /// Wrap a connection, creating `<schema>.sync_state` if it does not exist.
    pub async fn new(client: Arc<Client>, schema: &str) -> Result<Self> {
        validate_postgres_identifier(schema).context("Invalid watermark schema")?;
        let table = format!("{}.sync_state", quote_ident(schema));

        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id SERIAL PRIMARY KEY,
                    object_type TEXT NOT NULL UNIQUE,
                    last_sync_time TIMESTAMPTZ NOT NULL,
                    sync_cursor TEXT,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )"
            ))
            .await
            .with_context(|| format!("Failed to create watermark table {}", table))?;

        Ok(Self { client, table })
    }
}

fn row_to_watermark(row: &Row) -> Result<Watermark> {
    Ok(Watermark {
        object_type: row.try_get("object_type")?,
        last_sync_time: row.try_get("last_sync_time")?,
        cursor: row
            .try_get::<_, Option<String>>("sync_cursor")?
            .unwrap_or_default(),
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl WatermarkBackend for PgWatermarkBackend {
    async fn load(&self, object_type: &str) -> Result<Option<Watermark>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT object_type, last_sync_time, sync_cursor, updated_at
                     FROM {} WHERE object_type = $1
                     ORDER BY last_sync_time DESC LIMIT 1",
                    self.table
                ),
                &[&object_type],
            )
            .await
            .with_context(|| format!("Failed to load watermark for {}", object_type))?;

        row.as_ref().map(row_to_watermark).transpose()
    }

    async fn save(&self, watermark: &Watermark) -> Result<bool> {
        let changed = self
            .client
            .execute(
                &format!(
                    "INSERT INTO {table} (object_type, last_sync_time, sync_cursor, updated_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (object_type) DO UPDATE SET
                        last_sync_time = EXCLUDED.last_sync_time,
                        sync_cursor = EXCLUDED.sync_cursor,
                        updated_at = EXCLUDED.updated_at
                     WHERE {table}.last_sync_time <= EXCLUDED.last_sync_time",
                    table = self.table
                ),
                &[
                    &watermark.object_type,
                    &watermark.last_sync_time,
                    &watermark.cursor,
                    &watermark.updated_at,
                ],
            )
            .await
            .with_context(|| format!("Failed to save watermark for {}", watermark.object_type))?;

        Ok(changed > 0)
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT object_type, last_sync_time, sync_cursor, updated_at
                     FROM {} ORDER BY object_type",
                    self.table
                ),
                &[],
            )
            .await
            .context("Failed to list watermarks")?;

        rows.iter().map(row_to_watermark).collect()
    }

    async fn delete(&self, object_type: &str) -> Result<bool> {
        let deleted = self
            .client
            .execute(
                &format!("DELETE FROM {} WHERE object_type = $1", self.table),
                &[&object_type],
            )
            .await
            .with_context(|| format!("Failed to delete watermark for {}", object_type))?;
        Ok(deleted > 0)
    }
}
