// ABOUTME: PostgreSQL destination writing CRM rows with INSERT ... ON CONFLICT DO UPDATE
// ABOUTME: Binds typed parameters per column and commits each batch in one transaction

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::{Cell, Destination, PaddedBatch};
use crate::schema::{ColumnType, TableDefinition, IDENTITY_COLUMN};
use crate::utils::quote_ident;

/// Parameters per statement, kept below PostgreSQL's 65535 limit.
const MAX_PARAMS: usize = 65_000;

pub struct PgDestination {
    client: Mutex<Client>,
}

impl PgDestination {
    pub fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// Open a dedicated connection for writing rows.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = crate::postgres::connect_with_retry(url).await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn table_exists(&self, table: &TableDefinition) -> Result<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                 )",
                &[&table.schema, &table.name],
            )
            .await
            .with_context(|| format!("Failed to check whether {} exists", table.qualified_name()))?;
        Ok(row.try_get(0)?)
    }

    async fn table_columns(&self, table: &TableDefinition) -> Result<Vec<String>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT column_name::text FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2",
                &[&table.schema, &table.name],
            )
            .await
            .with_context(|| format!("Failed to read columns of {}", table.qualified_name()))?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(Into::into))
            .collect()
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(&table.create_table_sql())
            .await
            .with_context(|| format!("Failed to create table {}", table.qualified_name()))
    }

    async fn upsert(&self, table: &TableDefinition, batch: &PaddedBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let column_types: Vec<ColumnType> =
            batch.columns.iter().map(|c| ColumnType::of(c)).collect();
        let rows_per_statement = std::cmp::max(1, MAX_PARAMS / batch.columns.len().max(1));

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .context("Failed to start upsert transaction")?;

        let mut affected = 0u64;
        for chunk in batch.rows.chunks(rows_per_statement) {
            let query = build_upsert_query(table, &batch.columns, chunk.len());

            let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
                Vec::with_capacity(chunk.len() * batch.columns.len());
            for row in chunk {
                for ((cell, column_type), column) in
                    row.cells.iter().zip(&column_types).zip(&batch.columns)
                {
                    params.push(
                        to_param(*column_type, cell).with_context(|| {
                            format!("Invalid value for column {} of {}", column, row.identity)
                        })?,
                    );
                }
            }
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|v| v.as_ref() as &(dyn ToSql + Sync))
                .collect();

            affected += tx
                .execute(&query, &refs)
                .await
                .with_context(|| format!("Failed to upsert batch into {}", table.qualified_name()))?;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit batch into {}", table.qualified_name()))?;

        Ok(affected)
    }
}

/// Bind a cell as the column's SQL type; nulls are typed so the server never has to guess.
fn to_param(column_type: ColumnType, cell: &Cell) -> Result<Box<dyn ToSql + Sync + Send>> {
    Ok(match (column_type, cell) {
        (ColumnType::Text, Cell::Null) => Box::new(None::<String>),
        (ColumnType::Text, Cell::Text(s)) => Box::new(Some(s.clone())),
        (ColumnType::Timestamp, Cell::Null) => Box::new(None::<DateTime<Utc>>),
        (ColumnType::Timestamp, Cell::Timestamp(t)) => Box::new(Some(*t)),
        (ColumnType::Boolean, Cell::Null) => Box::new(None::<bool>),
        (ColumnType::Boolean, Cell::Bool(b)) => Box::new(Some(*b)),
        (ColumnType::Json, Cell::Null) => Box::new(None::<Value>),
        (ColumnType::Json, Cell::Json(v)) => Box::new(Some(v.clone())),
        (column_type, cell) => bail!("cannot store {:?} in a {:?} column", cell, column_type),
    })
}

/// Build a multi-row upsert:
///
/// ```sql
/// INSERT INTO "schema"."table" ("c1", "c2") VALUES ($1, $2), ($3, $4)
/// ON CONFLICT ("hubspot_id") DO UPDATE SET "c2" = EXCLUDED."c2"
/// ```
fn build_upsert_query(table: &TableDefinition, columns: &[String], num_rows: usize) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let num_cols = columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let update_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != IDENTITY_COLUMN)
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote_ident(c)))
        .collect();

    let conflict_action = if update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
        table.qualified_name(),
        quoted_columns.join(", "),
        value_rows.join(", "),
        quote_ident(IDENTITY_COLUMN),
        conflict_action
    )
}
