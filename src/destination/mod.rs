// ABOUTME: Warehouse sink abstraction used by the schema reconciler and the batch loader
// ABOUTME: Defines cell values, rectangular batches and the Destination trait

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::schema::TableDefinition;
use crate::transform::DestinationRow;

pub use memory::MemoryDestination;
pub use postgres::PgDestination;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

/// Row of a [`PaddedBatch`]: one cell per batch column.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedRow {
    pub identity: String,
    pub cells: Vec<Cell>,
}

/// Rows that all share the same column list.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    pub columns: Vec<String>,
    pub rows: Vec<PaddedRow>,
}

impl PaddedBatch {
    /// Rectangularize rows: columns are the union of every row's columns in
    /// first-seen order, and a row missing a column gets an explicit null.
    pub fn from_rows(rows: &[DestinationRow]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for column in row.columns() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }

        let rows = rows
            .iter()
            .map(|row| PaddedRow {
                identity: row.identity().to_string(),
                cells: columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Cell::Null))
                    .collect(),
            })
            .collect();

        Self { columns, rows }
    }

    /// A batch holding only row `index`, for row-by-row retries.
    pub fn single(&self, index: usize) -> Option<Self> {
        self.rows.get(index).map(|row| Self {
            columns: self.columns.clone(),
            rows: vec![row.clone()],
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A warehouse that can hold replicated CRM tables.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn table_exists(&self, table: &TableDefinition) -> Result<bool>;

    /// Column names of an existing table, in no particular order.
    async fn table_columns(&self, table: &TableDefinition) -> Result<Vec<String>>;

    /// Create the table. Only used by explicit provisioning, never by a sync.
    async fn create_table(&self, table: &TableDefinition) -> Result<()>;

    /// Insert or update every row of the batch keyed on the identity column.
    ///
    /// Either the whole batch is committed or none of it is.
    async fn upsert(&self, table: &TableDefinition, batch: &PaddedBatch) -> Result<u64>;
}
