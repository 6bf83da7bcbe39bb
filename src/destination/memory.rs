// ABOUTME: In-memory destination for tests and dry runs
// ABOUTME: Stores rows per table keyed by identity and can simulate rejected rows

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Cell, Destination, PaddedBatch};
use crate::schema::TableDefinition;

/// Stored row: column name to value.
pub type StoredRow = BTreeMap<String, Cell>;

#[derive(Debug, Default)]
struct MemoryTable {
    columns: HashSet<String>,
    rows: BTreeMap<String, StoredRow>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, MemoryTable>,
    rejected_ids: HashSet<String>,
    upsert_calls: Vec<usize>,
}

/// Destination that keeps every table in memory.
///
/// Upserts behave like the PostgreSQL destination: the table must exist, every
/// column must be part of it, and a batch is applied atomically. Identities passed
/// to [`MemoryDestination::reject`] make any batch containing them fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert containing `identity` fail.
    pub async fn reject(&self, identity: &str) {
        self.inner
            .lock()
            .await
            .rejected_ids
            .insert(identity.to_string());
    }

    /// Rows of a table keyed by identity, or `None` if it was never created.
    pub async fn rows(&self, table: &TableDefinition) -> Option<BTreeMap<String, StoredRow>> {
        self.inner
            .lock()
            .await
            .tables
            .get(&table.qualified_name())
            .map(|t| t.rows.clone())
    }

    /// Size of every upsert call so far, failed ones included.
    pub async fn upsert_calls(&self) -> Vec<usize> {
        self.inner.lock().await.upsert_calls.clone()
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn table_exists(&self, table: &TableDefinition) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .tables
            .contains_key(&table.qualified_name()))
    }

    async fn table_columns(&self, table: &TableDefinition) -> Result<Vec<String>> {
        let name = table.qualified_name();
        match self.inner.lock().await.tables.get(&name) {
            Some(stored) => Ok(stored.columns.iter().cloned().collect()),
            None => bail!("relation {} does not exist", name),
        }
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.tables.entry(table.qualified_name()).or_default();
        entry.columns.extend(table.column_names());
        Ok(())
    }

    async fn upsert(&self, table: &TableDefinition, batch: &PaddedBatch) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.upsert_calls.push(batch.len());

        if let Some(bad) = batch
            .rows
            .iter()
            .find(|row| inner.rejected_ids.contains(&row.identity))
        {
            bail!("row {} rejected by destination", bad.identity);
        }

        let name = table.qualified_name();
        let Some(stored) = inner.tables.get_mut(&name) else {
            bail!("relation {} does not exist", name);
        };
        if let Some(missing) = batch.columns.iter().find(|c| !stored.columns.contains(*c)) {
            bail!("column {} of relation {} does not exist", missing, name);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = batch.rows.iter().find(|r| !seen.insert(r.identity.as_str())) {
            bail!("ON CONFLICT would affect row {} a second time", dup.identity);
        }

        for row in &batch.rows {
            let target = stored.rows.entry(row.identity.clone()).or_default();
            for (column, cell) in batch.columns.iter().zip(&row.cells) {
                target.insert(column.clone(), cell.clone());
            }
        }

        Ok(batch.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::PaddedRow;

    fn table() -> TableDefinition {
        TableDefinition::derive("public", "hubspot_deals", &["amount".to_string()])
    }

    fn batch(rows: &[(&str, Option<&str>)]) -> PaddedBatch {
        PaddedBatch {
            columns: vec!["hubspot_id".to_string(), "amount".to_string()],
            rows: rows
                .iter()
                .map(|(id, amount)| PaddedRow {
                    identity: id.to_string(),
                    cells: vec![
                        Cell::Text(id.to_string()),
                        amount.map(|a| Cell::Text(a.to_string())).unwrap_or(Cell::Null),
                    ],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_upsert_requires_table() {
        let destination = MemoryDestination::new();
        assert!(!destination.table_exists(&table()).await.unwrap());
        assert!(destination.upsert(&table(), &batch(&[("1", None)])).await.is_err());

        destination.create_table(&table()).await.unwrap();
        assert!(destination.table_exists(&table()).await.unwrap());
        assert_eq!(destination.upsert(&table(), &batch(&[("1", None)])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_table_columns() {
        let destination = MemoryDestination::new();
        assert!(destination.table_columns(&table()).await.is_err());

        destination.create_table(&table()).await.unwrap();
        let mut columns = destination.table_columns(&table()).await.unwrap();
        columns.sort();
        assert_eq!(
            columns,
            vec![
                "amount",
                "archived",
                "created_at",
                "hubspot_id",
                "id",
                "raw_properties",
                "updated_at"
            ]
        );
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_identity() {
        let destination = MemoryDestination::new();
        destination.create_table(&table()).await.unwrap();

        destination
            .upsert(&table(), &batch(&[("1", Some("10")), ("2", Some("20"))]))
            .await
            .unwrap();
        destination
            .upsert(&table(), &batch(&[("1", None)]))
            .await
            .unwrap();

        let rows = destination.rows(&table()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["1"]["amount"], Cell::Null);
        assert_eq!(rows["2"]["amount"], Cell::Text("20".into()));
    }

    #[tokio::test]
    async fn test_rejected_identity_fails_whole_batch() {
        let destination = MemoryDestination::new();
        destination.create_table(&table()).await.unwrap();
        destination.reject("2").await;

        let err = destination
            .upsert(&table(), &batch(&[("1", None), ("2", None)]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert!(destination.rows(&table()).await.unwrap().is_empty());
        assert_eq!(destination.upsert_calls().await, vec![2]);
    }

    #[tokio::test]
    async fn test_unknown_column_and_duplicate_identity_fail() {
        let destination = MemoryDestination::new();
        destination.create_table(&table()).await.unwrap();

        let mut unknown = batch(&[("1", None)]);
        unknown.columns[1] = "nope".to_string();
        assert!(destination.upsert(&table(), &unknown).await.is_err());

        let dup = batch(&[("1", None), ("1", Some("5"))]);
        assert!(destination.upsert(&table(), &dup).await.is_err());
    }
}
