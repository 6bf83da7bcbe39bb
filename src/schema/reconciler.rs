// ABOUTME: Checks destination tables before loading and emits provisioning scripts
// ABOUTME: Missing tables are never created during a sync; the operator applies the script

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::TableDefinition;
use crate::destination::Destination;

/// Whether rows can be loaded into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The table exists; `table` holds only the property columns it actually has.
    Ready { table: TableDefinition },
    /// The table is missing; `artifact` holds the DDL that creates it.
    NeedsProvisioning { artifact: PathBuf, ddl: String },
}

pub struct SchemaReconciler<'a> {
    destination: &'a dyn Destination,
    provisioning_dir: &'a Path,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(destination: &'a dyn Destination, provisioning_dir: &'a Path) -> Self {
        Self {
            destination,
            provisioning_dir,
        }
    }

    pub async fn exists(&self, table: &TableDefinition) -> Result<bool> {
        self.destination.table_exists(table).await
    }

    /// Report a present table as ready; for a missing one write its provisioning script.
    ///
    /// Existing tables are never altered. Properties without a column in the table
    /// are left out of the returned definition and only kept in the raw properties.
    pub async fn ensure_table(&self, table: &TableDefinition) -> Result<Readiness> {
        if self.exists(table).await? {
            tracing::info!("Table {} already exists", table.qualified_name());
            let columns = self.destination.table_columns(table).await?;
            let (table, dropped) = table.restrict_to(&columns);
            if !dropped.is_empty() {
                tracing::warn!(
                    "Table {} has no column for {} properties, keeping them in raw properties only: {}",
                    table.qualified_name(),
                    dropped.len(),
                    dropped.join(", ")
                );
            }
            return Ok(Readiness::Ready { table });
        }

        let artifact = table.write_artifact(self.provisioning_dir)?;
        tracing::warn!(
            "Table {} does not exist. Apply {} (or run `provision --apply`) and sync again",
            table.qualified_name(),
            artifact.display()
        );

        Ok(Readiness::NeedsProvisioning {
            artifact,
            ddl: table.create_table_sql(),
        })
    }

    /// Create the table in the destination. Operator-initiated only.
    pub async fn provision(&self, table: &TableDefinition) -> Result<()> {
        self.destination.create_table(table).await?;
        tracing::info!("Created table {}", table.qualified_name());
        Ok(())
    }
}
