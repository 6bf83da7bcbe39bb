// ABOUTME: Destination table definitions derived from CRM property lists
// ABOUTME: Maps properties to sanitized columns and renders CREATE TABLE statements

pub mod reconciler;

pub use reconciler::{Readiness, SchemaReconciler};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{quote_ident, sanitize_column_name};

/// Column holding the CRM record id; the upsert conflict target.
pub const IDENTITY_COLUMN: &str = "hubspot_id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const ARCHIVED_COLUMN: &str = "archived";
pub const RAW_PROPERTIES_COLUMN: &str = "raw_properties";

/// PostgreSQL truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Columns present in every table, with their DDL, before any property column.
const FIXED_COLUMNS: &[(&str, &str)] = &[
    ("id", "SERIAL PRIMARY KEY"),
    (IDENTITY_COLUMN, "TEXT NOT NULL UNIQUE"),
    (CREATED_AT_COLUMN, "TIMESTAMPTZ"),
    (UPDATED_AT_COLUMN, "TIMESTAMPTZ"),
    (ARCHIVED_COLUMN, "BOOLEAN DEFAULT FALSE"),
    (RAW_PROPERTIES_COLUMN, "JSONB"),
];

/// SQL type of a column written by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Timestamp,
    Boolean,
    Json,
}

impl ColumnType {
    /// Type of any column the loader may write. Property columns are always text.
    pub fn of(column: &str) -> Self {
        match column {
            CREATED_AT_COLUMN | UPDATED_AT_COLUMN => ColumnType::Timestamp,
            ARCHIVED_COLUMN => ColumnType::Boolean,
            RAW_PROPERTIES_COLUMN => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

/// One CRM property and the column it is flattened into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyColumn {
    pub property: String,
    pub column: String,
}

/// A destination table for one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub schema: String,
    pub name: String,
    pub property_columns: Vec<PropertyColumn>,
}

impl TableDefinition {
    /// Derive the table for a property list.
    ///
    /// Properties whose sanitized name collides with a fixed column or with an
    /// earlier property are dropped with a warning; the first occurrence wins.
    pub fn derive(schema: &str, name: &str, properties: &[String]) -> Self {
        let mut taken: HashSet<String> = FIXED_COLUMNS
            .iter()
            .map(|(column, _)| column.to_string())
            .collect();
        let mut property_columns = Vec::with_capacity(properties.len());

        for property in properties {
            let column = truncate_identifier(sanitize_column_name(property));
            if column.is_empty() {
                tracing::warn!("Skipping property {:?}: empty column name", property);
                continue;
            }
            if !taken.insert(column.clone()) {
                tracing::warn!(
                    "Skipping property {:?} for {}: column {:?} is already used",
                    property,
                    name,
                    column
                );
                continue;
            }
            property_columns.push(PropertyColumn {
                property: property.clone(),
                column,
            });
        }

        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            property_columns,
        }
    }

    /// Keep only the property columns present in an existing table.
    ///
    /// Returns the narrowed definition and the properties that were dropped; their
    /// values remain available in the raw properties column.
    pub fn restrict_to(&self, existing: &[String]) -> (Self, Vec<String>) {
        let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .property_columns
            .iter()
            .cloned()
            .partition(|pc| existing.contains(pc.column.as_str()));

        let table = Self {
            schema: self.schema.clone(),
            name: self.name.clone(),
            property_columns: kept,
        };
        (table, dropped.into_iter().map(|pc| pc.property).collect())
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Every column of the table, in table order.
    pub fn column_names(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|(column, _)| column.to_string())
            .chain(self.property_columns.iter().map(|pc| pc.column.clone()))
            .collect()
    }

    /// File name of the provisioning script for this table.
    pub fn artifact_name(&self) -> String {
        format!("create_{}.sql", self.name)
    }

    /// Write the provisioning script into `dir`, creating it if needed.
    pub fn write_artifact(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create provisioning directory {}", dir.display()))?;

        let path = dir.join(self.artifact_name());
        fs::write(&path, self.create_table_sql())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = FIXED_COLUMNS
            .iter()
            .map(|(column, ddl)| format!("{} {}", column, ddl))
            .chain(
                self.property_columns
                    .iter()
                    .map(|pc| format!("{} TEXT", quote_ident(&pc.column))),
            )
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);\n",
            self.qualified_name(),
            columns.join(",\n    ")
        )
    }
}

fn truncate_identifier(mut column: String) -> String {
    if column.len() > MAX_IDENTIFIER_BYTES {
        let mut end = MAX_IDENTIFIER_BYTES;
        while !column.is_char_boundary(end) {
            end -= 1;
        }
        column.truncate(end);
    }
    column
}
