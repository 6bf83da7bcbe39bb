// ABOUTME: Flattens CRM records into destination rows
// ABOUTME: Copies identity and timestamps, keeps the raw property bag, projects listed properties to text

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::destination::Cell;
use crate::hubspot::SourceRecord;
use crate::schema::{
    PropertyColumn, TableDefinition, ARCHIVED_COLUMN, CREATED_AT_COLUMN, IDENTITY_COLUMN,
    RAW_PROPERTIES_COLUMN, UPDATED_AT_COLUMN,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("record has no id")]
    MissingIdentity,
}

/// One record ready to load: ordered `(column, value)` pairs.
///
/// Property columns whose value was absent or null are not present at all; the
/// loader pads them per batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRow {
    identity: String,
    cells: Vec<(String, Cell)>,
}

impl DestinationRow {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn cells(&self) -> &[(String, Cell)] {
        &self.cells
    }
}

/// Rows produced from a page of records plus the ids of records that were skipped.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub rows: Vec<DestinationRow>,
    pub skipped: Vec<String>,
    /// Latest `updatedAt` among transformed records
    pub max_updated_at: Option<DateTime<Utc>>,
}

pub struct RecordTransformer {
    property_columns: Vec<PropertyColumn>,
}

impl RecordTransformer {
    pub fn new(definition: &TableDefinition) -> Self {
        Self {
            property_columns: definition.property_columns.clone(),
        }
    }

    pub fn flatten(&self, record: &SourceRecord) -> Result<DestinationRow, TransformError> {
        let identity = record.id.trim();
        if identity.is_empty() {
            return Err(TransformError::MissingIdentity);
        }

        let mut cells = Vec::with_capacity(5 + self.property_columns.len());
        cells.push((IDENTITY_COLUMN.to_string(), Cell::Text(identity.to_string())));
        cells.push((
            CREATED_AT_COLUMN.to_string(),
            timestamp_cell(record.created_at.as_deref()),
        ));
        cells.push((
            UPDATED_AT_COLUMN.to_string(),
            timestamp_cell(record.updated_at.as_deref()),
        ));
        cells.push((ARCHIVED_COLUMN.to_string(), Cell::Bool(record.archived)));
        cells.push((
            RAW_PROPERTIES_COLUMN.to_string(),
            Cell::Json(Value::Object(record.properties.clone())),
        ));

        for pc in &self.property_columns {
            match record.properties.get(&pc.property) {
                None | Some(Value::Null) => {}
                Some(value) => cells.push((pc.column.clone(), Cell::Text(text_value(value)))),
            }
        }

        Ok(DestinationRow {
            identity: identity.to_string(),
            cells,
        })
    }

    /// Flatten every record, skipping (and logging) the ones that cannot be flattened.
    pub fn flatten_all(&self, records: &[SourceRecord]) -> TransformOutput {
        let mut output = TransformOutput {
            rows: Vec::with_capacity(records.len()),
            ..Default::default()
        };

        for (position, record) in records.iter().enumerate() {
            match self.flatten(record) {
                Ok(row) => {
                    if let Some(updated) = record.updated_at.as_deref().and_then(parse_timestamp) {
                        output.max_updated_at = output.max_updated_at.max(Some(updated));
                    }
                    output.rows.push(row);
                }
                Err(e) => {
                    let label = if record.id.is_empty() {
                        format!("#{}", position)
                    } else {
                        record.id.clone()
                    };
                    tracing::warn!("Skipping record {}: {}", label, e);
                    output.skipped.push(label);
                }
            }
        }

        output
    }
}

fn timestamp_cell(value: Option<&str>) -> Cell {
    value
        .and_then(parse_timestamp)
        .map(Cell::Timestamp)
        .unwrap_or(Cell::Null)
}

/// Parse an ISO-8601 timestamp, treating values without an offset as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strings are stored verbatim, anything else as its JSON rendering.
fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn definition(properties: &[&str]) -> TableDefinition {
        let props: Vec<String> = properties.iter().map(|s| s.to_string()).collect();
        TableDefinition::derive("public", "hubspot_contacts", &props)
    }

    fn record(value: Value) -> SourceRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_flatten_copies_fixed_fields() {
        let transformer = RecordTransformer::new(&definition(&["email"]));
        let row = transformer
            .flatten(&record(json!({
                "id": "101",
                "createdAt": "2024-01-02T03:04:05.123Z",
                "updatedAt": "2024-02-01T00:00:00Z",
                "archived": true,
                "properties": {"email": "a@example.com", "other": "x"}
            })))
            .unwrap();

        assert_eq!(row.identity(), "101");
        assert_eq!(row.get("hubspot_id"), Some(&Cell::Text("101".into())));
        assert_eq!(
            row.get("created_at"),
            Some(&Cell::Timestamp(
                Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
                    + chrono::Duration::milliseconds(123)
            ))
        );
        assert_eq!(row.get("archived"), Some(&Cell::Bool(true)));
        assert_eq!(
            row.get("raw_properties"),
            Some(&Cell::Json(json!({"email": "a@example.com", "other": "x"})))
        );
        assert_eq!(row.get("email"), Some(&Cell::Text("a@example.com".into())));
        assert_eq!(row.get("other"), None);
    }

    #[test]
    fn test_flatten_omits_absent_and_null_properties() {
        let transformer = RecordTransformer::new(&definition(&["email", "phone", "company"]));
        let row = transformer
            .flatten(&record(json!({
                "id": "1",
                "properties": {"email": "a@b.c", "phone": null}
            })))
            .unwrap();

        let columns: Vec<_> = row.columns().collect();
        assert_eq!(
            columns,
            vec!["hubspot_id", "created_at", "updated_at", "archived", "raw_properties", "email"]
        );
        assert_eq!(row.get("created_at"), Some(&Cell::Null));
    }

    #[test]
    fn test_flatten_renders_non_strings_as_json_text() {
        let transformer = RecordTransformer::new(&definition(&["amount", "flag", "tags", "Lead Status!"]));
        let row = transformer
            .flatten(&record(json!({
                "id": "7",
                "properties": {
                    "amount": 1250.5,
                    "flag": false,
                    "tags": ["a", "b"],
                    "Lead Status!": "NEW"
                }
            })))
            .unwrap();

        assert_eq!(row.get("amount"), Some(&Cell::Text("1250.5".into())));
        assert_eq!(row.get("flag"), Some(&Cell::Text("false".into())));
        assert_eq!(row.get("tags"), Some(&Cell::Text("[\"a\",\"b\"]".into())));
        assert_eq!(row.get("lead_status_"), Some(&Cell::Text("NEW".into())));
    }

    #[test]
    fn test_flatten_rejects_missing_identity() {
        let transformer = RecordTransformer::new(&definition(&["email"]));
        let err = transformer
            .flatten(&record(json!({"id": "  ", "properties": {}})))
            .unwrap_err();
        assert_eq!(err, TransformError::MissingIdentity);
    }

    #[test]
    fn test_flatten_all_skips_bad_records_and_tracks_latest_update() {
        let transformer = RecordTransformer::new(&definition(&["email"]));
        let records = vec![
            record(json!({"id": "1", "updatedAt": "2024-03-01T00:00:00Z"})),
            record(json!({"properties": {"email": "orphan@example.com"}})),
            record(json!({"id": "3", "updatedAt": "2024-03-05T10:00:00Z"})),
            record(json!({"id": "4", "updatedAt": "not a date"})),
        ];

        let output = transformer.flatten_all(&records);
        assert_eq!(output.rows.len(), 3);
        assert_eq!(output.skipped, vec!["#1".to_string()]);
        assert_eq!(
            output.max_updated_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(parse_timestamp("2024-05-06T07:08:09Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-06T09:08:09+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-06T07:08:09"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
