// ABOUTME: Integration tests against a real PostgreSQL target
// ABOUTME: Covers table provisioning, typed upserts and the sync_state watermark table

use chrono::{TimeZone, Utc};
use crm_replicator::destination::{Destination, PaddedBatch, PgDestination};
use crm_replicator::hubspot::SourceRecord;
use crm_replicator::schema::TableDefinition;
use crm_replicator::transform::RecordTransformer;
use crm_replicator::watermark::{PgWatermarkBackend, Watermark, WatermarkBackend};
use serde_json::json;
use std::env;
use std::sync::Arc;

const TEST_SCHEMA: &str = "crm_replicator_test";

/// Helper to get the test database URL from environment
fn get_test_url() -> Option<String> {
    env::var("TEST_TARGET_URL").ok()
}

async fn reset_schema(client: &tokio_postgres::Client) {
    client
        .batch_execute(&format!(
            r#"DROP SCHEMA IF EXISTS "{0}" CASCADE; CREATE SCHEMA "{0}";"#,
            TEST_SCHEMA
        ))
        .await
        .expect("Failed to reset test schema");
}

async fn cleanup_schema(client: &tokio_postgres::Client) {
    let _ = client
        .batch_execute(&format!(r#"DROP SCHEMA IF EXISTS "{}" CASCADE"#, TEST_SCHEMA))
        .await;
}

fn record(value: serde_json::Value) -> SourceRecord {
    serde_json::from_value(value).unwrap()
}

/// Test: provisioned table accepts rectangular batches and upserts are idempotent
#[tokio::test]
#[ignore]
async fn test_pg_destination_upsert_roundtrip() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let admin = crm_replicator::postgres::connect(&url)
        .await
        .expect("Failed to connect to target");
    reset_schema(&admin).await;

    let destination = PgDestination::connect(&url).await.unwrap();
    let table = TableDefinition::derive(
        TEST_SCHEMA,
        "hubspot_contacts",
        &["email".to_string(), "Lead Status!".to_string()],
    );

    assert!(!destination.table_exists(&table).await.unwrap());
    destination.create_table(&table).await.unwrap();
    assert!(destination.table_exists(&table).await.unwrap());
    let columns = destination.table_columns(&table).await.unwrap();
    assert_eq!(columns.len(), table.column_names().len());
    assert!(columns.iter().any(|c| c == "lead_status_"));

    let transformer = RecordTransformer::new(&table);
    let rows = transformer
        .flatten_all(&[
            record(json!({
                "id": "1",
                "createdAt": "2024-01-01T00:00:00Z",
                "updatedAt": "2024-01-02T00:00:00Z",
                "properties": {"email": "a@example.com", "Lead Status!": "NEW"}
            })),
            record(json!({"id": "2", "archived": true, "properties": {"email": "b@example.com"}})),
            record(json!({"id": "3", "properties": {}})),
        ])
        .rows;
    let batch = PaddedBatch::from_rows(&rows);

    assert_eq!(destination.upsert(&table, &batch).await.unwrap(), 3);
    assert_eq!(destination.upsert(&table, &batch).await.unwrap(), 3);

    let count: i64 = admin
        .query_one(
            &format!("SELECT COUNT(*) FROM {}", table.qualified_name()),
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 3);

    let row = admin
        .query_one(
            &format!(
                "SELECT email, lead_status_, archived, updated_at, raw_properties
                 FROM {} WHERE hubspot_id = '1'",
                table.qualified_name()
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, Option<String>>(0).as_deref(), Some("a@example.com"));
    assert_eq!(row.get::<_, Option<String>>(1).as_deref(), Some("NEW"));
    assert_eq!(row.get::<_, Option<bool>>(2), Some(false));
    assert_eq!(
        row.get::<_, Option<chrono::DateTime<Utc>>>(3),
        Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
    );
    assert_eq!(
        row.get::<_, Option<serde_json::Value>>(4),
        Some(json!({"email": "a@example.com", "Lead Status!": "NEW"}))
    );

    println!("✓ PgDestination upserted {} rows idempotently", count);
    cleanup_schema(&admin).await;
}

/// Test: a batch with a duplicate identity fails as a whole
#[tokio::test]
#[ignore]
async fn test_pg_destination_rejects_duplicate_identity_in_batch() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let admin = crm_replicator::postgres::connect(&url)
        .await
        .expect("Failed to connect to target");
    reset_schema(&admin).await;

    let destination = PgDestination::connect(&url).await.unwrap();
    let table = TableDefinition::derive(TEST_SCHEMA, "hubspot_deals", &["amount".to_string()]);
    destination.create_table(&table).await.unwrap();

    let transformer = RecordTransformer::new(&table);
    let rows = transformer
        .flatten_all(&[
            record(json!({"id": "9", "properties": {"amount": "1"}})),
            record(json!({"id": "9", "properties": {"amount": "2"}})),
        ])
        .rows;

    assert!(destination
        .upsert(&table, &PaddedBatch::from_rows(&rows))
        .await
        .is_err());

    let count: i64 = admin
        .query_one(
            &format!("SELECT COUNT(*) FROM {}", table.qualified_name()),
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 0);

    cleanup_schema(&admin).await;
}

/// Test: sync_state watermarks upsert and never move backwards
#[tokio::test]
#[ignore]
async fn test_pg_watermark_backend() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let admin = crm_replicator::postgres::connect(&url)
        .await
        .expect("Failed to connect to target");
    reset_schema(&admin).await;

    let client = crm_replicator::postgres::connect(&url).await.unwrap();
    let backend = PgWatermarkBackend::new(Arc::new(client), TEST_SCHEMA)
        .await
        .unwrap();

    let later = Utc.with_ymd_and_hms(2024, 8, 2, 0, 0, 0).unwrap();
    let earlier = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    let watermark = |time, cursor: &str| Watermark {
        object_type: "contacts".to_string(),
        last_sync_time: time,
        cursor: cursor.to_string(),
        updated_at: Utc::now(),
    };

    assert!(backend.load("contacts").await.unwrap().is_none());
    assert!(backend.save(&watermark(later, "c2")).await.unwrap());
    assert!(!backend.save(&watermark(earlier, "c1")).await.unwrap());

    let loaded = backend.load("contacts").await.unwrap().unwrap();
    assert_eq!(loaded.last_sync_time, later);
    assert_eq!(loaded.cursor, "c2");
    assert_eq!(backend.list().await.unwrap().len(), 1);

    assert!(backend.delete("contacts").await.unwrap());
    assert!(backend.load("contacts").await.unwrap().is_none());

    println!("✓ sync_state watermarks behave as expected");
    cleanup_schema(&admin).await;
}
