//! Tests for database initialization
//!
//! Covers:
//! - Automatic database creation on first run
//! - Idempotent re-open of an existing database
//! - Append-only enforcement on the audit and learning tables

use brandreg_common::db::init::{init_database, init_memory_database, DEFAULT_BUSY_TIMEOUT_MS};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("brandreg.db");

    let result = init_database(&db_path, DEFAULT_BUSY_TIMEOUT_MS).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("brandreg.db");

    let pool1 = init_database(&db_path, DEFAULT_BUSY_TIMEOUT_MS).await.unwrap();
    sqlx::query("INSERT INTO settings (key, value) VALUES ('wal_check', '1')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    // Second open must not clobber data
    let pool2 = init_database(&db_path, DEFAULT_BUSY_TIMEOUT_MS).await.unwrap();
    let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'wal_check'")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(value, "1");
}

#[tokio::test]
async fn test_all_tables_created() {
    let pool = init_memory_database().await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for expected in [
        "brand_importers",
        "brand_portfolios",
        "brands",
        "consolidation_proposals",
        "consolidation_records",
        "consolidation_thresholds",
        "learning_events",
        "proposal_members",
        "record_brands",
        "settings",
        "skus",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_consolidation_records_are_append_only() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO consolidation_records (
            id, proposal_id, consolidation_type, survivor_id, survivor_name,
            merged_brands, skus_moved, importer_links_moved, notes, actor, created_at
        ) VALUES ('r1', 'cp-1', 'CASE_VARIANT', 's1', 'Acme', '[]', 0, 0, '[]', 'tester', '2024-01-01T00:00:00Z')
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let update = sqlx::query("UPDATE consolidation_records SET actor = 'someone' WHERE id = 'r1'")
        .execute(&pool)
        .await;
    assert!(update.is_err(), "UPDATE on audit table must be rejected");
    assert!(update.unwrap_err().to_string().contains("append-only"));

    let delete = sqlx::query("DELETE FROM consolidation_records WHERE id = 'r1'")
        .execute(&pool)
        .await;
    assert!(delete.is_err(), "DELETE on audit table must be rejected");

    let actor: String = sqlx::query_scalar("SELECT actor FROM consolidation_records WHERE id = 'r1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(actor, "tester");
}

#[tokio::test]
async fn test_learning_events_are_append_only() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO learning_events (proposal_id, consolidation_type, confidence_bucket, outcome, actor_kind, created_at)
        VALUES ('cp-1', 'SIMILAR_NAME', 80, 'CONFIRMED', 'HUMAN', '2024-01-01T00:00:00Z')
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let update = sqlx::query("UPDATE learning_events SET outcome = 'OVERRIDDEN'")
        .execute(&pool)
        .await;
    assert!(update.is_err());
}

#[tokio::test]
async fn test_merged_brand_requires_survivor_pointer() {
    let pool = init_memory_database().await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO brands (id, name, normalized_key, status, merged_into, created_at, updated_at)
        VALUES ('b1', 'Acme', 'acme', 'MERGED', NULL, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "MERGED without merged_into must violate the CHECK constraint");
}
