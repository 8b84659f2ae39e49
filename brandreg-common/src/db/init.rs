//! Database initialization
//!
//! Opens (or creates) the SQLite store and creates every table the
//! consolidation engine needs. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout when no setting overrides it
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path, busy_timeout_ms: u64) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    info!("Database busy timeout set to {} ms", busy_timeout_ms);

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// The pool never recycles its connection, which would discard the data.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table, index and trigger (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_brands_table(pool).await?;
    create_skus_table(pool).await?;
    create_brand_importers_table(pool).await?;
    create_brand_portfolios_table(pool).await?;
    create_proposals_table(pool).await?;
    create_proposal_members_table(pool).await?;
    create_consolidation_records_table(pool).await?;
    create_record_brands_table(pool).await?;
    create_learning_events_table(pool).await?;
    create_thresholds_table(pool).await?;
    create_append_only_triggers(pool).await?;
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_brands_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS brands (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            normalized_key TEXT NOT NULL,
            domain TEXT,
            country TEXT,
            category TEXT,
            sku_count INTEGER NOT NULL DEFAULT 0 CHECK (sku_count >= 0),
            enrichment TEXT,
            enrichment_verified_at TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (status IN ('ACTIVE', 'MERGED')),
            merged_into TEXT REFERENCES brands(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK ((status = 'MERGED') = (merged_into IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_brands_status ON brands(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_brands_merged_into ON brands(merged_into)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_skus_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS skus (
            id TEXT PRIMARY KEY,
            brand_id TEXT NOT NULL REFERENCES brands(id),
            descriptor TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_skus_brand ON skus(brand_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_brand_importers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS brand_importers (
            brand_id TEXT NOT NULL REFERENCES brands(id),
            importer_id TEXT NOT NULL,
            PRIMARY KEY (brand_id, importer_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_brand_portfolios_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS brand_portfolios (
            portfolio_id TEXT NOT NULL,
            brand_id TEXT NOT NULL REFERENCES brands(id),
            created_at TEXT NOT NULL,
            PRIMARY KEY (portfolio_id, brand_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_proposals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consolidation_proposals (
            id TEXT PRIMARY KEY,
            consolidation_type TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 100),
            proposed_survivor_id TEXT NOT NULL,
            member_ids TEXT NOT NULL,
            signals TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolved_at TEXT,
            resolved_by TEXT,
            resolution_notes TEXT,
            survivor_override_id TEXT,
            record_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_proposals_status ON consolidation_proposals(status, confidence)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_proposal_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposal_members (
            proposal_id TEXT NOT NULL REFERENCES consolidation_proposals(id),
            brand_id TEXT NOT NULL,
            PRIMARY KEY (proposal_id, brand_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_proposal_members_brand ON proposal_members(brand_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_consolidation_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consolidation_records (
            id TEXT PRIMARY KEY,
            proposal_id TEXT NOT NULL,
            consolidation_type TEXT NOT NULL,
            survivor_id TEXT NOT NULL,
            survivor_name TEXT NOT NULL,
            merged_brands TEXT NOT NULL,
            skus_moved INTEGER NOT NULL,
            importer_links_moved INTEGER NOT NULL,
            notes TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_record_brands_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS record_brands (
            record_id TEXT NOT NULL REFERENCES consolidation_records(id),
            brand_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('SURVIVOR', 'MERGED')),
            PRIMARY KEY (record_id, brand_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_record_brands_brand ON record_brands(brand_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_learning_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learning_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id TEXT NOT NULL,
            consolidation_type TEXT NOT NULL,
            confidence_bucket INTEGER NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('CONFIRMED', 'OVERRIDDEN')),
            actor_kind TEXT NOT NULL CHECK (actor_kind IN ('HUMAN', 'AUTOMATIC')),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_learning_events_created ON learning_events(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_thresholds_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consolidation_thresholds (
            consolidation_type TEXT PRIMARY KEY,
            auto_approve REAL NOT NULL,
            review_floor REAL NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit and learning tables reject UPDATE and DELETE at the store level
async fn create_append_only_triggers(pool: &SqlitePool) -> Result<()> {
    for table in ["consolidation_records", "record_brands", "learning_events"] {
        for action in ["UPDATE", "DELETE"] {
            let sql = format!(
                "CREATE TRIGGER IF NOT EXISTS {table}_no_{action_lc} BEFORE {action} ON {table} \
                 BEGIN SELECT RAISE(ABORT, '{table} is append-only'); END",
                table = table,
                action = action,
                action_lc = action.to_lowercase(),
            );
            sqlx::query(&sql).execute(pool).await?;
        }
    }
    Ok(())
}
