//! Append-only consolidation audit trail
//!
//! Rows are only ever inserted; the store rejects UPDATE and DELETE.

use brandreg_common::models::{ConsolidationRecord, MergedBrand};
use brandreg_common::{time, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::brands::parse_uuid;

const RECORD_COLUMNS: &str = "r.id, r.proposal_id, r.consolidation_type, r.survivor_id, r.survivor_name, \
     r.merged_brands, r.skus_moved, r.importer_links_moved, r.notes, r.actor, r.created_at";

/// Write a record and its brand index rows
pub async fn insert_record(conn: &mut SqliteConnection, record: &ConsolidationRecord) -> Result<()> {
    let merged_brands = serde_json::to_string(&record.merged_brands)?;
    let notes = serde_json::to_string(&record.notes)?;

    sqlx::query(
        r#"
        INSERT INTO consolidation_records (
            id, proposal_id, consolidation_type, survivor_id, survivor_name, merged_brands,
            skus_moved, importer_links_moved, notes, actor, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.proposal_id)
    .bind(record.consolidation_type.as_str())
    .bind(record.survivor_id.to_string())
    .bind(&record.survivor_name)
    .bind(&merged_brands)
    .bind(record.skus_moved)
    .bind(record.importer_links_moved)
    .bind(&notes)
    .bind(&record.actor)
    .bind(time::to_db(&record.created_at))
    .execute(&mut *conn)
    .await?;

    let roles = std::iter::once((record.survivor_id, "SURVIVOR"))
        .chain(record.merged_brands.iter().map(|b| (b.id, "MERGED")));
    for (brand_id, role) in roles {
        sqlx::query("INSERT INTO record_brands (record_id, brand_id, role) VALUES (?, ?, ?)")
            .bind(record.id.to_string())
            .bind(brand_id.to_string())
            .bind(role)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Audit records in the order they were written, optionally for one brand
pub async fn history(pool: &SqlitePool, brand_id: Option<Uuid>) -> Result<Vec<ConsolidationRecord>> {
    let rows = match brand_id {
        Some(brand_id) => {
            let sql = format!(
                "SELECT {} FROM consolidation_records r \
                 WHERE r.id IN (SELECT record_id FROM record_brands WHERE brand_id = ?) \
                 ORDER BY r.created_at, r.rowid",
                RECORD_COLUMNS
            );
            sqlx::query(&sql)
                .bind(brand_id.to_string())
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM consolidation_records r ORDER BY r.created_at, r.rowid",
                RECORD_COLUMNS
            );
            sqlx::query(&sql).fetch_all(pool).await?
        }
    };

    rows.iter().map(record_from_row).collect()
}

pub async fn get_record(pool: &SqlitePool, id: Uuid) -> Result<Option<ConsolidationRecord>> {
    let sql = format!("SELECT {} FROM consolidation_records r WHERE r.id = ?", RECORD_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

fn record_from_row(row: &SqliteRow) -> Result<ConsolidationRecord> {
    let id: String = row.try_get("id")?;
    let consolidation_type: String = row.try_get("consolidation_type")?;
    let survivor_id: String = row.try_get("survivor_id")?;
    let merged_brands: String = row.try_get("merged_brands")?;
    let notes: String = row.try_get("notes")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ConsolidationRecord {
        id: parse_uuid("consolidation_records.id", &id)?,
        proposal_id: row.try_get("proposal_id")?,
        consolidation_type: consolidation_type.parse()?,
        survivor_id: parse_uuid("survivor_id", &survivor_id)?,
        survivor_name: row.try_get("survivor_name")?,
        merged_brands: serde_json::from_str::<Vec<MergedBrand>>(&merged_brands)?,
        skus_moved: row.try_get("skus_moved")?,
        importer_links_moved: row.try_get("importer_links_moved")?,
        notes: serde_json::from_str(&notes)?,
        actor: row.try_get("actor")?,
        created_at: time::from_db("created_at", &created_at)?,
    })
}
