//! Brand record store
//!
//! Point lookup, bulk scan of ACTIVE brands, and the compare-and-set and
//! relink statements the merge executor runs inside its transaction.

use brandreg_common::models::{BrandRecord, BrandStatus, NewBrand};
use brandreg_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::services::normalizer::normalize;

const BRAND_COLUMNS: &str = "id, name, normalized_key, domain, country, category, sku_count, \
     enrichment, enrichment_verified_at, status, merged_into, updated_at";

/// Register a new ACTIVE brand
///
/// A new brand owns no SKUs; `sku_count` only moves through `add_sku` and
/// merges so it always matches the attributed rows.
pub async fn insert_brand(pool: &SqlitePool, brand: NewBrand) -> Result<BrandRecord> {
    if brand.name.trim().is_empty() {
        return Err(Error::InvalidInput("brand name must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let now = time::now();
    let normalized_key = normalize(&brand.name);
    let enrichment = brand
        .enrichment
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO brands (
            id, name, normalized_key, domain, country, category, sku_count,
            enrichment, enrichment_verified_at, status, merged_into, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 'ACTIVE', NULL, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&brand.name)
    .bind(&normalized_key)
    .bind(&brand.domain)
    .bind(&brand.country)
    .bind(&brand.category)
    .bind(&enrichment)
    .bind(brand.enrichment_verified_at.as_ref().map(time::to_db))
    .bind(time::to_db(&now))
    .bind(time::to_db(&now))
    .execute(pool)
    .await?;

    Ok(BrandRecord {
        id,
        name: brand.name,
        normalized_key,
        domain: brand.domain,
        country: brand.country,
        category: brand.category,
        sku_count: 0,
        importer_ids: Vec::new(),
        sku_descriptors: Vec::new(),
        enrichment: brand.enrichment,
        enrichment_verified_at: brand.enrichment_verified_at,
        status: BrandStatus::Active,
        merged_into: None,
        updated_at: now,
    })
}

/// Attribute one SKU to an ACTIVE brand and bump its count
pub async fn add_sku(pool: &SqlitePool, brand_id: Uuid, descriptor: &str) -> Result<Uuid> {
    let sku_id = Uuid::new_v4();
    let now = time::to_db(&time::now());
    let mut tx = pool.begin().await?;

    let bumped = sqlx::query(
        "UPDATE brands SET sku_count = sku_count + 1, updated_at = ? WHERE id = ? AND status = 'ACTIVE'",
    )
    .bind(&now)
    .bind(brand_id.to_string())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if bumped == 0 {
        return Err(Error::NotFound(format!("active brand {}", brand_id)));
    }

    sqlx::query("INSERT INTO skus (id, brand_id, descriptor, created_at) VALUES (?, ?, ?, ?)")
        .bind(sku_id.to_string())
        .bind(brand_id.to_string())
        .bind(descriptor)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(sku_id)
}

/// Associate an importer with a brand (idempotent)
pub async fn link_importer(pool: &SqlitePool, brand_id: Uuid, importer_id: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO brand_importers (brand_id, importer_id) VALUES (?, ?)")
        .bind(brand_id.to_string())
        .bind(importer_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load one brand with its SKU descriptors and importer links
pub async fn get_brand(pool: &SqlitePool, id: Uuid) -> Result<Option<BrandRecord>> {
    let sql = format!("SELECT {} FROM brands WHERE id = ?", BRAND_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut brand = brand_from_row(&row)?;

    brand.sku_descriptors =
        sqlx::query_scalar("SELECT descriptor FROM skus WHERE brand_id = ? ORDER BY created_at, id")
            .bind(id.to_string())
            .fetch_all(pool)
            .await?;
    brand.importer_ids = sqlx::query_scalar(
        "SELECT importer_id FROM brand_importers WHERE brand_id = ? ORDER BY importer_id",
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(Some(brand))
}

/// Bulk load every ACTIVE brand
///
/// Malformed rows are skipped with a warning; one bad record never fails the scan.
pub async fn scan_active(pool: &SqlitePool) -> Result<Vec<BrandRecord>> {
    let sql = format!(
        "SELECT {} FROM brands WHERE status = 'ACTIVE' ORDER BY normalized_key, id",
        BRAND_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut descriptors: HashMap<String, Vec<String>> = HashMap::new();
    let sku_rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT s.brand_id, s.descriptor
        FROM skus s JOIN brands b ON b.id = s.brand_id
        WHERE b.status = 'ACTIVE'
        ORDER BY s.created_at, s.id
        "#,
    )
    .fetch_all(pool)
    .await?;
    for (brand_id, descriptor) in sku_rows {
        descriptors.entry(brand_id).or_default().push(descriptor);
    }

    let mut importers: HashMap<String, Vec<String>> = HashMap::new();
    let importer_rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT bi.brand_id, bi.importer_id
        FROM brand_importers bi JOIN brands b ON b.id = bi.brand_id
        WHERE b.status = 'ACTIVE'
        ORDER BY bi.importer_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    for (brand_id, importer_id) in importer_rows {
        importers.entry(brand_id).or_default().push(importer_id);
    }

    let mut brands = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for row in rows {
        match brand_from_row(&row) {
            Ok(mut brand) => {
                let key = brand.id.to_string();
                brand.sku_descriptors = descriptors.remove(&key).unwrap_or_default();
                brand.importer_ids = importers.remove(&key).unwrap_or_default();
                brands.push(brand);
            }
            Err(e) => {
                skipped += 1;
                let raw_id: Option<String> = row.try_get("id").ok();
                tracing::warn!(brand_id = ?raw_id, error = %e, "Skipping malformed brand row");
            }
        }
    }

    tracing::debug!(loaded = brands.len(), skipped, "Scanned active brands");
    Ok(brands)
}

fn brand_from_row(row: &SqliteRow) -> Result<BrandRecord> {
    let id: String = row.try_get("id")?;
    let id = parse_uuid("brands.id", &id)?;

    let name: String = row.try_get("name")?;
    if name.trim().is_empty() {
        return Err(Error::Internal(format!("brand {} has an empty name", id)));
    }

    let enrichment: Option<String> = row.try_get("enrichment")?;
    let enrichment = enrichment
        .map(|e| serde_json::from_str::<serde_json::Value>(&e))
        .transpose()?;

    let status: String = row.try_get("status")?;
    let merged_into: Option<String> = row.try_get("merged_into")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(BrandRecord {
        id,
        name,
        normalized_key: row.try_get("normalized_key")?,
        domain: row.try_get("domain")?,
        country: row.try_get("country")?,
        category: row.try_get("category")?,
        sku_count: row.try_get("sku_count")?,
        importer_ids: Vec::new(),
        sku_descriptors: Vec::new(),
        enrichment,
        enrichment_verified_at: time::from_db_opt(
            "enrichment_verified_at",
            row.try_get("enrichment_verified_at")?,
        )?,
        status: status.parse()?,
        merged_into: merged_into
            .map(|m| parse_uuid("brands.merged_into", &m))
            .transpose()?,
        updated_at: time::from_db("updated_at", &updated_at)?,
    })
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid {} '{}': {}", column, value, e)))
}

// ---------------------------------------------------------------------------
// Transactional statements used by the merge executor
// ---------------------------------------------------------------------------

/// Fields the merge executor reads from each member inside its transaction
#[derive(Debug, Clone)]
pub struct MergeMember {
    pub id: Uuid,
    pub name: String,
    pub status: BrandStatus,
    pub sku_count: i64,
    pub enrichment: Option<serde_json::Value>,
    pub enrichment_verified_at: Option<DateTime<Utc>>,
}

pub async fn load_merge_member(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<MergeMember>> {
    let row = sqlx::query(
        "SELECT id, name, status, sku_count, enrichment, enrichment_verified_at FROM brands WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.try_get("status")?;
    let enrichment: Option<String> = row.try_get("enrichment")?;

    Ok(Some(MergeMember {
        id,
        name: row.try_get("name")?,
        status: status.parse()?,
        sku_count: row.try_get("sku_count")?,
        enrichment: enrichment.map(|e| serde_json::from_str(&e)).transpose()?,
        enrichment_verified_at: time::from_db_opt(
            "enrichment_verified_at",
            row.try_get("enrichment_verified_at")?,
        )?,
    }))
}

/// Move an ACTIVE brand to MERGED; false when it was no longer ACTIVE
pub async fn compare_and_set_merged(
    conn: &mut SqliteConnection,
    id: Uuid,
    survivor_id: Uuid,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE brands SET status = 'MERGED', merged_into = ?, updated_at = ? WHERE id = ? AND status = 'ACTIVE'",
    )
    .bind(survivor_id.to_string())
    .bind(time::to_db(now))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Same-status compare-and-set on the survivor; false when it was no longer ACTIVE
pub async fn touch_active(conn: &mut SqliteConnection, id: Uuid, now: &DateTime<Utc>) -> Result<bool> {
    let affected = sqlx::query("UPDATE brands SET updated_at = ? WHERE id = ? AND status = 'ACTIVE'")
        .bind(time::to_db(now))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(affected == 1)
}

/// Reattribute every SKU row of `from` to `to`
pub async fn relink_skus(conn: &mut SqliteConnection, from: Uuid, to: Uuid) -> Result<u64> {
    let moved = sqlx::query("UPDATE skus SET brand_id = ? WHERE brand_id = ?")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(moved)
}

/// Move importer links from `from` to `to`, collapsing duplicates
///
/// Returns the number of links newly attached to `to`.
pub async fn move_importers(conn: &mut SqliteConnection, from: Uuid, to: Uuid) -> Result<u64> {
    let added = sqlx::query(
        r#"
        INSERT OR IGNORE INTO brand_importers (brand_id, importer_id)
        SELECT ?, importer_id FROM brand_importers WHERE brand_id = ?
        "#,
    )
    .bind(to.to_string())
    .bind(from.to_string())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM brand_importers WHERE brand_id = ?")
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(added)
}

pub async fn set_sku_count(conn: &mut SqliteConnection, id: Uuid, sku_count: i64) -> Result<()> {
    sqlx::query("UPDATE brands SET sku_count = ? WHERE id = ?")
        .bind(sku_count)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Number of SKU rows currently attributed to a brand
pub async fn attributed_sku_count(conn: &mut SqliteConnection, id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM skus WHERE brand_id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn set_enrichment(
    conn: &mut SqliteConnection,
    id: Uuid,
    payload: Option<&serde_json::Value>,
    verified_at: Option<&DateTime<Utc>>,
) -> Result<()> {
    let payload = payload.map(serde_json::to_string).transpose()?;
    sqlx::query("UPDATE brands SET enrichment = ?, enrichment_verified_at = ? WHERE id = ?")
        .bind(payload)
        .bind(verified_at.map(time::to_db))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Re-point records merged into `from` at `to`, keeping survivor pointers one hop deep
pub async fn repoint_merged(conn: &mut SqliteConnection, from: Uuid, to: Uuid) -> Result<u64> {
    let repointed = sqlx::query("UPDATE brands SET merged_into = ? WHERE merged_into = ? AND status = 'MERGED'")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(repointed)
}

/// Record a portfolio link for a brand (idempotent)
pub async fn link_portfolio(
    conn: &mut SqliteConnection,
    portfolio_id: &str,
    brand_id: Uuid,
    now: &DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO brand_portfolios (portfolio_id, brand_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(portfolio_id)
    .bind(brand_id.to_string())
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Portfolio ids a brand belongs to
pub async fn portfolios_of(pool: &SqlitePool, brand_id: Uuid) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT portfolio_id FROM brand_portfolios WHERE brand_id = ? ORDER BY portfolio_id",
    )
    .bind(brand_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::db::init_memory_database;

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let pool = init_memory_database().await.unwrap();

        let brand = insert_brand(&pool, NewBrand::new("Château Example").with_domain("example.com"))
            .await
            .unwrap();
        add_sku(&pool, brand.id, "Chateau Example Rouge 2019").await.unwrap();
        link_importer(&pool, brand.id, "imp-1").await.unwrap();
        link_importer(&pool, brand.id, "imp-1").await.unwrap();

        let loaded = get_brand(&pool, brand.id).await.unwrap().unwrap();
        assert_eq!(loaded.normalized_key, "chateau example");
        assert_eq!(loaded.sku_count, 1);
        assert_eq!(loaded.sku_descriptors, vec!["Chateau Example Rouge 2019".to_string()]);
        assert_eq!(loaded.importer_ids, vec!["imp-1".to_string()]);
        assert!(loaded.is_active());
    }

    #[tokio::test]
    async fn test_insert_rejects_blank_name() {
        let pool = init_memory_database().await.unwrap();
        let result = insert_brand(&pool, NewBrand::new("   ")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_scan_active_skips_malformed_rows() {
        let pool = init_memory_database().await.unwrap();
        insert_brand(&pool, NewBrand::new("Acme")).await.unwrap();

        sqlx::query(
            "INSERT INTO brands (id, name, normalized_key, status, created_at, updated_at) \
             VALUES ('not-a-uuid', 'Broken', 'broken', 'ACTIVE', 'x', 'x')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let brands = scan_active(&pool).await.unwrap();
        assert_eq!(brands.len(), 1);
        assert_eq!(brands[0].name, "Acme");
    }

    #[tokio::test]
    async fn test_compare_and_set_only_from_active() {
        let pool = init_memory_database().await.unwrap();
        let survivor = insert_brand(&pool, NewBrand::new("Acme")).await.unwrap();
        let member = insert_brand(&pool, NewBrand::new("ACME")).await.unwrap();
        let now = time::now();

        let mut conn = pool.acquire().await.unwrap();
        assert!(compare_and_set_merged(&mut conn, member.id, survivor.id, &now).await.unwrap());
        assert!(!compare_and_set_merged(&mut conn, member.id, survivor.id, &now).await.unwrap());
        assert!(!touch_active(&mut conn, member.id, &now).await.unwrap());
        assert!(touch_active(&mut conn, survivor.id, &now).await.unwrap());
    }

    #[tokio::test]
    async fn test_sku_count_tracks_attributed_rows() {
        let pool = init_memory_database().await.unwrap();
        let brand = insert_brand(&pool, NewBrand::new("Bodega Solar")).await.unwrap();
        assert_eq!(brand.sku_count, 0);

        add_sku(&pool, brand.id, "Tinto 2019").await.unwrap();
        add_sku(&pool, brand.id, "Blanco 2020").await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(attributed_sku_count(&mut conn, brand.id).await.unwrap(), 2);
        assert_eq!(get_brand(&pool, brand.id).await.unwrap().unwrap().sku_count, 2);
    }

    #[tokio::test]
    async fn test_add_sku_to_missing_brand_fails() {
        let pool = init_memory_database().await.unwrap();
        let result = add_sku(&pool, Uuid::new_v4(), "Ghost Red").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
