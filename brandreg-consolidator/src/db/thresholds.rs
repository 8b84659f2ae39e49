//! Persisted threshold table

use brandreg_common::models::{ConsolidationType, ThresholdTable, TypeThresholds};
use brandreg_common::{time, Error, Result};
use sqlx::SqlitePool;

use crate::utils::retry_on_lock;

/// Insert defaults for any type without a stored row
pub async fn seed_defaults(pool: &SqlitePool) -> Result<()> {
    let now = time::to_db(&time::now());
    for (consolidation_type, thresholds) in ThresholdTable::defaults().iter() {
        sqlx::query(
            "INSERT OR IGNORE INTO consolidation_thresholds (consolidation_type, auto_approve, review_floor, updated_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(consolidation_type.as_str())
        .bind(thresholds.auto_approve)
        .bind(thresholds.review_floor)
        .bind(&now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Load the table; types without a row keep their defaults
pub async fn load_thresholds(pool: &SqlitePool) -> Result<ThresholdTable> {
    let rows: Vec<(String, f64, f64)> = sqlx::query_as(
        "SELECT consolidation_type, auto_approve, review_floor FROM consolidation_thresholds",
    )
    .fetch_all(pool)
    .await?;

    let mut table = ThresholdTable::defaults();
    for (label, auto_approve, review_floor) in rows {
        match label.parse::<ConsolidationType>() {
            Ok(consolidation_type) => table.set(
                consolidation_type,
                TypeThresholds {
                    auto_approve,
                    review_floor,
                },
            ),
            Err(e) => tracing::warn!(error = %e, "Ignoring stored thresholds for unknown type"),
        }
    }
    Ok(table)
}

pub async fn save_thresholds(
    pool: &SqlitePool,
    consolidation_type: ConsolidationType,
    thresholds: TypeThresholds,
    max_lock_wait_ms: u64,
) -> Result<()> {
    retry_on_lock("threshold save", max_lock_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO consolidation_thresholds (consolidation_type, auto_approve, review_floor, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(consolidation_type) DO UPDATE SET
                auto_approve = excluded.auto_approve,
                review_floor = excluded.review_floor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(consolidation_type.as_str())
        .bind(thresholds.auto_approve)
        .bind(thresholds.review_floor)
        .bind(time::to_db(&time::now()))
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok::<(), Error>(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::db::init_memory_database;

    #[tokio::test]
    async fn test_load_without_rows_returns_defaults() {
        let pool = init_memory_database().await.unwrap();
        let table = load_thresholds(&pool).await.unwrap();
        assert_eq!(table, ThresholdTable::defaults());
    }

    #[tokio::test]
    async fn test_saved_thresholds_survive_reload() {
        let pool = init_memory_database().await.unwrap();
        seed_defaults(&pool).await.unwrap();

        let adjusted = TypeThresholds {
            auto_approve: 96.0,
            review_floor: 68.0,
        };
        save_thresholds(&pool, ConsolidationType::SimilarName, adjusted, 1000)
            .await
            .unwrap();

        // Seeding again must not clobber learned values
        seed_defaults(&pool).await.unwrap();
        let table = load_thresholds(&pool).await.unwrap();
        assert_eq!(table.get(ConsolidationType::SimilarName), adjusted);
        assert_eq!(
            table.get(ConsolidationType::CaseVariant),
            ThresholdTable::default_for(ConsolidationType::CaseVariant)
        );
    }
}
