//! Learning event log and per-bucket aggregates

use brandreg_common::models::{ActorKind, ConsolidationType, LearningEvent};
use brandreg_common::{time, Result};
use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};

/// Confirmed/overridden counts for one (type, bucket)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStats {
    pub consolidation_type: ConsolidationType,
    pub bucket: u32,
    pub confirmed: u32,
    pub overridden: u32,
}

impl BucketStats {
    pub fn total(&self) -> u32 {
        self.confirmed + self.overridden
    }

    pub fn override_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.overridden as f64 / total as f64,
        }
    }

    pub fn confirmation_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.confirmed as f64 / total as f64,
        }
    }
}

pub async fn insert_event<'e, E>(executor: E, event: &LearningEvent) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO learning_events (
            proposal_id, consolidation_type, confidence_bucket, outcome, actor_kind, created_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.proposal_id)
    .bind(event.consolidation_type.as_str())
    .bind(event.confidence_bucket as i64)
    .bind(event.outcome.as_str())
    .bind(event.actor_kind.as_str())
    .bind(time::to_db(&event.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Aggregate events of one actor kind created at or after `since`
///
/// Rows with an unknown type label are ignored.
pub async fn bucket_stats(
    pool: &SqlitePool,
    actor_kind: ActorKind,
    since: &DateTime<Utc>,
) -> Result<Vec<BucketStats>> {
    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT consolidation_type, confidence_bucket,
               SUM(CASE WHEN outcome = 'CONFIRMED' THEN 1 ELSE 0 END),
               SUM(CASE WHEN outcome = 'OVERRIDDEN' THEN 1 ELSE 0 END)
        FROM learning_events
        WHERE actor_kind = ? AND created_at >= ?
        GROUP BY consolidation_type, confidence_bucket
        ORDER BY consolidation_type, confidence_bucket
        "#,
    )
    .bind(actor_kind.as_str())
    .bind(time::to_db(since))
    .fetch_all(pool)
    .await?;

    let mut stats = Vec::with_capacity(rows.len());
    for (label, bucket, confirmed, overridden) in rows {
        match label.parse::<ConsolidationType>() {
            Ok(consolidation_type) => stats.push(BucketStats {
                consolidation_type,
                bucket: bucket.max(0) as u32,
                confirmed: confirmed.max(0) as u32,
                overridden: overridden.max(0) as u32,
            }),
            Err(e) => tracing::warn!(error = %e, "Ignoring learning events with unknown type"),
        }
    }
    Ok(stats)
}

pub async fn count_events(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM learning_events")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
