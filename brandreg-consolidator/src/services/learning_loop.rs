//! Threshold learning from human resolutions
//!
//! Runs on its own schedule. Reads aggregated LearningEvents and writes the
//! threshold table; it never touches brand or proposal rows, so detection
//! and merges are never blocked by it.

use brandreg_common::config::LearningConfig;
use brandreg_common::models::{
    confidence_bucket, ActorKind, ConsolidationType, ThresholdTable, TypeThresholds,
};
use brandreg_common::{time, Result};
use chrono::Duration as ChronoDuration;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::learning::{bucket_stats, BucketStats};
use crate::db::thresholds::save_thresholds;
use crate::engine::ConsolidationEngine;

/// Review floors never drop below this
const MIN_REVIEW_FLOOR: f64 = 50.0;

/// One threshold move
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAdjustment {
    pub consolidation_type: ConsolidationType,
    pub before: TypeThresholds,
    pub after: TypeThresholds,
}

pub struct LearningLoop {
    pool: SqlitePool,
    config: LearningConfig,
    lock_wait_ms: u64,
}

impl LearningLoop {
    pub fn new(pool: SqlitePool, config: LearningConfig, lock_wait_ms: u64) -> Self {
        Self {
            pool,
            config,
            lock_wait_ms,
        }
    }

    /// Compute and persist adjustments against `current`
    ///
    /// Only human outcomes inside the rolling window are considered.
    pub async fn run(&self, current: &ThresholdTable) -> Result<Vec<ThresholdAdjustment>> {
        let since = time::now() - ChronoDuration::days(self.config.window_days.max(1));
        let stats = bucket_stats(&self.pool, ActorKind::Human, &since).await?;
        debug!(buckets = stats.len(), "Learning cycle started");

        let mut adjustments = Vec::new();
        for consolidation_type in ConsolidationType::ALL {
            let type_stats: Vec<&BucketStats> = stats
                .iter()
                .filter(|s| s.consolidation_type == consolidation_type)
                .collect();
            let before = current.get(consolidation_type);

            if let Some(after) = adjust(consolidation_type, before, &type_stats, &self.config) {
                save_thresholds(&self.pool, consolidation_type, after, self.lock_wait_ms).await?;
                info!(
                    consolidation_type = %consolidation_type,
                    auto_before = before.auto_approve,
                    auto_after = after.auto_approve,
                    floor_before = before.review_floor,
                    floor_after = after.review_floor,
                    "Thresholds adjusted"
                );
                adjustments.push(ThresholdAdjustment {
                    consolidation_type,
                    before,
                    after,
                });
            }
        }

        Ok(adjustments)
    }
}

/// New thresholds for one type, or `None` when nothing moves
///
/// Every move is bounded by `max_step`. The auto-approve threshold reacts to
/// the bucket just below it; the review floor reacts to the lowest bucket
/// with enough reviews.
pub fn adjust(
    consolidation_type: ConsolidationType,
    current: TypeThresholds,
    stats: &[&BucketStats],
    config: &LearningConfig,
) -> Option<TypeThresholds> {
    let width = config.bucket_width.max(1);
    let step = config.max_step.max(0.0);
    let sampled = |s: &&&BucketStats| s.total() >= config.min_samples.max(1);
    let mut next = current;

    if consolidation_type.allows_auto_approval() {
        let below_auto = confidence_bucket(current.auto_approve - 0.001, width);
        if let Some(bucket) = stats.iter().filter(sampled).find(|s| s.bucket == below_auto) {
            if bucket.override_rate() > config.override_tolerance {
                next.auto_approve = (current.auto_approve + step).min(100.0);
            } else if bucket.confirmation_rate() >= config.confirmation_rate {
                let lowest = current.review_floor + width as f64;
                next.auto_approve = (current.auto_approve - step).max(lowest).min(current.auto_approve);
            }
        }
    }

    let floor_bucket = confidence_bucket(current.review_floor, width);
    if let Some(bucket) = stats
        .iter()
        .filter(sampled)
        .filter(|s| s.bucket >= floor_bucket)
        .min_by_key(|s| s.bucket)
    {
        if bucket.override_rate() > 0.5 {
            next.review_floor = current.review_floor + step;
        } else if bucket.confirmation_rate() >= config.confirmation_rate {
            next.review_floor = (current.review_floor - step).max(MIN_REVIEW_FLOOR).min(current.review_floor);
        }
    }

    if let Some(base) = consolidation_type.base_confidence() {
        next.review_floor = next.review_floor.min(base);
    }
    next.review_floor = next.review_floor.min(next.auto_approve - 1.0);

    let moved = (next.auto_approve - current.auto_approve).abs() > f64::EPSILON
        || (next.review_floor - current.review_floor).abs() > f64::EPSILON;
    moved.then_some(next)
}

/// Run learning cycles on a fixed interval until `shutdown` fires
///
/// The first cycle runs one full interval after start.
pub fn spawn(
    engine: Arc<ConsolidationEngine>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!("Starting learning loop (interval: {}s)", interval.as_secs());

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Learning loop stopped");
                    break;
                }
                _ = timer.tick() => {
                    match engine.run_learning_cycle().await {
                        Ok(adjustments) if adjustments.is_empty() => {
                            debug!("Learning cycle complete, thresholds unchanged")
                        }
                        Ok(adjustments) => {
                            info!(adjusted = adjustments.len(), "Learning cycle complete")
                        }
                        Err(e) => error!("Learning cycle failed: {}", e),
                    }
                }
            }
        }
    })
}
