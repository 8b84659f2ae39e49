//! Threshold learning integration tests

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use brandreg_common::events::ConsolidationEvent;
use brandreg_common::models::{
    ActorKind, ConsolidationType, Decision, LearningEvent, LearningOutcome,
};
use brandreg_consolidator::db::{learning, thresholds};
use brandreg_consolidator::services::learning_loop;
use helpers::*;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

async fn record_outcomes(
    pool: &SqlitePool,
    consolidation_type: ConsolidationType,
    bucket: u32,
    outcome: LearningOutcome,
    actor_kind: ActorKind,
    count: usize,
    age_days: i64,
) {
    let created_at = chrono::Utc::now() - chrono::Duration::days(age_days);
    for i in 0..count {
        learning::insert_event(
            pool,
            &LearningEvent {
                proposal_id: format!("cp-seed-{}-{}", bucket, i),
                consolidation_type,
                confidence_bucket: bucket,
                outcome,
                actor_kind,
                created_at,
            },
        )
        .await
        .unwrap();
    }
}

/// TC-LRN-001: Consistent confirmations just below auto-approve lower it
#[tokio::test]
async fn tc_lrn_001_confirmations_lower_auto_approve() {
    let env = test_env().await;
    record_outcomes(
        &env.pool,
        ConsolidationType::SimilarName,
        90,
        LearningOutcome::Confirmed,
        ActorKind::Human,
        25,
        1,
    )
    .await;
    let mut events = env.events.subscribe();

    let adjustments = env.engine.run_learning_cycle().await.unwrap();

    assert_eq!(adjustments.len(), 1);
    let adjustment = &adjustments[0];
    assert_eq!(adjustment.consolidation_type, ConsolidationType::SimilarName);
    assert_eq!(adjustment.before.auto_approve, 98.0);
    assert_eq!(adjustment.after.auto_approve, 96.0);
    assert!(adjustment.after.review_floor >= 50.0);
    assert!(adjustment.after.review_floor < adjustment.after.auto_approve);

    // Live table and persisted table agree
    let live = env.engine.thresholds().await.get(ConsolidationType::SimilarName);
    assert_eq!(live, adjustment.after);
    let stored = thresholds::load_thresholds(&env.pool).await.unwrap();
    assert_eq!(stored.get(ConsolidationType::SimilarName), adjustment.after);

    match events.try_recv().unwrap() {
        ConsolidationEvent::ThresholdsAdjusted {
            consolidation_type,
            auto_approve,
            ..
        } => {
            assert_eq!(consolidation_type, ConsolidationType::SimilarName);
            assert_eq!(auto_approve, 96.0);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// TC-LRN-002: Frequent overrides raise both thresholds, bounded by one step
#[tokio::test]
async fn tc_lrn_002_overrides_raise_thresholds() {
    let env = test_env().await;
    record_outcomes(
        &env.pool,
        ConsolidationType::PunctuationVariant,
        80,
        LearningOutcome::Overridden,
        ActorKind::Human,
        30,
        2,
    )
    .await;

    let adjustments = env.engine.run_learning_cycle().await.unwrap();

    assert_eq!(adjustments.len(), 1);
    let after = adjustments[0].after;
    assert_eq!(after.auto_approve, 92.0);
    assert_eq!(after.review_floor, 77.0);
}

/// TC-LRN-003: Sparse, automatic or expired evidence moves nothing
#[tokio::test]
async fn tc_lrn_003_insufficient_evidence_ignored() {
    let env = test_env().await;
    // Below min_samples
    record_outcomes(
        &env.pool,
        ConsolidationType::SimilarName,
        90,
        LearningOutcome::Overridden,
        ActorKind::Human,
        5,
        1,
    )
    .await;
    // Automatic outcomes never count
    record_outcomes(
        &env.pool,
        ConsolidationType::CaseVariant,
        90,
        LearningOutcome::Confirmed,
        ActorKind::Automatic,
        50,
        1,
    )
    .await;
    // Outside the rolling window
    record_outcomes(
        &env.pool,
        ConsolidationType::SkuToBrand,
        80,
        LearningOutcome::Overridden,
        ActorKind::Human,
        50,
        400,
    )
    .await;

    let before = env.engine.thresholds().await;
    let adjustments = env.engine.run_learning_cycle().await.unwrap();

    assert!(adjustments.is_empty());
    assert_eq!(env.engine.thresholds().await, before);
}

/// TC-LRN-004: The review floor never drops below its absolute minimum
#[tokio::test]
async fn tc_lrn_004_review_floor_lower_bound() {
    let env = test_env().await;
    record_outcomes(
        &env.pool,
        ConsolidationType::PortfolioGroup,
        50,
        LearningOutcome::Confirmed,
        ActorKind::Human,
        40,
        1,
    )
    .await;

    for _ in 0..3 {
        env.engine.run_learning_cycle().await.unwrap();
    }

    let portfolio = env.engine.thresholds().await.get(ConsolidationType::PortfolioGroup);
    assert_eq!(portfolio.review_floor, 50.0);
    assert_eq!(portfolio.auto_approve, 100.0);
}

/// TC-LRN-005: Human rejections flow into learning as overrides
#[tokio::test]
async fn tc_lrn_005_rejections_recorded_as_overrides() {
    let env = test_env().await;
    seed_acme(&env.pool).await;
    let proposal = detect_all(&env.engine).await.remove(0);

    env.engine
        .resolve(&proposal.id, Decision::Reject, None, "reviewer", None)
        .await
        .unwrap();

    let since = chrono::Utc::now() - chrono::Duration::days(1);
    let stats = learning::bucket_stats(&env.pool, ActorKind::Human, &since).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].consolidation_type, ConsolidationType::SkuToBrand);
    assert_eq!(stats[0].bucket, 80);
    assert_eq!(stats[0].overridden, 1);
    assert_eq!(stats[0].confirmed, 0);
}

/// TC-LRN-006: The background loop stops promptly on shutdown
#[tokio::test]
async fn tc_lrn_006_loop_honours_cancellation() {
    let env = test_env().await;
    let shutdown = CancellationToken::new();
    let handle = learning_loop::spawn(Arc::clone(&env.engine), Duration::from_secs(3600), shutdown.clone());

    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("learning loop did not stop")
        .unwrap();
}
