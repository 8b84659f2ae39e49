//! Consolidation engine
//!
//! The operations the surrounding application calls: `detect`,
//! `list_pending`, `resolve` and `history`. The engine owns the threshold
//! table the classifier reads; detection takes a snapshot at start, so a
//! learning cycle never blocks a running pass.

use async_stream::try_stream;
use brandreg_common::events::{ConsolidationEvent, ConsolidationSink, EventBus};
use brandreg_common::models::{
    confidence_bucket, ActorKind, ConsolidationProposal, ConsolidationRecord, ConsolidationType,
    Decision, LearningEvent, LearningOutcome, ProposalFilter, ProposalStatus, ThresholdTable,
};
use brandreg_common::{time, Error};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{brands, learning, proposals, records, thresholds};
use crate::error::{ConflictReason, ConsolidationError, ConsolidationResult};
use crate::services::clustering::{build_clusters, Cluster, Edge};
use crate::services::signal_extractor::{absorbed_side, extract};
use crate::services::{
    CandidateBlocker, Classification, Classifier, ClassifierFloors, LearningLoop, MergeExecutor,
    MergeRequest, NormalizedBrand, ProposalChange, ProposalDraft, ProposalManager,
    ThresholdAdjustment,
};
use crate::utils::begin_monitored;

/// Actor recorded on automatically applied proposals
pub const AUTO_ACTOR: &str = "auto";

/// Result of a successful `resolve`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Merged { record: ConsolidationRecord },
    Rejected { proposal: ConsolidationProposal },
}

pub struct ConsolidationEngine {
    pool: SqlitePool,
    config: EngineConfig,
    events: EventBus,
    thresholds: RwLock<ThresholdTable>,
    proposals: ProposalManager,
    executor: MergeExecutor,
    learning: LearningLoop,
}

impl ConsolidationEngine {
    /// Engine whose notification sink is the event bus
    pub async fn new(pool: SqlitePool, config: EngineConfig, events: EventBus) -> ConsolidationResult<Self> {
        let sink: Arc<dyn ConsolidationSink> = Arc::new(events.clone());
        Self::with_sink(pool, config, events, sink).await
    }

    pub async fn with_sink(
        pool: SqlitePool,
        config: EngineConfig,
        events: EventBus,
        sink: Arc<dyn ConsolidationSink>,
    ) -> ConsolidationResult<Self> {
        let table = thresholds::load_thresholds(&pool).await?;
        let lock_wait_ms = config.merge.lock_wait_ms;

        Ok(Self {
            proposals: ProposalManager::new(pool.clone(), lock_wait_ms),
            executor: MergeExecutor::new(
                pool.clone(),
                sink,
                events.clone(),
                lock_wait_ms,
                config.learning.bucket_width,
            ),
            learning: LearningLoop::new(pool.clone(), config.learning.clone(), lock_wait_ms),
            thresholds: RwLock::new(table),
            pool,
            config,
            events,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn thresholds(&self) -> ThresholdTable {
        self.thresholds.read().await.clone()
    }

    /// Full detection pass over every ACTIVE brand
    ///
    /// Yields proposals that were created or updated. Safe to call
    /// repeatedly: an unchanged brand set yields nothing.
    pub fn detect(&self) -> impl Stream<Item = ConsolidationResult<ProposalChange>> + '_ {
        self.detect_since(None)
    }

    /// Detection restricted to pairs where at least one brand changed at or after `since`
    pub fn detect_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> impl Stream<Item = ConsolidationResult<ProposalChange>> + '_ {
        try_stream! {
            let started = Instant::now();

            let mut prepared = Vec::new();
            for record in brands::scan_active(&self.pool).await? {
                match NormalizedBrand::prepare(record) {
                    Ok(brand) => prepared.push(brand),
                    Err(malformed) => warn!(
                        brand_id = %malformed.id,
                        reason = malformed.reason,
                        "Skipping brand in detection"
                    ),
                }
            }
            let brands = Arc::new(prepared);

            let blocker = CandidateBlocker::new(
                self.config.detection.max_block_size,
                self.config.detection.prefix_len,
            );
            let mut pairs = blocker.candidate_pairs(&brands);
            if let Some(since) = since {
                pairs.retain(|&(a, b)| {
                    brands[a].record.updated_at >= since || brands[b].record.updated_at >= since
                });
            }

            let classifier = Arc::new(Classifier::new(
                ClassifierFloors::from(&self.config.detection),
                self.thresholds.read().await.clone(),
            ));
            let pair_count = pairs.len();
            let edges = classify_pairs(
                Arc::clone(&brands),
                Arc::clone(&classifier),
                pairs,
                self.config.workers(),
            )
            .await?;
            let clusters = build_clusters(&edges, &brands);

            debug!(
                brands = brands.len(),
                pairs = pair_count,
                edges = edges.len(),
                clusters = clusters.len(),
                "Classification complete"
            );

            let mut consumed: HashSet<Uuid> = HashSet::new();
            let (mut created, mut updated, mut applied) = (0usize, 0usize, 0usize);

            for cluster in &clusters {
                let draft = draft_from_cluster(cluster, &brands, &classifier);
                if draft.member_ids.iter().any(|id| consumed.contains(id)) {
                    debug!("Skipping cluster with a member merged earlier in this pass");
                    continue;
                }

                let mut change = self.proposals.upsert(draft).await?;

                if self.config.detection.auto_apply && change.proposal().awaiting_execution() {
                    if let Some(record) = self.apply_auto(change.proposal()).await {
                        applied += 1;
                        consumed.extend(record.merged_brands.iter().map(|b| b.id));
                        change = refresh(change, self.proposals.get(&record.proposal_id).await?);
                    }
                }

                match &change {
                    ProposalChange::Created(_) => created += 1,
                    ProposalChange::Updated(_) => updated += 1,
                    ProposalChange::Unchanged(_) => continue,
                }
                yield change;
            }

            info!(
                brands = brands.len(),
                clusters = clusters.len(),
                created,
                updated,
                applied,
                elapsed_ms = started.elapsed().as_millis(),
                "Detection pass complete"
            );
        }
    }

    /// Apply an AUTO_APPROVED proposal; failures are logged, never propagated
    async fn apply_auto(&self, proposal: &ConsolidationProposal) -> Option<ConsolidationRecord> {
        let request = MergeRequest {
            proposal,
            survivor_id: proposal.proposed_survivor_id,
            actor: AUTO_ACTOR,
            notes: None,
            expected_status: ProposalStatus::AutoApproved,
            final_status: ProposalStatus::AutoApproved,
            actor_kind: ActorKind::Automatic,
            outcome: LearningOutcome::Confirmed,
        };
        match self.executor.apply(request).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(proposal_id = %proposal.id, error = %e, "Auto-approved proposal not applied");
                None
            }
        }
    }

    /// Retry AUTO_APPROVED proposals left unapplied, oldest first
    pub async fn drain_auto_approved(&self) -> ConsolidationResult<Vec<ConsolidationRecord>> {
        let queued = self.proposals.list_awaiting_execution().await?;
        let mut applied = Vec::new();
        for proposal in &queued {
            if let Some(record) = self.apply_auto(proposal).await {
                applied.push(record);
            }
        }
        if !queued.is_empty() {
            info!(queued = queued.len(), applied = applied.len(), "Auto-approved queue drained");
        }
        Ok(applied)
    }

    /// PENDING proposals for review, highest confidence first
    pub async fn list_pending(&self, filter: &ProposalFilter) -> ConsolidationResult<Vec<ConsolidationProposal>> {
        if let Some(min) = filter.min_confidence {
            if !(0.0..=100.0).contains(&min) {
                return Err(ConsolidationError::Validation(format!(
                    "min_confidence must be within 0-100 (got {})",
                    min
                )));
            }
        }
        Ok(self.proposals.list_pending(filter).await?)
    }

    pub async fn get_proposal(&self, id: &str) -> ConsolidationResult<Option<ConsolidationProposal>> {
        Ok(self.proposals.get(id).await?)
    }

    /// Human decision on a PENDING proposal
    ///
    /// Approve merges the members (or links a portfolio group); reject closes
    /// the proposal. Either way the outcome is recorded for learning.
    pub async fn resolve(
        &self,
        proposal_id: &str,
        decision: Decision,
        survivor_override: Option<Uuid>,
        actor: &str,
        notes: Option<&str>,
    ) -> ConsolidationResult<ResolveOutcome> {
        if actor.trim().is_empty() {
            return Err(ConsolidationError::Validation("actor must not be empty".to_string()));
        }

        let proposal = self
            .proposals
            .get(proposal_id)
            .await?
            .ok_or_else(|| ConsolidationError::Validation(format!("unknown proposal {}", proposal_id)))?;

        match proposal.status {
            ProposalStatus::Pending => {}
            ProposalStatus::Stale => {
                return Err(ConsolidationError::Conflict {
                    proposal_id: proposal.id,
                    reason: ConflictReason::ProposalStale,
                })
            }
            status => {
                return Err(ConsolidationError::AlreadyResolved {
                    proposal_id: proposal.id,
                    status,
                })
            }
        }

        if let Some(survivor) = survivor_override {
            if !proposal.contains(survivor) {
                return Err(ConsolidationError::Validation(format!(
                    "survivor {} is not a member of proposal {}",
                    survivor, proposal.id
                )));
            }
        }

        match decision {
            Decision::Approve => {
                let survivor_id = survivor_override.unwrap_or(proposal.proposed_survivor_id);
                let outcome = if survivor_id == proposal.proposed_survivor_id {
                    LearningOutcome::Confirmed
                } else {
                    LearningOutcome::Overridden
                };
                let record = self
                    .executor
                    .apply(MergeRequest {
                        proposal: &proposal,
                        survivor_id,
                        actor,
                        notes,
                        expected_status: ProposalStatus::Pending,
                        final_status: ProposalStatus::Approved,
                        actor_kind: ActorKind::Human,
                        outcome,
                    })
                    .await?;
                Ok(ResolveOutcome::Merged { record })
            }
            Decision::Reject => {
                let rejected = self.reject(&proposal, survivor_override, actor, notes).await?;
                Ok(ResolveOutcome::Rejected { proposal: rejected })
            }
        }
    }

    async fn reject(
        &self,
        proposal: &ConsolidationProposal,
        survivor_override: Option<Uuid>,
        actor: &str,
        notes: Option<&str>,
    ) -> ConsolidationResult<ConsolidationProposal> {
        let now = time::now();
        let resolution = proposals::Resolution {
            status: ProposalStatus::Rejected,
            actor,
            notes,
            survivor_override,
            at: now,
        };

        let mut tx = begin_monitored(&self.pool, "engine::reject").await?;
        if !proposals::claim(tx.conn(), &proposal.id, ProposalStatus::Pending, &resolution).await? {
            tx.rollback().await?;
            return Err(self.executor.unclaimable(&proposal.id).await);
        }
        learning::insert_event(
            tx.conn(),
            &LearningEvent {
                proposal_id: proposal.id.clone(),
                consolidation_type: proposal.consolidation_type,
                confidence_bucket: confidence_bucket(proposal.confidence, self.config.learning.bucket_width),
                outcome: LearningOutcome::Overridden,
                actor_kind: ActorKind::Human,
                created_at: now,
            },
        )
        .await?;
        tx.commit().await?;

        info!(proposal_id = %proposal.id, actor, "Proposal rejected");

        self.proposals
            .get(&proposal.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("proposal {}", proposal.id)).into())
    }

    /// Audit records, oldest first; all of them or those touching one brand
    pub async fn history(&self, brand_id: Option<Uuid>) -> ConsolidationResult<Vec<ConsolidationRecord>> {
        Ok(records::history(&self.pool, brand_id).await?)
    }

    /// Proposal counts per status
    pub async fn status_counts(&self) -> ConsolidationResult<Vec<(ProposalStatus, i64)>> {
        Ok(proposals::count_by_status(&self.pool).await?)
    }

    /// One learning cycle; adjusted thresholds apply to the next detection pass
    pub async fn run_learning_cycle(&self) -> ConsolidationResult<Vec<ThresholdAdjustment>> {
        let current = self.thresholds.read().await.clone();
        let adjustments = self.learning.run(&current).await?;

        if !adjustments.is_empty() {
            let mut table = self.thresholds.write().await;
            for adjustment in &adjustments {
                table.set(adjustment.consolidation_type, adjustment.after);
                self.events.emit_lossy(ConsolidationEvent::ThresholdsAdjusted {
                    consolidation_type: adjustment.consolidation_type,
                    auto_approve: adjustment.after.auto_approve,
                    review_floor: adjustment.after.review_floor,
                    timestamp: time::now(),
                });
            }
        }

        Ok(adjustments)
    }
}

/// Classify candidate pairs on blocking worker threads over a shared snapshot
async fn classify_pairs(
    brands: Arc<Vec<NormalizedBrand>>,
    classifier: Arc<Classifier>,
    pairs: Vec<(usize, usize)>,
    workers: usize,
) -> ConsolidationResult<Vec<Edge>> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = pairs.len().div_ceil(workers.max(1));
    let mut handles = Vec::new();
    for chunk in pairs.chunks(chunk_size) {
        let chunk = chunk.to_vec();
        let brands = Arc::clone(&brands);
        let classifier = Arc::clone(&classifier);
        handles.push(tokio::task::spawn_blocking(move || {
            classify_chunk(&brands, &classifier, &chunk)
        }));
    }

    let mut edges = Vec::with_capacity(pairs.len());
    for handle in handles {
        let chunk_edges = handle
            .await
            .map_err(|e| Error::Internal(format!("classification worker failed: {}", e)))?;
        edges.extend(chunk_edges);
    }
    Ok(edges)
}

fn classify_chunk(brands: &[NormalizedBrand], classifier: &Classifier, pairs: &[(usize, usize)]) -> Vec<Edge> {
    pairs
        .iter()
        .filter_map(|&(a, b)| {
            let signals = extract(&brands[a], &brands[b]);
            let classification = classifier.classify(&signals)?;
            let absorbed = match classification.consolidation_type {
                ConsolidationType::SkuToBrand => absorbed_side(&brands[a], &brands[b])
                    .map(|a_absorbed| if a_absorbed { a } else { b }),
                _ => None,
            };
            Some(Edge {
                a,
                b,
                classification,
                signals,
                absorbed,
            })
        })
        .collect()
}

fn draft_from_cluster(cluster: &Cluster, brands: &[NormalizedBrand], classifier: &Classifier) -> ProposalDraft {
    let classification = Classification {
        consolidation_type: cluster.consolidation_type,
        confidence: cluster.confidence,
    };
    ProposalDraft {
        member_ids: cluster.members.iter().map(|&i| brands[i].record.id).collect(),
        proposed_survivor_id: brands[cluster.survivor].record.id,
        consolidation_type: cluster.consolidation_type,
        confidence: cluster.confidence,
        signals: cluster.signals,
        status: classifier.initial_status(&classification),
    }
}

/// Same change kind, current proposal state
fn refresh(change: ProposalChange, current: Option<ConsolidationProposal>) -> ProposalChange {
    let Some(current) = current else {
        return change;
    };
    match change {
        ProposalChange::Created(_) => ProposalChange::Created(current),
        ProposalChange::Updated(_) => ProposalChange::Updated(current),
        ProposalChange::Unchanged(_) => ProposalChange::Unchanged(current),
    }
}
