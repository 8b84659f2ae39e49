//! Transactional merge execution
//!
//! Proposals are applied one at a time inside an in-process critical
//! section entered with a bounded wait. Within it, one SQLite transaction
//! claims the proposal, moves every non-survivor to MERGED by
//! compare-and-set, relinks SKUs and importers, merges enrichment, and
//! writes the audit record. Any failure rolls the whole unit back.
//!
//! The notification sink runs once per committed merge, after commit.

use brandreg_common::events::{ConsolidationEvent, ConsolidationSink, EventBus};
use brandreg_common::models::{
    confidence_bucket, ActorKind, BrandStatus, ConsolidationProposal, ConsolidationRecord,
    LearningEvent, LearningOutcome, MergedBrand, ProposalStatus,
};
use brandreg_common::{time, Error};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::brands::{self, MergeMember};
use crate::db::{learning, proposals, records};
use crate::error::{ConflictReason, ConsolidationError, ConsolidationResult};
use crate::utils::{begin_monitored, MonitoredTransaction};

/// One apply call
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub proposal: &'a ConsolidationProposal,
    /// Survivor to keep; must be a member
    pub survivor_id: Uuid,
    pub actor: &'a str,
    pub notes: Option<&'a str>,
    /// Status the proposal must still be in
    pub expected_status: ProposalStatus,
    /// Status written when the merge commits
    pub final_status: ProposalStatus,
    pub actor_kind: ActorKind,
    pub outcome: LearningOutcome,
}

struct Applied {
    record: ConsolidationRecord,
    invalidated: Vec<String>,
}

pub struct MergeExecutor {
    pool: SqlitePool,
    merge_lock: Mutex<()>,
    sink: Arc<dyn ConsolidationSink>,
    events: EventBus,
    lock_wait_ms: u64,
    bucket_width: u32,
}

impl MergeExecutor {
    pub fn new(
        pool: SqlitePool,
        sink: Arc<dyn ConsolidationSink>,
        events: EventBus,
        lock_wait_ms: u64,
        bucket_width: u32,
    ) -> Self {
        Self {
            pool,
            merge_lock: Mutex::new(()),
            sink,
            events,
            lock_wait_ms,
            bucket_width,
        }
    }

    /// Apply a proposal, returning the audit record or a scoped failure
    ///
    /// Waiting for the critical section is bounded by the configured lock
    /// wait; on timeout nothing has changed and the caller may retry.
    pub async fn apply(&self, request: MergeRequest<'_>) -> ConsolidationResult<ConsolidationRecord> {
        let proposal_id = request.proposal.id.as_str();

        let _guard = tokio::time::timeout(Duration::from_millis(self.lock_wait_ms), self.merge_lock.lock())
            .await
            .map_err(|_| {
                warn!(
                    proposal_id,
                    lock_wait_ms = self.lock_wait_ms,
                    "Merge critical section busy, giving up"
                );
                ConsolidationError::Conflict {
                    proposal_id: proposal_id.to_string(),
                    reason: ConflictReason::LockTimeout,
                }
            })?;

        let started = Instant::now();
        match self.apply_locked(&request).await {
            Ok(Applied { record, invalidated }) => {
                info!(
                    proposal_id,
                    record_id = %record.id,
                    consolidation_type = %record.consolidation_type,
                    survivor = %record.survivor_id,
                    merged = record.merged_brands.len(),
                    skus_moved = record.skus_moved,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Consolidation applied"
                );

                self.sink.consolidation_applied(&record);
                if !invalidated.is_empty() {
                    info!(proposal_id, stale = ?invalidated, "Competing proposals invalidated");
                    self.events.emit_lossy(ConsolidationEvent::ProposalsInvalidated {
                        proposal_ids: invalidated,
                        timestamp: time::now(),
                    });
                }
                Ok(record)
            }
            Err(err) => {
                match &err {
                    ConsolidationError::PartialMergeFailure { step, source, .. } => {
                        error!(proposal_id, step, error = %source, "Merge failed, rolled back")
                    }
                    ConsolidationError::Conflict { reason, .. } => {
                        warn!(proposal_id, reason = %reason, "Merge conflict")
                    }
                    other => debug!(proposal_id, error = %other, "Merge not applied"),
                }
                Err(err)
            }
        }
    }

    async fn apply_locked(&self, request: &MergeRequest<'_>) -> ConsolidationResult<Applied> {
        let proposal = request.proposal;
        let id = proposal.id.as_str();

        if !proposal.contains(request.survivor_id) {
            return Err(ConsolidationError::Validation(format!(
                "survivor {} is not a member of proposal {}",
                request.survivor_id, id
            )));
        }

        let now = time::now();
        let mut tx = begin_monitored(&self.pool, "merge_executor::apply")
            .await
            .map_err(step_failure(id, "begin"))?;

        let resolution = proposals::Resolution {
            status: request.final_status,
            actor: request.actor,
            notes: request.notes,
            survivor_override: (request.survivor_id != proposal.proposed_survivor_id)
                .then_some(request.survivor_id),
            at: now,
        };
        let claimed = proposals::claim(tx.conn(), id, request.expected_status, &resolution)
            .await
            .map_err(step_failure(id, "claim"))?;
        if !claimed {
            rollback(tx).await;
            return Err(self.unclaimable(id).await);
        }

        let mut members = Vec::with_capacity(proposal.member_ids.len());
        for member_id in &proposal.member_ids {
            match brands::load_merge_member(tx.conn(), *member_id)
                .await
                .map_err(step_failure(id, "load_members"))?
            {
                Some(member) => members.push(member),
                None => {
                    rollback(tx).await;
                    return Err(ConsolidationError::Validation(format!(
                        "member brand {} of proposal {} does not exist",
                        member_id, id
                    )));
                }
            }
        }

        if members.iter().any(|m| m.status != BrandStatus::Active) {
            rollback(tx).await;
            return Err(self.member_conflict(id, &now).await);
        }

        let applied = if proposal.consolidation_type.merges_identity() {
            self.merge_members(&mut tx, request, &members, &now).await?
        } else {
            self.link_portfolio(&mut tx, request, &members, &now).await?
        };

        let Some(applied) = applied else {
            rollback(tx).await;
            return Err(self.member_conflict(id, &now).await);
        };

        tx.commit().await.map_err(step_failure(id, "commit"))?;
        Ok(applied)
    }

    /// Identity merge; `None` when a compare-and-set lost to another writer
    async fn merge_members(
        &self,
        tx: &mut MonitoredTransaction<'_>,
        request: &MergeRequest<'_>,
        members: &[MergeMember],
        now: &DateTime<Utc>,
    ) -> ConsolidationResult<Option<Applied>> {
        let proposal = request.proposal;
        let id = proposal.id.as_str();
        let survivor_id = request.survivor_id;

        let (survivor, absorbed): (Vec<&MergeMember>, Vec<&MergeMember>) =
            members.iter().partition(|m| m.id == survivor_id);
        let Some(survivor) = survivor.first().copied() else {
            return Err(ConsolidationError::Validation(format!(
                "survivor {} is not a member of proposal {}",
                survivor_id, id
            )));
        };

        for member in &absorbed {
            let merged = brands::compare_and_set_merged(tx.conn(), member.id, survivor_id, now)
                .await
                .map_err(step_failure(id, "mark_merged"))?;
            if !merged {
                return Ok(None);
            }
        }
        if !brands::touch_active(tx.conn(), survivor_id, now)
            .await
            .map_err(step_failure(id, "mark_merged"))?
        {
            return Ok(None);
        }

        let expected_skus: i64 = members.iter().map(|m| m.sku_count).sum();
        let mut importer_links_moved = 0i64;
        for member in &absorbed {
            let rows = brands::relink_skus(tx.conn(), member.id, survivor_id)
                .await
                .map_err(step_failure(id, "relink_skus"))?;
            brands::set_sku_count(tx.conn(), member.id, 0)
                .await
                .map_err(step_failure(id, "relink_skus"))?;
            debug!(proposal_id = id, from = %member.id, rows, "SKUs relinked");

            importer_links_moved += brands::move_importers(tx.conn(), member.id, survivor_id)
                .await
                .map_err(step_failure(id, "move_importers"))? as i64;

            brands::repoint_merged(tx.conn(), member.id, survivor_id)
                .await
                .map_err(step_failure(id, "repoint_merged"))?;
        }

        let ordered: Vec<&MergeMember> = std::iter::once(survivor).chain(absorbed.iter().copied()).collect();
        let enrichment = merge_enrichment(&ordered);
        brands::set_enrichment(
            tx.conn(),
            survivor_id,
            enrichment.payload.as_ref(),
            enrichment.verified_at.as_ref(),
        )
        .await
        .map_err(step_failure(id, "merge_enrichment"))?;

        let attributed = brands::attributed_sku_count(tx.conn(), survivor_id)
            .await
            .map_err(step_failure(id, "verify_sku_count"))?;
        if attributed != expected_skus {
            return Err(ConsolidationError::PartialMergeFailure {
                proposal_id: id.to_string(),
                step: "verify_sku_count",
                source: Error::Internal(format!(
                    "survivor owns {} SKU rows, pre-merge sum is {}",
                    attributed, expected_skus
                )),
            });
        }
        brands::set_sku_count(tx.conn(), survivor_id, expected_skus)
            .await
            .map_err(step_failure(id, "verify_sku_count"))?;

        let record = ConsolidationRecord {
            id: Uuid::new_v4(),
            proposal_id: id.to_string(),
            consolidation_type: proposal.consolidation_type,
            survivor_id,
            survivor_name: survivor.name.clone(),
            merged_brands: absorbed.iter().map(|m| merged_brand(m)).collect(),
            skus_moved: absorbed.iter().map(|m| m.sku_count).sum(),
            importer_links_moved,
            notes: enrichment.notes,
            actor: request.actor.to_string(),
            created_at: *now,
        };
        self.finish(tx, request, &record).await?;

        let absorbed_ids: Vec<Uuid> = absorbed.iter().map(|m| m.id).collect();
        let invalidated = proposals::invalidate_sharing(tx.conn(), &absorbed_ids, id, now)
            .await
            .map_err(step_failure(id, "invalidate"))?;

        Ok(Some(Applied { record, invalidated }))
    }

    /// Portfolio approval links members without merging identities
    async fn link_portfolio(
        &self,
        tx: &mut MonitoredTransaction<'_>,
        request: &MergeRequest<'_>,
        members: &[MergeMember],
        now: &DateTime<Utc>,
    ) -> ConsolidationResult<Option<Applied>> {
        let proposal = request.proposal;
        let id = proposal.id.as_str();

        for member in members {
            if !brands::touch_active(tx.conn(), member.id, now)
                .await
                .map_err(step_failure(id, "link_portfolio"))?
            {
                return Ok(None);
            }
            brands::link_portfolio(tx.conn(), id, member.id, now)
                .await
                .map_err(step_failure(id, "link_portfolio"))?;
        }

        let survivor_name = members
            .iter()
            .find(|m| m.id == request.survivor_id)
            .map(|m| m.name.clone())
            .unwrap_or_default();

        let record = ConsolidationRecord {
            id: Uuid::new_v4(),
            proposal_id: id.to_string(),
            consolidation_type: proposal.consolidation_type,
            survivor_id: request.survivor_id,
            survivor_name,
            merged_brands: members
                .iter()
                .filter(|m| m.id != request.survivor_id)
                .map(merged_brand)
                .collect(),
            skus_moved: 0,
            importer_links_moved: 0,
            notes: Vec::new(),
            actor: request.actor.to_string(),
            created_at: *now,
        };
        self.finish(tx, request, &record).await?;

        Ok(Some(Applied {
            record,
            invalidated: Vec::new(),
        }))
    }

    /// Audit record, proposal link and learning outcome
    async fn finish(
        &self,
        tx: &mut MonitoredTransaction<'_>,
        request: &MergeRequest<'_>,
        record: &ConsolidationRecord,
    ) -> ConsolidationResult<()> {
        let proposal = request.proposal;
        let id = proposal.id.as_str();

        records::insert_record(tx.conn(), record)
            .await
            .map_err(step_failure(id, "write_record"))?;
        proposals::set_record_id(tx.conn(), id, record.id)
            .await
            .map_err(step_failure(id, "write_record"))?;

        let event = LearningEvent {
            proposal_id: id.to_string(),
            consolidation_type: proposal.consolidation_type,
            confidence_bucket: confidence_bucket(proposal.confidence, self.bucket_width),
            outcome: request.outcome,
            actor_kind: request.actor_kind,
            created_at: record.created_at,
        };
        learning::insert_event(tx.conn(), &event)
            .await
            .map_err(step_failure(id, "learning_event"))?;

        Ok(())
    }

    /// Explain a failed claim from the proposal's current state
    pub(crate) async fn unclaimable(&self, id: &str) -> ConsolidationError {
        match proposals::get_proposal(&self.pool, id).await {
            Ok(Some(current)) if current.status == ProposalStatus::Stale => ConsolidationError::Conflict {
                proposal_id: id.to_string(),
                reason: ConflictReason::ProposalStale,
            },
            Ok(Some(current)) => ConsolidationError::AlreadyResolved {
                proposal_id: id.to_string(),
                status: current.status,
            },
            Ok(None) => ConsolidationError::Validation(format!("unknown proposal {}", id)),
            Err(e) => ConsolidationError::Common(e),
        }
    }

    /// Mark the proposal STALE after a lost compare-and-set
    async fn member_conflict(&self, id: &str, now: &DateTime<Utc>) -> ConsolidationError {
        match proposals::mark_stale(&self.pool, id, now).await {
            Ok(true) => self.events.emit_lossy(ConsolidationEvent::ProposalsInvalidated {
                proposal_ids: vec![id.to_string()],
                timestamp: *now,
            }),
            Ok(false) => {}
            Err(e) => warn!(proposal_id = id, error = %e, "Failed to mark conflicting proposal stale"),
        }
        ConsolidationError::Conflict {
            proposal_id: id.to_string(),
            reason: ConflictReason::MemberMerged,
        }
    }
}

fn merged_brand(member: &MergeMember) -> MergedBrand {
    MergedBrand {
        id: member.id,
        name: member.name.clone(),
        sku_count: member.sku_count,
    }
}

/// Map a failed step onto the error taxonomy
///
/// Lock contention means another writer holds the store: nothing changed,
/// so it is reported as a lock-timeout conflict rather than a failed merge.
fn step_failure<'a>(proposal_id: &'a str, step: &'static str) -> impl FnOnce(Error) -> ConsolidationError + 'a {
    move |source| {
        if source.is_lock_contention() {
            ConsolidationError::Conflict {
                proposal_id: proposal_id.to_string(),
                reason: ConflictReason::LockTimeout,
            }
        } else {
            ConsolidationError::PartialMergeFailure {
                proposal_id: proposal_id.to_string(),
                step,
                source,
            }
        }
    }
}

async fn rollback(tx: MonitoredTransaction<'_>) {
    let caller = tx.caller();
    if let Err(e) = tx.rollback().await {
        warn!(caller, error = %e, "Rollback failed");
    }
}

/// Merged enrichment payload for the survivor
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentMerge {
    pub payload: Option<Value>,
    pub verified_at: Option<DateTime<Utc>>,
    /// One line per field-level conflict
    pub notes: Vec<String>,
}

/// Field-by-field merge, survivor first in `members`
///
/// Non-null wins. When two members carry different non-null values the one
/// verified later wins; on equal (or missing) verification times the earlier
/// member in `members` keeps its value.
pub fn merge_enrichment(members: &[&MergeMember]) -> EnrichmentMerge {
    let mut fields: BTreeMap<String, (Value, Option<DateTime<Utc>>, &str)> = BTreeMap::new();
    let mut notes = Vec::new();
    let mut verified_at: Option<DateTime<Utc>> = None;
    let mut merged_any = false;

    for member in members {
        let Some(payload) = &member.enrichment else {
            continue;
        };
        let Some(object) = payload.as_object() else {
            notes.push(format!("enrichment of {} is not an object, ignored", member.name));
            continue;
        };
        merged_any = true;
        verified_at = verified_at.max(member.enrichment_verified_at);

        for (field, value) in object {
            let stamp = member.enrichment_verified_at;
            match fields.get_mut(field) {
                None => {
                    fields.insert(field.clone(), (value.clone(), stamp, member.name.as_str()));
                }
                Some(current) if value.is_null() || current.0 == *value => {}
                Some(current) if current.0.is_null() => {
                    *current = (value.clone(), stamp, member.name.as_str());
                }
                Some(current) => {
                    if stamp > current.1 {
                        notes.push(format!(
                            "enrichment.{}: kept {} from {} over {} from {}",
                            field, value, member.name, current.0, current.2
                        ));
                        *current = (value.clone(), stamp, member.name.as_str());
                    } else {
                        notes.push(format!(
                            "enrichment.{}: kept {} from {} over {} from {}",
                            field, current.0, current.2, value, member.name
                        ));
                    }
                }
            }
        }
    }

    if !merged_any {
        let survivor = members.first();
        return EnrichmentMerge {
            payload: survivor.and_then(|m| m.enrichment.clone()),
            verified_at: survivor.and_then(|m| m.enrichment_verified_at),
            notes,
        };
    }

    let object: Map<String, Value> = fields.into_iter().map(|(k, (v, _, _))| (k, v)).collect();
    EnrichmentMerge {
        payload: Some(Value::Object(object)),
        verified_at,
        notes,
    }
}
