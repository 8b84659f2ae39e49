//! Proposal persistence and deduplication
//!
//! Proposal ids are derived from the sorted member ids, so detection can be
//! re-run freely. An existing id is refreshed in place while PENDING and
//! left alone in every other state; a STALE or REJECTED proposal is never
//! re-activated.

use brandreg_common::models::{
    ConsolidationProposal, ConsolidationType, ProposalFilter, ProposalStatus, SignalVector,
};
use brandreg_common::{time, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::proposals;
use crate::utils::{begin_monitored, retry_on_lock};

/// Deterministic proposal id for a member set
///
/// Independent of member order and of duplicates in the input.
pub fn proposal_id(member_ids: &[Uuid]) -> String {
    let mut ids: Vec<String> = member_ids.iter().map(Uuid::to_string).collect();
    ids.sort();
    ids.dedup();
    format!("cp-{:x}", Sha256::digest(ids.join(",").as_bytes()))
}

/// Classifier output for one cluster, before persistence
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub member_ids: Vec<Uuid>,
    pub proposed_survivor_id: Uuid,
    pub consolidation_type: ConsolidationType,
    pub confidence: f64,
    pub signals: SignalVector,
    pub status: ProposalStatus,
}

impl ProposalDraft {
    fn into_proposal(self, id: String) -> ConsolidationProposal {
        let mut member_ids = self.member_ids;
        member_ids.sort();
        member_ids.dedup();
        let now = time::now();

        ConsolidationProposal {
            id,
            member_ids,
            proposed_survivor_id: self.proposed_survivor_id,
            consolidation_type: self.consolidation_type,
            confidence: self.confidence,
            signals: self.signals,
            status: self.status,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            survivor_override_id: None,
            record_id: None,
        }
    }

    /// Whether a PENDING proposal would change under this draft
    fn differs_from(&self, existing: &ConsolidationProposal) -> bool {
        existing.consolidation_type != self.consolidation_type
            || (existing.confidence - self.confidence).abs() > 1e-9
            || existing.proposed_survivor_id != self.proposed_survivor_id
            || existing.status != self.status
    }
}

/// Outcome of persisting one draft
#[derive(Debug, Clone)]
pub enum ProposalChange {
    Created(ConsolidationProposal),
    Updated(ConsolidationProposal),
    /// Already persisted and either unchanged or no longer PENDING
    Unchanged(ConsolidationProposal),
}

impl ProposalChange {
    pub fn proposal(&self) -> &ConsolidationProposal {
        match self {
            ProposalChange::Created(p) | ProposalChange::Updated(p) | ProposalChange::Unchanged(p) => p,
        }
    }

    pub fn into_proposal(self) -> ConsolidationProposal {
        match self {
            ProposalChange::Created(p) | ProposalChange::Updated(p) | ProposalChange::Unchanged(p) => p,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, ProposalChange::Unchanged(_))
    }
}

/// Serialized writer for proposal rows
pub struct ProposalManager {
    pool: SqlitePool,
    persist_lock: Mutex<()>,
    lock_wait_ms: u64,
}

impl ProposalManager {
    pub fn new(pool: SqlitePool, lock_wait_ms: u64) -> Self {
        Self {
            pool,
            persist_lock: Mutex::new(()),
            lock_wait_ms,
        }
    }

    /// Persist a draft under its deterministic id
    pub async fn upsert(&self, draft: ProposalDraft) -> Result<ProposalChange> {
        let id = proposal_id(&draft.member_ids);
        let _guard = self.persist_lock.lock().await;

        let pool = &self.pool;
        let id = &id;
        let draft = &draft;

        let change = retry_on_lock("proposal upsert", self.lock_wait_ms, move || async move {
            let mut tx = begin_monitored(pool, "proposal_manager::upsert").await?;

            let change = match proposals::get_proposal(tx.conn(), id).await? {
                None => {
                    let proposal = draft.clone().into_proposal(id.clone());
                    proposals::insert_proposal(tx.conn(), &proposal).await?;
                    ProposalChange::Created(proposal)
                }
                Some(existing)
                    if existing.status == ProposalStatus::Pending && draft.differs_from(&existing) =>
                {
                    let mut updated = existing.clone();
                    updated.consolidation_type = draft.consolidation_type;
                    updated.confidence = draft.confidence;
                    updated.proposed_survivor_id = draft.proposed_survivor_id;
                    updated.signals = draft.signals;
                    updated.status = draft.status;
                    updated.updated_at = time::now();

                    if proposals::update_pending(tx.conn(), &updated).await? {
                        ProposalChange::Updated(updated)
                    } else {
                        ProposalChange::Unchanged(existing)
                    }
                }
                Some(existing) => ProposalChange::Unchanged(existing),
            };

            tx.commit().await?;
            Ok(change)
        })
        .await?;

        match &change {
            ProposalChange::Created(p) => tracing::debug!(
                proposal_id = %p.id,
                consolidation_type = %p.consolidation_type,
                confidence = p.confidence,
                status = %p.status,
                "Proposal created"
            ),
            ProposalChange::Updated(p) => tracing::debug!(
                proposal_id = %p.id,
                confidence = p.confidence,
                status = %p.status,
                "Proposal refreshed"
            ),
            ProposalChange::Unchanged(_) => {}
        }

        Ok(change)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConsolidationProposal>> {
        proposals::get_proposal(&self.pool, id).await
    }

    pub async fn list_pending(&self, filter: &ProposalFilter) -> Result<Vec<ConsolidationProposal>> {
        proposals::list_pending(&self.pool, filter).await
    }

    pub async fn list_awaiting_execution(&self) -> Result<Vec<ConsolidationProposal>> {
        proposals::list_awaiting_execution(&self.pool).await
    }
}
