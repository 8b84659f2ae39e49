//! Append-only audit trail of applied consolidations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConsolidationType;

/// A brand absorbed by a consolidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedBrand {
    pub id: Uuid,
    pub name: String,
    /// SKU count the brand carried before the merge
    pub sku_count: i64,
}

/// Immutable record of one applied proposal
///
/// Written once inside the merge transaction; never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationRecord {
    pub id: Uuid,
    pub proposal_id: String,
    pub consolidation_type: ConsolidationType,
    pub survivor_id: Uuid,
    pub survivor_name: String,
    /// Non-survivor members (for portfolio groups: every member other than the anchor)
    pub merged_brands: Vec<MergedBrand>,
    pub skus_moved: i64,
    pub importer_links_moved: i64,
    /// Enrichment field conflicts and how they were resolved
    pub notes: Vec<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl ConsolidationRecord {
    /// Every brand id the record touches, survivor first
    pub fn brand_ids(&self) -> Vec<Uuid> {
        std::iter::once(self.survivor_id)
            .chain(self.merged_brands.iter().map(|b| b.id))
            .collect()
    }
}
