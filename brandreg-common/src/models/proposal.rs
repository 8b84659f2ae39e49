//! Consolidation proposals and the signal snapshot they carry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Kind of relationship a proposal asserts between its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsolidationType {
    /// Equal normalized keys, names differ only by letter case
    CaseVariant,
    /// Equal normalized keys, names differ by punctuation, spacing or diacritics
    PunctuationVariant,
    /// A record that is really a product line of another brand
    SkuToBrand,
    /// Distinct brands under shared ownership; never merged automatically
    PortfolioGroup,
    /// Fuzzy name match
    SimilarName,
}

impl ConsolidationType {
    pub const ALL: [ConsolidationType; 5] = [
        ConsolidationType::CaseVariant,
        ConsolidationType::PunctuationVariant,
        ConsolidationType::SkuToBrand,
        ConsolidationType::PortfolioGroup,
        ConsolidationType::SimilarName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationType::CaseVariant => "CASE_VARIANT",
            ConsolidationType::PunctuationVariant => "PUNCTUATION_VARIANT",
            ConsolidationType::SkuToBrand => "SKU_TO_BRAND",
            ConsolidationType::PortfolioGroup => "PORTFOLIO_GROUP",
            ConsolidationType::SimilarName => "SIMILAR_NAME",
        }
    }

    /// Portfolio groups always wait for a human
    pub fn allows_auto_approval(&self) -> bool {
        !matches!(self, ConsolidationType::PortfolioGroup)
    }

    /// Fixed confidence of the key-equality rules
    ///
    /// Review floors are never allowed above this value, otherwise
    /// exact variants would stop producing proposals.
    pub fn base_confidence(&self) -> Option<f64> {
        match self {
            ConsolidationType::CaseVariant => Some(95.0),
            ConsolidationType::PunctuationVariant => Some(90.0),
            _ => None,
        }
    }

    /// Whether an approved proposal of this type merges identities
    pub fn merges_identity(&self) -> bool {
        !matches!(self, ConsolidationType::PortfolioGroup)
    }
}

impl std::fmt::Display for ConsolidationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsolidationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsolidationType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant {
                kind: "consolidation type",
                value: s.to_string(),
            })
    }
}

/// Proposal lifecycle
///
/// PENDING → {AUTO_APPROVED, APPROVED, REJECTED}; PENDING or AUTO_APPROVED → STALE
/// when a member is consolidated by a competing proposal first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
    Stale,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "PENDING",
            ProposalStatus::AutoApproved => "AUTO_APPROVED",
            ProposalStatus::Approved => "APPROVED",
            ProposalStatus::Rejected => "REJECTED",
            ProposalStatus::Stale => "STALE",
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProposalStatus::Pending),
            "AUTO_APPROVED" => Ok(ProposalStatus::AutoApproved),
            "APPROVED" => Ok(ProposalStatus::Approved),
            "REJECTED" => Ok(ProposalStatus::Rejected),
            "STALE" => Ok(ProposalStatus::Stale),
            other => Err(UnknownVariant {
                kind: "proposal status",
                value: other.to_string(),
            }),
        }
    }
}

/// Domain equality as a three-state signal
///
/// A missing domain on either side is `Unknown`, not a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainSignal {
    Match,
    Mismatch,
    Unknown,
}

impl DomainSignal {
    pub fn is_match(&self) -> bool {
        matches!(self, DomainSignal::Match)
    }
}

/// How two display names relate once their normalized keys are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRelation {
    /// Same key, display names equal ignoring case
    CaseOnly,
    /// Same key, display names differ in punctuation, spacing or diacritics
    PunctuationOrSpacing,
    /// Different keys
    Different,
}

/// Similarity signals for one candidate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalVector {
    /// Token-set similarity of the normalized names (0.0-1.0)
    pub name_similarity: f64,
    pub domain_match: DomainSignal,
    /// 1.0 when one name's token set is a subset of the other's
    pub name_containment: f64,
    /// Fraction of SKU descriptors of one brand naming the other (0.0-1.0)
    pub sku_name_overlap: f64,
    pub key_relation: KeyRelation,
}

/// Human decision on a pending proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// A detected consolidation awaiting or past resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationProposal {
    /// Deterministic id derived from the sorted member ids
    pub id: String,
    /// Member brand ids, sorted, at least two
    pub member_ids: Vec<Uuid>,
    pub proposed_survivor_id: Uuid,
    pub consolidation_type: ConsolidationType,
    /// Confidence score (0-100)
    pub confidence: f64,
    pub signals: SignalVector,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    /// Survivor chosen by the reviewer when it differs from the proposed one
    pub survivor_override_id: Option<Uuid>,
    /// Audit record written when the proposal was applied
    pub record_id: Option<Uuid>,
}

impl ConsolidationProposal {
    /// Survivor that a merge of this proposal keeps
    pub fn effective_survivor(&self) -> Uuid {
        self.survivor_override_id.unwrap_or(self.proposed_survivor_id)
    }

    pub fn contains(&self, brand_id: Uuid) -> bool {
        self.member_ids.contains(&brand_id)
    }

    /// AUTO_APPROVED but not yet executed
    pub fn awaiting_execution(&self) -> bool {
        self.status == ProposalStatus::AutoApproved && self.record_id.is_none()
    }
}

/// Filter for the review queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalFilter {
    #[serde(rename = "type")]
    pub consolidation_type: Option<ConsolidationType>,
    pub min_confidence: Option<f64>,
}
