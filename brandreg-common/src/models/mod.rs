//! Domain models shared by the consolidation engine and its callers

pub mod brand;
pub mod learning;
pub mod proposal;
pub mod record;
pub mod thresholds;

pub use brand::{BrandRecord, BrandStatus, NewBrand};
pub use learning::{confidence_bucket, ActorKind, LearningEvent, LearningOutcome};
pub use proposal::{
    ConsolidationProposal, ConsolidationType, Decision, DomainSignal, KeyRelation,
    ProposalFilter, ProposalStatus, SignalVector,
};
pub use record::{ConsolidationRecord, MergedBrand};
pub use thresholds::{ThresholdTable, TypeThresholds};

/// Error returned when a stored enum label is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl From<UnknownVariant> for crate::Error {
    fn from(err: UnknownVariant) -> Self {
        crate::Error::Internal(err.to_string())
    }
}
