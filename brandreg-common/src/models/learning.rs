//! Resolution outcomes consumed by the threshold learning loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{ConsolidationType, UnknownVariant};

/// Whether a resolution agreed with the proposal as detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningOutcome {
    /// Approved with the proposed survivor
    Confirmed,
    /// Rejected, or approved with a different survivor
    Overridden,
}

impl LearningOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningOutcome::Confirmed => "CONFIRMED",
            LearningOutcome::Overridden => "OVERRIDDEN",
        }
    }
}

impl FromStr for LearningOutcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(LearningOutcome::Confirmed),
            "OVERRIDDEN" => Ok(LearningOutcome::Overridden),
            other => Err(UnknownVariant {
                kind: "learning outcome",
                value: other.to_string(),
            }),
        }
    }
}

/// Who resolved the proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    Human,
    Automatic,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Human => "HUMAN",
            ActorKind::Automatic => "AUTOMATIC",
        }
    }
}

impl FromStr for ActorKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HUMAN" => Ok(ActorKind::Human),
            "AUTOMATIC" => Ok(ActorKind::Automatic),
            other => Err(UnknownVariant {
                kind: "actor kind",
                value: other.to_string(),
            }),
        }
    }
}

/// One resolution outcome; write-once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub proposal_id: String,
    pub consolidation_type: ConsolidationType,
    /// Lower bound of the confidence bin
    pub confidence_bucket: u32,
    pub outcome: LearningOutcome,
    pub actor_kind: ActorKind,
    pub created_at: DateTime<Utc>,
}

/// Lower bound of the bin containing `confidence`
///
/// 100 falls into the top bin rather than a bin of its own.
pub fn confidence_bucket(confidence: f64, width: u32) -> u32 {
    let width = width.max(1);
    let clamped = confidence.clamp(0.0, 100.0);
    let bucket = (clamped / width as f64).floor() as u32 * width;
    bucket.min(100 - width.min(100))
}
