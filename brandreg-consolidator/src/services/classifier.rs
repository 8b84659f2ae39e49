//! Signal classification
//!
//! Maps a signal vector to a consolidation type and a confidence score.
//! Rules are checked in order and the first match wins:
//!
//! 1. Equal keys, case only → CASE_VARIANT, 95 (+3 with a domain match)
//! 2. Equal keys, punctuation/spacing → PUNCTUATION_VARIANT, 90 (+3 with a domain match)
//! 3. Domain match, containment, SKU overlap above its floor → SKU_TO_BRAND
//! 4. Domain match, no containment → PORTFOLIO_GROUP
//! 5. Name similarity above its floor → SIMILAR_NAME, scaled from 70 to 100
//!
//! Rules 3-5 are also gated on a minimum name similarity. The result is
//! capped at 100 and dropped when it falls below the type's review floor.

use brandreg_common::config::DetectionConfig;
use brandreg_common::models::{
    ConsolidationType, KeyRelation, ProposalStatus, SignalVector, ThresholdTable,
};

const DOMAIN_BONUS: f64 = 3.0;
const SIMILAR_NAME_BASE: f64 = 70.0;

/// Type and confidence for one classified pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub consolidation_type: ConsolidationType,
    /// Confidence score (0-100)
    pub confidence: f64,
}

/// Similarity floors gating rules 3-5
#[derive(Debug, Clone, Copy)]
pub struct ClassifierFloors {
    pub similar_name: f64,
    pub sku_to_brand_name: f64,
    pub sku_overlap: f64,
    pub portfolio_name: f64,
}

impl From<&DetectionConfig> for ClassifierFloors {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            similar_name: config.similar_name_floor,
            sku_to_brand_name: config.sku_to_brand_name_floor,
            sku_overlap: config.sku_overlap_floor,
            portfolio_name: config.portfolio_name_floor,
        }
    }
}

impl Default for ClassifierFloors {
    fn default() -> Self {
        (&DetectionConfig::default()).into()
    }
}

/// Classifier over an explicit threshold table snapshot
#[derive(Debug, Clone)]
pub struct Classifier {
    floors: ClassifierFloors,
    thresholds: ThresholdTable,
}

impl Classifier {
    pub fn new(floors: ClassifierFloors, thresholds: ThresholdTable) -> Self {
        Self { floors, thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Classify a pair, or `None` when no rule applies or the score is sub-floor
    pub fn classify(&self, signals: &SignalVector) -> Option<Classification> {
        let domain_bonus = if signals.domain_match.is_match() {
            DOMAIN_BONUS
        } else {
            0.0
        };
        let sim = signals.name_similarity;

        let (consolidation_type, confidence) = match signals.key_relation {
            KeyRelation::CaseOnly => (ConsolidationType::CaseVariant, 95.0 + domain_bonus),
            KeyRelation::PunctuationOrSpacing => {
                (ConsolidationType::PunctuationVariant, 90.0 + domain_bonus)
            }
            KeyRelation::Different => {
                if signals.domain_match.is_match()
                    && signals.name_containment >= 1.0
                    && signals.sku_name_overlap >= self.floors.sku_overlap
                    && sim >= self.floors.sku_to_brand_name
                {
                    (
                        ConsolidationType::SkuToBrand,
                        60.0 + 30.0 * signals.sku_name_overlap + 10.0 * sim,
                    )
                } else if signals.domain_match.is_match()
                    && signals.name_containment <= 0.0
                    && sim >= self.floors.portfolio_name
                {
                    (ConsolidationType::PortfolioGroup, 50.0 + 40.0 * sim)
                } else if sim >= self.floors.similar_name {
                    let span = (1.0 - self.floors.similar_name).max(f64::EPSILON);
                    let scaled = (sim - self.floors.similar_name) / span;
                    (
                        ConsolidationType::SimilarName,
                        SIMILAR_NAME_BASE + scaled * (100.0 - SIMILAR_NAME_BASE),
                    )
                } else {
                    return None;
                }
            }
        };

        let confidence = confidence.min(100.0);
        if confidence < self.thresholds.get(consolidation_type).review_floor {
            return None;
        }

        Some(Classification {
            consolidation_type,
            confidence,
        })
    }

    /// Initial proposal status for a classification
    ///
    /// PORTFOLIO_GROUP is never auto-approved, whatever its confidence.
    pub fn initial_status(&self, classification: &Classification) -> ProposalStatus {
        let thresholds = self.thresholds.get(classification.consolidation_type);
        if classification.consolidation_type.allows_auto_approval()
            && classification.confidence >= thresholds.auto_approve
        {
            ProposalStatus::AutoApproved
        } else {
            ProposalStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::models::{DomainSignal, TypeThresholds};

    fn signals(key_relation: KeyRelation, domain: DomainSignal, sim: f64) -> SignalVector {
        SignalVector {
            name_similarity: sim,
            domain_match: domain,
            name_containment: 0.0,
            sku_name_overlap: 0.0,
            key_relation,
        }
    }

    fn classifier() -> Classifier {
        Classifier::new(ClassifierFloors::default(), ThresholdTable::defaults())
    }

    #[test]
    fn tc_case_variant_at_least_95() {
        let c = classifier();
        for domain in [DomainSignal::Match, DomainSignal::Mismatch, DomainSignal::Unknown] {
            let result = c.classify(&signals(KeyRelation::CaseOnly, domain, 1.0)).unwrap();
            assert_eq!(result.consolidation_type, ConsolidationType::CaseVariant);
            assert!(result.confidence >= 95.0);
        }
    }

    #[test]
    fn tc_domain_bonus_applies_to_variants() {
        let c = classifier();
        let with = c
            .classify(&signals(KeyRelation::PunctuationOrSpacing, DomainSignal::Match, 1.0))
            .unwrap();
        let without = c
            .classify(&signals(KeyRelation::PunctuationOrSpacing, DomainSignal::Unknown, 1.0))
            .unwrap();
        assert_eq!(with.confidence, 93.0);
        assert_eq!(without.confidence, 90.0);
    }

    #[test]
    fn tc_sku_to_brand_requires_domain_containment_and_overlap() {
        let c = classifier();
        let mut s = signals(KeyRelation::Different, DomainSignal::Match, 0.67);
        s.name_containment = 1.0;
        s.sku_name_overlap = 0.6;

        let result = c.classify(&s).unwrap();
        assert_eq!(result.consolidation_type, ConsolidationType::SkuToBrand);

        s.sku_name_overlap = 0.1;
        assert!(c.classify(&s).is_none(), "below the overlap floor nothing matches");
    }

    #[test]
    fn tc_portfolio_when_domain_shared_without_containment() {
        let c = classifier();
        let result = c
            .classify(&signals(KeyRelation::Different, DomainSignal::Match, 0.95))
            .unwrap();
        assert_eq!(result.consolidation_type, ConsolidationType::PortfolioGroup);
        assert_eq!(c.initial_status(&result), ProposalStatus::Pending);
    }

    #[test]
    fn tc_portfolio_never_auto_approved_even_at_100() {
        let mut thresholds = ThresholdTable::defaults();
        thresholds.set(
            ConsolidationType::PortfolioGroup,
            TypeThresholds {
                auto_approve: 10.0,
                review_floor: 5.0,
            },
        );
        let c = Classifier::new(ClassifierFloors::default(), thresholds);
        let classification = Classification {
            consolidation_type: ConsolidationType::PortfolioGroup,
            confidence: 100.0,
        };
        assert_eq!(c.initial_status(&classification), ProposalStatus::Pending);
    }

    #[test]
    fn tc_similar_name_scales_from_floor() {
        let c = classifier();
        let at_top = c
            .classify(&signals(KeyRelation::Different, DomainSignal::Unknown, 1.0))
            .unwrap();
        assert_eq!(at_top.consolidation_type, ConsolidationType::SimilarName);
        assert!((at_top.confidence - 100.0).abs() < 1e-9);

        assert!(c
            .classify(&signals(KeyRelation::Different, DomainSignal::Unknown, 0.8))
            .is_none());
    }

    #[test]
    fn tc_sub_floor_confidence_dropped() {
        let mut thresholds = ThresholdTable::defaults();
        thresholds.set(
            ConsolidationType::SimilarName,
            TypeThresholds {
                auto_approve: 99.0,
                review_floor: 90.0,
            },
        );
        let c = Classifier::new(ClassifierFloors::default(), thresholds);
        // sim 0.9 scores 80, below the raised floor
        assert!(c
            .classify(&signals(KeyRelation::Different, DomainSignal::Mismatch, 0.9))
            .is_none());
    }

    #[test]
    fn tc_auto_approve_at_threshold() {
        let c = classifier();
        let classification = Classification {
            consolidation_type: ConsolidationType::CaseVariant,
            confidence: 95.0,
        };
        assert_eq!(c.initial_status(&classification), ProposalStatus::AutoApproved);
    }
}
