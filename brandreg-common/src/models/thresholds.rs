//! Per-type confidence thresholds read by the classifier

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ConsolidationType;

/// Auto-approve and review-floor thresholds for one consolidation type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeThresholds {
    /// Confidence at or above which a proposal is approved without review
    pub auto_approve: f64,
    /// Confidence below which no proposal is emitted
    pub review_floor: f64,
}

/// Thresholds for every consolidation type
///
/// Passed explicitly into the classifier; mutated only by the learning loop
/// and persisted so restarts keep learned values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    entries: BTreeMap<ConsolidationType, TypeThresholds>,
}

impl ThresholdTable {
    /// Static defaults used before any learning has happened
    pub fn defaults() -> Self {
        let entries = ConsolidationType::ALL
            .into_iter()
            .map(|t| (t, Self::default_for(t)))
            .collect();
        Self { entries }
    }

    pub fn default_for(consolidation_type: ConsolidationType) -> TypeThresholds {
        let (auto_approve, review_floor) = match consolidation_type {
            ConsolidationType::CaseVariant => (95.0, 80.0),
            ConsolidationType::PunctuationVariant => (90.0, 75.0),
            ConsolidationType::SkuToBrand => (90.0, 60.0),
            ConsolidationType::PortfolioGroup => (100.0, 50.0),
            ConsolidationType::SimilarName => (98.0, 70.0),
        };
        TypeThresholds {
            auto_approve,
            review_floor,
        }
    }

    pub fn get(&self, consolidation_type: ConsolidationType) -> TypeThresholds {
        self.entries
            .get(&consolidation_type)
            .copied()
            .unwrap_or_else(|| Self::default_for(consolidation_type))
    }

    pub fn set(&mut self, consolidation_type: ConsolidationType, thresholds: TypeThresholds) {
        self.entries.insert(consolidation_type, thresholds);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConsolidationType, TypeThresholds)> + '_ {
        self.entries.iter().map(|(t, th)| (*t, *th))
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_type() {
        let table = ThresholdTable::defaults();
        assert_eq!(table.iter().count(), ConsolidationType::ALL.len());
        for (t, th) in table.iter() {
            assert!(th.review_floor < th.auto_approve, "{} floor must sit below auto", t);
        }
    }

    #[test]
    fn test_exact_variant_floors_below_base_confidence() {
        let table = ThresholdTable::defaults();
        for t in [ConsolidationType::CaseVariant, ConsolidationType::PunctuationVariant] {
            let base = t.base_confidence().unwrap();
            assert!(table.get(t).review_floor <= base);
        }
    }

    #[test]
    fn test_set_overrides_entry() {
        let mut table = ThresholdTable::defaults();
        table.set(
            ConsolidationType::SimilarName,
            TypeThresholds {
                auto_approve: 99.0,
                review_floor: 72.0,
            },
        );
        assert_eq!(table.get(ConsolidationType::SimilarName).auto_approve, 99.0);
    }
}
