//! Pairwise similarity signals
//!
//! Pure functions of two prepared brands; no I/O.

use brandreg_common::models::{DomainSignal, KeyRelation, SignalVector};
use std::collections::BTreeSet;

use super::normalizer::{key_relation, NormalizedBrand};

/// Compute the full signal vector for a candidate pair
pub fn extract(a: &NormalizedBrand, b: &NormalizedBrand) -> SignalVector {
    let key_relation = if a.key == b.key {
        key_relation(&a.record.name, &b.record.name)
    } else {
        KeyRelation::Different
    };

    SignalVector {
        name_similarity: name_similarity(a, b),
        domain_match: domain_signal(a.domain.as_deref(), b.domain.as_deref()),
        name_containment: if is_contained(a, b) { 1.0 } else { 0.0 },
        sku_name_overlap: sku_name_overlap(a, b),
        key_relation,
    }
}

/// Token-set similarity: the better of Jaccard over tokens and normalized
/// Levenshtein over the sorted token strings
pub fn name_similarity(a: &NormalizedBrand, b: &NormalizedBrand) -> f64 {
    if a.key == b.key {
        return 1.0;
    }

    let jaccard = jaccard(&a.tokens, &b.tokens);
    let sorted_a = a.tokens.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    let sorted_b = b.tokens.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    let edit = strsim::normalized_levenshtein(&sorted_a, &sorted_b);

    jaccard.max(edit).clamp(0.0, 1.0)
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Three-state domain equality; absent on either side is unknown
pub fn domain_signal(a: Option<&str>, b: Option<&str>) -> DomainSignal {
    match (a, b) {
        (Some(a), Some(b)) if a == b => DomainSignal::Match,
        (Some(_), Some(_)) => DomainSignal::Mismatch,
        _ => DomainSignal::Unknown,
    }
}

/// One token set is a subset of the other
pub fn is_contained(a: &NormalizedBrand, b: &NormalizedBrand) -> bool {
    a.tokens.is_subset(&b.tokens) || b.tokens.is_subset(&a.tokens)
}

/// Fraction of one brand's SKU descriptors that name the other brand
///
/// With containment the direction is fixed: the shorter-named brand's SKUs
/// are checked for the longer name, since the longer name's own SKUs always
/// mention the shorter one. Otherwise the larger of both directions.
pub fn sku_name_overlap(a: &NormalizedBrand, b: &NormalizedBrand) -> f64 {
    if a.tokens.is_subset(&b.tokens) && a.tokens != b.tokens {
        return descriptor_fraction(a, b);
    }
    if b.tokens.is_subset(&a.tokens) && a.tokens != b.tokens {
        return descriptor_fraction(b, a);
    }
    descriptor_fraction(a, b).max(descriptor_fraction(b, a))
}

/// Share of `owner`'s descriptors containing every token of `named`
fn descriptor_fraction(owner: &NormalizedBrand, named: &NormalizedBrand) -> f64 {
    if owner.sku_tokens.is_empty() {
        return 0.0;
    }
    let hits = owner
        .sku_tokens
        .iter()
        .filter(|descriptor| named.tokens.is_subset(descriptor))
        .count();
    hits as f64 / owner.sku_tokens.len() as f64
}

/// Which side a SKU_TO_BRAND edge absorbs: the one with more name tokens
///
/// `Some(true)` when `a` is absorbed, `None` when the token counts tie.
pub fn absorbed_side(a: &NormalizedBrand, b: &NormalizedBrand) -> Option<bool> {
    if a.tokens.len() == b.tokens.len() {
        None
    } else {
        Some(a.tokens.len() > b.tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::models::{BrandRecord, BrandStatus};
    use uuid::Uuid;

    fn brand(name: &str, domain: Option<&str>, skus: &[&str]) -> NormalizedBrand {
        NormalizedBrand::prepare(BrandRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            normalized_key: String::new(),
            domain: domain.map(str::to_string),
            country: None,
            category: None,
            sku_count: skus.len() as i64,
            importer_ids: Vec::new(),
            sku_descriptors: skus.iter().map(|s| s.to_string()).collect(),
            enrichment: None,
            enrichment_verified_at: None,
            status: BrandStatus::Active,
            merged_into: None,
            updated_at: chrono::Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn test_case_variant_signals() {
        let a = brand("CHATEAU EXAMPLE", Some("example.com"), &[]);
        let b = brand("Chateau Example", Some("example.com"), &[]);
        let s = extract(&a, &b);

        assert_eq!(s.key_relation, KeyRelation::CaseOnly);
        assert_eq!(s.name_similarity, 1.0);
        assert_eq!(s.domain_match, DomainSignal::Match);
    }

    #[test]
    fn test_missing_domain_is_unknown_not_mismatch() {
        assert_eq!(domain_signal(Some("a.com"), None), DomainSignal::Unknown);
        assert_eq!(domain_signal(None, None), DomainSignal::Unknown);
        assert_eq!(domain_signal(Some("a.com"), Some("b.com")), DomainSignal::Mismatch);
    }

    #[test]
    fn test_sku_overlap_reads_parent_descriptors() {
        let parent = brand(
            "ACME WINES",
            Some("acme.com"),
            &["Acme Wines Reserve Cabernet 2018", "Acme Wines Reserve Merlot", "Acme Wines Rosé"],
        );
        let child = brand("ACME WINES RESERVE", Some("acme.com"), &["Cabernet Sauvignon 2019"]);
        let s = extract(&parent, &child);

        assert_eq!(s.name_containment, 1.0);
        assert!((s.sku_name_overlap - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(absorbed_side(&parent, &child), Some(false));
    }

    #[test]
    fn test_disjoint_names_not_contained() {
        let a = brand("Global Holdings - Brand A", Some("gh.com"), &[]);
        let b = brand("Global Holdings - Brand B", Some("gh.com"), &[]);
        let s = extract(&a, &b);

        assert_eq!(s.name_containment, 0.0);
        assert_eq!(s.key_relation, KeyRelation::Different);
        assert!(s.name_similarity > 0.5);
    }

    #[test]
    fn test_similarity_ignores_token_order() {
        let a = brand("Example Chateau", None, &[]);
        let b = brand("Chateau Example", None, &[]);
        assert_eq!(name_similarity(&a, &b), 1.0);
    }
}
