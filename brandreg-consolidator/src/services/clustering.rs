//! Candidate clustering and survivor selection
//!
//! Classified pairs are unioned per family so overlapping candidates become
//! one proposal. CASE and PUNCTUATION variants share a family; the other
//! types each form their own. SIMILAR_NAME similarity is not transitive, so
//! that family only groups brands that all pair with each other.

use brandreg_common::models::{ConsolidationType, SignalVector};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::classifier::Classification;
use super::normalizer::NormalizedBrand;

/// One classified candidate pair
#[derive(Debug, Clone)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub classification: Classification,
    pub signals: SignalVector,
    /// Side a SKU_TO_BRAND edge absorbs
    pub absorbed: Option<usize>,
}

/// A group of brands proposed for one consolidation
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Brand indices, sorted
    pub members: Vec<usize>,
    pub consolidation_type: ConsolidationType,
    /// Weakest edge confidence
    pub confidence: f64,
    /// Signals of the weakest edge
    pub signals: SignalVector,
    pub survivor: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Family {
    Variant,
    SkuToBrand,
    Portfolio,
    Similar,
}

impl Family {
    fn of(consolidation_type: ConsolidationType) -> Self {
        match consolidation_type {
            ConsolidationType::CaseVariant | ConsolidationType::PunctuationVariant => Family::Variant,
            ConsolidationType::SkuToBrand => Family::SkuToBrand,
            ConsolidationType::PortfolioGroup => Family::Portfolio,
            ConsolidationType::SimilarName => Family::Similar,
        }
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index becomes the root so results do not depend on edge order
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Build clusters from classified edges
///
/// Every cluster comes from at least one edge.
pub fn build_clusters(edges: &[Edge], brands: &[NormalizedBrand]) -> Vec<Cluster> {
    let mut by_family: BTreeMap<Family, Vec<&Edge>> = BTreeMap::new();
    for edge in edges {
        by_family
            .entry(Family::of(edge.classification.consolidation_type))
            .or_default()
            .push(edge);
    }

    let mut clusters = Vec::new();
    for (family, family_edges) in by_family {
        let mut sets = DisjointSet::new(brands.len());
        if family == Family::Similar {
            union_complete(&mut sets, &family_edges);
        } else {
            for edge in &family_edges {
                sets.union(edge.a, edge.b);
            }
        }

        let mut groups: BTreeMap<usize, Vec<&Edge>> = BTreeMap::new();
        for edge in family_edges {
            let root = sets.find(edge.a);
            // Edge between two groups the completeness rule kept apart
            if root != sets.find(edge.b) {
                continue;
            }
            groups.entry(root).or_default().push(edge);
        }

        for group in groups.into_values() {
            clusters.push(cluster_from_edges(family, &group, brands));
        }
    }

    clusters.sort_by(|a, b| a.members.cmp(&b.members));
    clusters
}

/// Union edges strongest first, joining two groups only when every
/// cross pair between them is itself a candidate edge
fn union_complete(sets: &mut DisjointSet, edges: &[&Edge]) {
    let linked: HashSet<(usize, usize)> = edges.iter().map(|e| pair(e.a, e.b)).collect();

    let mut ordered: Vec<&Edge> = edges.to_vec();
    ordered.sort_by(|x, y| {
        y.classification
            .confidence
            .partial_cmp(&x.classification.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| pair(x.a, x.b).cmp(&pair(y.a, y.b)))
    });

    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for edge in ordered {
        let (ra, rb) = (sets.find(edge.a), sets.find(edge.b));
        if ra == rb {
            continue;
        }
        let left = members.get(&ra).cloned().unwrap_or_else(|| vec![ra]);
        let right = members.get(&rb).cloned().unwrap_or_else(|| vec![rb]);
        let complete = left
            .iter()
            .all(|x| right.iter().all(|y| linked.contains(&pair(*x, *y))));
        if !complete {
            continue;
        }

        sets.union(ra, rb);
        members.remove(&ra);
        members.remove(&rb);
        let mut joined = left;
        joined.extend(right);
        members.insert(sets.find(ra), joined);
    }
}

fn pair(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn cluster_from_edges(family: Family, edges: &[&Edge], brands: &[NormalizedBrand]) -> Cluster {
    let mut members: Vec<usize> = edges.iter().flat_map(|e| [e.a, e.b]).collect();
    members.sort_unstable();
    members.dedup();

    let weakest = edges.iter().skip(1).fold(edges[0], |weakest, e| {
        let weaker = match e
            .classification
            .confidence
            .partial_cmp(&weakest.classification.confidence)
        {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => (e.a, e.b) < (weakest.a, weakest.b),
            _ => false,
        };
        if weaker {
            e
        } else {
            weakest
        }
    });

    let consolidation_type = match family {
        Family::Variant => {
            if edges
                .iter()
                .any(|e| e.classification.consolidation_type == ConsolidationType::PunctuationVariant)
            {
                ConsolidationType::PunctuationVariant
            } else {
                ConsolidationType::CaseVariant
            }
        }
        _ => edges[0].classification.consolidation_type,
    };

    let absorbed: HashSet<usize> = edges.iter().filter_map(|e| e.absorbed).collect();
    let survivor = select_survivor(&members, &absorbed, brands);

    Cluster {
        members,
        consolidation_type,
        confidence: weakest.classification.confidence,
        signals: weakest.signals,
        survivor,
    }
}

/// Survivor policy
///
/// Members never absorbed by an edge are preferred; ties go to the higher
/// SKU count, then the lexicographically earliest normalized key, then
/// display name, then id.
pub fn select_survivor(members: &[usize], absorbed: &HashSet<usize>, brands: &[NormalizedBrand]) -> usize {
    let preferred: Vec<usize> = members.iter().copied().filter(|m| !absorbed.contains(m)).collect();
    let pool = if preferred.is_empty() { members } else { preferred.as_slice() };

    pool.iter()
        .copied()
        .min_by(|&x, &y| survivor_order(&brands[x], &brands[y]))
        .unwrap_or(members[0])
}

fn survivor_order(x: &NormalizedBrand, y: &NormalizedBrand) -> Ordering {
    y.record
        .sku_count
        .cmp(&x.record.sku_count)
        .then_with(|| x.key.cmp(&y.key))
        .then_with(|| x.record.name.cmp(&y.record.name))
        .then_with(|| x.record.id.cmp(&y.record.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::models::{BrandRecord, BrandStatus, DomainSignal, KeyRelation};
    use uuid::Uuid;

    fn brand(name: &str, sku_count: i64) -> NormalizedBrand {
        NormalizedBrand::prepare(BrandRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            normalized_key: String::new(),
            domain: None,
            country: None,
            category: None,
            sku_count,
            importer_ids: Vec::new(),
            sku_descriptors: Vec::new(),
            enrichment: None,
            enrichment_verified_at: None,
            status: BrandStatus::Active,
            merged_into: None,
            updated_at: chrono::Utc::now(),
        })
        .unwrap()
    }

    fn edge(a: usize, b: usize, t: ConsolidationType, confidence: f64) -> Edge {
        Edge {
            a,
            b,
            classification: Classification {
                consolidation_type: t,
                confidence,
            },
            signals: SignalVector {
                name_similarity: confidence / 100.0,
                domain_match: DomainSignal::Unknown,
                name_containment: 0.0,
                sku_name_overlap: 0.0,
                key_relation: KeyRelation::Different,
            },
            absorbed: None,
        }
    }

    #[test]
    fn test_variant_family_merges_case_and_punctuation() {
        let brands = vec![brand("CHATEAU EXAMPLE", 1), brand("Chateau Example", 5), brand("CHATEAU EXAMPLE.", 2)];
        let edges = vec![
            edge(0, 1, ConsolidationType::CaseVariant, 98.0),
            edge(0, 2, ConsolidationType::PunctuationVariant, 93.0),
            edge(1, 2, ConsolidationType::PunctuationVariant, 93.0),
        ];

        let clusters = build_clusters(&edges, &brands);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1, 2]);
        assert_eq!(clusters[0].consolidation_type, ConsolidationType::PunctuationVariant);
        assert_eq!(clusters[0].confidence, 93.0);
        assert_eq!(clusters[0].survivor, 1, "highest SKU count survives");
    }

    #[test]
    fn test_families_do_not_union_across_types() {
        let brands = vec![brand("Alpha", 1), brand("ALPHA", 1), brand("Alphas", 1)];
        let edges = vec![
            edge(0, 1, ConsolidationType::CaseVariant, 95.0),
            edge(1, 2, ConsolidationType::SimilarName, 75.0),
        ];

        let clusters = build_clusters(&edges, &brands);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_similar_name_chain_split_at_weakest_link() {
        let brands = vec![brand("Acme 10", 1), brand("Acme 11", 1), brand("Acme 12", 1)];
        // 10 ~ 11 ~ 12, but 10 and 12 never paired
        let edges = vec![
            edge(0, 1, ConsolidationType::SimilarName, 88.0),
            edge(1, 2, ConsolidationType::SimilarName, 84.0),
        ];

        let clusters = build_clusters(&edges, &brands);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1]);
        assert_eq!(clusters[0].confidence, 88.0);
    }

    #[test]
    fn test_similar_name_complete_group_kept_whole() {
        let brands = vec![brand("Vina Alta", 1), brand("Vina Altas", 1), brand("Vina Alto", 1)];
        let edges = vec![
            edge(0, 1, ConsolidationType::SimilarName, 90.0),
            edge(1, 2, ConsolidationType::SimilarName, 86.0),
            edge(0, 2, ConsolidationType::SimilarName, 88.0),
        ];

        let clusters = build_clusters(&edges, &brands);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1, 2]);
        assert_eq!(clusters[0].confidence, 86.0);
    }

    #[test]
    fn test_sku_to_brand_keeps_unabsorbed_member() {
        let brands = vec![brand("Acme Wines", 2), brand("Acme Wines Reserve", 9)];
        let mut e = edge(0, 1, ConsolidationType::SkuToBrand, 85.0);
        e.absorbed = Some(1);

        let clusters = build_clusters(&[e], &brands);
        assert_eq!(clusters[0].survivor, 0, "absorbed record never survives");
    }

    #[test]
    fn test_survivor_tie_breaks_on_key() {
        let brands = vec![brand("Bravo", 3), brand("Alpha", 3)];
        let survivor = select_survivor(&[0, 1], &HashSet::new(), &brands);
        assert_eq!(survivor, 1);
    }
}
