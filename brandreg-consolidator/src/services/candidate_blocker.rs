//! Candidate blocking
//!
//! Groups brands that plausibly relate so only pairs sharing a block are
//! ever compared. Three independent key families:
//!
//! - `p:` compact-key prefix
//! - `t:` informative name tokens (three characters or more, not generic)
//! - `d:` normalized domain
//!
//! A brand appears in every block its keys select. Blocks larger than the
//! configured bound are cut into overlapping sorted-neighborhood windows.
//! Blocking holds no state between runs, so any subset of brands can be
//! re-blocked for an incremental scan.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::normalizer::NormalizedBrand;

/// Tokens too common in the catalog to say anything about identity
const GENERIC_TOKENS: &[&str] = &[
    "and", "the", "wine", "wines", "winery", "vineyard", "vineyards", "estate", "estates",
    "cellar", "cellars", "brewing", "brewery", "beer", "spirits", "distillery", "distilling",
    "company", "group", "holdings", "inc", "llc", "ltd", "brand", "brands", "reserve",
];

/// One group of brand indices sharing a blocking key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub key: String,
    pub members: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CandidateBlocker {
    max_block_size: usize,
    prefix_len: usize,
}

impl CandidateBlocker {
    pub fn new(max_block_size: usize, prefix_len: usize) -> Self {
        Self {
            max_block_size: max_block_size.max(2),
            prefix_len: prefix_len.max(1),
        }
    }

    /// Blocking keys for one brand
    pub fn keys(&self, brand: &NormalizedBrand) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();

        let prefix: String = brand.compact_key.chars().take(self.prefix_len).collect();
        keys.insert(format!("p:{}", prefix));

        for token in &brand.tokens {
            if token.chars().count() >= 3 && !GENERIC_TOKENS.contains(&token.as_str()) {
                keys.insert(format!("t:{}", token));
            }
        }

        if let Some(domain) = &brand.domain {
            keys.insert(format!("d:{}", domain));
        }

        keys
    }

    /// Lazy sequence of blocks with at least two members, each within the size bound
    pub fn blocks<'a>(&'a self, brands: &'a [NormalizedBrand]) -> impl Iterator<Item = Block> + 'a {
        let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, brand) in brands.iter().enumerate() {
            for key in self.keys(brand) {
                index.entry(key).or_default().push(i);
            }
        }

        index
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .flat_map(move |(key, mut members)| {
                if members.len() > self.max_block_size {
                    members.sort_by(|a, b| {
                        brands[*a]
                            .compact_key
                            .cmp(&brands[*b].compact_key)
                            .then_with(|| brands[*a].record.id.cmp(&brands[*b].record.id))
                    });
                }
                windows(members, self.max_block_size)
                    .into_iter()
                    .enumerate()
                    .map(move |(n, members)| Block {
                        key: if n == 0 { key.clone() } else { format!("{}#{}", key, n) },
                        members,
                    })
            })
    }

    /// Distinct index pairs `(i, j)` with `i < j`, each compared once even when
    /// the two brands share several blocks
    pub fn candidate_pairs(&self, brands: &[NormalizedBrand]) -> Vec<(usize, usize)> {
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        let mut block_count = 0usize;

        for block in self.blocks(brands) {
            block_count += 1;
            for (n, &a) in block.members.iter().enumerate() {
                for &b in &block.members[n + 1..] {
                    let pair = if a < b { (a, b) } else { (b, a) };
                    if pair.0 != pair.1 && seen.insert(pair) {
                        pairs.push(pair);
                    }
                }
            }
        }

        tracing::debug!(brands = brands.len(), blocks = block_count, pairs = pairs.len(), "Blocking complete");
        pairs
    }
}

/// Split into windows of at most `max` members, stride `max / 2`
fn windows(members: Vec<usize>, max: usize) -> Vec<Vec<usize>> {
    if members.len() <= max {
        return vec![members];
    }

    let stride = (max / 2).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max).min(members.len());
        out.push(members[start..end].to_vec());
        if end == members.len() {
            break;
        }
        start += stride;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::models::{BrandRecord, BrandStatus};
    use uuid::Uuid;

    fn brand(name: &str, domain: Option<&str>) -> NormalizedBrand {
        NormalizedBrand::prepare(BrandRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            normalized_key: String::new(),
            domain: domain.map(str::to_string),
            country: None,
            category: None,
            sku_count: 0,
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

    #[test]
    fn test_keys_cover_prefix_tokens_and_domain() {
        let blocker = CandidateBlocker::new(50, 5);
        let keys = blocker.keys(&brand("Acme Wines Reserve", Some("www.acme.com")));

        assert!(keys.contains("p:acmew"));
        assert!(keys.contains("t:acme"));
        assert!(!keys.contains("t:wines"), "generic tokens are not blocking keys");
        assert!(keys.contains("d:acme.com"));
    }

    #[test]
    fn test_unrelated_brands_never_paired() {
        let blocker = CandidateBlocker::new(50, 5);
        let brands = vec![brand("Zephyr Gin", None), brand("Quokka Rum", None)];
        assert!(blocker.candidate_pairs(&brands).is_empty());
    }

    #[test]
    fn test_shared_domain_pairs_dissimilar_names() {
        let blocker = CandidateBlocker::new(50, 5);
        let brands = vec![
            brand("Global Holdings - Brand A", Some("globalholdings.com")),
            brand("Zeta Label", Some("globalholdings.com")),
        ];
        assert_eq!(blocker.candidate_pairs(&brands), vec![(0, 1)]);
    }

    #[test]
    fn test_pairs_deduplicated_across_blocks() {
        let blocker = CandidateBlocker::new(50, 5);
        // Same prefix, same token, same domain: three shared blocks
        let brands = vec![brand("Chateau Example", Some("ex.com")), brand("CHATEAU EXAMPLE.", Some("ex.com"))];
        assert_eq!(blocker.candidate_pairs(&brands), vec![(0, 1)]);
    }

    #[test]
    fn test_oversized_blocks_are_windowed() {
        let blocker = CandidateBlocker::new(4, 5);
        let brands: Vec<_> = (0..10).map(|i| brand(&format!("Acme {}", i), None)).collect();

        let blocks: Vec<_> = blocker.blocks(&brands).collect();
        assert!(blocks.iter().all(|b| b.members.len() <= 4));

        // Every brand still lands in at least one window
        let covered: HashSet<usize> = blocks.iter().flat_map(|b| b.members.iter().copied()).collect();
        assert_eq!(covered.len(), 10);
    }

    #[test]
    fn test_windows_overlap_by_half() {
        let w = windows((0..8).collect(), 4);
        assert_eq!(w, vec![vec![0, 1, 2, 3], vec![2, 3, 4, 5], vec![4, 5, 6, 7]]);
        assert_eq!(windows(vec![1, 2], 4), vec![vec![1, 2]]);
    }
}
