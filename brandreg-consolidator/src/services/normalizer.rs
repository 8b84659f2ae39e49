//! Brand name normalization
//!
//! Derives the comparison key for a display name: diacritics stripped,
//! lower-cased, apostrophes and periods dropped, every other run of
//! non-alphanumerics collapsed to a single space.

use brandreg_common::models::{BrandRecord, KeyRelation};
use std::collections::BTreeSet;
use thiserror::Error;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Removed outright so "J.P." and "JP" share a key
const DROPPED: &[char] = &['\'', '\u{2019}', '`', '.'];

/// Canonical comparison key for a display name
pub fn normalize(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.nfkd().filter(|c| !is_combining_mark(*c)) {
        if DROPPED.contains(&c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_separator && !key.is_empty() {
                key.push(' ');
            }
            pending_separator = false;
            key.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    key
}

/// Key with separators removed, used for prefix blocking
pub fn compact(key: &str) -> String {
    key.chars().filter(|c| *c != ' ').collect()
}

/// Token set of a normalized key
pub fn tokens(key: &str) -> BTreeSet<String> {
    key.split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// How two display names relate once normalized
///
/// Exact duplicates count as case-only.
pub fn key_relation(a: &str, b: &str) -> KeyRelation {
    if normalize(a) != normalize(b) {
        return KeyRelation::Different;
    }
    if a.to_lowercase() == b.to_lowercase() {
        KeyRelation::CaseOnly
    } else {
        KeyRelation::PunctuationOrSpacing
    }
}

/// Lower-cased domain with scheme, `www.` and path removed
pub fn normalize_domain(domain: &str) -> Option<String> {
    let lowered = domain.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(lowered.as_str());
    let host = without_scheme.split('/').next().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host).trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// A brand record that failed preparation and is skipped by detection
#[derive(Debug, Error)]
#[error("brand {id} ({name:?}) skipped: {reason}")]
pub struct MalformedBrand {
    pub id: uuid::Uuid,
    pub name: String,
    pub reason: &'static str,
}

/// Brand record with its derived comparison fields
#[derive(Debug, Clone)]
pub struct NormalizedBrand {
    pub record: BrandRecord,
    pub key: String,
    pub compact_key: String,
    pub tokens: BTreeSet<String>,
    pub domain: Option<String>,
    /// Token set of each SKU descriptor
    pub sku_tokens: Vec<BTreeSet<String>>,
}

impl NormalizedBrand {
    pub fn prepare(record: BrandRecord) -> Result<Self, MalformedBrand> {
        let key = normalize(&record.name);
        if key.is_empty() {
            return Err(MalformedBrand {
                id: record.id,
                name: record.name,
                reason: "name has no alphanumeric characters",
            });
        }

        let sku_tokens = record
            .sku_descriptors
            .iter()
            .map(|d| tokens(&normalize(d)))
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self {
            compact_key: compact(&key),
            tokens: tokens(&key),
            domain: record.domain.as_deref().and_then(normalize_domain),
            sku_tokens,
            key,
            record,
        })
    }
}
