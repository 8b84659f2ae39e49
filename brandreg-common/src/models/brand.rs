//! Brand records as held by the record store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Lifecycle status of a brand record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrandStatus {
    Active,
    Merged,
}

impl BrandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrandStatus::Active => "ACTIVE",
            BrandStatus::Merged => "MERGED",
        }
    }
}

impl FromStr for BrandStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(BrandStatus::Active),
            "MERGED" => Ok(BrandStatus::Merged),
            other => Err(UnknownVariant {
                kind: "brand status",
                value: other.to_string(),
            }),
        }
    }
}

/// One catalog entry for a registered brand
///
/// `merged_into` is set only when `status` is MERGED and always points at an
/// ACTIVE record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandRecord {
    pub id: Uuid,
    /// Display name as registered
    pub name: String,
    /// Comparison key derived from the display name
    pub normalized_key: String,
    pub domain: Option<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub sku_count: i64,
    pub importer_ids: Vec<String>,
    /// Descriptors of SKUs currently attributed to this brand
    pub sku_descriptors: Vec<String>,
    /// Structured enrichment data (JSON object)
    pub enrichment: Option<serde_json::Value>,
    /// When the enrichment payload was last verified
    pub enrichment_verified_at: Option<DateTime<Utc>>,
    pub status: BrandStatus,
    pub merged_into: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl BrandRecord {
    pub fn is_active(&self) -> bool {
        self.status == BrandStatus::Active
    }
}

/// Brand fields supplied by the ingestion collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBrand {
    pub name: String,
    pub domain: Option<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub enrichment: Option<serde_json::Value>,
    pub enrichment_verified_at: Option<DateTime<Utc>>,
}

impl NewBrand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_enrichment(mut self, payload: serde_json::Value, verified_at: DateTime<Utc>) -> Self {
        self.enrichment = Some(payload);
        self.enrichment_verified_at = Some(verified_at);
        self
    }
}
