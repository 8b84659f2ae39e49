//! Test Helper Utilities
//!
//! Shared setup for brandreg-consolidator integration tests: a file-backed
//! database in a temp dir, an engine wired to a recording sink, and brand
//! seeding through the record store.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use brandreg_common::config::TomlConfig;
use brandreg_common::events::{ConsolidationSink, EventBus};
use brandreg_common::models::{
    BrandRecord, ConsolidationProposal, ConsolidationRecord, ConsolidationType, DomainSignal,
    KeyRelation, NewBrand, ProposalStatus, SignalVector,
};
use brandreg_consolidator::config::EngineConfig;
use brandreg_consolidator::db::{self, brands};
use brandreg_consolidator::services::{ProposalDraft, ProposalManager};
use brandreg_consolidator::ConsolidationEngine;
use futures::StreamExt;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

/// Sink that remembers every record it is handed
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ConsolidationRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<ConsolidationRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ConsolidationSink for RecordingSink {
    fn consolidation_applied(&self, record: &ConsolidationRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Engine plus everything a test needs to inspect its effects
pub struct TestEnv {
    pub engine: Arc<ConsolidationEngine>,
    pub pool: SqlitePool,
    pub sink: Arc<RecordingSink>,
    pub events: EventBus,
    _dir: TempDir,
}

pub async fn test_env() -> TestEnv {
    test_env_with(|_| {}).await
}

/// Environment with a tweaked bootstrap config
pub async fn test_env_with(configure: impl FnOnce(&mut TomlConfig)) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let mut toml = TomlConfig {
        database_path: dir.path().join("brandreg.db"),
        ..TomlConfig::default()
    };
    toml.detection.workers = 2;
    configure(&mut toml);

    let pool = db::init_database_pool(&toml).await.unwrap();
    let config = EngineConfig::from_toml(&toml);
    let events = EventBus::new(100);
    let sink = Arc::new(RecordingSink::default());
    let engine = ConsolidationEngine::with_sink(
        pool.clone(),
        config,
        events.clone(),
        Arc::clone(&sink) as Arc<dyn ConsolidationSink>,
    )
    .await
    .unwrap();

    TestEnv {
        engine: Arc::new(engine),
        pool,
        sink,
        events,
        _dir: dir,
    }
}

/// Insert an ACTIVE brand and attribute one SKU per descriptor
pub async fn seed_brand(pool: &SqlitePool, name: &str, domain: Option<&str>, skus: &[&str]) -> BrandRecord {
    let mut new_brand = NewBrand::new(name);
    if let Some(domain) = domain {
        new_brand = new_brand.with_domain(domain);
    }
    let brand = brands::insert_brand(pool, new_brand).await.unwrap();
    for descriptor in skus {
        brands::add_sku(pool, brand.id, descriptor).await.unwrap();
    }
    brands::get_brand(pool, brand.id).await.unwrap().unwrap()
}

pub async fn brand(pool: &SqlitePool, id: Uuid) -> BrandRecord {
    brands::get_brand(pool, id).await.unwrap().unwrap()
}

/// The ACME pair: a parent brand and a product line recorded as its own brand
pub async fn seed_acme(pool: &SqlitePool) -> (BrandRecord, BrandRecord) {
    let parent = seed_brand(
        pool,
        "ACME WINES",
        Some("acme.com"),
        &[
            "Acme Wines Reserve Cabernet 2018",
            "Acme Wines Reserve Merlot",
            "Acme Wines Rosé",
        ],
    )
    .await;
    let child = seed_brand(
        pool,
        "ACME WINES RESERVE",
        Some("acme.com"),
        &["Cabernet Sauvignon 2019"],
    )
    .await;
    (parent, child)
}

/// Run a full detection pass and collect every yielded proposal
pub async fn detect_all(engine: &ConsolidationEngine) -> Vec<ConsolidationProposal> {
    let stream = engine.detect();
    futures::pin_mut!(stream);
    let mut proposals = Vec::new();
    while let Some(change) = stream.next().await {
        proposals.push(change.unwrap().into_proposal());
    }
    proposals
}

/// Persist a PENDING proposal directly, bypassing detection
pub async fn pending_proposal(
    pool: &SqlitePool,
    consolidation_type: ConsolidationType,
    members: &[Uuid],
    survivor: Uuid,
    confidence: f64,
) -> ConsolidationProposal {
    let manager = ProposalManager::new(pool.clone(), 2000);
    manager
        .upsert(ProposalDraft {
            member_ids: members.to_vec(),
            proposed_survivor_id: survivor,
            consolidation_type,
            confidence,
            signals: SignalVector {
                name_similarity: 0.9,
                domain_match: DomainSignal::Unknown,
                name_containment: 0.0,
                sku_name_overlap: 0.0,
                key_relation: KeyRelation::Different,
            },
            status: ProposalStatus::Pending,
        })
        .await
        .unwrap()
        .into_proposal()
}

/// Sum of sku_count over ACTIVE brands
pub async fn active_sku_total(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COALESCE(SUM(sku_count), 0) FROM brands WHERE status = 'ACTIVE'")
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn skus_owned_by(pool: &SqlitePool, brand_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM skus WHERE brand_id = ?")
        .bind(brand_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn brand_status(pool: &SqlitePool, brand_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM brands WHERE id = ?")
        .bind(brand_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}
