//! Consolidation endpoints
//!
//! - `POST /consolidation/detect` runs a detection pass
//! - `GET  /consolidation/proposals` lists the review queue
//! - `GET  /consolidation/proposals/:id` fetches one proposal
//! - `POST /consolidation/proposals/:id/resolve` approves or rejects
//! - `GET  /consolidation/history` lists audit records
//! - `GET  /consolidation/thresholds` shows the live threshold table

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use brandreg_common::models::{
    ConsolidationProposal, ConsolidationRecord, ConsolidationType, Decision, ProposalFilter,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::ResolveOutcome;
use crate::services::ProposalChange;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct DetectQuery {
    /// Only compare pairs where a brand changed at or after this instant
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub created: usize,
    pub updated: usize,
    pub proposals: Vec<ConsolidationProposal>,
}

/// POST /consolidation/detect
pub async fn detect(
    State(state): State<AppState>,
    Query(query): Query<DetectQuery>,
) -> ApiResult<Json<DetectResponse>> {
    let mut response = DetectResponse {
        created: 0,
        updated: 0,
        proposals: Vec::new(),
    };

    let stream = state.engine.detect_since(query.since);
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        let change = match item {
            Ok(change) => change,
            Err(e) => {
                state.record_error(format!("detect: {}", e)).await;
                return Err(e.into());
            }
        };
        match change {
            ProposalChange::Created(p) => {
                response.created += 1;
                response.proposals.push(p);
            }
            ProposalChange::Updated(p) => {
                response.updated += 1;
                response.proposals.push(p);
            }
            ProposalChange::Unchanged(_) => {}
        }
    }

    info!(created = response.created, updated = response.updated, "Detection requested via API");
    Ok(Json(response))
}

/// GET /consolidation/proposals?type=&min_confidence=
pub async fn list_pending(
    State(state): State<AppState>,
    Query(filter): Query<ProposalFilter>,
) -> ApiResult<Json<Vec<ConsolidationProposal>>> {
    Ok(Json(state.engine.list_pending(&filter).await?))
}

/// GET /consolidation/proposals/:id
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConsolidationProposal>> {
    state
        .engine
        .get_proposal(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("proposal {}", id)))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub decision: Decision,
    #[serde(default)]
    pub survivor_override: Option<Uuid>,
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /consolidation/proposals/:id/resolve
///
/// 409 on conflict; a duplicate resolve answers 200 with `already_resolved`.
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveOutcome>> {
    let outcome = state
        .engine
        .resolve(
            &id,
            request.decision,
            request.survivor_override,
            &request.actor,
            request.notes.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub brand_id: Option<Uuid>,
}

/// GET /consolidation/history?brand_id=
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ConsolidationRecord>>> {
    Ok(Json(state.engine.history(query.brand_id).await?))
}

#[derive(Debug, Serialize)]
pub struct ThresholdEntry {
    pub consolidation_type: ConsolidationType,
    pub auto_approve: f64,
    pub review_floor: f64,
}

/// GET /consolidation/thresholds
pub async fn thresholds(State(state): State<AppState>) -> Json<Vec<ThresholdEntry>> {
    let table = state.engine.thresholds().await;
    Json(
        table
            .iter()
            .map(|(consolidation_type, th)| ThresholdEntry {
                consolidation_type,
                auto_approve: th.auto_approve,
                review_floor: th.review_floor,
            })
            .collect(),
    )
}

/// Build consolidation routes
pub fn consolidation_routes() -> Router<AppState> {
    Router::new()
        .route("/consolidation/detect", post(detect))
        .route("/consolidation/proposals", get(list_pending))
        .route("/consolidation/proposals/:id", get(get_proposal))
        .route("/consolidation/proposals/:id/resolve", post(resolve))
        .route("/consolidation/history", get(history))
        .route("/consolidation/thresholds", get(thresholds))
}
