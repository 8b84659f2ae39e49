//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the proposal store cannot be read
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub uptime_seconds: u64,
    /// PENDING proposals awaiting review
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_proposals: Option<i64>,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, pending_proposals) = match state.engine.status_counts().await {
        Ok(counts) => {
            let pending = counts
                .iter()
                .find(|(status, _)| *status == brandreg_common::models::ProposalStatus::Pending)
                .map_or(0, |(_, n)| *n);
            ("ok", Some(pending))
        }
        Err(e) => {
            state.record_error(format!("health check: {}", e)).await;
            ("degraded", None)
        }
    };

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: status.to_string(),
        module: "brandreg-consolidator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        pending_proposals,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
