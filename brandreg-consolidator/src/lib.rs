//! brandreg-consolidator library interface
//!
//! Brand deduplication and consolidation engine. Exposes the engine, its
//! services and the HTTP router for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod services;
pub mod utils;

pub use crate::engine::{ConsolidationEngine, ResolveOutcome};
pub use crate::error::{ApiError, ApiResult, ConflictReason, ConsolidationError, ConsolidationResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConsolidationEngine>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(engine: Arc<ConsolidationEngine>) -> Self {
        Self {
            engine,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::consolidation_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
