//! HTTP API handlers for brandreg-consolidator
//!
//! A thin transport over the engine operations; no HTML, no auth.

pub mod consolidation;
pub mod health;

pub use consolidation::consolidation_routes;
pub use health::health_routes;
