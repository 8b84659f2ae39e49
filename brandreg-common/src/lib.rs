//! # Brand Registry Common Library
//!
//! Shared code for the brand registry consolidation services including:
//! - Domain models (brands, proposals, audit records, learning events)
//! - Event types and the EventBus used as the merge notification sink
//! - TOML bootstrap configuration
//! - Database schema initialization
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{Error, Result};
