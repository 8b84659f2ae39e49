//! Error types for brandreg-consolidator
//!
//! `ConsolidationError` is what the engine returns; `ApiError` maps it onto
//! HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use brandreg_common::models::ProposalStatus;
use serde_json::json;
use thiserror::Error;

/// Why a merge could not go ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// A member was no longer ACTIVE at apply time; the proposal is now STALE
    MemberMerged,
    /// The proposal had already been invalidated by a competing merge
    ProposalStale,
    /// The merge critical section could not be entered in time; nothing changed
    LockTimeout,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::MemberMerged => "member_merged",
            ConflictReason::ProposalStale => "proposal_stale",
            ConflictReason::LockTimeout => "lock_timeout",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of detection, resolution and merge operations
///
/// Every variant is scoped to a single proposal or record.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// Malformed request, e.g. an unknown proposal id; nothing persisted
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Precondition violated at apply time; re-run detection
    #[error("Conflict on proposal {proposal_id}: {reason}")]
    Conflict {
        proposal_id: String,
        reason: ConflictReason,
    },

    /// Resolve called on a proposal that is no longer PENDING
    #[error("Proposal {proposal_id} already resolved ({status})")]
    AlreadyResolved {
        proposal_id: String,
        status: ProposalStatus,
    },

    /// A relink step failed; the whole merge was rolled back
    #[error("Merge of proposal {proposal_id} failed at {step}, rolled back: {source}")]
    PartialMergeFailure {
        proposal_id: String,
        step: &'static str,
        #[source]
        source: brandreg_common::Error,
    },

    #[error(transparent)]
    Common(#[from] brandreg_common::Error),
}

impl ConsolidationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConsolidationError::Conflict { .. })
    }
}

impl From<sqlx::Error> for ConsolidationError {
    fn from(err: sqlx::Error) -> Self {
        ConsolidationError::Common(err.into())
    }
}

pub type ConsolidationResult<T> = Result<T, ConsolidationError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Duplicate resolve; answered with 200 so clients can retry blindly
    #[error("Already resolved: {proposal_id} is {status}")]
    AlreadyResolved {
        proposal_id: String,
        status: ProposalStatus,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// brandreg-common error
    #[error("Common error: {0}")]
    Common(#[from] brandreg_common::Error),
}

impl From<ConsolidationError> for ApiError {
    fn from(err: ConsolidationError) -> Self {
        match err {
            ConsolidationError::Validation(msg) => ApiError::BadRequest(msg),
            ConsolidationError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            ConsolidationError::AlreadyResolved {
                proposal_id,
                status,
            } => ApiError::AlreadyResolved {
                proposal_id,
                status,
            },
            ConsolidationError::PartialMergeFailure { .. } => ApiError::Internal(err.to_string()),
            ConsolidationError::Common(common) => ApiError::Common(common),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::AlreadyResolved {
            proposal_id,
            status,
        } = &self
        {
            let body = Json(json!({
                "already_resolved": true,
                "proposal_id": proposal_id,
                "status": status,
            }));
            return (StatusCode::OK, body).into_response();
        }

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(brandreg_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(brandreg_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
            ApiError::AlreadyResolved { .. } => (StatusCode::OK, "ALREADY_RESOLVED", String::new()),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
