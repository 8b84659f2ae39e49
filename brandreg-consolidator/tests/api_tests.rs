//! HTTP API integration tests
//!
//! Drives the router with `tower::ServiceExt::oneshot`; no socket is bound.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use brandreg_consolidator::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use helpers::*;

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// TC-API-001: Health reports module identity and queue depth
#[tokio::test]
async fn tc_api_001_health() {
    let env = test_env().await;
    let state = AppState::new(env.engine.clone());

    let (status, body) = send(&state, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "brandreg-consolidator");
    assert_eq!(body["pending_proposals"], 0);
}

/// TC-API-002: Detect, review, approve, then read the audit trail
#[tokio::test]
async fn tc_api_002_detect_and_resolve_flow() {
    let env = test_env().await;
    let (parent, child) = seed_acme(&env.pool).await;
    let state = AppState::new(env.engine.clone());

    let (status, body) = send(&state, post_json("/consolidation/detect", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 1);
    assert_eq!(body["updated"], 0);
    let proposal_id = body["proposals"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&state, get("/consolidation/proposals?type=SKU_TO_BRAND")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["consolidation_type"], "SKU_TO_BRAND");
    assert_eq!(body[0]["status"], "PENDING");

    let (status, body) = send(&state, get(&format!("/consolidation/proposals/{}", proposal_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["proposed_survivor_id"], parent.id.to_string());

    let resolve_uri = format!("/consolidation/proposals/{}/resolve", proposal_id);
    let (status, body) = send(
        &state,
        post_json(&resolve_uri, json!({"decision": "approve", "actor": "reviewer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "merged");
    assert_eq!(body["record"]["survivor_id"], parent.id.to_string());
    assert_eq!(body["record"]["skus_moved"], 1);

    // A duplicate resolve is answered, not failed
    let (status, body) = send(
        &state,
        post_json(&resolve_uri, json!({"decision": "approve", "actor": "reviewer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_resolved"], true);
    assert_eq!(body["status"], "APPROVED");

    let (status, body) = send(&state, get(&format!("/consolidation/history?brand_id={}", child.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["proposal_id"], proposal_id.as_str());
}

/// TC-API-003: Bad input maps to 400/404, conflicts to 409
#[tokio::test]
async fn tc_api_003_error_statuses() {
    let env = test_env().await;
    let state = AppState::new(env.engine.clone());

    let (status, body) = send(&state, get("/consolidation/proposals/cp-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&state, get("/consolidation/proposals?min_confidence=150")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &state,
        post_json(
            "/consolidation/proposals/cp-missing/resolve",
            json!({"decision": "reject", "actor": "reviewer"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Stale proposal
    let a = seed_brand(&env.pool, "Vina Alta", None, &["Tinto"]).await;
    let b = seed_brand(&env.pool, "Vina Altas", None, &[]).await;
    let c = seed_brand(&env.pool, "Vina Alto", None, &[]).await;
    let first = pending_proposal(
        &env.pool,
        brandreg_common::models::ConsolidationType::SimilarName,
        &[a.id, b.id],
        a.id,
        90.0,
    )
    .await;
    let second = pending_proposal(
        &env.pool,
        brandreg_common::models::ConsolidationType::SimilarName,
        &[b.id, c.id],
        c.id,
        88.0,
    )
    .await;

    let (status, _) = send(
        &state,
        post_json(
            &format!("/consolidation/proposals/{}/resolve", first.id),
            json!({"decision": "approve", "actor": "reviewer"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &state,
        post_json(
            &format!("/consolidation/proposals/{}/resolve", second.id),
            json!({"decision": "approve", "actor": "reviewer"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

/// TC-API-004: Threshold table lists every type
#[tokio::test]
async fn tc_api_004_thresholds() {
    let env = test_env().await;
    let state = AppState::new(env.engine.clone());

    let (status, body) = send(&state, get("/consolidation/thresholds")).await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 5);
    let portfolio = entries
        .iter()
        .find(|e| e["consolidation_type"] == "PORTFOLIO_GROUP")
        .unwrap();
    assert_eq!(portfolio["auto_approve"], 100.0);
    assert_eq!(portfolio["review_floor"], 50.0);
}
