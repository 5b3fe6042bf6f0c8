//! Pre-Action Check Endpoints
//!
//! The client gateway calls these before performing a guarded action. The
//! response is always a decision the caller can render; a denial is not an
//! HTTP error.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::checkin::{CheckinOutcome, CheckinRequest};
use crate::error::EngineError;
use crate::rate_limit::{ActionKind, RateLimitDecision};
use crate::reward::AttemptAssessment;
use crate::trust::TrustSnapshot;

use super::{engine_error, EngineState, ErrorBody};

#[derive(Debug, Deserialize)]
pub struct ActionCheckRequest {
    pub user_id: String,
    pub action: String,
    pub content: Option<String>,
    pub device_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RewardAttemptRequest {
    pub user_id: String,
    pub attention_score: f64,
    pub watch_duration_seconds: f64,
    pub required_duration_seconds: f64,
    pub device_hash: Option<String>,
}

pub fn router() -> Router<EngineState> {
    Router::new()
        .route("/v1/checks/action", post(check_action))
        .route("/v1/checks/reward-attempt", post(check_reward_attempt))
        .route("/v1/checks/checkin", post(check_in))
        .route("/v1/trust/{user_id}", get(trust_snapshot))
}

/// POST /v1/checks/action - Rate-limit and duplicate-content gate
async fn check_action(
    State(state): State<EngineState>,
    Json(payload): Json<ActionCheckRequest>,
) -> Result<Json<RateLimitDecision>, (StatusCode, Json<ErrorBody>)> {
    let action = ActionKind::from_str(&payload.action).ok_or_else(|| {
        engine_error(EngineError::InvalidInput(format!(
            "unknown action: {}",
            payload.action
        )))
    })?;

    let decision = state
        .rate_limiter
        .check(
            &payload.user_id,
            action,
            payload.content.as_deref(),
            payload.device_hash.as_deref(),
        )
        .await
        .map_err(engine_error)?;
    Ok(Json(decision))
}

/// POST /v1/checks/reward-attempt - Anti-cheat score for one reward attempt
async fn check_reward_attempt(
    State(state): State<EngineState>,
    Json(payload): Json<RewardAttemptRequest>,
) -> Result<Json<AttemptAssessment>, (StatusCode, Json<ErrorBody>)> {
    let assessment = state
        .attempt_validator
        .validate(
            &payload.user_id,
            payload.attention_score,
            payload.watch_duration_seconds,
            payload.required_duration_seconds,
            payload.device_hash.as_deref(),
        )
        .await
        .map_err(engine_error)?;
    Ok(Json(assessment))
}

/// POST /v1/checks/checkin - Geofenced check-in verification
async fn check_in(
    State(state): State<EngineState>,
    Json(payload): Json<CheckinRequest>,
) -> Result<Json<CheckinOutcome>, (StatusCode, Json<ErrorBody>)> {
    let outcome = state
        .checkin_verifier
        .verify(payload)
        .await
        .map_err(engine_error)?;
    Ok(Json(outcome))
}

/// GET /v1/trust/:user_id - Derived trust score and reward multiplier
async fn trust_snapshot(
    State(state): State<EngineState>,
    Path(user_id): Path<String>,
) -> Result<Json<TrustSnapshot>, (StatusCode, Json<ErrorBody>)> {
    let snapshot = state
        .trust
        .snapshot(&user_id)
        .await
        .map_err(|e| engine_error(EngineError::Store(e)))?;
    Ok(Json(snapshot))
}
