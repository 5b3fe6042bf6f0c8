//! Session Enforcement and Audit Endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::abuse::{AbuseLogEntry, AbuseQuery};
use crate::session::{SessionCheck, SuspiciousReport};

use super::{engine_error, EngineState, ErrorBody};

#[derive(Debug, Deserialize)]
pub struct SessionValidateRequest {
    pub user_id: String,
    pub device_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct FailedLoginRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ForceLogoutRequest {
    pub user_id: String,
    /// Device to keep signed in (the one the user initiated from)
    pub keep_device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportSuspiciousRequest {
    pub user_id: String,
    pub device_hash: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct FailedLoginResponse {
    pub recorded: bool,
}

#[derive(Debug, Serialize)]
pub struct ForceLogoutResponse {
    pub devices_flagged: u64,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub total: usize,
    pub entries: Vec<AbuseLogEntry>,
}

pub fn router() -> Router<EngineState> {
    Router::new()
        .route("/v1/sessions/validate", post(validate_session))
        .route("/v1/sessions/failed-login", post(record_failed_login))
        .route("/v1/sessions/force-logout", post(force_logout))
        .route("/v1/sessions/report-suspicious", post(report_suspicious))
        .route("/v1/audit", get(audit_log))
}

/// POST /v1/sessions/validate - Advisory session check, never an HTTP error
async fn validate_session(
    State(state): State<EngineState>,
    Json(payload): Json<SessionValidateRequest>,
) -> Json<SessionCheck> {
    let check = state
        .sessions
        .check_session(&payload.user_id, &payload.device_hash)
        .await;
    Json(check)
}

/// POST /v1/sessions/failed-login - Bookkeeping from the auth layer
async fn record_failed_login(
    State(state): State<EngineState>,
    Json(payload): Json<FailedLoginRequest>,
) -> Result<Json<FailedLoginResponse>, (StatusCode, Json<ErrorBody>)> {
    state
        .sessions
        .record_failed_login(&payload.user_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(FailedLoginResponse { recorded: true }))
}

/// POST /v1/sessions/force-logout - Flag all devices except the initiator's
async fn force_logout(
    State(state): State<EngineState>,
    Json(payload): Json<ForceLogoutRequest>,
) -> Result<Json<ForceLogoutResponse>, (StatusCode, Json<ErrorBody>)> {
    let devices_flagged = state
        .sessions
        .force_logout(&payload.user_id, payload.keep_device.as_deref())
        .await
        .map_err(engine_error)?;
    Ok(Json(ForceLogoutResponse { devices_flagged }))
}

/// POST /v1/sessions/report-suspicious - Penalize a device, maybe lock
async fn report_suspicious(
    State(state): State<EngineState>,
    Json(payload): Json<ReportSuspiciousRequest>,
) -> Result<Json<SuspiciousReport>, (StatusCode, Json<ErrorBody>)> {
    let report = state
        .sessions
        .report_suspicious(&payload.user_id, &payload.device_hash, payload.details)
        .await
        .map_err(engine_error)?;
    Ok(Json(report))
}

/// GET /v1/audit - Range query over the abuse log for review tooling
async fn audit_log(
    State(state): State<EngineState>,
    Query(query): Query<AbuseQuery>,
) -> Result<Json<AuditResponse>, (StatusCode, Json<ErrorBody>)> {
    let entries = state
        .abuse_log
        .history(&query)
        .await
        .map_err(|e| engine_error(crate::error::EngineError::Store(e)))?;
    Ok(Json(AuditResponse {
        total: entries.len(),
        entries,
    }))
}
