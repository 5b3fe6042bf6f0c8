//! HTTP API endpoints for the trust engine
//!
//! Provides REST APIs for:
//! - Device registry (registration, duplicate detection, flagging)
//! - Pre-action checks (rate limits, reward attempts, check-ins)
//! - Trust snapshots and the audit log
//! - Session validation and account lockdown
//!
//! Policy denials are 200 responses carrying a structured decision; HTTP
//! error codes are reserved for input errors, dedupe conflicts, and
//! infrastructure failures.

mod checks;
mod devices;
mod sessions;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::abuse::AbuseLog;
use crate::checkin::CheckinVerifier;
use crate::error::EngineError;
use crate::fingerprint::DeviceRegistry;
use crate::rate_limit::RateLimiter;
use crate::reward::AttemptValidator;
use crate::session::SessionEnforcer;
use crate::trust::TrustAggregator;

/// Shared state for all engine endpoints
#[derive(Clone)]
pub struct EngineState {
    pub registry: Arc<DeviceRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub attempt_validator: Arc<AttemptValidator>,
    pub checkin_verifier: Arc<CheckinVerifier>,
    pub trust: Arc<TrustAggregator>,
    pub sessions: Arc<SessionEnforcer>,
    pub abuse_log: AbuseLog,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: &'static str,
}

/// Map an engine error onto an HTTP status plus a machine-readable body.
fn engine_error(e: EngineError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &e {
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::AlreadyCheckedIn { .. } => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Ledger(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
            reason: e.reason(),
        }),
    )
}

pub fn create_router(state: EngineState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(devices::router())
        .merge(checks::router())
        .merge(sessions::router())
        .with_state(state)
}

/// GET /health - Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "trustgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
