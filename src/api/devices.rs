//! Device Registry Endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{DeviceCharacteristics, DuplicateCheck, Registration};

use super::{engine_error, EngineState, ErrorBody};

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub user_id: String,
    pub characteristics: DeviceCharacteristics,
}

#[derive(Debug, Deserialize)]
pub struct FlagDeviceRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct FlagDeviceResponse {
    pub fingerprint_hash: String,
    pub flagged: bool,
}

pub fn router() -> Router<EngineState> {
    Router::new()
        .route("/v1/devices/register", post(register_device))
        .route("/v1/devices/duplicate-check", post(check_duplicate))
        .route("/v1/devices/{hash}/flag", post(flag_device))
        .route("/v1/devices/{hash}/unflag", post(unflag_device))
}

/// POST /v1/devices/register - Record a sighting of (user, device)
async fn register_device(
    State(state): State<EngineState>,
    Json(payload): Json<RegisterDeviceRequest>,
) -> Result<Json<Registration>, (StatusCode, Json<ErrorBody>)> {
    let registration = state
        .registry
        .register(&payload.user_id, &payload.characteristics)
        .await
        .map_err(engine_error)?;
    Ok(Json(registration))
}

/// POST /v1/devices/duplicate-check - Scan for other accounts on this device
async fn check_duplicate(
    State(state): State<EngineState>,
    Json(payload): Json<RegisterDeviceRequest>,
) -> Result<Json<DuplicateCheck>, (StatusCode, Json<ErrorBody>)> {
    let check = state
        .registry
        .check_duplicate(&payload.user_id, &payload.characteristics)
        .await
        .map_err(engine_error)?;
    Ok(Json(check))
}

/// POST /v1/devices/:hash/flag - Flag a device for review
async fn flag_device(
    State(state): State<EngineState>,
    Path(hash): Path<String>,
    Json(payload): Json<FlagDeviceRequest>,
) -> Result<Json<FlagDeviceResponse>, (StatusCode, Json<ErrorBody>)> {
    state
        .registry
        .flag(&hash, &payload.reason)
        .await
        .map_err(engine_error)?;
    Ok(Json(FlagDeviceResponse {
        fingerprint_hash: hash,
        flagged: true,
    }))
}

/// POST /v1/devices/:hash/unflag - Clear a device flag after manual review
async fn unflag_device(
    State(state): State<EngineState>,
    Path(hash): Path<String>,
) -> Result<Json<FlagDeviceResponse>, (StatusCode, Json<ErrorBody>)> {
    state.registry.unflag(&hash).await.map_err(engine_error)?;
    Ok(Json(FlagDeviceResponse {
        fingerprint_hash: hash,
        flagged: false,
    }))
}
