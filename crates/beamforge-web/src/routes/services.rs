//! Local-service supervisor endpoints: status, start/stop/restart,
//! stop-lock management (§6).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use beamforge_core::domain::ServiceName;
use beamforge_supervisor::{FluxEncoderPaths, StartOptions};

use crate::error::ApiError;
use crate::state::AppState;

fn parse_name(name: &str) -> Result<ServiceName, ApiError> {
    ServiceName::parse(name).ok_or_else(|| ApiError::bad_request(format!("unknown service '{name}'")))
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub name: String,
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
    pub stop_locked: bool,
}

async fn all_statuses(
    State(state): State<AppState>,
) -> Json<HashMap<String, ServiceStatusResponse>> {
    let statuses = state
        .supervisor
        .get_all_statuses()
        .into_iter()
        .map(|s| {
            (
                s.name.as_str().to_string(),
                ServiceStatusResponse {
                    name: s.name.as_str().to_string(),
                    running: s.running,
                    pid: s.pid,
                    port: s.port,
                    stop_locked: s.stop_locked,
                },
            )
        })
        .collect();
    Json(statuses)
}

#[derive(Debug, Deserialize, Default)]
pub struct StartRequest {
    pub flux_encoders: Option<FluxEncoderPaths>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub pid: Option<u32>,
    pub port: u16,
}

async fn start(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<StartResponse>, ApiError> {
    let name = parse_name(&name)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let options = StartOptions {
        hf_token: state.config.hf_token.clone(),
        flux_lora_path: state.config.flux_lora_path.clone(),
        flux_lora_scale: state.config.flux_lora_scale,
        flux_encoders: req.flux_encoders,
        command: None,
    };
    let status = state.supervisor.start(name, options).await?;
    Ok(Json(StartResponse {
        pid: status.pid,
        port: status.port,
    }))
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

async fn stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let name = parse_name(&name)?;
    state.supervisor.stop_and_lock(name).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn restart(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let name = parse_name(&name)?;
    let options = StartOptions {
        hf_token: state.config.hf_token.clone(),
        flux_lora_path: state.config.flux_lora_path.clone(),
        flux_lora_scale: state.config.flux_lora_scale,
        flux_encoders: None,
        command: None,
    };
    state.supervisor.restart(name, options).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn delete_stop_lock(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let name = parse_name(&name)?;
    if state.supervisor.delete_stop_lock(name) {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(ApiError::not_found(format!("no stop lock for {name}")))
    }
}

async fn all_stop_locks(State(state): State<AppState>) -> Json<HashMap<String, bool>> {
    let locks = state
        .supervisor
        .get_all_stop_locks()
        .into_iter()
        .map(|(name, locked)| (name.as_str().to_string(), locked))
        .collect();
    Json(locks)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/services/status", get(all_statuses))
        .route("/api/services/stop-locks", get(all_stop_locks))
        .route("/api/services/:name/start", post(start))
        .route("/api/services/:name/stop", post(stop))
        .route("/api/services/:name/restart", post(restart))
        .route("/api/services/:name/stop-lock", delete(delete_stop_lock))
}
