//! `GET /health` — liveness probe with optional service/GPU detail (§6
//! AMBIENT: teacher's agentic_server.rs exposes an equivalent endpoint).

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceHealth>,
    pub gpu_held_by: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let services = state
        .supervisor
        .get_all_statuses()
        .into_iter()
        .map(|s| ServiceHealth {
            name: s.name.as_str().to_string(),
            running: s.running,
        })
        .collect();

    let gpu_held_by = state
        .gpu
        .resident_family()
        .await
        .map(|f| f.service().as_str().to_string());

    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        services,
        gpu_held_by,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
