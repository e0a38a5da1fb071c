//! Job submission, cancellation, status, metadata, and listing (§6).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use beamforge_core::domain::{Job, Params};
use beamforge_store::SessionSummary;

use crate::error::ApiError;
use crate::job_manager::{CancelError, SubmitError};
use crate::state::AppState;

fn default_n() -> u32 {
    4
}
fn default_m() -> u32 {
    2
}
fn default_iterations() -> u32 {
    3
}
fn default_alpha() -> f64 {
    0.5
}
fn default_temperature() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default = "default_m")]
    pub m: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
}

impl From<SubmitRequest> for Params {
    fn from(req: SubmitRequest) -> Self {
        Params {
            prompt: req.prompt,
            n: req.n,
            m: req.m,
            iterations: req.iterations,
            alpha: req.alpha,
            temperature: req.temperature,
            steps: req.steps,
            guidance: req.guidance,
            seed: req.seed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub params: Params,
}

async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let params: Params = req.into();
    let job = state.jobs.submit(params.clone()).await.map_err(|e| match e {
        SubmitError::Params(err) => ApiError::from(err),
        SubmitError::Store(err) => ApiError::internal(err.to_string()),
    })?;
    Ok(Json(SubmitResponse {
        job_id: job.job_id,
        status: "running",
        params: job.params,
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
}

async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    state
        .jobs
        .cancel(job_id)
        .await
        .map_err(|CancelError::NotFound| ApiError::not_found("job unknown"))?;
    Ok(Json(CancelResponse { success: true }))
}

async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    state
        .jobs
        .snapshot(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("job unknown"))
}

async fn metadata(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<beamforge_store::MetadataDocument>, ApiError> {
    let session_id = state
        .jobs
        .session_id_for(job_id)
        .await
        .ok_or_else(|| ApiError::not_found("job unknown"))?;
    let doc = state.store.get_metadata(&session_id.0).await?;
    Ok(Json(doc))
}

#[derive(Debug, Serialize)]
pub struct JobsListResponse {
    pub sessions: Vec<SessionSummary>,
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<JobsListResponse>, ApiError> {
    let sessions = state.store.list_sessions().await?;
    Ok(Json(JobsListResponse { sessions }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/beam-search", post(submit))
        .route("/api/jobs/:job_id/cancel", post(cancel))
        .route("/api/jobs/:job_id", get(status))
        .route("/api/jobs/:job_id/metadata", get(metadata))
        .route("/api/jobs", get(list_jobs))
}
