//! End-to-end scenarios against the in-process router and the job
//! manager's mock provider set, covering the minimal happy path,
//! two-iteration branching, invalid params, cancellation, and
//! subscriber fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use beamforge_bus::ProgressBus;
use beamforge_core::domain::{JobStatus, Params, ServiceName};
use beamforge_gpu::{GpuCoordinator, ServiceSupervisor};
use beamforge_store::SessionStore;
use beamforge_supervisor::{StartOptions, Supervisor, SupervisorError};
use beamforge_web::config::Config;
use beamforge_web::job_manager::JobManager;
use beamforge_web::state::AppState;
use serde_json::Value;
use tower::ServiceExt;

/// A supervisor fake that always claims every service is already running
/// and healthy, so [`GpuCoordinator::prepare`] never tries to spawn a real
/// `beamforge-*-service` binary — there is none in this test environment.
struct StubSupervisor;

#[async_trait]
impl ServiceSupervisor for StubSupervisor {
    fn is_running(&self, _name: ServiceName) -> bool {
        true
    }

    async fn stop(&self, _name: ServiceName) -> Result<(), SupervisorError> {
        Ok(())
    }

    async fn start(&self, _name: ServiceName, _options: StartOptions) -> Result<(), SupervisorError> {
        Ok(())
    }

    async fn health(&self, _name: ServiceName) -> bool {
        true
    }
}

fn test_config(tmp: &tempfile::TempDir) -> Config {
    Config {
        port: 0,
        session_history_dir: tmp.path().to_string_lossy().to_string(),
        gpu_cleanup_delay: Duration::from_millis(0),
        hf_token: None,
        flux_lora_path: None,
        flux_lora_scale: None,
        modal_endpoint_url: None,
        modal_token_id: None,
        modal_token_secret: None,
    }
}

/// Builds an `AppState` the same way `AppState::new` does, except the GPU
/// coordinator is wired to a [`StubSupervisor`] instead of the real
/// process-spawning `Supervisor` — the HTTP service-management routes
/// still get a real `Supervisor` since S6 exercises real stop-lock files.
fn test_app(tmp: &tempfile::TempDir) -> (Router, AppState) {
    let config = Arc::new(test_config(tmp));
    let store = Arc::new(SessionStore::new(config.session_history_dir.clone()));
    let supervisor = Arc::new(Supervisor::new(std::env::temp_dir()));
    let gpu = Arc::new(GpuCoordinator::new(
        Arc::new(StubSupervisor),
        config.gpu_cleanup_delay,
    ));
    let bus = ProgressBus::new();
    let jobs = Arc::new(JobManager::new(store.clone(), bus.clone(), gpu.clone()));
    let state = AppState {
        config,
        jobs,
        bus,
        store,
        supervisor,
        gpu,
    };
    let router = beamforge_web::build_router(state.clone());
    (router, state)
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body was not JSON")
}

async fn wait_for_terminal(state: &AppState, job_id: uuid::Uuid) -> beamforge_core::domain::Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = state
            .jobs
            .snapshot(job_id)
            .await
            .expect("job disappeared from manager");
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {job_id} never reached a terminal state (stuck at {:?})", job.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn params(prompt: &str, n: u32, m: u32, iterations: u32, alpha: f64) -> Params {
    Params {
        prompt: prompt.into(),
        n,
        m,
        iterations,
        alpha,
        temperature: 1.0,
        steps: None,
        guidance: None,
        seed: None,
    }
}

#[tokio::test]
async fn s1_minimal_happy_path() {
    let tmp = tempfile::tempdir().unwrap();
    let (router, state) = test_app(&tmp);

    let job = state
        .jobs
        .submit(params("a cat", 2, 1, 1, 0.7))
        .await
        .expect("submit should accept valid params");
    let (handle, mut rx) = state.bus.subscribe(job.job_id).await;

    let mut kinds = Vec::new();
    let mut complete_payload = None;
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a progress message")
            .expect("progress stream closed before completion");
        let kind = message.kind().to_string();
        let terminal = kind == "complete";
        if terminal {
            if let beamforge_core::progress::ProgressMessage::Complete { payload, .. } = &message {
                complete_payload = Some(payload.result.best_candidate.total_score);
            }
        }
        kinds.push(kind);
        if terminal {
            break;
        }
    }
    state.bus.unsubscribe(handle).await;

    assert_eq!(
        kinds,
        vec!["started", "candidate", "candidate", "ranked", "ranked", "iteration", "complete"]
    );
    let total_score = complete_payload.expect("complete message carries a score");
    assert!((0.0..=100.0).contains(&total_score));

    let finished = wait_for_terminal(&state, job.job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(finished.result.is_some());

    let req = Request::builder()
        .method("GET")
        .uri(format!("/api/jobs/{}/metadata", job.job_id))
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let metadata = body_json(resp).await;
    let iterations = metadata["iterations"].as_array().unwrap();
    assert_eq!(iterations.len(), 1);
    assert_eq!(iterations[0]["candidates"].as_array().unwrap().len(), 2);
    assert!(metadata["winner"].is_number());
}

#[tokio::test]
async fn s2_two_iteration_branching() {
    let tmp = tempfile::tempdir().unwrap();
    let (_router, state) = test_app(&tmp);

    let job = state
        .jobs
        .submit(params("sunset", 4, 2, 2, 0.5))
        .await
        .expect("submit should accept valid params");
    let finished = wait_for_terminal(&state, job.job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);

    let doc = state
        .store
        .get_metadata(&finished.session_id.0)
        .await
        .expect("metadata document must exist");

    assert_eq!(doc.iterations.len(), 2);
    assert_eq!(doc.iterations[0].candidates.len(), 4);
    assert_eq!(doc.iterations[1].candidates.len(), 4);

    let survivor_ids: std::collections::HashSet<u32> = doc.iterations[0]
        .candidates
        .iter()
        .filter(|c| c.survived)
        .map(|c| c.candidate_id)
        .collect();
    assert_eq!(survivor_ids.len(), 2);

    for child in &doc.iterations[1].candidates {
        let parent = child.parent_id.expect("iteration-1 candidates have a parent");
        assert!(survivor_ids.contains(&parent));
    }

    let lineage = doc.lineage.expect("finished job records a lineage");
    assert_eq!(lineage.len(), 2);
}

#[tokio::test]
async fn s3_invalid_params() {
    let tmp = tempfile::tempdir().unwrap();
    let (router, _state) = test_app(&tmp);

    let req = Request::builder()
        .method("POST")
        .uri("/api/beam-search")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"prompt":"x","n":4,"m":3}"#))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("divisible"));

    let req = Request::builder()
        .method("POST")
        .uri("/api/beam-search")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"prompt":""}"#))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("prompt"));
}

#[tokio::test]
async fn s4_cancellation() {
    let tmp = tempfile::tempdir().unwrap();
    let (_router, state) = test_app(&tmp);

    let job = state
        .jobs
        .submit(params("sunset", 4, 2, 2, 0.5))
        .await
        .expect("submit should accept valid params");
    let (handle, mut rx) = state.bus.subscribe(job.job_id).await;
    state.jobs.cancel(job.job_id).await.expect("job is known");

    let mut last_kind = None;
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        last_kind = Some(message.kind().to_string());
        if last_kind.as_deref() == Some("cancelled") {
            break;
        }
    }
    state.bus.unsubscribe(handle).await;

    assert_ne!(last_kind.as_deref(), Some("complete"));

    let finished = wait_for_terminal(&state, job.job_id).await;
    assert_eq!(finished.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn s5_subscriber_fan_out() {
    let tmp = tempfile::tempdir().unwrap();
    let (_router, state) = test_app(&tmp);

    let job = state
        .jobs
        .submit(params("a cat", 2, 1, 1, 0.7))
        .await
        .expect("submit should accept valid params");

    let (handle_a, mut rx_a) = state.bus.subscribe(job.job_id).await;
    let (handle_b, mut rx_b) = state.bus.subscribe(job.job_id).await;

    let mut kinds_a = Vec::new();
    let mut kinds_b = Vec::new();
    loop {
        let a = tokio::time::timeout(Duration::from_secs(5), rx_a.recv())
            .await
            .expect("subscriber a timed out")
            .expect("subscriber a stream closed early");
        let b = tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
            .await
            .expect("subscriber b timed out")
            .expect("subscriber b stream closed early");
        assert_eq!(a.kind(), b.kind());
        let terminal = a.kind() == "complete";
        kinds_a.push(a.kind().to_string());
        kinds_b.push(b.kind().to_string());
        if terminal {
            break;
        }
    }
    assert_eq!(kinds_a, kinds_b);

    state.bus.unsubscribe(handle_a).await;
    state.bus.unsubscribe(handle_b).await;
}

#[tokio::test]
async fn s6_stop_lock_blocks_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let (router, _state) = test_app(&tmp);

    let req = Request::builder()
        .method("POST")
        .uri("/api/services/flux/stop")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder()
        .method("POST")
        .uri("/api/services/flux/restart")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("STOP_LOCK"));

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/services/flux/stop-lock")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
