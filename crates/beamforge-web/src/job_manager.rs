//! Job manager (C8): accepts submissions, assigns identifiers, runs jobs
//! concurrently on their own tasks, and exposes cancellation / status. The
//! worker, not the HTTP handler, drives the orchestrator so the HTTP
//! response returns immediately.

use std::collections::HashMap;
use std::sync::Arc;

use beamforge_bus::ProgressBus;
use beamforge_core::cancel::Cancel;
use beamforge_core::domain::{Job, JobStatus, Params, SessionId};
use beamforge_core::providers::{mock, providers_from_env, ProviderSet};
use beamforge_gpu::GpuCoordinator;
use beamforge_meter::Meter;
use beamforge_orchestrator::{Orchestrator, OrchestratorContext};
use beamforge_store::{MetadataConfig, MetadataDocument, SessionStore};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

struct JobEntry {
    job: Arc<Mutex<Job>>,
    cancel: Cancel,
}

/// Owns the in-memory `jobId -> Job` map and dispatches one task per job.
/// Job records live for the process lifetime — there is no eviction, so a
/// completed job's status remains queryable until the process restarts,
/// matching the "not durable across process restarts" non-goal.
pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    store: Arc<SessionStore>,
    bus: ProgressBus,
    gpu: Arc<GpuCoordinator>,
}

impl JobManager {
    pub fn new(store: Arc<SessionStore>, bus: ProgressBus, gpu: Arc<GpuCoordinator>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            store,
            bus,
            gpu,
        }
    }

    /// Validates params, persists the initial session descriptor, spawns
    /// the worker, and returns the job record immediately with status
    /// `running`.
    pub async fn submit(&self, params: Params) -> Result<Job, SubmitError> {
        params.validate()?;

        let now = Utc::now();
        let session_id = beamforge_store::generate_session_id(self.store.root(), now);
        let day = now.format("%Y-%m-%d").to_string();
        let session_path = self
            .store
            .root()
            .join(&day)
            .join(&session_id.0)
            .to_string_lossy()
            .to_string();

        let initial = MetadataDocument {
            session_id: session_id.0.clone(),
            user_prompt: params.prompt.clone(),
            config: MetadataConfig {
                beam_width: params.n,
                keep_top: params.m,
                max_iterations: params.iterations,
                alpha: params.alpha,
                temperature: params.temperature,
            },
            iterations: Vec::new(),
            winner: None,
            finalists: None,
            lineage: None,
            token_usage: None,
            estimated_cost: None,
        };
        self.store
            .create_session(&session_id, &day, &initial)
            .await?;

        let job_id = Uuid::new_v4();
        let mut job = Job::new(job_id, session_id.clone(), params.clone(), session_path.clone());
        job.transition(JobStatus::Running);
        let job = Arc::new(Mutex::new(job));
        let cancel = Cancel::new();

        self.jobs.write().await.insert(
            job_id,
            JobEntry {
                job: job.clone(),
                cancel: cancel.clone(),
            },
        );

        let ctx = OrchestratorContext {
            job_id,
            session_id: session_id.0.clone(),
            output_dir: session_path,
            params,
            providers: build_providers(),
            bus: self.bus.clone(),
            store: self.store.clone(),
            meter: Meter::new(),
            gpu: self.gpu.clone(),
            cancel,
        };

        tokio::spawn(run_job(job, ctx));

        Ok(self.snapshot(job_id).await.expect("just inserted"))
    }

    /// Sets the cancel flag; the worker's next suspension point observes
    /// it. Responds once the flag is set, without waiting for the worker.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), CancelError> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&job_id).ok_or(CancelError::NotFound)?;
        entry.cancel.cancel();
        Ok(())
    }

    pub async fn snapshot(&self, job_id: Uuid) -> Option<Job> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&job_id)?;
        Some(entry.job.lock().await.clone())
    }

    pub async fn session_id_for(&self, job_id: Uuid) -> Option<SessionId> {
        self.snapshot(job_id).await.map(|j| j.session_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Params(#[from] beamforge_core::domain::ParamsError),
    #[error(transparent)]
    Store(#[from] beamforge_store::StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("job not found")]
    NotFound,
}

async fn run_job(job: Arc<Mutex<Job>>, ctx: OrchestratorContext) {
    let job_id = ctx.job_id;
    let orchestrator = Orchestrator::new(ctx);
    let result = orchestrator.run().await;
    let mut guard = job.lock().await;
    match result {
        Ok(job_result) => {
            guard.result = Some(job_result);
            guard.transition(JobStatus::Completed);
        }
        Err(beamforge_orchestrator::OrchestratorError::Cancelled) => {
            guard.transition(JobStatus::Cancelled);
        }
        Err(e) => {
            guard.error = Some(e.to_string());
            guard.transition(JobStatus::Failed);
        }
    }
    tracing::info!(%job_id, status = ?guard.status, "job finished");
}

/// Wires the default `ProviderSet`: mock LLM/vision/critique/ranker, and
/// an image provider chosen between the hosted Modal endpoint (when
/// `MODAL_ENDPOINT_URL`/`MODAL_TOKEN_ID`/`MODAL_TOKEN_SECRET` are set) and
/// the local mock otherwise.
fn build_providers() -> ProviderSet {
    providers_from_env().unwrap_or_else(|| ProviderSet {
        llm: Box::new(mock::MockLlm::default()),
        image: Box::new(mock::MockImageProvider),
        vision: Box::new(mock::MockVision::default()),
        critique: Box::new(mock::MockCritique),
        ranker: Box::new(mock::MockRanker),
    })
}
