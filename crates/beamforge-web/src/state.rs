//! Shared application state handed to every axum handler via `State`.

use std::sync::Arc;

use beamforge_bus::ProgressBus;
use beamforge_gpu::GpuCoordinator;
use beamforge_store::SessionStore;
use beamforge_supervisor::Supervisor;

use crate::config::Config;
use crate::job_manager::JobManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: Arc<JobManager>,
    pub bus: ProgressBus,
    pub store: Arc<SessionStore>,
    pub supervisor: Arc<Supervisor>,
    pub gpu: Arc<GpuCoordinator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(SessionStore::new(config.session_history_dir.clone()));
        let supervisor = Arc::new(Supervisor::new(std::env::temp_dir()));
        let gpu = Arc::new(GpuCoordinator::new(
            supervisor.clone(),
            config.gpu_cleanup_delay,
        ));
        let bus = ProgressBus::new();
        let jobs = Arc::new(JobManager::new(store.clone(), bus.clone(), gpu.clone()));
        Self {
            config,
            jobs,
            bus,
            store,
            supervisor,
            gpu,
        }
    }
}
