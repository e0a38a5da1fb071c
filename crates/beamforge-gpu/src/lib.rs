//! GPU coordinator: serializes GPU-heavy phases across jobs
//! because only one family of models can be resident at a time on a
//! shared accelerator. No two GPU-touching closures ever overlap in
//! wall-clock time across the process.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beamforge_core::domain::ServiceName;
use beamforge_supervisor::{StartOptions, Supervisor, SupervisorError};
use tokio::sync::{oneshot, Mutex};

/// The slice of [`Supervisor`] the GPU coordinator needs, reified as a
/// trait so tests can inject a fake that never spawns a real process.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    fn is_running(&self, name: ServiceName) -> bool;
    async fn stop(&self, name: ServiceName) -> Result<(), SupervisorError>;
    async fn start(&self, name: ServiceName, options: StartOptions) -> Result<(), SupervisorError>;
    async fn health(&self, name: ServiceName) -> bool;
}

#[async_trait]
impl ServiceSupervisor for Supervisor {
    fn is_running(&self, name: ServiceName) -> bool {
        Supervisor::is_running(self, name)
    }

    async fn stop(&self, name: ServiceName) -> Result<(), SupervisorError> {
        Supervisor::stop(self, name).await
    }

    async fn start(&self, name: ServiceName, options: StartOptions) -> Result<(), SupervisorError> {
        Supervisor::start(self, name, options).await.map(|_| ())
    }

    async fn health(&self, name: ServiceName) -> bool {
        Supervisor::health(self, name).await
    }
}

/// One of the four model families that can occupy the accelerator.
/// `ImageGen` is the GPU-side name for the `flux` supervisor service —
/// the coordinator and the supervisor use different vocabularies for the
/// same resource, reconciled by [`Family::service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Llm,
    ImageGen,
    Vision,
    Vlm,
}

impl Family {
    pub fn service(self) -> ServiceName {
        match self {
            Family::Llm => ServiceName::Llm,
            Family::ImageGen => ServiceName::Flux,
            Family::Vision => ServiceName::Vision,
            Family::Vlm => ServiceName::Vlm,
        }
    }

    pub const ALL: [Family; 4] = [Family::Llm, Family::ImageGen, Family::Vision, Family::Vlm];
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.service())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to prepare GPU family {0}: {1}")]
    PrepareFailed(Family, String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// A hand-rolled FIFO ticket queue: `tokio::sync::Semaphore` alone does
/// not document cross-platform fair wakeup order the way an explicit
/// queue does, and GPU operations must serialize in strict enqueue order
///.
struct FifoLock {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct GpuState {
    resident: Option<Family>,
    fifo: FifoLock,
}

/// Serializes GPU-heavy phases across jobs. The GPU coordinator owns
/// "which family is resident"; preparing a family invokes the supervisor
/// to stop every other family's process first, because in-process CUDA
/// pools do not release memory on an explicit unload — only process
/// termination does.
pub struct GpuCoordinator {
    state: Mutex<GpuState>,
    supervisor: Arc<dyn ServiceSupervisor>,
    settle_delay: Duration,
}

impl GpuCoordinator {
    /// `supervisor` is injected at construction.
    pub fn new(supervisor: Arc<dyn ServiceSupervisor>, settle_delay: Duration) -> Self {
        Self {
            state: Mutex::new(GpuState {
                resident: None,
                fifo: FifoLock {
                    locked: false,
                    waiters: VecDeque::new(),
                },
            }),
            supervisor,
            settle_delay,
        }
    }

    /// Low-level escape hatch: acquires the FIFO lock, runs `fn`, releases.
    pub async fn with_gpu_lock<T, F, Fut>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        let result = op().await;
        self.release().await;
        result
    }

    async fn acquire(&self) {
        let rx = {
            let mut state = self.state.lock().await;
            if !state.fifo.locked {
                state.fifo.locked = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.fifo.waiters.push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    async fn release(&self) {
        let mut state = self.state.lock().await;
        match state.fifo.waiters.pop_front() {
            Some(waiter) => {
                let _ = waiter.send(());
            }
            None => state.fifo.locked = false,
        }
    }

    /// Ensures `family` is resident, evicting any other resident family
    /// first via the supervisor (stop every other family's process,
    /// start `family`'s if it isn't already running, wait for health).
    async fn prepare(&self, family: Family) -> Result<(), GpuError> {
        let already_resident = {
            let state = self.state.lock().await;
            state.resident == Some(family)
        };
        if already_resident {
            return Ok(());
        }

        for other in Family::ALL {
            if other != family && self.supervisor.is_running(other.service()) {
                tracing::info!(evicting = %other, loading = %family, "evicting GPU family");
                self.supervisor
                    .stop(other.service())
                    .await
                    .map_err(|e| GpuError::PrepareFailed(family, e.to_string()))?;
            }
        }

        if self.settle_delay > Duration::ZERO {
            tokio::time::sleep(self.settle_delay).await;
        }

        if !self.supervisor.is_running(family.service()) {
            self.supervisor
                .start(family.service(), StartOptions::default())
                .await
                .map_err(|e| GpuError::PrepareFailed(family, e.to_string()))?;
            self.wait_until_healthy(family).await?;
        }

        self.state.lock().await.resident = Some(family);
        Ok(())
    }

    async fn wait_until_healthy(&self, family: Family) -> Result<(), GpuError> {
        const MAX_WAIT: Duration = Duration::from_secs(30);
        const POLL: Duration = Duration::from_millis(200);
        let deadline = tokio::time::Instant::now() + MAX_WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.supervisor.health(family.service()).await {
                return Ok(());
            }
            tokio::time::sleep(POLL).await;
        }
        Err(GpuError::PrepareFailed(
            family,
            "service did not become healthy in time".into(),
        ))
    }

    async fn with_family_operation<T, F, Fut>(&self, family: Family, op: F) -> Result<T, GpuError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        let prepared = self.prepare(family).await;
        let result = match prepared {
            Ok(()) => Ok(op().await),
            Err(e) => Err(e),
        };
        self.release().await;
        result
    }

    pub async fn with_llm_operation<T, F, Fut>(&self, op: F) -> Result<T, GpuError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_family_operation(Family::Llm, op).await
    }

    pub async fn with_image_gen_operation<T, F, Fut>(&self, op: F) -> Result<T, GpuError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_family_operation(Family::ImageGen, op).await
    }

    pub async fn with_vlm_operation<T, F, Fut>(&self, op: F) -> Result<T, GpuError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_family_operation(Family::Vlm, op).await
    }

    pub async fn resident_family(&self) -> Option<Family> {
        self.state.lock().await.resident
    }

    /// Evicts all families; used on shutdown.
    pub async fn cleanup_all(&self) {
        for family in Family::ALL {
            if self.supervisor.is_running(family.service()) {
                let _ = self.supervisor.stop(family.service()).await;
            }
        }
        self.state.lock().await.resident = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn gpu_lock_serializes_concurrent_operations() {
        let supervisor = Arc::new(Supervisor::new(tempfile::tempdir().unwrap().path()));
        let coordinator = Arc::new(GpuCoordinator::new(supervisor, Duration::ZERO));

        let active = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            let active = active.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .with_gpu_lock(|| async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_observed.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_all_clears_resident_family() {
        let supervisor = Arc::new(Supervisor::new(tempfile::tempdir().unwrap().path()));
        let coordinator = GpuCoordinator::new(supervisor, Duration::ZERO);
        coordinator.cleanup_all().await;
        assert_eq!(coordinator.resident_family().await, None);
    }

    #[test]
    fn family_maps_to_expected_supervisor_service() {
        assert_eq!(Family::ImageGen.service(), ServiceName::Flux);
        assert_eq!(Family::Llm.service(), ServiceName::Llm);
    }
}
