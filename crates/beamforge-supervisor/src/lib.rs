//! Local-service supervisor. Manages four external model
//! daemons (llm, flux, vision, vlm), each discoverable across unrelated
//! host processes through `/tmp/{name}_service.{pid,port}` files and
//! gated by a `/tmp/{name}_STOP_LOCK` marker.

mod files;
mod flux;
mod process;

pub use files::ServiceFilePaths;
pub use flux::{validate_flux_encoder_paths, FluxEncoderPaths, FluxValidation};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beamforge_core::domain::ServiceName;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("service {0} is already running")]
    AlreadyRunning(ServiceName),
    #[error("port {port} for service {name} is already occupied")]
    PortOccupied { name: ServiceName, port: u16 },
    #[error("service {0} has an active stop lock")]
    StopLocked(ServiceName),
    #[error("service {0} not configured: {1}")]
    NotConfigured(ServiceName, String),
    #[error("invalid flux encoder configuration: {0}")]
    InvalidEncoderPaths(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub hf_token: Option<String>,
    pub flux_lora_path: Option<String>,
    pub flux_lora_scale: Option<f64>,
    pub flux_encoders: Option<FluxEncoderPaths>,
    /// Command used to launch the service process, overridable for tests.
    pub command: Option<(String, Vec<String>)>,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: ServiceName,
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
    pub stop_locked: bool,
}

/// Callback the host wires in so crash detection can restart a service
/// without the supervisor depending on the full process-spawn story.
/// Injected at construction rather than mutated in later via a setter,
/// so there's no late-bound callback to go stale.
#[async_trait::async_trait]
pub trait Restarter: Send + Sync {
    async fn restart(&self, name: ServiceName);
}

struct StartupLocks {
    locks: HashMap<ServiceName, Arc<Mutex<()>>>,
}

impl StartupLocks {
    fn new() -> Self {
        let locks = ServiceName::ALL
            .into_iter()
            .map(|n| (n, Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    fn get(&self, name: ServiceName) -> Arc<Mutex<()>> {
        self.locks[&name].clone()
    }
}

/// Owns the cross-process file contract (pid/port/stop-lock) plus the
/// graceful shutdown and health-check logic. One instance per process,
/// dependency-injected wherever start/stop decisions are made.
pub struct Supervisor {
    files: ServiceFilePaths,
    http: reqwest::Client,
    startup_locks: StartupLocks,
    graceful_timeout: Duration,
}

impl Supervisor {
    pub fn new(tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            files: ServiceFilePaths::new(tmp_dir),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds"),
            startup_locks: StartupLocks::new(),
            graceful_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// `pid-file exists ∧ process(pid) exists`; a stale pid file (process
    /// gone) is deleted on read.
    pub fn is_running(&self, name: ServiceName) -> bool {
        match self.files.read_pid(name) {
            Some(pid) => {
                if process::is_alive(pid) {
                    true
                } else {
                    self.files.delete_pid(name);
                    false
                }
            }
            None => false,
        }
    }

    pub fn get_pid(&self, name: ServiceName) -> Option<u32> {
        if self.is_running(name) {
            self.files.read_pid(name)
        } else {
            None
        }
    }

    pub fn get_port(&self, name: ServiceName) -> u16 {
        self.files.read_port(name).unwrap_or(name.default_port())
    }

    pub fn has_stop_lock(&self, name: ServiceName) -> bool {
        self.files.read_stop_lock(name).is_some()
    }

    pub fn create_stop_lock(&self, name: ServiceName) -> Result<(), SupervisorError> {
        self.files.write_stop_lock(name)?;
        Ok(())
    }

    pub fn delete_stop_lock(&self, name: ServiceName) -> bool {
        self.files.delete_stop_lock(name)
    }

    pub fn get_all_stop_locks(&self) -> HashMap<ServiceName, bool> {
        ServiceName::ALL
            .into_iter()
            .map(|n| (n, self.has_stop_lock(n)))
            .collect()
    }

    /// Starts `name`, refusing if already running, if the port is
    /// occupied by an unrelated process, or if flux encoder paths are
    /// invalid.
    pub async fn start(
        &self,
        name: ServiceName,
        options: StartOptions,
    ) -> Result<ServiceStatus, SupervisorError> {
        let lock = self.startup_locks.get(name);
        let _guard = lock.lock().await;

        if self.is_running(name) {
            return Err(SupervisorError::AlreadyRunning(name));
        }

        let port = self.get_port(name);
        if process::port_occupied(port) {
            return Err(SupervisorError::PortOccupied { name, port });
        }

        if name == ServiceName::Flux {
            if let Some(encoders) = &options.flux_encoders {
                let validation = validate_flux_encoder_paths(encoders);
                if !validation.valid {
                    return Err(SupervisorError::InvalidEncoderPaths(
                        validation.error.unwrap_or_default(),
                    ));
                }
            }
        }

        let (program, args) = options
            .command
            .clone()
            .unwrap_or_else(|| default_command(name, port));

        let mut command = tokio::process::Command::new(&program);
        command.args(&args);
        if let Some(token) = &options.hf_token {
            command.env("HF_TOKEN", token);
        }
        if let Some(path) = &options.flux_lora_path {
            command.env("FLUX_LORA_PATH", path);
        }
        if let Some(scale) = options.flux_lora_scale {
            command.env("FLUX_LORA_SCALE", scale.to_string());
        }
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());

        let child = command
            .spawn()
            .map_err(|e| SupervisorError::NotConfigured(name, e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::NotConfigured(name, "no pid assigned".into()))?;

        self.files.write_pid(name, pid)?;
        self.files.write_port(name, port)?;
        tracing::info!(%name, pid, port, "started local service");

        Ok(ServiceStatus {
            name,
            running: true,
            pid: Some(pid),
            port,
            stop_locked: self.has_stop_lock(name),
        })
    }

    /// SIGTERM, poll up to `graceful_timeout`, then SIGKILL. Always
    /// deletes the pid file on success.
    pub async fn stop(&self, name: ServiceName) -> Result<(), SupervisorError> {
        let Some(pid) = self.files.read_pid(name) else {
            return Ok(());
        };
        process::terminate(pid);

        let deadline = tokio::time::Instant::now() + self.graceful_timeout;
        while tokio::time::Instant::now() < deadline {
            if !process::is_alive(pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if process::is_alive(pid) {
            process::kill(pid);
        }
        self.files.delete_pid(name);
        tracing::info!(%name, pid, "stopped local service");
        Ok(())
    }

    /// `stop()` followed by `start()`; refuses while a stop lock is
    /// present.
    pub async fn restart(
        &self,
        name: ServiceName,
        options: StartOptions,
    ) -> Result<ServiceStatus, SupervisorError> {
        if self.has_stop_lock(name) {
            return Err(SupervisorError::StopLocked(name));
        }
        self.stop(name).await?;
        self.start(name, options).await
    }

    /// Creates a stop lock before stopping, so auto-restart and the
    /// restart API both leave the service alone afterward — this is the
    /// explicit user "stop" action.
    pub async fn stop_and_lock(&self, name: ServiceName) -> Result<(), SupervisorError> {
        self.create_stop_lock(name)?;
        self.stop(name).await
    }

    pub async fn health(&self, name: ServiceName) -> bool {
        let port = self.get_port(name);
        let url = format!("http://127.0.0.1:{port}/health");
        matches!(self.http.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    pub fn get_all_statuses(&self) -> Vec<ServiceStatus> {
        ServiceName::ALL
            .into_iter()
            .map(|name| ServiceStatus {
                name,
                running: self.is_running(name),
                pid: self.get_pid(name),
                port: self.get_port(name),
                stop_locked: self.has_stop_lock(name),
            })
            .collect()
    }

    /// Background poll loop: a service with `should_be_running` whose
    /// health check fails and whose stop lock is absent is restarted via
    /// `restarter`; a service that should not be running, or that has a
    /// stop lock, is left alone.
    pub fn spawn_health_monitor(
        self: Arc<Self>,
        restarter: Arc<dyn Restarter>,
        should_be_running: Arc<Mutex<HashMap<ServiceName, bool>>>,
        poll_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let wanted = should_be_running.lock().await.clone();
                for name in ServiceName::ALL {
                    if !*wanted.get(&name).unwrap_or(&false) {
                        continue;
                    }
                    if self.has_stop_lock(name) {
                        continue;
                    }
                    if !self.health(name).await {
                        tracing::warn!(%name, "health check failed, restarting");
                        restarter.restart(name).await;
                    }
                }
            }
        })
    }
}

fn default_command(name: ServiceName, port: u16) -> (String, Vec<String>) {
    (
        format!("beamforge-{name}-service"),
        vec!["--port".into(), port.to_string()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(tmp: &tempfile::TempDir) -> Supervisor {
        Supervisor::new(tmp.path())
    }

    #[tokio::test]
    async fn stop_lock_blocks_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(&tmp);
        sup.create_stop_lock(ServiceName::Flux).unwrap();
        let err = sup
            .restart(ServiceName::Flux, StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StopLocked(ServiceName::Flux)));
    }

    #[tokio::test]
    async fn deleting_stop_lock_allows_restart_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(&tmp);
        sup.create_stop_lock(ServiceName::Vision).unwrap();
        assert!(sup.has_stop_lock(ServiceName::Vision));
        assert!(sup.delete_stop_lock(ServiceName::Vision));
        assert!(!sup.has_stop_lock(ServiceName::Vision));
    }

    #[test]
    fn stale_pid_file_is_deleted_on_read() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(&tmp);
        // A pid unlikely to be alive on any real system.
        sup.files.write_pid(ServiceName::Llm, 999_999).unwrap();
        assert!(!sup.is_running(ServiceName::Llm));
        assert!(sup.files.read_pid(ServiceName::Llm).is_none());
    }

    #[tokio::test]
    async fn get_all_statuses_covers_all_four_services() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(&tmp);
        let statuses = sup.get_all_statuses();
        assert_eq!(statuses.len(), 4);
    }
}
