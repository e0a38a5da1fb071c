//! The cross-process file contract: `/tmp/{name}_service.pid`,
//! `/tmp/{name}_service.port`, `/tmp/{name}_STOP_LOCK`.
//! Kept as plain files (not a database) so a freshly started runtime can
//! discover services left running by a prior, unrelated runtime.

use std::path::{Path, PathBuf};

use beamforge_core::domain::ServiceName;
use chrono::Utc;

use crate::SupervisorError;

pub struct ServiceFilePaths {
    tmp_dir: PathBuf,
}

impl ServiceFilePaths {
    pub fn new(tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
        }
    }

    fn pid_path(&self, name: ServiceName) -> PathBuf {
        self.tmp_dir.join(format!("{name}_service.pid"))
    }

    fn port_path(&self, name: ServiceName) -> PathBuf {
        self.tmp_dir.join(format!("{name}_service.port"))
    }

    fn stop_lock_path(&self, name: ServiceName) -> PathBuf {
        self.tmp_dir.join(format!("{name}_STOP_LOCK"))
    }

    pub fn read_pid(&self, name: ServiceName) -> Option<u32> {
        read_u32(&self.pid_path(name))
    }

    pub fn write_pid(&self, name: ServiceName, pid: u32) -> Result<(), SupervisorError> {
        write_file(&self.pid_path(name), &pid.to_string())
    }

    pub fn delete_pid(&self, name: ServiceName) -> bool {
        delete_if_exists(&self.pid_path(name))
    }

    pub fn read_port(&self, name: ServiceName) -> Option<u16> {
        read_u32(&self.port_path(name)).map(|p| p as u16)
    }

    pub fn write_port(&self, name: ServiceName, port: u16) -> Result<(), SupervisorError> {
        write_file(&self.port_path(name), &port.to_string())
    }

    /// A recent unix timestamp marks the lock as active; expiry is left
    /// unenforced, so a lock is simply present-or-absent here (deliberate
    /// operator "reset" via `delete`).
    pub fn read_stop_lock(&self, name: ServiceName) -> Option<i64> {
        read_i64(&self.stop_lock_path(name))
    }

    pub fn write_stop_lock(&self, name: ServiceName) -> Result<(), SupervisorError> {
        write_file(&self.stop_lock_path(name), &Utc::now().timestamp().to_string())
    }

    pub fn delete_stop_lock(&self, name: ServiceName) -> bool {
        delete_if_exists(&self.stop_lock_path(name))
    }
}

fn read_u32(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn read_i64(path: &Path) -> Option<i64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn write_file(path: &Path, contents: &str) -> Result<(), SupervisorError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn delete_if_exists(path: &Path) -> bool {
    if path.exists() {
        std::fs::remove_file(path).is_ok()
    } else {
        false
    }
}
