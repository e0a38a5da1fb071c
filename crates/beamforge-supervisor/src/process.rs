//! Process-liveness and port-probe helpers, backed by `sysinfo` rather
//! than hand-parsing `/proc`.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub fn is_alive(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        ProcessRefreshKind::new(),
    );
    system.process(target).is_some()
}

pub fn terminate(pid: u32) {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        ProcessRefreshKind::new(),
    );
    if let Some(process) = system.process(target) {
        process.kill_with(sysinfo::Signal::Term);
    }
}

pub fn kill(pid: u32) {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        ProcessRefreshKind::new(),
    );
    if let Some(process) = system.process(target) {
        process.kill();
    }
}

/// Whether some process (any process, not just one we started) is
/// currently bound to `port` — checked via `sysinfo`'s network scan so
/// `start()` can refuse a collision before spawning.
pub fn port_occupied(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_err()
}
