//! ResourceProbe port - process resource usage snapshots.
//!
//! The dispatcher samples before and after each handler call and reports the
//! delta with the success event.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Returns a snapshot of the process's memory use.
pub trait ResourceProbe: Send + Sync {
    /// Resident memory in bytes, or `None` if unavailable.
    fn memory_bytes(&self) -> Option<u64>;
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

impl ResourceProbe for NoopProbe {
    fn memory_bytes(&self) -> Option<u64> {
        None
    }
}

/// Resident memory of the current process via `sysinfo`.
///
/// `None` on platforms sysinfo does not support.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ResourceProbe for ProcessMemoryProbe {
    fn memory_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|p| p.memory())
    }
}

/// Signed difference between two samples.
pub fn memory_delta(before: Option<u64>, after: Option<u64>) -> Option<i64> {
    match (before, after) {
        (Some(b), Some(a)) => Some(a as i64 - b as i64),
        _ => None,
    }
}
