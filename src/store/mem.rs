//! Process memory measurement for stats and memory-pressure eviction.

use crate::store::model::MemoryStats;
use std::sync::Mutex;
use sysinfo::{Pid, System};

const MIB: u64 = 1024 * 1024;

/// Samples this process's memory footprint from the OS. Each snapshot forces
/// a fresh measurement; `gc_runs` counts completed measurements and is the
/// monotone analog of forced-GC cycles in runtimes that have them.
pub struct MemoryMonitor {
    inner: Mutex<Inner>,
}

struct Inner {
    system: System,
    pid: Option<Pid>,
    refreshes: u64,
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        MemoryMonitor {
            inner: Mutex::new(Inner {
                system: System::new(),
                pid: sysinfo::get_current_pid().ok(),
                refreshes: 0,
            }),
        }
    }
}

impl MemoryMonitor {
    /// Re-measure and report. `alloc_mb` and `heap_inuse_mb` are the resident
    /// set, `sys_mb` the virtual size.
    pub fn snapshot(&self) -> MemoryStats {
        // NB: lock unwrap is safe: the critical section below cannot panic.
        let mut inner = self.inner.lock().unwrap();
        inner.refreshes += 1;
        let refreshes = inner.refreshes;
        let Some(pid) = inner.pid else {
            return MemoryStats {
                gc_runs: refreshes,
                ..MemoryStats::default()
            };
        };
        inner.system.refresh_process(pid);
        let (resident, virt) = inner
            .system
            .process(pid)
            .map_or((0, 0), |p| (p.memory(), p.virtual_memory()));
        MemoryStats {
            alloc_mb: resident / MIB,
            heap_inuse_mb: resident / MIB,
            sys_mb: virt / MIB,
            gc_runs: refreshes,
        }
    }
}
