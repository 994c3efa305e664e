//! Process listing by CPU affinity.
//!
//! - `scanner`: /proc parsing and the [`ProcFs`] view
//! - [`ProcCpuAffinityMgr`]: the listings used by the managers and the watchdog

pub mod scanner;

pub use scanner::{parse_status, ProcFilter, ProcFs, ProcScope, TaskStatus, PROC_ROOT};

use crate::affinity::CpuAffinity;
use tracing::trace;

/// Lists processes and threads of the current process by affinity.
#[derive(Debug, Clone, Default)]
pub struct ProcCpuAffinityMgr {
    procfs: ProcFs,
}

impl ProcCpuAffinityMgr {
    pub fn new(procfs: ProcFs) -> Self {
        Self { procfs }
    }

    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }

    /// User-space processes of the system.
    pub fn proc_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
        let list = self.procfs.proc_list(ProcScope::System, filter, affinity);
        trace!("proc_list({:?}, {}) = {:?}", filter, affinity, list);
        list
    }

    /// Threads of the current process.
    pub fn thread_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
        let list = self.procfs.proc_list(ProcScope::ThisProc, filter, affinity);
        trace!("thread_list({:?}, {}) = {:?}", filter, affinity, list);
        list
    }

    pub fn proc_affinities(&self, scope: ProcScope) -> Vec<(i32, CpuAffinity)> {
        self.procfs.proc_affinities(scope)
    }
}
