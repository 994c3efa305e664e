//! Applying a CPU mask to a task, either with a direct `sched_setaffinity`
//! call per thread or through the `taskset` utility.

use super::CpuAffinity;
use crate::error::{AffinityError, Result};
use crate::process::ProcFs;
use crate::sudo::{self, Sudo};
use nix::errno::Errno;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use tracing::trace;

pub const TASKSET: &str = "taskset";

impl CpuAffinity {
    /// Kernel CPU set for the effective mask.
    pub fn to_cpu_set(self) -> Result<CpuSet> {
        let mut cpu_set = CpuSet::new();
        for cpu in self.cpus() {
            cpu_set.set(cpu)?;
        }
        Ok(cpu_set)
    }

    /// Pins `task` (and its threads when `incl_threads`) to this affinity.
    ///
    /// When `incl_threads` is false, `task` is looked up among the threads of
    /// the current process. A task whose status entry is gone is skipped
    /// silently.
    pub fn apply_to_task(
        self,
        procfs: &ProcFs,
        sudo: &Sudo,
        task: i32,
        incl_threads: bool,
        use_taskset: bool,
    ) -> Result<()> {
        let status = procfs.task_status_path(task, !incl_threads);
        if !status.exists() {
            trace!("task {} vanished, skipping", task);
            return Ok(());
        }

        if use_taskset {
            self.apply_with_taskset(sudo, task, incl_threads)
        } else {
            self.apply_with_set_affinity(procfs, task, incl_threads)
        }
    }

    fn apply_with_taskset(self, sudo: &Sudo, task: i32, incl_threads: bool) -> Result<()> {
        let mut cmd = sudo.command(TASKSET)?;
        if incl_threads {
            cmd.arg("-a");
        }
        cmd.arg("-p")
            .arg(format!("{:#x}", self.effective_mask()))
            .arg(task.to_string())
            .stdout(sudo::output_stdio())
            .stderr(sudo::output_stdio());

        trace!("executing: {:?}", cmd);
        let status = cmd.status().map_err(|e| AffinityError::TaskAffinity {
            task,
            threads: incl_threads,
            reason: format!("cannot execute {TASKSET}: {e}"),
        })?;
        if !status.success() {
            return Err(AffinityError::TaskAffinity {
                task,
                threads: incl_threads,
                reason: format!("{TASKSET} {status}"),
            });
        }
        Ok(())
    }

    fn apply_with_set_affinity(self, procfs: &ProcFs, task: i32, incl_threads: bool) -> Result<()> {
        let task_list = if incl_threads {
            let threads = procfs.task_threads(task)?;
            if threads.is_empty() {
                return Err(AffinityError::NoThreads(task));
            }
            threads
        } else {
            vec![task]
        };

        let cpu_set = self.to_cpu_set()?;
        for tid in task_list {
            trace!("setting {} CPU mask: {}", tid, self);
            match sched_setaffinity(Pid::from_raw(tid), &cpu_set) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    return Err(AffinityError::TaskAffinity {
                        task,
                        threads: incl_threads,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}
