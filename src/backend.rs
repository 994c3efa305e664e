//! Operating-system operations used by the managers and the watchdog.

use crate::affinity::task::TASKSET;
use crate::affinity::CpuAffinity;
use crate::error::Result;
use crate::netdev::NetDevAffinity;
use crate::process::{ProcCpuAffinityMgr, ProcFilter, ProcFs};
use crate::sudo::Sudo;
use std::path::PathBuf;
use std::sync::Arc;

/// Process enumeration and affinity application.
pub trait AffinityBackend: Send + Sync {
    /// Pid of the process owning the managers.
    fn self_pid(&self) -> i32;

    fn proc_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32>;

    /// Threads of the current process.
    fn thread_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32>;

    fn apply_to_task(
        &self,
        affinity: CpuAffinity,
        task: i32,
        incl_threads: bool,
        use_taskset: bool,
    ) -> Result<()>;

    fn apply_to_netdev(&self, affinity: CpuAffinity, device: &str) -> Result<()>;

    /// Fails with a configuration error when `taskset` cannot be run with
    /// the configured privileges.
    fn check_task_helper(&self) -> Result<()>;

    /// Same check for the RPS helper.
    fn check_netdev_helper(&self) -> Result<()>;
}

/// Backend acting on the running Linux system.
#[derive(Debug)]
pub struct LinuxBackend {
    procs: ProcCpuAffinityMgr,
    sudo: Arc<Sudo>,
    netdev: NetDevAffinity,
}

impl LinuxBackend {
    pub fn new(sudo: Arc<Sudo>) -> Self {
        Self {
            procs: ProcCpuAffinityMgr::default(),
            netdev: NetDevAffinity::new(sudo.clone()),
            sudo,
        }
    }

    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_net_root: impl Into<PathBuf>, sudo: Arc<Sudo>) -> Self {
        Self {
            procs: ProcCpuAffinityMgr::new(ProcFs::with_root(proc_root, std::process::id() as i32)),
            netdev: NetDevAffinity::with_root(sys_net_root, sudo.clone()),
            sudo,
        }
    }

    pub fn procs(&self) -> &ProcCpuAffinityMgr {
        &self.procs
    }

    pub fn sudo(&self) -> &Arc<Sudo> {
        &self.sudo
    }
}

impl AffinityBackend for LinuxBackend {
    fn self_pid(&self) -> i32 {
        self.procs.procfs().self_pid()
    }

    fn proc_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
        self.procs.proc_list(filter, affinity)
    }

    fn thread_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
        self.procs.thread_list(filter, affinity)
    }

    fn apply_to_task(
        &self,
        affinity: CpuAffinity,
        task: i32,
        incl_threads: bool,
        use_taskset: bool,
    ) -> Result<()> {
        affinity.apply_to_task(self.procs.procfs(), &self.sudo, task, incl_threads, use_taskset)
    }

    fn apply_to_netdev(&self, affinity: CpuAffinity, device: &str) -> Result<()> {
        self.netdev.apply(affinity, device)
    }

    fn check_task_helper(&self) -> Result<()> {
        if self.sudo.is_enabled() {
            self.sudo.check_authorized(TASKSET)?;
        }
        Ok(())
    }

    fn check_netdev_helper(&self) -> Result<()> {
        self.netdev.check_helper()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend recording every call.

    use super::*;
    use crate::error::AffinityError;
    use crate::netdev::RPS_HELPER;
    use crate::sudo;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        ProcList(ProcFilter, CpuAffinity),
        ThreadList(ProcFilter, CpuAffinity),
        ApplyToTask {
            affinity: CpuAffinity,
            task: i32,
            incl_threads: bool,
            use_taskset: bool,
        },
        ApplyToNetDev {
            affinity: CpuAffinity,
            device: String,
        },
        CheckTaskHelper,
        CheckNetDevHelper,
    }

    type Hook = Box<dyn Fn(&Call) + Send + Sync>;

    /// Simulated host: processes and threads of this process with their
    /// current masks, updated by `apply_to_task`.
    pub struct RecordingBackend {
        self_pid: i32,
        procs: Mutex<Vec<(i32, CpuAffinity)>>,
        threads: Mutex<Vec<(i32, CpuAffinity)>>,
        calls: Mutex<Vec<Call>>,
        deny_sudo: AtomicBool,
        failing: Mutex<Vec<i32>>,
        hook: Mutex<Option<Hook>>,
    }

    impl RecordingBackend {
        pub fn new(self_pid: i32, procs: &[i32], threads: &[i32]) -> Self {
            let mut all = vec![self_pid];
            all.extend_from_slice(procs);
            Self {
                self_pid,
                procs: Mutex::new(all.into_iter().map(|p| (p, CpuAffinity::default())).collect()),
                threads: Mutex::new(threads.iter().map(|t| (*t, CpuAffinity::default())).collect()),
                calls: Mutex::new(Vec::new()),
                deny_sudo: AtomicBool::new(false),
                failing: Mutex::new(Vec::new()),
                hook: Mutex::new(None),
            }
        }

        pub fn deny_sudo(&self) {
            self.deny_sudo.store(true, Ordering::Relaxed);
        }

        /// Makes `apply_to_task` fail for `task`.
        pub fn fail_task(&self, task: i32) {
            self.failing.lock().unwrap().push(task);
        }

        pub fn clear_failures(&self) {
            self.failing.lock().unwrap().clear();
        }

        /// Runs `hook` on every recorded call.
        pub fn set_hook(&self, hook: impl Fn(&Call) + Send + Sync + 'static) {
            *self.hook.lock().unwrap() = Some(Box::new(hook));
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        pub fn applied(&self) -> Vec<(i32, CpuAffinity)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::ApplyToTask { affinity, task, .. } => Some((task, affinity)),
                    _ => None,
                })
                .collect()
        }

        pub fn proc_affinity(&self, pid: i32) -> Option<CpuAffinity> {
            find(&self.procs.lock().unwrap(), pid)
        }

        pub fn thread_affinity(&self, tid: i32) -> Option<CpuAffinity> {
            find(&self.threads.lock().unwrap(), tid)
        }

        pub fn set_thread_affinity(&self, tid: i32, affinity: CpuAffinity) {
            set(&mut self.threads.lock().unwrap(), tid, affinity);
        }

        fn check_sudo(&self, command: &str) -> Result<()> {
            if self.deny_sudo.load(Ordering::Relaxed) {
                let login = sudo::login_name();
                return Err(AffinityError::SudoNotAuthorized {
                    command: command.to_string(),
                    instructions: sudo::sudoers_instructions(&login, command),
                    login,
                });
            }
            Ok(())
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call.clone());
            if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                hook(&call);
            }
        }
    }

    fn find(list: &[(i32, CpuAffinity)], id: i32) -> Option<CpuAffinity> {
        list.iter().find(|(i, _)| *i == id).map(|(_, a)| *a)
    }

    fn set(list: &mut [(i32, CpuAffinity)], id: i32, affinity: CpuAffinity) {
        for (i, a) in list.iter_mut() {
            if *i == id {
                *a = affinity;
            }
        }
    }

    fn filtered(list: &[(i32, CpuAffinity)], filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
        list.iter()
            .filter(|(_, a)| {
                let matched = a.effective_mask() == affinity.effective_mask();
                match filter {
                    ProcFilter::All => true,
                    ProcFilter::MatchAffinity => matched,
                    ProcFilter::NoMatchAffinity => !matched,
                }
            })
            .map(|(id, _)| *id)
            .collect()
    }

    impl AffinityBackend for RecordingBackend {
        fn self_pid(&self) -> i32 {
            self.self_pid
        }

        fn proc_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
            self.record(Call::ProcList(filter, affinity));
            filtered(&self.procs.lock().unwrap(), filter, affinity)
        }

        fn thread_list(&self, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
            self.record(Call::ThreadList(filter, affinity));
            filtered(&self.threads.lock().unwrap(), filter, affinity)
        }

        fn apply_to_task(
            &self,
            affinity: CpuAffinity,
            task: i32,
            incl_threads: bool,
            use_taskset: bool,
        ) -> Result<()> {
            self.record(Call::ApplyToTask {
                affinity,
                task,
                incl_threads,
                use_taskset,
            });
            if self.failing.lock().unwrap().contains(&task) {
                return Err(AffinityError::TaskAffinity {
                    task,
                    threads: incl_threads,
                    reason: "operation not permitted".to_string(),
                });
            }
            if incl_threads {
                set(&mut self.procs.lock().unwrap(), task, affinity);
                if task == self.self_pid {
                    for (_, a) in self.threads.lock().unwrap().iter_mut() {
                        *a = affinity;
                    }
                }
            } else {
                set(&mut self.threads.lock().unwrap(), task, affinity);
            }
            Ok(())
        }

        fn apply_to_netdev(&self, affinity: CpuAffinity, device: &str) -> Result<()> {
            self.record(Call::ApplyToNetDev {
                affinity,
                device: device.to_string(),
            });
            Ok(())
        }

        fn check_task_helper(&self) -> Result<()> {
            self.record(Call::CheckTaskHelper);
            self.check_sudo(TASKSET)
        }

        fn check_netdev_helper(&self) -> Result<()> {
            self.record(Call::CheckNetDevHelper);
            self.check_sudo(RPS_HELPER)
        }
    }
}
