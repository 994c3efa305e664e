//! Acquisition-driven affinity orchestration.
//!
//! During an acquisition the process (the "lima" mask) and the receiver
//! threads run on dedicated CPUs. When the receivers are done, the process
//! threads that ran on the lima CPUs are allowed onto the receiver CPUs for
//! post-processing; once processing finishes they are pinned back.
//!
//! ```text
//! Ready --start_acq--> Acquiring --recv_finished--> [Changing] --> Processing
//!   ^                      |                                          |
//!   +----lima_finished-----+------------- lima_finished --- [Restoring]
//! ```
//!
//! `system` serializes affinity changes and is held across the pinning
//! calls; it is never taken while `state` is held. `applied` and `lima_tids`
//! are only held to copy or update values.

use crate::affinity::{cpus, CpuAffinity, GlobalCpuAffinity, RecvCpuAffinity};
use crate::backend::AffinityBackend;
use crate::error::{AffinityError, Result};
use crate::process::ProcFilter;
use crate::processing::{
    ProcessingFinishedEvent, ProcessingFinishedListener, DEFAULT_MIN_UPDATE_INTERVAL,
};
use crate::system_mgr::SystemCpuAffinityMgr;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    Ready,
    Acquiring,
    Changing,
    Processing,
    Restoring,
}

impl fmt::Display for AcqState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcqState::Ready => "Ready",
            AcqState::Acquiring => "Acquiring",
            AcqState::Changing => "Changing",
            AcqState::Processing => "Processing",
            AcqState::Restoring => "Restoring",
        };
        f.write_str(name)
    }
}

/// Applies receiver thread masks; implemented by the receiver side.
pub trait RecvAffinityControl: Send + Sync {
    fn set_recv_cpu_affinity(&self, recv: &RecvCpuAffinity) -> Result<()>;
}

/// Timing parameters of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Silence of the status callbacks after which processing is declared
    /// finished.
    pub lima_finished_timeout: Duration,
    pub wait_poll_interval: Duration,
    pub min_update_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lima_finished_timeout: Duration::from_secs(3),
            wait_poll_interval: Duration::from_secs(1),
            min_update_interval: DEFAULT_MIN_UPDATE_INTERVAL,
        }
    }
}

#[derive(Default)]
struct Applied {
    curr: GlobalCpuAffinity,
    set: GlobalCpuAffinity,
}

/// Top-level affinity manager of an acquisition process.
pub struct GlobalCpuAffinityMgr<B: AffinityBackend + 'static> {
    backend: Arc<B>,
    recv: Arc<dyn RecvAffinityControl>,
    config: ManagerConfig,
    state: Mutex<AcqState>,
    cond: Condvar,
    system: Mutex<SystemCpuAffinityMgr<B>>,
    applied: Mutex<Applied>,
    lima_tids: Mutex<Vec<i32>>,
    proc_finished: ProcessingFinishedEvent,
}

impl<B: AffinityBackend + 'static> GlobalCpuAffinityMgr<B> {
    pub fn new(
        backend: Arc<B>,
        recv: Arc<dyn RecvAffinityControl>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let listener: Weak<dyn ProcessingFinishedListener> = weak.clone();
            Self {
                system: Mutex::new(SystemCpuAffinityMgr::new(backend.clone())),
                applied: Mutex::new(Applied::default()),
                lima_tids: Mutex::new(Vec::new()),
                backend,
                recv,
                config,
                state: Mutex::new(AcqState::Ready),
                cond: Condvar::new(),
                proc_finished: ProcessingFinishedEvent::new(listener, config.min_update_interval),
            }
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, AcqState> {
        self.state.lock().expect("state lock poisoned")
    }

    fn lock_system(&self) -> MutexGuard<'_, SystemCpuAffinityMgr<B>> {
        self.system.lock().expect("system affinity lock poisoned")
    }

    fn lock_applied(&self) -> MutexGuard<'_, Applied> {
        self.applied.lock().expect("applied affinity lock poisoned")
    }

    fn lock_lima_tids(&self) -> MutexGuard<'_, Vec<i32>> {
        self.lima_tids.lock().expect("lima TIDs lock poisoned")
    }

    pub fn state(&self) -> AcqState {
        *self.lock_state()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Event to be fed by the image pipeline status callback.
    pub fn processing_finished_event(&self) -> &ProcessingFinishedEvent {
        &self.proc_finished
    }

    /// Affinities currently in force.
    pub fn current(&self) -> GlobalCpuAffinity {
        self.lock_applied().curr.clone()
    }

    /// Affinities requested by the last `apply_and_set`.
    pub fn configured(&self) -> GlobalCpuAffinity {
        self.lock_applied().set.clone()
    }

    /// Threads allowed onto the receiver CPUs during the last processing.
    pub fn lima_tids(&self) -> Vec<i32> {
        self.lock_lima_tids().clone()
    }

    pub fn watchdog_pid(&self) -> Option<i32> {
        self.lock_system().watchdog_pid()
    }

    /// Callers hold the `system` lock.
    fn set_lima_affinity(&self, lima: CpuAffinity) -> Result<()> {
        let curr = self.lock_applied().curr.lima;
        if lima == curr {
            return Ok(());
        }

        let lima_tids = self.lima_tids();
        if !lima_tids.is_empty() {
            // taskset cannot target single threads
            for tid in &lima_tids {
                self.backend.apply_to_task(lima, *tid, false, false)?;
            }
        } else {
            self.backend.apply_to_task(lima, self.backend.self_pid(), true, true)?;
            // receiver threads are part of the process
            self.lock_applied().curr.recv = RecvCpuAffinity::from(lima);
        }
        self.lock_applied().curr.lima = lima;
        Ok(())
    }

    /// Callers hold the `system` lock.
    fn set_recv_affinity(&self, recv: &RecvCpuAffinity) -> Result<()> {
        let curr = self.lock_applied().curr.recv.clone();
        if *recv == curr {
            return Ok(());
        }
        self.recv.set_recv_cpu_affinity(recv)?;
        self.lock_applied().curr.recv = recv.clone();
        Ok(())
    }

    /// Applies and records the dedicated affinities.
    pub fn apply_and_set(&self, o: &GlobalCpuAffinity) -> Result<()> {
        info!("applying CPU affinity {}", o);
        let nb_cpus = cpus::nb_cpus();
        if o.check_hyperthreading(nb_cpus) {
            warn!(
                "CPU affinity {} uses exactly half of the {} CPUs: hyper-threading misconfiguration?",
                o.all(),
                nb_cpus
            );
        }

        let mut system = self.lock_system();
        self.set_lima_affinity(o.lima)?;
        self.set_recv_affinity(&o.recv)?;

        system.set_other_affinity(o.other)?;
        self.lock_applied().curr.other = o.other;
        system.set_netdev_affinity(&o.netdev)?;

        let mut applied = self.lock_applied();
        applied.curr.netdev = o.netdev.clone();
        applied.set = o.clone();
        Ok(())
    }

    /// Freshly started receiver threads inherit the process mask.
    pub fn update_recv_restart(&self) {
        let mut applied = self.lock_applied();
        applied.curr.recv = RecvCpuAffinity::from(applied.curr.lima);
        debug!("receiver threads restarted with {}", applied.curr.lima);
    }

    pub fn prepare_acq(&self) -> Result<()> {
        let state = self.lock_state();
        if *state != AcqState::Ready {
            return Err(AffinityError::InvalidState(format!(
                "affinity manager is not Ready ({}): processing of the previous acquisition not finished",
                *state
            )));
        }
        self.proc_finished.prepare_acq();
        self.lock_lima_tids().clear();
        Ok(())
    }

    pub fn start_acq(&self) {
        *self.lock_state() = AcqState::Acquiring;
    }

    pub fn stop_acq(&self) {
        self.proc_finished.stop_acq();
    }

    /// Receivers are done: let the process threads use the receiver CPUs.
    pub fn recv_finished(&self) -> Result<()> {
        let mut state = self.lock_state();
        if !self.proc_finished.is_registered() {
            *state = AcqState::Ready;
        }
        if *state == AcqState::Ready {
            return Ok(());
        }

        let (lima, recv) = {
            let applied = self.lock_applied();
            (applied.curr.lima, applied.curr.recv.all())
        };

        let mut result = Ok(());
        if lima != recv {
            *state = AcqState::Changing;
            drop(state);
            result = self.share_recv_cpus(lima);
            state = self.lock_state();
        }

        *state = AcqState::Processing;
        self.cond.notify_all();
        result
    }

    fn share_recv_cpus(&self, lima: CpuAffinity) -> Result<()> {
        let _system = self.lock_system();
        let lima_tids = self.backend.thread_list(ProcFilter::MatchAffinity, lima);
        info!("lima TIDs: {:?}", lima_tids);
        *self.lock_lima_tids() = lima_tids;

        let lima_affinity = {
            let applied = self.lock_applied();
            applied.curr.lima | applied.curr.recv.all()
        };
        info!("allowing lima to run on recv CPUs: {}", lima_affinity);
        self.set_lima_affinity(lima_affinity)
    }

    /// Processing is done: pin the process back to its dedicated CPUs.
    pub fn lima_finished(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state == AcqState::Acquiring {
            *state = AcqState::Ready;
        }
        while !matches!(*state, AcqState::Processing | AcqState::Ready) {
            state = self.cond.wait(state).expect("state lock poisoned");
        }
        if *state == AcqState::Ready {
            self.cond.notify_all();
            return Ok(());
        }

        let mut result = Ok(());
        let restore = {
            let applied = self.lock_applied();
            applied.curr.lima != applied.set.lima
        };
        if restore {
            *state = AcqState::Restoring;
            drop(state);
            result = self.restore_dedicated();
            state = self.lock_state();
        }

        *state = AcqState::Ready;
        self.cond.notify_all();
        result
    }

    fn restore_dedicated(&self) -> Result<()> {
        let _system = self.lock_system();
        let set = self.lock_applied().set.clone();
        info!("restoring lima to dedicated CPUs: {}", set.lima);
        self.set_lima_affinity(set.lima)?;
        self.set_recv_affinity(&set.recv)
    }

    /// Blocks until the state machine is back to Ready. Without status
    /// callbacks for `lima_finished_timeout`, processing is declared
    /// finished here.
    pub fn wait_lima_finished(&self) -> Result<()> {
        if !self.proc_finished.is_registered() {
            return Ok(());
        }
        self.proc_finished.update_last_callback_timestamp();

        let mut state = self.lock_state();
        while *state != AcqState::Ready {
            let (guard, timeout) = self
                .cond
                .wait_timeout(state, self.config.wait_poll_interval)
                .expect("state lock poisoned");
            state = guard;
            if !timeout.timed_out() {
                continue;
            }

            drop(state);
            let elapsed = self.proc_finished.last_callback_timestamp().elapsed();
            if elapsed >= self.config.lima_finished_timeout {
                error!("no image status callback in {:.3} s", elapsed.as_secs_f64());
                self.lima_finished()?;
            }
            state = self.lock_state();
        }
        Ok(())
    }
}

impl<B: AffinityBackend + 'static> ProcessingFinishedListener for GlobalCpuAffinityMgr<B> {
    fn lima_finished(&self) -> Result<()> {
        GlobalCpuAffinityMgr::lima_finished(self)
    }
}

impl<B: AffinityBackend + 'static> Drop for GlobalCpuAffinityMgr<B> {
    fn drop(&mut self) {
        if self.applied.is_poisoned() || self.lima_tids.is_poisoned() {
            error!("affinity lock poisoned, lima CPU affinity not restored");
            return;
        }
        if let Err(e) = self.set_lima_affinity(CpuAffinity::default()) {
            error!("error restoring lima CPU affinity: {}", e);
        }
    }
}
