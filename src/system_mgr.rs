//! Affinity of everything outside the acquisition process.
//!
//! Foreign processes and network devices are only touched through the
//! watchdog child, started on the first non-default request and stopped
//! once both return to the default affinity. The manager keeps a shadow of
//! the last acknowledged requests so unchanged requests never reach the
//! watchdog.

use crate::affinity::{CpuAffinity, NetDevGroupCpuAffinity};
use crate::backend::AffinityBackend;
use crate::error::Result;
use crate::watchdog::Watchdog;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct SystemCpuAffinityMgr<B: AffinityBackend + ?Sized> {
    backend: Arc<B>,
    watchdog: Option<Watchdog>,
    other: CpuAffinity,
    netdevs: BTreeMap<String, CpuAffinity>,
}

impl<B: AffinityBackend + ?Sized> SystemCpuAffinityMgr<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            watchdog: None,
            other: CpuAffinity::default(),
            netdevs: BTreeMap::new(),
        }
    }

    /// Last acknowledged mask of the other processes.
    pub fn other(&self) -> CpuAffinity {
        self.other
    }

    /// Devices currently holding a non-default RPS mask.
    pub fn netdevs(&self) -> &BTreeMap<String, CpuAffinity> {
        &self.netdevs
    }

    /// Pid of the running watchdog child, if any.
    pub fn watchdog_pid(&mut self) -> Option<i32> {
        self.reap_watchdog();
        self.watchdog.as_ref().map(Watchdog::child_pid)
    }

    /// Forgets a watchdog child that exited. It restored the default
    /// affinity of everything before leaving, so the shadow goes back to
    /// default as well.
    fn reap_watchdog(&mut self) {
        if self.watchdog.as_mut().is_some_and(|w| w.child_ended()) {
            if let Some(watchdog) = self.watchdog.take() {
                warn!("watchdog process {} exited", watchdog.child_pid());
            }
            self.reset_shadow();
        }
    }

    fn reset_shadow(&mut self) {
        self.other = CpuAffinity::default();
        self.netdevs.clear();
    }

    /// Runs `f` on the watchdog, starting it if needed. A failed exchange
    /// leaves the child exiting through its clean-up, so it is dropped.
    fn with_watchdog(&mut self, f: impl FnOnce(&mut Watchdog) -> Result<()>) -> Result<()> {
        let watchdog = match self.watchdog.take() {
            Some(watchdog) => watchdog,
            None => {
                let watchdog = Watchdog::spawn(&self.backend)?;
                info!("started watchdog process {}", watchdog.child_pid());
                watchdog
            }
        };
        let result = f(self.watchdog.insert(watchdog));
        if let Err(e) = &result {
            if !e.is_config_error() {
                error!("watchdog command failed: {}", e);
                self.watchdog = None;
                self.reset_shadow();
            }
        }
        result
    }

    /// Pins every process except this one and the watchdog to `affinity`.
    pub fn set_other_affinity(&mut self, affinity: CpuAffinity) -> Result<()> {
        self.reap_watchdog();
        if affinity == self.other {
            return Ok(());
        }
        if affinity.is_default() && self.watchdog.is_none() {
            self.other = affinity;
            return Ok(());
        }
        if !affinity.is_default() {
            self.backend.check_task_helper()?;
        }

        self.with_watchdog(|w| w.set_other_affinity(affinity))?;
        self.other = affinity;
        self.check_teardown();
        Ok(())
    }

    /// Applies the RPS masks of `groups`. Devices managed before but not
    /// listed any more go back to the default mask.
    pub fn set_netdev_affinity(&mut self, groups: &[NetDevGroupCpuAffinity]) -> Result<()> {
        self.reap_watchdog();

        let mut desired: BTreeMap<&str, CpuAffinity> = BTreeMap::new();
        for group in groups {
            for name in &group.name_list {
                desired.insert(name.as_str(), group.processing);
            }
        }

        let restore: Vec<String> = self
            .netdevs
            .keys()
            .filter(|name| desired.get(name.as_str()).map_or(true, |a| a.is_default()))
            .cloned()
            .collect();

        let mut changes: BTreeMap<CpuAffinity, Vec<String>> = BTreeMap::new();
        for (name, affinity) in &desired {
            if !affinity.is_default() && self.netdevs.get(*name) != Some(affinity) {
                changes.entry(*affinity).or_default().push(name.to_string());
            }
        }

        if restore.is_empty() && changes.is_empty() {
            debug!("network device affinity unchanged");
            return Ok(());
        }
        if !changes.is_empty() {
            self.backend.check_netdev_helper()?;
        }

        if !restore.is_empty() {
            let names = if desired.is_empty() { Vec::new() } else { restore.clone() };
            self.with_watchdog(|w| w.set_netdev_affinity(CpuAffinity::default(), &names))?;
            for name in &restore {
                self.netdevs.remove(name);
            }
        }

        for (affinity, names) in changes {
            self.with_watchdog(|w| w.set_netdev_affinity(affinity, &names))?;
            for name in names {
                self.netdevs.insert(name, affinity);
            }
        }

        self.check_teardown();
        Ok(())
    }

    fn check_teardown(&mut self) {
        if self.other.is_default() && self.netdevs.is_empty() {
            if let Some(watchdog) = self.watchdog.take() {
                debug!("stopping watchdog process {}", watchdog.child_pid());
            }
        }
    }
}
