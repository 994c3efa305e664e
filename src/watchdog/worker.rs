//! Command loop run by the watchdog child.
//!
//! Whatever ends the loop (a `CleanUp` command, a closed pipe, a failed
//! command), every foreign process and network device the worker touched is
//! reset to the default affinity before it returns. `CleanUp` is
//! acknowledged only after that reset.

use super::protocol::{self, Cmd, Packet};
use crate::affinity::CpuAffinity;
use crate::backend::AffinityBackend;
use crate::error::{AffinityError, Result};
use crate::process::ProcFilter;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Affinity state of the foreign processes and devices, owned by the child.
pub struct ForeignAffinity<B: AffinityBackend + ?Sized> {
    backend: Arc<B>,
    ignore: Vec<i32>,
    other: CpuAffinity,
    /// False while `other` is only partially applied.
    other_done: bool,
    netdevs: BTreeSet<String>,
}

impl<B: AffinityBackend + ?Sized> ForeignAffinity<B> {
    /// `ignore` lists the parent and the watchdog itself.
    pub fn new(backend: Arc<B>, ignore: Vec<i32>) -> Self {
        Self {
            backend,
            ignore,
            other: CpuAffinity::default(),
            other_done: true,
            netdevs: BTreeSet::new(),
        }
    }

    pub fn other(&self) -> CpuAffinity {
        self.other
    }

    pub fn netdevs(&self) -> &BTreeSet<String> {
        &self.netdevs
    }

    /// Pins every other user-space process to `affinity`.
    pub fn set_other(&mut self, affinity: CpuAffinity) -> Result<()> {
        if affinity == self.other && self.other_done {
            trace!("other CPU affinity already {}", affinity);
            return Ok(());
        }
        self.apply_other(affinity)
    }

    fn apply_other(&mut self, affinity: CpuAffinity) -> Result<()> {
        self.other = affinity;
        self.other_done = false;

        let mut proc_list = self.backend.proc_list(ProcFilter::NoMatchAffinity, affinity);
        proc_list.retain(|pid| !self.ignore.contains(pid));
        if !proc_list.is_empty() {
            info!("setting CPU affinity for {:?} to {}", proc_list, affinity);
            for pid in &proc_list {
                self.backend.apply_to_task(affinity, *pid, true, true)?;
            }
            info!("done");
        }
        self.other_done = true;
        Ok(())
    }

    /// Sets the RPS mask of `names`; an empty list restores every managed
    /// device to the default affinity.
    pub fn set_netdev(&mut self, affinity: CpuAffinity, names: &[String]) -> Result<()> {
        let (affinity, names) = if names.is_empty() {
            (CpuAffinity::default(), self.netdevs.iter().cloned().collect())
        } else {
            (affinity, names.to_vec())
        };

        for name in names {
            info!("setting {} RPS CPU affinity to {}", name, affinity);
            self.backend.apply_to_netdev(affinity, &name)?;
            if affinity.is_default() {
                self.netdevs.remove(&name);
            } else {
                self.netdevs.insert(name);
            }
        }
        Ok(())
    }

    /// Returns everything to the default affinity, logging failures.
    pub fn clean_up(&mut self) {
        debug!("clean-up");
        // a failed command may have left some processes pinned
        if let Err(e) = self.apply_other(CpuAffinity::default()) {
            error!("error restoring other processes CPU affinity: {}", e);
        }
        if let Err(e) = self.set_netdev(CpuAffinity::default(), &[]) {
            error!("error restoring network devices CPU affinity: {}", e);
        }
    }
}

/// Child side of the watchdog pipes.
pub struct WatchdogWorker<B: AffinityBackend + ?Sized, R: Read, W: Write> {
    state: ForeignAffinity<B>,
    cmd_in: R,
    res_out: W,
}

impl<B: AffinityBackend + ?Sized, R: Read, W: Write> WatchdogWorker<B, R, W> {
    pub fn new(state: ForeignAffinity<B>, cmd_in: R, res_out: W) -> Self {
        Self {
            state,
            cmd_in,
            res_out,
        }
    }

    /// Serves commands until `CleanUp` or until the parent goes away.
    pub fn run(self) {
        let WatchdogWorker {
            state,
            mut cmd_in,
            mut res_out,
        } = self;

        let cleanup_req = {
            let mut state = scopeguard::guard(state, |mut state| state.clean_up());
            match command_loop(&mut *state, &mut cmd_in, &mut res_out) {
                Ok(cleanup_req) => cleanup_req,
                Err(e) => {
                    error!("watchdog parent and/or child killed: {}", e);
                    false
                }
            }
        };

        if cleanup_req {
            if let Err(e) = protocol::write_ack(&mut res_out) {
                error!("cannot acknowledge clean-up: {}", e);
            }
        }
    }
}

/// Returns true when the loop ended on a `CleanUp` request.
fn command_loop<B: AffinityBackend + ?Sized>(
    state: &mut ForeignAffinity<B>,
    cmd_in: &mut impl Read,
    res_out: &mut impl Write,
) -> Result<bool> {
    let first = Packet::read_from(cmd_in)?;
    if first.cmd != Cmd::Init {
        return Err(AffinityError::InvalidCommand(first.cmd as u8));
    }
    protocol::write_ack(res_out)?;

    loop {
        let packet = Packet::read_from(cmd_in)?;
        trace!("watchdog cmd {:?} arg={:#x} str_arg={:?}", packet.cmd, packet.arg, packet.str_arg);
        match packet.cmd {
            Cmd::SetProcAffinity => state.set_other(CpuAffinity::new(packet.arg))?,
            Cmd::SetNetDevAffinity => {
                let names: Vec<String> = packet
                    .str_arg
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect();
                state.set_netdev(CpuAffinity::new(packet.arg), &names)?
            }
            Cmd::CleanUp => return Ok(true),
            Cmd::Init | Cmd::Ok => return Err(AffinityError::InvalidCommand(packet.cmd as u8)),
        }
        protocol::write_ack(res_out)?;
    }
}
