//! Receive Packet Steering (RPS) CPU masks for network devices.
//!
//! The mask is written to `/sys/class/net/<dev>/queues/rx-<n>/rps_cpus`.
//! Unprivileged processes usually cannot write there, so after the first
//! failed write every queue goes through the `netdev_set_queue_rps_cpus`
//! helper run via sudo. Failed strategies are remembered per instance.

use crate::affinity::CpuAffinity;
use crate::error::{AffinityError, Result};
use crate::sudo::{self, Sudo};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub const SYS_NET_ROOT: &str = "/sys/class/net";
pub const RPS_HELPER: &str = "netdev_set_queue_rps_cpus";

static RX_QUEUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^rx-(\d+)$").expect("valid rx queue regex"));
static DEVICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("valid device regex"));

/// RPS mask setter for network devices.
#[derive(Debug)]
pub struct NetDevAffinity {
    root: PathBuf,
    sudo: Arc<Sudo>,
    helper: String,
    direct_failed: AtomicBool,
    helper_failed: AtomicBool,
}

impl NetDevAffinity {
    pub fn new(sudo: Arc<Sudo>) -> Self {
        Self::with_root(SYS_NET_ROOT, sudo)
    }

    pub fn with_root(root: impl Into<PathBuf>, sudo: Arc<Sudo>) -> Self {
        Self {
            root: root.into(),
            sudo,
            helper: RPS_HELPER.to_string(),
            direct_failed: AtomicBool::new(false),
            helper_failed: AtomicBool::new(false),
        }
    }

    /// Uses another helper program, looked up in `PATH` unless absolute.
    pub fn with_helper(mut self, helper: impl Into<String>) -> Self {
        self.helper = helper.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Receive queues of `device`, in queue index order.
    pub fn queue_list(&self, device: &str) -> Result<Vec<String>> {
        let queues_dir = self.root.join(device).join("queues");
        let entries = fs::read_dir(&queues_dir).map_err(|e| AffinityError::NetDev {
            device: device.to_string(),
            queue: "queues".to_string(),
            reason: e.to_string(),
        })?;

        let mut queues: Vec<(u32, String)> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| {
                let idx = RX_QUEUE_RE
                    .captures(&name)
                    .and_then(|c| c[1].parse::<u32>().ok())?;
                Some((idx, name))
            })
            .collect();
        queues.sort();
        Ok(queues.into_iter().map(|(_, name)| name).collect())
    }

    /// Sets the RPS mask of every receive queue of `device`. The raw mask is
    /// written: the default affinity disables RPS.
    pub fn apply(&self, affinity: CpuAffinity, device: &str) -> Result<()> {
        let queues = self.queue_list(device)?;
        debug!("{} rx queues: {:?}", device, queues);

        if !self.direct_failed.load(Ordering::Relaxed) {
            match self.write_queues(affinity, device, &queues) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("direct RPS write failed, using {}: {}", self.helper, e);
                    self.direct_failed.store(true, Ordering::Relaxed);
                }
            }
        }

        if self.helper_failed.load(Ordering::Relaxed) {
            return Err(AffinityError::NetDev {
                device: device.to_string(),
                queue: queues.join(","),
                reason: format!("direct write and {} both failed before", self.helper),
            });
        }

        for queue in &queues {
            if let Err(e) = self.run_helper(affinity, device, queue) {
                self.helper_failed.store(true, Ordering::Relaxed);
                return Err(e);
            }
        }
        info!("{} RPS CPU mask set to {} via {}", device, affinity, self.helper);
        Ok(())
    }

    fn write_queues(&self, affinity: CpuAffinity, device: &str, queues: &[String]) -> Result<()> {
        for queue in queues {
            let path = rps_cpus_path(&self.root, device, queue);
            trace!("writing {:x} to {}", affinity, path.display());
            fs::write(&path, format!("{:x}", affinity)).map_err(|e| AffinityError::NetDev {
                device: device.to_string(),
                queue: queue.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn run_helper(&self, affinity: CpuAffinity, device: &str, queue: &str) -> Result<()> {
        let helper = sudo::command_path(&self.helper);
        let mut cmd = self.sudo.command(&helper)?;
        cmd.arg(device)
            .arg(queue)
            .arg(format!("{:x}", affinity))
            .stdout(sudo::output_stdio())
            .stderr(sudo::output_stdio());
        trace!("executing: {:?}", cmd);

        let command = format!("{} {} {} {:x}", helper, device, queue, affinity);
        let status = cmd.status().map_err(|e| AffinityError::HelperFailed {
            command: command.clone(),
            status: e.to_string(),
        })?;
        if !status.success() {
            return Err(AffinityError::HelperFailed {
                command,
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Checks in advance that the helper can be run through sudo.
    pub fn check_helper(&self) -> Result<()> {
        if self.sudo.is_enabled() {
            self.sudo.check_authorized(&sudo::command_path(&self.helper))?;
        }
        Ok(())
    }
}

fn rps_cpus_path(root: &Path, device: &str, queue: &str) -> PathBuf {
    root.join(device).join("queues").join(queue).join("rps_cpus")
}

/// Logic of the `netdev_set_queue_rps_cpus` helper binary.
pub mod helper {
    use super::*;

    pub const USAGE: &str = "usage: netdev_set_queue_rps_cpus <dev> <queue> <hexmask>";

    pub const EXIT_OK: i32 = 0;
    pub const EXIT_USAGE: i32 = 1;
    pub const EXIT_WRITE: i32 = 2;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HelperArgs {
        pub device: String,
        pub queue: String,
        pub mask: u64,
    }

    /// Validates `<dev> <queue> <hexmask>` (program name excluded).
    pub fn parse_args(args: &[String]) -> std::result::Result<HelperArgs, String> {
        let [device, queue, mask] = args else {
            return Err(USAGE.to_string());
        };
        if !DEVICE_RE.is_match(device) || device == "." || device == ".." {
            return Err(format!("invalid network device name: {device}"));
        }
        if !RX_QUEUE_RE.is_match(queue) {
            return Err(format!("invalid rx queue name: {queue}"));
        }
        let hex = mask
            .strip_prefix("0x")
            .or_else(|| mask.strip_prefix("0X"))
            .unwrap_or(mask);
        let mask = u64::from_str_radix(hex, 16).map_err(|_| format!("invalid hex mask: {mask}"))?;
        Ok(HelperArgs {
            device: device.clone(),
            queue: queue.clone(),
            mask,
        })
    }

    pub fn write_rps_cpus(root: &Path, args: &HelperArgs) -> std::io::Result<()> {
        let path = rps_cpus_path(root, &args.device, &args.queue);
        fs::write(path, format!("{:x}", args.mask))
    }

    /// Runs the helper and returns its exit code.
    pub fn run(root: &Path, args: &[String]) -> i32 {
        let args = match parse_args(args) {
            Ok(args) => args,
            Err(e) => {
                tracing::error!("{}", e);
                return EXIT_USAGE;
            }
        };
        match write_rps_cpus(root, &args) {
            Ok(()) => EXIT_OK,
            Err(e) => {
                tracing::error!("error writing {} {} rps_cpus: {}", args.device, args.queue, e);
                EXIT_WRITE
            }
        }
    }
}
