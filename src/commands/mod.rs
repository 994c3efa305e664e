//! CLI command implementations for acq-affinity.
//!
//! This module provides implementations for all CLI subcommands:
//! - `show`: CPU, NUMA and process affinity listing
//! - `run`: apply the configured affinity until interrupted
//! - `simulate`: synthetic acquisition through the state machine
//! - `check_sudo`: sudo authorization of the helpers
//! - `install`: RPS helper installation
//! - `config`: Configuration file generation

pub mod check_sudo;
pub mod config;
pub mod install;
pub mod run;
pub mod show;
pub mod simulate;

// Re-export command functions
pub use check_sudo::command_check_sudo;
pub use config::command_config;
pub use install::command_install_helper;
pub use run::command_run;
pub use show::command_show;
pub use simulate::command_simulate;

use acq_affinity::{
    Config, GlobalCpuAffinityMgr, LinuxBackend, RecvAffinityControl, RecvCpuAffinity, Sudo,
};
use std::sync::Arc;
use tracing::info;

/// Receiver threads belong to the acquisition software; the standalone tool
/// only reports the requested masks.
struct ReportedRecv;

impl RecvAffinityControl for ReportedRecv {
    fn set_recv_cpu_affinity(&self, recv: &RecvCpuAffinity) -> acq_affinity::Result<()> {
        info!("receiver threads CPU affinity: {}", recv);
        Ok(())
    }
}

/// Global manager acting on the configured system roots.
fn build_manager(config: &Config) -> Arc<GlobalCpuAffinityMgr<LinuxBackend>> {
    let sudo = Arc::new(Sudo::new());
    sudo.set_enabled(config.use_sudo);
    let backend = Arc::new(LinuxBackend::with_roots(
        config.proc_root.clone(),
        config.sys_net_root.clone(),
        sudo,
    ));
    GlobalCpuAffinityMgr::new(backend, Arc::new(ReportedRecv), config.manager_config())
}
