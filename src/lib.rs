//! CPU and network-interrupt affinity management for real-time acquisition.
//!
//! This library pins the acquisition process, its receiver threads, every
//! other user-space process and the network receive-queue steering (RPS) of
//! selected devices to dedicated CPU sets, and moves the acquisition process
//! between its dedicated and shared CPUs as an acquisition progresses.
//!
//! # Usage
//!
//! ```rust,no_run
//! use acq_affinity::{
//!     CpuAffinity, GlobalCpuAffinity, GlobalCpuAffinityMgr, LinuxBackend, ManagerConfig,
//!     RecvAffinityControl, RecvCpuAffinity, Sudo,
//! };
//! use std::sync::Arc;
//!
//! struct Receivers;
//!
//! impl RecvAffinityControl for Receivers {
//!     fn set_recv_cpu_affinity(&self, _recv: &RecvCpuAffinity) -> acq_affinity::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let backend = Arc::new(LinuxBackend::new(Arc::new(Sudo::new())));
//! let mgr = GlobalCpuAffinityMgr::new(backend, Arc::new(Receivers), ManagerConfig::default());
//! let global = GlobalCpuAffinity {
//!     lima: "0-3".parse::<CpuAffinity>()?,
//!     ..Default::default()
//! };
//! mgr.apply_and_set(&global)?;
//! # Ok::<(), acq_affinity::AffinityError>(())
//! ```
//!
//! # Modules
//!
//! - `affinity`: the CPU mask value, grouped configurations, task pinning
//! - `netdev`: receive-queue steering
//! - `process`: `/proc` scanning
//! - `watchdog`: the forked child restoring foreign affinities
//! - `system_mgr`, `global_mgr`: the managers
//! - `processing`, `frame_map`: acquisition progress tracking

pub mod affinity;
pub mod backend;
pub mod config;
pub mod error;
pub mod frame_map;
pub mod global_mgr;
pub mod netdev;
pub mod process;
pub mod processing;
pub mod sudo;
pub mod system_mgr;
pub mod watchdog;

// Re-export main types for convenience
pub use affinity::{
    CpuAffinity, GlobalCpuAffinity, NetDevGroupCpuAffinity, NumaTopology,
    PixelDepthCpuAffinityMap, RecvCpuAffinity,
};
pub use backend::{AffinityBackend, LinuxBackend};
pub use config::Config;
pub use error::{AffinityError, Result};
pub use frame_map::{FrameFinishedCallback, FrameMap};
pub use global_mgr::{AcqState, GlobalCpuAffinityMgr, ManagerConfig, RecvAffinityControl};
pub use netdev::NetDevAffinity;
pub use process::{ProcCpuAffinityMgr, ProcFilter, ProcFs, ProcScope};
pub use processing::{
    AcqControl, ImageStatus, ProcessingFinishedEvent, ProcessingFinishedListener, SavingMode,
};
pub use sudo::Sudo;
pub use system_mgr::SystemCpuAffinityMgr;
pub use watchdog::Watchdog;
