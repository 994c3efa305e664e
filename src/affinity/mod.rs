//! CPU affinity values and the ways to apply them.
//!
//! A [`CpuAffinity`] is an immutable bitmask of CPU indices. The empty mask
//! is the *default* affinity: no restriction applied, or a restriction that
//! has been lifted. When a default affinity is applied to a task it becomes
//! "all online CPUs".
//!
//! - `cpus`: CPU counting and CPU-list parsing
//! - `numa`: CPU mask to NUMA node mask translation
//! - `task`: applying a mask to a task (direct syscall or `taskset`)
//! - `groups`: receiver, network-device and global affinity groupings

pub mod cpus;
pub mod groups;
pub mod numa;
pub mod task;

use crate::error::{AffinityError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

pub use groups::{
    GlobalCpuAffinity, NetDevGroupCpuAffinity, PixelDepthCpuAffinityMap, RecvCpuAffinity,
};
pub use numa::NumaTopology;

/// Set of CPUs a task may run on, compared by raw mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AffinitySpec", into = "String")]
pub struct CpuAffinity(u64);

impl CpuAffinity {
    pub const fn new(mask: u64) -> Self {
        Self(mask)
    }

    /// Builds a mask from CPU indices.
    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut mask = 0u64;
        for cpu in cpus {
            if cpu >= cpus::MAX_MASK_CPUS {
                return Err(AffinityError::InvalidAffinity(format!(
                    "CPU {cpu} exceeds the {} CPU mask width",
                    cpus::MAX_MASK_CPUS
                )));
            }
            mask |= 1 << cpu;
        }
        Ok(Self(mask))
    }

    /// Raw mask; zero for the default affinity.
    pub const fn mask(self) -> u64 {
        self.0
    }

    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: CpuAffinity) -> CpuAffinity {
        CpuAffinity(self.0 | other.0)
    }

    /// Mask actually handed to the OS: the default affinity means every
    /// online CPU.
    pub fn effective_mask(self) -> u64 {
        if self.is_default() {
            cpus::all_cpus_mask()
        } else {
            self.0
        }
    }

    /// Number of CPUs the affinity allows.
    pub fn nb_cpus(self) -> usize {
        self.effective_mask().count_ones() as usize
    }

    pub fn contains(self, cpu: usize) -> bool {
        cpu < cpus::MAX_MASK_CPUS && (self.effective_mask() >> cpu) & 1 == 1
    }

    /// CPU indices the affinity allows, ascending.
    pub fn cpus(self) -> Vec<usize> {
        let mask = self.effective_mask();
        (0..cpus::MAX_MASK_CPUS)
            .filter(|cpu| (mask >> cpu) & 1 == 1)
            .collect()
    }
}

impl BitOr for CpuAffinity {
    type Output = CpuAffinity;

    fn bitor(self, rhs: CpuAffinity) -> CpuAffinity {
        self.union(rhs)
    }
}

impl From<u64> for CpuAffinity {
    fn from(mask: u64) -> Self {
        Self(mask)
    }
}

impl From<CpuAffinity> for u64 {
    fn from(affinity: CpuAffinity) -> Self {
        affinity.0
    }
}

impl fmt::Display for CpuAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for CpuAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Accepts `"default"` (or empty), a hex mask (`"0x0f"`) or a CPU list
/// (`"0-3,6"`). A bare decimal number is a single-CPU list.
impl FromStr for CpuAffinity {
    type Err = AffinityError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            return Ok(CpuAffinity::default());
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .map(CpuAffinity)
                .map_err(|_| AffinityError::InvalidAffinity(format!("invalid hex mask: {s}")));
        }
        CpuAffinity::from_cpus(cpus::parse_cpu_list(s)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AffinitySpec {
    Mask(u64),
    Text(String),
}

impl TryFrom<AffinitySpec> for CpuAffinity {
    type Error = AffinityError;

    fn try_from(spec: AffinitySpec) -> Result<Self> {
        match spec {
            AffinitySpec::Mask(mask) => Ok(CpuAffinity(mask)),
            AffinitySpec::Text(text) => text.parse(),
        }
    }
}

impl From<CpuAffinity> for String {
    fn from(affinity: CpuAffinity) -> Self {
        affinity.to_string()
    }
}
