//! Process and thread discovery from the /proc filesystem.
//!
//! A process counts as a real user-space process when its `status` entry
//! carries a `VmSize` line; kernel threads have none. The current CPU mask
//! comes from the `Cpus_allowed` line.

use crate::affinity::CpuAffinity;
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROC_ROOT: &str = "/proc";

static CPUS_ALLOWED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Cpus_allowed:\s*([0-9a-fA-F,]+)\s*$").expect("valid regex"));

/// Which processes a listing keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcFilter {
    All,
    MatchAffinity,
    NoMatchAffinity,
}

/// Whether to list system processes or the threads of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcScope {
    System,
    ThisProc,
}

/// Fields of a `status` entry relevant to affinity management.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStatus {
    pub has_vm: bool,
    pub cpus_allowed: Option<CpuAffinity>,
}

/// Parses the content of `/proc/<pid>/status`. Masks wider than 64 CPUs
/// keep their low 64 bits.
pub fn parse_status(content: &str) -> TaskStatus {
    let has_vm = content.lines().any(|l| l.starts_with("VmSize:"));
    let cpus_allowed = CPUS_ALLOWED_RE.captures(content).and_then(|c| {
        let hex: String = c[1].chars().filter(|ch| *ch != ',').collect();
        let low = &hex[hex.len().saturating_sub(16)..];
        u64::from_str_radix(low, 16).ok().map(CpuAffinity::new)
    });
    TaskStatus {
        has_vm,
        cpus_allowed,
    }
}

/// Numeric entries of a directory, ascending.
pub fn numeric_entries(dir: &Path) -> Vec<i32> {
    let mut out: Vec<i32> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect(),
        Err(_) => Vec::new(),
    };
    out.sort_unstable();
    out
}

/// View of a /proc tree, rooted at `/proc` unless built for a test tree.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    self_pid: i32,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT, std::process::id() as i32)
    }

    pub fn with_root(root: impl Into<PathBuf>, self_pid: i32) -> Self {
        Self {
            root: root.into(),
            self_pid,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn self_pid(&self) -> i32 {
        self.self_pid
    }

    /// Directory listing processes, or this process's threads.
    pub fn proc_dir(&self, scope: ProcScope) -> PathBuf {
        match scope {
            ProcScope::System => self.root.clone(),
            ProcScope::ThisProc => self.root.join(self.self_pid.to_string()).join("task"),
        }
    }

    pub fn task_status_path(&self, task: i32, is_thread: bool) -> PathBuf {
        let scope = if is_thread {
            ProcScope::ThisProc
        } else {
            ProcScope::System
        };
        self.proc_dir(scope).join(task.to_string()).join("status")
    }

    /// Thread ids of `task`.
    pub fn task_threads(&self, task: i32) -> Result<Vec<i32>> {
        let dir = self.root.join(task.to_string()).join("task");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(numeric_entries(&dir))
    }

    pub fn task_status(&self, task: i32, is_thread: bool) -> Result<TaskStatus> {
        let content = fs::read_to_string(self.task_status_path(task, is_thread))?;
        Ok(parse_status(&content))
    }

    /// Current mask of a task; the default affinity when the status entry
    /// lacks `Cpus_allowed`.
    pub fn task_affinity(&self, task: i32, is_thread: bool) -> Result<CpuAffinity> {
        Ok(self
            .task_status(task, is_thread)?
            .cpus_allowed
            .unwrap_or_default())
    }

    /// User-space tasks in `scope` whose mask passes `filter`. Tasks that
    /// vanish while scanning are skipped.
    pub fn proc_list(&self, scope: ProcScope, filter: ProcFilter, affinity: CpuAffinity) -> Vec<i32> {
        let is_thread = scope == ProcScope::ThisProc;
        numeric_entries(&self.proc_dir(scope))
            .into_iter()
            .filter(|pid| match self.task_status(*pid, is_thread) {
                Ok(status) => status.has_vm && matches_filter(&status, filter, affinity),
                Err(_) => false,
            })
            .collect()
    }

    /// `(pid, mask)` of every user-space task in `scope`.
    pub fn proc_affinities(&self, scope: ProcScope) -> Vec<(i32, CpuAffinity)> {
        let is_thread = scope == ProcScope::ThisProc;
        numeric_entries(&self.proc_dir(scope))
            .into_iter()
            .filter_map(|pid| {
                let status = self.task_status(pid, is_thread).ok()?;
                status
                    .has_vm
                    .then(|| (pid, status.cpus_allowed.unwrap_or_default()))
            })
            .collect()
    }
}

/// Cpus_allowed is compared against the effective mask, so the default
/// affinity matches tasks allowed on every CPU.
fn matches_filter(status: &TaskStatus, filter: ProcFilter, affinity: CpuAffinity) -> bool {
    let matched = || {
        status
            .cpus_allowed
            .is_some_and(|a| a.effective_mask() == affinity.effective_mask())
    };
    match filter {
        ProcFilter::All => true,
        ProcFilter::MatchAffinity => matched(),
        ProcFilter::NoMatchAffinity => !matched(),
    }
}
