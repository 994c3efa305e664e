//! Show command implementation.
//!
//! Prints CPU counts, the NUMA layout and the affinity of the processes.

use acq_affinity::affinity::cpus;
use acq_affinity::{Config, CpuAffinity, NumaTopology, ProcCpuAffinityMgr, ProcFs, ProcScope};
use std::collections::BTreeMap;

/// Shows CPU and process affinity information.
pub fn command_show(threads: bool, numa: bool, config: &Config) -> anyhow::Result<()> {
    println!("🖥️  acq-affinity {}", env!("CARGO_PKG_VERSION"));
    if let Some(sha) = option_env!("VERGEN_GIT_SHA") {
        println!("   git: {}", sha);
    }
    if let Some(ts) = option_env!("VERGEN_BUILD_TIMESTAMP") {
        println!("   built: {}", ts);
    }

    println!("\n🔢 CPUs");
    println!("   online:   {}", cpus::nb_cpus());
    println!("   possible: {}", cpus::max_nb_cpus());
    println!("   all mask: {:#x}", cpus::all_cpus_mask());

    let topology = NumaTopology::load_from(&config.sys_node_root)?;
    println!("\n🧩 NUMA nodes");
    if topology.nodes().is_empty() {
        println!("   (no NUMA information)");
    }
    for (node, node_cpus) in topology.nodes() {
        let mask = CpuAffinity::from_cpus(node_cpus.iter().copied()).unwrap_or_default();
        println!("   node{}: {} ({} CPUs)", node, mask, node_cpus.len());
    }

    if numa {
        let global = config.selected_affinity();
        println!("\n🎯 Configured affinity (pixel depth {})", config.pixel_depth);
        println!("   {}", global);
        let masks = [
            ("lima", global.lima),
            ("recv", global.recv.all()),
            ("other", global.other),
        ];
        for (name, affinity) in masks {
            println!(
                "   {:<6} {:>18} -> NUMA nodes {:#x}",
                name,
                affinity.to_string(),
                affinity.to_numa_node_mask(&topology)
            );
        }
    }

    let procs = ProcCpuAffinityMgr::new(ProcFs::with_root(
        &config.proc_root,
        std::process::id() as i32,
    ));

    if threads {
        println!("\n🧵 Threads of this process");
        for (tid, affinity) in procs.proc_affinities(ProcScope::ThisProc) {
            println!("   {:>8}  {}", tid, affinity);
        }
    }

    let mut by_mask: BTreeMap<CpuAffinity, Vec<i32>> = BTreeMap::new();
    for (pid, affinity) in procs.proc_affinities(ProcScope::System) {
        by_mask.entry(affinity).or_default().push(pid);
    }
    println!("\n📋 Processes by CPU affinity");
    for (affinity, pids) in &by_mask {
        let marker = if affinity.mask() == cpus::all_cpus_mask() {
            " (all)"
        } else {
            ""
        };
        println!("   {}{}: {} processes", affinity, marker, pids.len());
        if pids.len() <= 16 {
            println!("      {:?}", pids);
        }
    }

    Ok(())
}
