//! NUMA node topology, used to report which memory nodes a CPU mask touches.

use super::{cpus, CpuAffinity};
use crate::error::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Default sysfs directory holding the `nodeN/cpulist` entries.
pub const SYS_NODE_ROOT: &str = "/sys/devices/system/node";

/// CPU to NUMA node mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumaTopology {
    nodes: BTreeMap<usize, Vec<usize>>,
}

impl NumaTopology {
    pub fn load() -> Result<Self> {
        Self::load_from(SYS_NODE_ROOT)
    }

    /// Reads every `node<N>/cpulist` under `root`. A missing root yields an
    /// empty topology (non-NUMA kernel).
    pub fn load_from(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut nodes = BTreeMap::new();

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no NUMA information in {}", root.display());
                return Ok(Self { nodes });
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let node = match name
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .and_then(|idx| idx.parse::<usize>().ok())
            {
                Some(node) => node,
                None => continue,
            };
            let cpulist = match fs::read_to_string(entry.path().join("cpulist")) {
                Ok(content) => content,
                Err(_) => continue,
            };
            nodes.insert(node, cpus::parse_cpu_list(cpulist.trim())?);
        }

        debug!("NUMA nodes: {:?}", nodes);
        Ok(Self { nodes })
    }

    pub fn from_nodes(nodes: BTreeMap<usize, Vec<usize>>) -> Self {
        Self { nodes }
    }

    /// Highest node index, 0 on a non-NUMA system.
    pub fn max_node(&self) -> usize {
        self.nodes.keys().next_back().copied().unwrap_or(0)
    }

    pub fn node_of(&self, cpu: usize) -> Option<usize> {
        self.nodes
            .iter()
            .find(|(_, cpus)| cpus.contains(&cpu))
            .map(|(node, _)| *node)
    }

    pub fn nodes(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.nodes
    }
}

impl CpuAffinity {
    /// Bitmask of the NUMA nodes holding at least one CPU of this affinity.
    /// CPUs unknown to the topology are attributed to node 0.
    pub fn to_numa_node_mask(self, topology: &NumaTopology) -> u64 {
        self.cpus()
            .into_iter()
            .map(|cpu| topology.node_of(cpu).unwrap_or(0))
            .filter(|node| *node < cpus::MAX_MASK_CPUS)
            .fold(0u64, |mask, node| mask | (1 << node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_node(root: &Path, node: usize, cpulist: &str) {
        let dir = root.join(format!("node{node}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cpulist"), format!("{cpulist}\n")).unwrap();
    }

    #[test]
    fn test_load_from_sysfs_tree() {
        let dir = tempdir().unwrap();
        write_node(dir.path(), 0, "0-3");
        write_node(dir.path(), 1, "4-7");
        fs::create_dir_all(dir.path().join("power")).unwrap();
        fs::write(dir.path().join("possible"), "0-1\n").unwrap();

        let topo = NumaTopology::load_from(dir.path()).unwrap();
        assert_eq!(topo.max_node(), 1);
        assert_eq!(topo.node_of(2), Some(0));
        assert_eq!(topo.node_of(5), Some(1));
        assert_eq!(topo.node_of(9), None);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let topo = NumaTopology::load_from(dir.path().join("missing")).unwrap();
        assert_eq!(topo.max_node(), 0);
        assert!(topo.nodes().is_empty());
    }

    #[test]
    fn test_node_mask() {
        let topo = NumaTopology::from_nodes(BTreeMap::from([
            (0, vec![0, 1, 2, 3]),
            (1, vec![4, 5, 6, 7]),
        ]));
        assert_eq!(CpuAffinity::new(0x0f).to_numa_node_mask(&topo), 0b01);
        assert_eq!(CpuAffinity::new(0x30).to_numa_node_mask(&topo), 0b10);
        assert_eq!(CpuAffinity::new(0x18).to_numa_node_mask(&topo), 0b11);
    }
}
