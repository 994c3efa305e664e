//! Affinity groupings: receiver thread roles, network device groups and the
//! complete per-acquisition configuration.

use super::CpuAffinity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Masks for the receiver threads, one entry per thread instance of each
/// role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecvCpuAffinity {
    pub listeners: Vec<CpuAffinity>,
    pub writers: Vec<CpuAffinity>,
    pub port_threads: Vec<CpuAffinity>,
}

impl Default for RecvCpuAffinity {
    fn default() -> Self {
        Self::from(CpuAffinity::default())
    }
}

/// Same mask for every role.
impl From<CpuAffinity> for RecvCpuAffinity {
    fn from(affinity: CpuAffinity) -> Self {
        Self {
            listeners: vec![affinity],
            writers: vec![affinity],
            port_threads: vec![affinity],
        }
    }
}

impl RecvCpuAffinity {
    /// Union of every role's masks.
    pub fn all(&self) -> CpuAffinity {
        self.listeners
            .iter()
            .chain(&self.writers)
            .chain(&self.port_threads)
            .fold(CpuAffinity::default(), |acc, a| acc | *a)
    }
}

impl fmt::Display for RecvCpuAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<listeners={}, writers={}, port_threads={}>",
            MaskList(&self.listeners),
            MaskList(&self.writers),
            MaskList(&self.port_threads)
        )
    }
}

/// RPS mask for a set of network devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetDevGroupCpuAffinity {
    pub name_list: Vec<String>,
    pub processing: CpuAffinity,
}

impl fmt::Display for NetDevGroupCpuAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<name_list=[{}], processing={}>",
            self.name_list.join(","),
            self.processing
        )
    }
}

/// Complete affinity configuration for an acquisition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalCpuAffinity {
    pub lima: CpuAffinity,
    pub other: CpuAffinity,
    pub recv: RecvCpuAffinity,
    pub netdev: Vec<NetDevGroupCpuAffinity>,
}

impl GlobalCpuAffinity {
    pub fn all(&self) -> CpuAffinity {
        self.netdev
            .iter()
            .fold(self.recv.all() | self.lima | self.other, |acc, g| {
                acc | g.processing
            })
    }

    /// True when the configured CPUs cover exactly half of `nb_cpus`, which
    /// usually means only one hyper-thread sibling of each core was listed.
    pub fn check_hyperthreading(&self, nb_cpus: usize) -> bool {
        let all = self.all();
        !all.is_default() && nb_cpus > 0 && all.mask().count_ones() as usize * 2 == nb_cpus
    }
}

impl fmt::Display for GlobalCpuAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<recv={}, lima={}, other={}, netdev=[",
            self.recv, self.lima, self.other
        )?;
        for (i, group) in self.netdev.iter().enumerate() {
            write!(f, "{}{}", if i > 0 { ", " } else { "" }, group)?;
        }
        write!(f, "]>")
    }
}

/// Affinity configuration per image pixel depth.
///
/// Serialized with string keys so that every config format can hold it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<PixelDepthKey, GlobalCpuAffinity>",
    into = "BTreeMap<String, GlobalCpuAffinity>"
)]
pub struct PixelDepthCpuAffinityMap(pub BTreeMap<u32, GlobalCpuAffinity>);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
enum PixelDepthKey {
    Depth(u32),
    Text(String),
}

impl TryFrom<BTreeMap<PixelDepthKey, GlobalCpuAffinity>> for PixelDepthCpuAffinityMap {
    type Error = String;

    fn try_from(map: BTreeMap<PixelDepthKey, GlobalCpuAffinity>) -> std::result::Result<Self, Self::Error> {
        let mut out = BTreeMap::new();
        for (key, affinity) in map {
            let depth = match key {
                PixelDepthKey::Depth(depth) => depth,
                PixelDepthKey::Text(text) => text
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid pixel depth '{}'", text))?,
            };
            out.insert(depth, affinity);
        }
        Ok(Self(out))
    }
}

impl From<PixelDepthCpuAffinityMap> for BTreeMap<String, GlobalCpuAffinity> {
    fn from(map: PixelDepthCpuAffinityMap) -> Self {
        map.0.into_iter().map(|(depth, a)| (depth.to_string(), a)).collect()
    }
}

impl PixelDepthCpuAffinityMap {
    pub fn get(&self, pixel_depth: u32) -> Option<&GlobalCpuAffinity> {
        self.0.get(&pixel_depth)
    }

    pub fn insert(&mut self, pixel_depth: u32, affinity: GlobalCpuAffinity) {
        self.0.insert(pixel_depth, affinity);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &GlobalCpuAffinity)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PixelDepthCpuAffinityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (depth, affinity)) in self.0.iter().enumerate() {
            write!(f, "{}{}: {}", if i > 0 { ", " } else { "" }, depth, affinity)?;
        }
        write!(f, "]")
    }
}

struct MaskList<'a>(&'a [CpuAffinity]);

impl fmt::Display for MaskList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, a) in self.0.iter().enumerate() {
            write!(f, "{}{}", if i > 0 { "," } else { "" }, a)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GlobalCpuAffinity {
        GlobalCpuAffinity {
            recv: RecvCpuAffinity {
                listeners: vec![CpuAffinity::new(0x10)],
                writers: vec![CpuAffinity::new(0x20)],
                port_threads: vec![CpuAffinity::new(0x40), CpuAffinity::new(0x80)],
            },
            lima: CpuAffinity::new(0x0c),
            other: CpuAffinity::new(0x03),
            netdev: vec![NetDevGroupCpuAffinity {
                name_list: vec!["eth2".into(), "eth3".into()],
                processing: CpuAffinity::new(0x100),
            }],
        }
    }

    #[test]
    fn test_recv_default_has_one_entry_per_role() {
        let recv = RecvCpuAffinity::default();
        assert_eq!(recv.listeners.len(), 1);
        assert_eq!(recv.writers.len(), 1);
        assert_eq!(recv.port_threads.len(), 1);
        assert!(recv.all().is_default());
    }

    #[test]
    fn test_all_unions_every_field() {
        let global = sample();
        assert_eq!(global.recv.all(), CpuAffinity::new(0xf0));
        assert_eq!(global.all(), CpuAffinity::new(0x1ff));
    }

    #[test]
    fn test_check_hyperthreading() {
        let global = sample();
        // 9 CPUs configured
        assert!(global.check_hyperthreading(18));
        assert!(!global.check_hyperthreading(16));
        assert!(!GlobalCpuAffinity::default().check_hyperthreading(0));
        assert!(!GlobalCpuAffinity::default().check_hyperthreading(8));
    }

    #[test]
    fn test_display() {
        let global = sample();
        assert_eq!(
            global.to_string(),
            "<recv=<listeners=[0x10], writers=[0x20], port_threads=[0x40,0x80]>, \
             lima=0xc, other=0x3, netdev=[<name_list=[eth2,eth3], processing=0x100>]>"
        );
    }

    #[test]
    fn test_yaml_config_shape() {
        let yaml = r#"
16:
  lima: "0-3"
  other: "0x30"
  recv:
    listeners: ["4"]
    port_threads: ["5", "6"]
  netdev:
    - name_list: [eth0]
      processing: "0x80"
"#;
        let map: PixelDepthCpuAffinityMap = serde_yaml::from_str(yaml).unwrap();
        let global = map.get(16).unwrap();
        assert_eq!(global.lima, CpuAffinity::new(0xf));
        assert_eq!(global.other, CpuAffinity::new(0x30));
        assert_eq!(global.recv.port_threads.len(), 2);
        assert_eq!(global.recv.writers, vec![CpuAffinity::default()]);
        assert_eq!(global.netdev[0].processing, CpuAffinity::new(0x80));
        assert!(map.get(8).is_none());
        assert_eq!(map.to_string().chars().next(), Some('['));
    }

    #[test]
    fn test_pixel_depth_keys_as_strings() {
        let mut map = PixelDepthCpuAffinityMap::default();
        map.insert(8, sample());
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.starts_with("{\"8\":"));

        let back: PixelDepthCpuAffinityMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);

        let bad: std::result::Result<PixelDepthCpuAffinityMap, _> =
            serde_json::from_str(r#"{"deep": {}}"#);
        assert!(bad.is_err());
    }
}
