//! Configuration management for acq-affinity.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI overrides. It supports YAML, JSON, and TOML formats.

use crate::affinity::numa::SYS_NODE_ROOT;
use crate::affinity::{GlobalCpuAffinity, PixelDepthCpuAffinityMap};
use crate::error::{AffinityError, Result};
use crate::global_mgr::ManagerConfig;
use crate::netdev::SYS_NET_ROOT;
use crate::process::PROC_ROOT;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// Default configuration constants
pub const DEFAULT_PIXEL_DEPTH: u32 = 16;
pub const DEFAULT_LIMA_FINISHED_TIMEOUT_SECS: f64 = 3.0;
pub const DEFAULT_WAIT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_UPDATE_RATE_HZ: f64 = 10.0;

/// Image pixel depths an acquisition can run with.
pub const PIXEL_DEPTHS: [u32; 4] = [4, 8, 16, 32];

/// Searched in order when no config file is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 6] = [
    "/etc/acq-affinity/acq-affinity.yaml",
    "/etc/acq-affinity/acq-affinity.yml",
    "/etc/acq-affinity/acq-affinity.json",
    "./acq-affinity.yaml",
    "./acq-affinity.yml",
    "./acq-affinity.json",
];

/// Configuration format options for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Effective configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run privileged helpers through `sudo -n`
    #[serde(alias = "use-sudo")]
    pub use_sudo: bool,

    #[serde(alias = "proc-root")]
    pub proc_root: PathBuf,
    #[serde(alias = "sys-net-root")]
    pub sys_net_root: PathBuf,
    #[serde(alias = "sys-node-root")]
    pub sys_node_root: PathBuf,

    /// Seconds without image status callbacks before processing is
    /// declared finished
    #[serde(alias = "lima-finished-timeout-secs")]
    pub lima_finished_timeout_secs: f64,
    #[serde(alias = "wait-poll-interval-ms")]
    pub wait_poll_interval_ms: u64,
    /// Maximum rate of handled image status callbacks
    #[serde(alias = "max-update-rate-hz")]
    pub max_update_rate_hz: f64,

    /// Selects the entry of `affinity`
    #[serde(alias = "pixel-depth")]
    pub pixel_depth: u32,

    pub affinity: PixelDepthCpuAffinityMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_sudo: true,
            proc_root: PathBuf::from(PROC_ROOT),
            sys_net_root: PathBuf::from(SYS_NET_ROOT),
            sys_node_root: PathBuf::from(SYS_NODE_ROOT),
            lima_finished_timeout_secs: DEFAULT_LIMA_FINISHED_TIMEOUT_SECS,
            wait_poll_interval_ms: DEFAULT_WAIT_POLL_INTERVAL_MS,
            max_update_rate_hz: DEFAULT_MAX_UPDATE_RATE_HZ,
            pixel_depth: DEFAULT_PIXEL_DEPTH,
            affinity: PixelDepthCpuAffinityMap::default(),
        }
    }
}

impl Config {
    /// Runtime timing of the global affinity manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            lima_finished_timeout: Duration::from_secs_f64(self.lima_finished_timeout_secs),
            wait_poll_interval: Duration::from_millis(self.wait_poll_interval_ms),
            min_update_interval: Duration::from_secs_f64(1.0 / self.max_update_rate_hz),
        }
    }

    /// Affinity set of `pixel_depth`; the default (unrestricted) set when the
    /// depth has no entry.
    pub fn affinity_for(&self, pixel_depth: u32) -> GlobalCpuAffinity {
        match self.affinity.get(pixel_depth) {
            Some(affinity) => affinity.clone(),
            None => {
                debug!("no CPU affinity configured for pixel depth {}", pixel_depth);
                GlobalCpuAffinity::default()
            }
        }
    }

    /// Affinity set of the configured pixel depth.
    pub fn selected_affinity(&self) -> GlobalCpuAffinity {
        self.affinity_for(self.pixel_depth)
    }
}

/// Values given on the command line, applied over the file values.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub no_config: bool,
    pub no_sudo: bool,
    pub pixel_depth: Option<u32>,
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    if !(cfg.lima_finished_timeout_secs.is_finite() && cfg.lima_finished_timeout_secs > 0.0) {
        return Err(AffinityError::Config(format!(
            "lima_finished_timeout_secs must be positive, got {}",
            cfg.lima_finished_timeout_secs
        )));
    }
    if cfg.wait_poll_interval_ms == 0 {
        return Err(AffinityError::Config(
            "wait_poll_interval_ms must be positive".into(),
        ));
    }
    if !(cfg.max_update_rate_hz.is_finite() && cfg.max_update_rate_hz > 0.0) {
        return Err(AffinityError::Config(format!(
            "max_update_rate_hz must be positive, got {}",
            cfg.max_update_rate_hz
        )));
    }

    if !PIXEL_DEPTHS.contains(&cfg.pixel_depth) {
        return Err(AffinityError::Config(format!(
            "invalid pixel_depth {}, expected one of {:?}",
            cfg.pixel_depth, PIXEL_DEPTHS
        )));
    }

    for (depth, affinity) in cfg.affinity.iter() {
        if !PIXEL_DEPTHS.contains(depth) {
            return Err(AffinityError::Config(format!(
                "affinity defined for invalid pixel depth {}",
                depth
            )));
        }
        for group in &affinity.netdev {
            for name in &group.name_list {
                if name.is_empty() || name.contains(',') {
                    return Err(AffinityError::Config(format!(
                        "invalid network device name '{}' (pixel depth {})",
                        name, depth
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Resolves configuration from CLI overrides, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = if overrides.no_config {
        Config::default()
    } else {
        load_config(overrides.config.as_deref())?
    };

    if overrides.no_sudo {
        config.use_sudo = false;
    }
    if let Some(pixel_depth) = overrides.pixel_depth {
        config.pixel_depth = pixel_depth;
    }

    Ok(config)
}

/// First existing file of [`DEFAULT_CONFIG_PATHS`].
pub fn default_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// Loads `path`, or the first default location; defaults when none exists.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AffinityError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&content, format_of(&path))
        .map_err(|e| AffinityError::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Format implied by the file extension; YAML by default.
pub fn format_of(path: &Path) -> ConfigFormat {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => ConfigFormat::Json,
        Some("toml") => ConfigFormat::Toml,
        _ => ConfigFormat::Yaml,
    }
}

pub fn parse_config(content: &str, format: ConfigFormat) -> std::result::Result<Config, String> {
    match format {
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
    }
}

pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
    };
    output.map_err(AffinityError::Config)
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<()> {
    println!("{}", render_config(config, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::CpuAffinity;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        validate_effective_config(&cfg).unwrap();
        assert!(cfg.use_sudo);
        assert_eq!(cfg.proc_root, PathBuf::from("/proc"));
        assert_eq!(cfg.selected_affinity(), GlobalCpuAffinity::default());
    }

    #[test]
    fn test_manager_config() {
        let cfg = Config {
            lima_finished_timeout_secs: 1.5,
            wait_poll_interval_ms: 250,
            max_update_rate_hz: 20.0,
            ..Default::default()
        };
        let mgr = cfg.manager_config();
        assert_eq!(mgr.lima_finished_timeout, Duration::from_millis(1500));
        assert_eq!(mgr.wait_poll_interval, Duration::from_millis(250));
        assert_eq!(mgr.min_update_interval, Duration::from_millis(50));
        assert_eq!(Config::default().manager_config(), ManagerConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let bad = [
            Config {
                lima_finished_timeout_secs: 0.0,
                ..Default::default()
            },
            Config {
                wait_poll_interval_ms: 0,
                ..Default::default()
            },
            Config {
                max_update_rate_hz: -1.0,
                ..Default::default()
            },
            Config {
                pixel_depth: 12,
                ..Default::default()
            },
        ];
        for cfg in &bad {
            assert!(validate_effective_config(cfg).unwrap_err().is_config_error());
        }
    }

    #[test]
    fn test_invalid_netdev_name() {
        let yaml = r#"
affinity:
  16:
    netdev:
      - name_list: ["eth0,eth1"]
        processing: "0x10"
"#;
        let cfg = parse_config(yaml, ConfigFormat::Yaml).unwrap();
        let err = validate_effective_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("eth0,eth1"));
    }

    #[test]
    fn test_yaml_with_dashed_keys() {
        let yaml = r#"
use-sudo: false
pixel-depth: 8
affinity:
  8:
    lima: "0x6"
    other: "0x1"
"#;
        let cfg = parse_config(yaml, ConfigFormat::Yaml).unwrap();
        assert!(!cfg.use_sudo);
        assert_eq!(cfg.selected_affinity().lima, CpuAffinity::new(0x6));
        assert_eq!(cfg.affinity_for(16), GlobalCpuAffinity::default());
        assert_eq!(cfg.wait_poll_interval_ms, DEFAULT_WAIT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_overrides() {
        let overrides = ConfigOverrides {
            no_config: true,
            no_sudo: true,
            pixel_depth: Some(32),
            ..Default::default()
        };
        let cfg = resolve_config(&overrides).unwrap();
        assert!(!cfg.use_sudo);
        assert_eq!(cfg.pixel_depth, 32);
    }

    #[test]
    fn test_missing_explicit_file() {
        let overrides = ConfigOverrides {
            config: Some(PathBuf::from("/nonexistent/acq-affinity.yaml")),
            ..Default::default()
        };
        assert!(resolve_config(&overrides).unwrap_err().is_config_error());
    }

    #[test]
    fn test_format_of() {
        assert_eq!(format_of(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(format_of(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(format_of(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(format_of(Path::new("a")), ConfigFormat::Yaml);
    }
}
