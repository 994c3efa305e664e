//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use acq_affinity::config::{render_config, Config, ConfigFormat};
use acq_affinity::{CpuAffinity, GlobalCpuAffinity, NetDevGroupCpuAffinity, RecvCpuAffinity};

/// Generates configuration files.
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat) -> anyhow::Result<()> {
    let config = example_config();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from(match format {
            ConfigFormat::Yaml => "acq-affinity.yaml",
            ConfigFormat::Json => "acq-affinity.json",
            ConfigFormat::Toml => "acq-affinity.toml",
        }),
    };

    let mut content = render_config(&config, format)?;
    if format == ConfigFormat::Yaml {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Defaults plus an unrestricted entry for every pixel depth, ready to be
/// edited.
fn example_config() -> Config {
    let mut config = Config::default();
    for depth in acq_affinity::config::PIXEL_DEPTHS {
        config.affinity.insert(
            depth,
            GlobalCpuAffinity {
                lima: CpuAffinity::default(),
                other: CpuAffinity::default(),
                recv: RecvCpuAffinity::default(),
                netdev: vec![NetDevGroupCpuAffinity::default()],
            },
        );
    }
    config
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# acq-affinity Configuration
# ==========================
#
# CPU masks accept an integer, a hex string ("0x0f"), a CPU list ("0-3,6")
# or "default" (no restriction).
#
# use_sudo: true                    # Run taskset and the RPS helper through sudo -n
# proc_root: /proc
# sys_net_root: /sys/class/net
# sys_node_root: /sys/devices/system/node
#
# Processing completion
# ---------------------
# lima_finished_timeout_secs: 3.0   # No status callback for this long = finished
# wait_poll_interval_ms: 1000       # Poll period while waiting for completion
# max_update_rate_hz: 10.0          # Max handled status callbacks per second
#
# Affinity per image pixel depth
# ------------------------------
# pixel_depth: 16                   # Selects the entry of `affinity`
# affinity:
#   16:
#     lima: "0-3"                   # Acquisition process
#     other: "4-5"                  # Every other process
#     recv:
#       listeners: ["6"]
#       writers: ["7"]
#       port_threads: ["6", "7"]
#     netdev:
#       - name_list: [eth2, eth3]
#         processing: "0x300"       # RPS mask of the devices
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_affinity::config::{parse_config, validate_effective_config};

    #[test]
    fn test_example_config_is_valid() {
        let config = example_config();
        validate_effective_config(&config).unwrap();
        assert_eq!(config.affinity.iter().count(), 4);
    }

    #[test]
    fn test_yaml_comments_keep_document_parsable() {
        let yaml = add_config_comments(render_config(&example_config(), ConfigFormat::Yaml).unwrap());
        assert!(yaml.starts_with("# acq-affinity Configuration"));
        let back = parse_config(&yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(back, example_config());
    }
}
