//! Integration tests for configuration loading in every supported format.

use acq_affinity::config::{load_config, resolve_config, validate_effective_config, ConfigOverrides};
use acq_affinity::CpuAffinity;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_load_yaml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("acq-affinity.yaml");
    fs::write(
        &path,
        r#"
use_sudo: false
lima_finished_timeout_secs: 5
pixel_depth: 32
affinity:
  32:
    lima: "0-3"
    other: "0x30"
    recv:
      listeners: ["4", "5"]
      writers: ["6"]
      port_threads: ["7"]
    netdev:
      - name_list: [eth2, eth3]
        processing: "0x300"
"#,
    )
    .unwrap();

    let cfg = load_config(Some(path.as_path())).unwrap();
    validate_effective_config(&cfg).unwrap();
    assert!(!cfg.use_sudo);
    assert_eq!(cfg.manager_config().lima_finished_timeout, Duration::from_secs(5));

    let global = cfg.selected_affinity();
    assert_eq!(global.lima, CpuAffinity::new(0xf));
    assert_eq!(global.other, CpuAffinity::new(0x30));
    assert_eq!(global.recv.all(), CpuAffinity::new(0xf0));
    assert_eq!(global.netdev[0].name_list, vec!["eth2", "eth3"]);
    assert_eq!(global.all(), CpuAffinity::new(0x3ff));
}

#[test]
fn test_load_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("acq-affinity.json");
    fs::write(
        &path,
        r#"{"pixel_depth": 8, "affinity": {"8": {"lima": 12, "other": "default"}}}"#,
    )
    .unwrap();

    let cfg = load_config(Some(path.as_path())).unwrap();
    assert_eq!(cfg.affinity_for(8).lima, CpuAffinity::new(12));
    assert!(cfg.affinity_for(8).other.is_default());
    assert!(cfg.use_sudo);
}

#[test]
fn test_load_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("acq-affinity.toml");
    fs::write(
        &path,
        r#"
use_sudo = true
max_update_rate_hz = 4.0

[affinity.16]
lima = "0x0f"
other = "4-7"

[affinity.16.recv]
listeners = ["8"]
"#,
    )
    .unwrap();

    let cfg = load_config(Some(path.as_path())).unwrap();
    assert_eq!(cfg.manager_config().min_update_interval, Duration::from_millis(250));
    let global = cfg.affinity_for(16);
    assert_eq!(global.lima, CpuAffinity::new(0xf));
    assert_eq!(global.other, CpuAffinity::new(0xf0));
    assert_eq!(global.recv.listeners, vec![CpuAffinity::new(0x100)]);
}

#[test]
fn test_invalid_file_is_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(&path, "affinity:\n  16:\n    lima: \"0-3,x\"\n").unwrap();

    let overrides = ConfigOverrides {
        config: Some(path),
        ..Default::default()
    };
    let err = resolve_config(&overrides).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("bad.yaml"));
}

#[test]
fn test_cli_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("acq-affinity.yaml");
    fs::write(&path, "use_sudo: true\npixel_depth: 16\n").unwrap();

    let overrides = ConfigOverrides {
        config: Some(path),
        no_sudo: true,
        pixel_depth: Some(4),
        ..Default::default()
    };
    let cfg = resolve_config(&overrides).unwrap();
    assert!(!cfg.use_sudo);
    assert_eq!(cfg.pixel_depth, 4);
}
