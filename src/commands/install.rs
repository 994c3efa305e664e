//! Helper installation command for acq-affinity.
//!
//! This module implements the `install-helper` subcommand which copies the
//! RPS helper binary built next to `acq-affinity` into a system directory and
//! prints the sudoers entry that lets the manager run it.

use acq_affinity::netdev::RPS_HELPER;
use acq_affinity::sudo;
use anyhow::Context;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Main installation command handler
pub fn command_install_helper(force: bool, prefix: &Path) -> anyhow::Result<()> {
    println!("🚀 acq-affinity - RPS helper installation");
    println!("==========================================\n");

    let source = helper_source()?;
    let target = prefix.join(RPS_HELPER);

    if !force && target.exists() {
        anyhow::bail!(
            "{} already installed. Use --force to reinstall.",
            target.display()
        );
    }

    if !is_root() {
        println!("⚠️  Not running as root: installation into {} may fail", prefix.display());
    }

    println!("📦 Installing helper...");
    fs::create_dir_all(prefix)
        .with_context(|| format!("cannot create {}", prefix.display()))?;
    fs::copy(&source, &target).with_context(|| {
        format!("cannot copy {} to {}", source.display(), target.display())
    })?;
    set_permissions(&target, 0o755)?;
    println!("   ✅ Helper installed to {}", target.display());

    let login = env::var("SUDO_USER").unwrap_or_else(|_| sudo::login_name());
    println!("\nNext steps:");
    println!("  • Allow the acquisition user to run the helper without password:");
    println!("      {}", sudoers_line(&login, &target));
    println!("  • Check with: acq-affinity check-sudo");

    Ok(())
}

/// Helper binary shipped next to the running executable.
fn helper_source() -> anyhow::Result<PathBuf> {
    let current_exe = env::current_exe()?;
    let source = current_exe.with_file_name(RPS_HELPER);
    if !source.exists() {
        anyhow::bail!(
            "{} not found next to {}",
            RPS_HELPER,
            current_exe.display()
        );
    }
    Ok(source)
}

fn sudoers_line(login: &str, helper: &Path) -> String {
    format!("{} ALL=(root) NOPASSWD: {}", login, helper.display())
}

/// Check if the current process is running as root
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Set file permissions using Unix mode
fn set_permissions(path: &Path, mode: u32) -> anyhow::Result<()> {
    let metadata = fs::metadata(path)?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(mode);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_root() {
        // Result depends on whether the test runs as root
        let _ = is_root();
    }

    #[test]
    fn test_sudoers_line() {
        let line = sudoers_line("acq", Path::new("/usr/local/bin/netdev_set_queue_rps_cpus"));
        assert_eq!(
            line,
            "acq ALL=(root) NOPASSWD: /usr/local/bin/netdev_set_queue_rps_cpus"
        );
    }

    #[test]
    fn test_set_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("helper");
        fs::write(&file, b"#!/bin/sh\n").unwrap();
        set_permissions(&file, 0o755).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
