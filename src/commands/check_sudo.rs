//! Check-sudo command implementation.
//!
//! Verifies that `taskset` and the RPS helper can be run through sudo.

use acq_affinity::affinity::task::TASKSET;
use acq_affinity::netdev::RPS_HELPER;
use acq_affinity::sudo::{self, Sudo};
use acq_affinity::Config;

/// Runs the sudo authorization checks and prints remediation text.
pub fn command_check_sudo(config: &Config) -> anyhow::Result<()> {
    println!("🔍 Checking sudo authorization");
    println!("==============================\n");

    if !config.use_sudo {
        println!("ℹ️  sudo disabled by configuration: helpers run with the current privileges");
        return Ok(());
    }

    let sudo = Sudo::new();
    let mut all_ok = true;
    for command in [TASKSET, RPS_HELPER] {
        let path = sudo::command_path(command);
        match sudo.check_authorized(command) {
            Ok(()) => println!("   ✅ {} ({})", command, path),
            Err(e) => {
                all_ok = false;
                println!("   ❌ {}", e);
            }
        }
    }

    if !all_ok {
        anyhow::bail!("sudo authorization missing for user {}", sudo::login_name());
    }
    println!("\n✅ All helpers authorized");
    Ok(())
}
