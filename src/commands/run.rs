//! Run command implementation.
//!
//! Applies the configured affinity set and holds it until SIGINT/SIGTERM.

use super::build_manager;
use acq_affinity::Config;
use tokio::signal;
use tracing::info;

/// Applies the affinity of the selected pixel depth until interrupted. The
/// default affinity is restored when the manager is dropped.
pub async fn command_run(config: &Config) -> anyhow::Result<()> {
    let global = config.selected_affinity();
    let mgr = build_manager(config);
    mgr.apply_and_set(&global)?;
    info!(
        "CPU affinity for pixel depth {} applied: {}",
        config.pixel_depth, global
    );
    if let Some(pid) = mgr.watchdog_pid() {
        info!("watchdog process: {}", pid);
    }

    let ctrl_c = signal::ctrl_c();
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received SIGINT (Ctrl+C), restoring default affinity...");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM, restoring default affinity...");
        }
    }

    drop(mgr);
    info!("default CPU affinity restored");
    Ok(())
}
