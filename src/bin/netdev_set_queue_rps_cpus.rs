//! Privileged helper writing the RPS CPU mask of one receive queue.
//!
//! Usage: `netdev_set_queue_rps_cpus <dev> <queue> <hexmask>`

use acq_affinity::netdev::{helper, SYS_NET_ROOT};
use std::path::Path;
use tracing::Level;

fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let args: Vec<String> = std::env::args().skip(1).collect();
    std::process::exit(helper::run(Path::new(SYS_NET_ROOT), &args));
}
