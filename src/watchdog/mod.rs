//! Watchdog process applying affinity to foreign processes and devices.
//!
//! The watchdog is a forked child that serves commands over two pipes (see
//! [`protocol`]). If the parent dies, the command pipe closes and the child
//! restores the default affinity of everything it touched before exiting.
//!
//! - `protocol`: packet codec and acknowledgments
//! - `worker`: the child command loop

pub mod protocol;
pub mod worker;

pub use protocol::{Cmd, Packet, STR_ARG_LEN};
pub use worker::{ForeignAffinity, WatchdogWorker};

use crate::affinity::CpuAffinity;
use crate::backend::AffinityBackend;
use crate::error::{AffinityError, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, pipe, ForkResult, Pid};
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Request/acknowledge client over the watchdog pipes.
pub struct WatchdogClient<R: Read, W: Write> {
    cmd_out: W,
    res_in: R,
}

impl<R: Read, W: Write> WatchdogClient<R, W> {
    pub fn new(res_in: R, cmd_out: W) -> Self {
        Self { cmd_out, res_in }
    }

    /// Sends one command and waits for its acknowledgment.
    pub fn send(&mut self, cmd: Cmd, arg: u64, str_arg: &str) -> Result<()> {
        let packet = Packet::new(cmd, arg, str_arg)?;
        packet.write_to(&mut self.cmd_out)?;
        protocol::read_ack(&mut self.res_in)?;
        trace!("watchdog child acknowledged {:?}", cmd);
        Ok(())
    }

    pub fn set_other_affinity(&mut self, affinity: CpuAffinity) -> Result<()> {
        self.send(Cmd::SetProcAffinity, affinity.mask(), "")
    }

    /// An empty `names` restores every managed device.
    pub fn set_netdev_affinity(&mut self, affinity: CpuAffinity, names: &[String]) -> Result<()> {
        self.send(Cmd::SetNetDevAffinity, affinity.mask(), &names.join(","))
    }
}

/// Parent-side handle of the watchdog child.
pub struct Watchdog {
    child: Pid,
    client: WatchdogClient<File, File>,
    ended: bool,
}

extern "C" fn sig_term_handler(_: libc::c_int) {}

impl Watchdog {
    /// Forks the watchdog and waits for its first acknowledgment.
    pub fn spawn<B: AffinityBackend + ?Sized>(backend: &Arc<B>) -> Result<Self> {
        let parent = getpid();
        let (cmd_read, cmd_write) = pipe()?;
        let (res_read, res_write) = pipe()?;

        // SAFETY: the child only runs the single-threaded command loop and
        // leaves through _exit without returning into the caller.
        match unsafe { fork() }? {
            ForkResult::Child => {
                drop(cmd_write);
                drop(res_read);
                let child = getpid();
                debug!("watchdog child {} of {}", child, parent);
                install_child_signals();

                let state = ForeignAffinity::new(backend.clone(), vec![parent.as_raw(), child.as_raw()]);
                WatchdogWorker::new(state, File::from(cmd_read), File::from(res_write)).run();
                // SAFETY: terminating the forked child without unwinding into
                // the parent's stack or running its exit handlers
                unsafe { libc::_exit(0) }
            }
            ForkResult::Parent { child } => {
                drop(cmd_read);
                drop(res_write);
                let mut watchdog = Watchdog {
                    child,
                    client: WatchdogClient::new(File::from(res_read), File::from(cmd_write)),
                    ended: false,
                };
                watchdog.send_child_cmd(Cmd::Init, 0, "")?;
                debug!("watchdog child {} is ready", child);
                Ok(watchdog)
            }
        }
    }

    pub fn child_pid(&self) -> i32 {
        self.child.as_raw()
    }

    /// Non-blocking check reaping the child if it exited.
    pub fn child_ended(&mut self) -> bool {
        if !self.ended {
            self.ended = !matches!(
                waitpid(self.child, Some(WaitPidFlag::WNOHANG)),
                Ok(WaitStatus::StillAlive)
            );
        }
        self.ended
    }

    pub fn send_child_cmd(&mut self, cmd: Cmd, arg: u64, str_arg: &str) -> Result<()> {
        if self.child_ended() {
            return Err(AffinityError::WatchdogGone(self.child.as_raw()));
        }
        self.client.send(cmd, arg, str_arg)
    }

    pub fn set_other_affinity(&mut self, affinity: CpuAffinity) -> Result<()> {
        if self.child_ended() {
            return Err(AffinityError::WatchdogGone(self.child.as_raw()));
        }
        self.client.set_other_affinity(affinity)
    }

    pub fn set_netdev_affinity(&mut self, affinity: CpuAffinity, names: &[String]) -> Result<()> {
        if self.child_ended() {
            return Err(AffinityError::WatchdogGone(self.child.as_raw()));
        }
        self.client.set_netdev_affinity(affinity, names)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if self.child_ended() {
            return;
        }
        if let Err(e) = self.client.send(Cmd::CleanUp, 0, "") {
            error!("watchdog clean-up failed: {}", e);
        }
        if let Err(e) = waitpid(self.child, None) {
            error!("waiting for watchdog child {}: {}", self.child, e);
        }
    }
}

/// A TERM signal must not interrupt the clean-up; INT belongs to the parent.
fn install_child_signals() {
    let term = SigAction::new(
        SigHandler::Handler(sig_term_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler is empty and async-signal-safe
    unsafe {
        if let Err(e) = signal::sigaction(Signal::SIGTERM, &term) {
            error!("cannot install watchdog SIGTERM handler: {}", e);
        }
        if let Err(e) = signal::signal(Signal::SIGINT, SigHandler::SigIgn) {
            error!("cannot ignore SIGINT in watchdog: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;
    use std::os::unix::net::UnixStream;
    use std::thread;

    fn client_with_worker(
        backend: &Arc<RecordingBackend>,
    ) -> (WatchdogClient<UnixStream, UnixStream>, thread::JoinHandle<()>) {
        let (cmd, cmd_child) = UnixStream::pair().unwrap();
        let (res, res_child) = UnixStream::pair().unwrap();
        let state = ForeignAffinity::new(backend.clone(), vec![backend.self_pid()]);
        let worker = thread::spawn(move || WatchdogWorker::new(state, cmd_child, res_child).run());
        (WatchdogClient::new(res, cmd), worker)
    }

    #[test]
    fn test_client_round_trip() {
        let backend = Arc::new(RecordingBackend::new(1, &[2, 3], &[]));
        let (mut client, worker) = client_with_worker(&backend);
        client.send(Cmd::Init, 0, "").unwrap();
        client.set_other_affinity(CpuAffinity::new(0x6)).unwrap();
        client
            .set_netdev_affinity(CpuAffinity::new(0x10), &["eth0".to_string()])
            .unwrap();
        assert_eq!(backend.proc_affinity(2), Some(CpuAffinity::new(0x6)));
        client.send(Cmd::CleanUp, 0, "").unwrap();
        worker.join().unwrap();
        assert_eq!(backend.proc_affinity(2), Some(CpuAffinity::default()));
    }

    #[test]
    fn test_client_name_list_too_long() {
        let backend = Arc::new(RecordingBackend::new(1, &[], &[]));
        let (mut client, worker) = client_with_worker(&backend);
        client.send(Cmd::Init, 0, "").unwrap();
        let names: Vec<String> = (0..200).map(|i| format!("ethernet{i}")).collect();
        let err = client
            .set_netdev_affinity(CpuAffinity::new(1), &names)
            .unwrap_err();
        assert!(matches!(err, AffinityError::ArgTooLong { .. }));
        drop(client);
        worker.join().unwrap();
    }

    #[test]
    fn test_client_detects_dead_worker() {
        let backend = Arc::new(RecordingBackend::new(1, &[], &[]));
        let (mut client, worker) = client_with_worker(&backend);
        client.send(Cmd::Init, 0, "").unwrap();
        client.send(Cmd::CleanUp, 0, "").unwrap();
        worker.join().unwrap();
        let err = client.set_other_affinity(CpuAffinity::new(2)).unwrap_err();
        assert!(err.is_protocol_error() || matches!(err, AffinityError::Io(_)));
    }
}
