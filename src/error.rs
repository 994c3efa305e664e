//! Error types for affinity management.
//!
//! The variants fall in four groups: configuration/authorization problems
//! that need operator action, OS call failures, watchdog protocol failures
//! and state-machine misuse. Vanished targets are not errors and never reach
//! this type.

use std::io;
use thiserror::Error;

/// Errors raised by the affinity managers, the watchdog and the helpers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AffinityError {
    /// `sudo -l <command>` did not authorize a non-interactive run
    #[error("sudo is not authorized to run '{command}' for user '{login}'\n{instructions}")]
    SudoNotAuthorized {
        command: String,
        login: String,
        instructions: String,
    },

    /// Watchdog string argument does not fit in a packet
    #[error("watchdog string argument too long: {len} bytes (max {max})")]
    ArgTooLong { len: usize, max: usize },

    /// Unparsable CPU mask or CPU list
    #[error("invalid CPU affinity: {0}")]
    InvalidAffinity(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Pinning call or taskset failed for a task
    #[error("error setting task {task} {}CPU affinity: {reason}", threads_label(.threads))]
    TaskAffinity {
        task: i32,
        threads: bool,
        reason: String,
    },

    /// The per-task thread directory was empty
    #[error("cannot find task {0} threads")]
    NoThreads(i32),

    /// RPS mask could not be written for a receive queue
    #[error("error setting {device} {queue} RPS CPU mask: {reason}")]
    NetDev {
        device: String,
        queue: String,
        reason: String,
    },

    /// A privileged helper exited with a non-zero status
    #[error("'{command}' failed with {status}")]
    HelperFailed { command: String, status: String },

    /// The watchdog child is no longer running
    #[error("watchdog child process killed: {0}")]
    WatchdogGone(i32),

    /// The watchdog answered with something other than an acknowledgment
    #[error("invalid watchdog child ack: {0:#04x}")]
    InvalidAck(u8),

    /// A watchdog pipe was closed or a read was interrupted
    #[error("watchdog cmd pipe closed/interrupted")]
    PipeClosed,

    /// Unknown command byte in a watchdog packet
    #[error("invalid watchdog command: {0:#04x}")]
    InvalidCommand(u8),

    /// Operation not allowed in the current acquisition state
    #[error("{0}")]
    InvalidState(String),

    /// A status callback is already registered on the processing event
    #[error("status callback already registered")]
    AlreadyRegistered,

    /// Inconsistent frame item report
    #[error("frame map: {0}")]
    FrameMap(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// System call error
    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}

impl AffinityError {
    /// True for errors that cannot succeed on retry without operator action.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AffinityError::SudoNotAuthorized { .. }
                | AffinityError::ArgTooLong { .. }
                | AffinityError::InvalidAffinity(_)
                | AffinityError::Config(_)
        )
    }

    /// True for watchdog protocol failures.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            AffinityError::WatchdogGone(_)
                | AffinityError::InvalidAck(_)
                | AffinityError::PipeClosed
                | AffinityError::InvalidCommand(_)
        )
    }
}

fn threads_label(threads: &bool) -> &'static str {
    if *threads {
        "and threads "
    } else {
        ""
    }
}

pub type Result<T, E = AffinityError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AffinityError::TaskAffinity {
            task: 1234,
            threads: true,
            reason: "EPERM".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "error setting task 1234 and threads CPU affinity: EPERM"
        );

        let err = AffinityError::TaskAffinity {
            task: 7,
            threads: false,
            reason: "EINVAL".to_string(),
        };
        assert_eq!(err.to_string(), "error setting task 7 CPU affinity: EINVAL");

        let err = AffinityError::InvalidAck(0x42);
        assert_eq!(err.to_string(), "invalid watchdog child ack: 0x42");

        let err = AffinityError::ArgTooLong { len: 2000, max: 1024 };
        assert_eq!(
            err.to_string(),
            "watchdog string argument too long: 2000 bytes (max 1024)"
        );
    }

    #[test]
    fn test_error_classification() {
        let err = AffinityError::SudoNotAuthorized {
            command: "taskset".into(),
            login: "det".into(),
            instructions: String::new(),
        };
        assert!(err.is_config_error());
        assert!(!err.is_protocol_error());

        assert!(AffinityError::PipeClosed.is_protocol_error());
        assert!(AffinityError::WatchdogGone(10).is_protocol_error());
        assert!(!AffinityError::NoThreads(1).is_config_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        let err: AffinityError = io_err.into();
        match err {
            AffinityError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io error"),
        }
    }
}
