//! Non-interactive privilege escalation for the `taskset` and RPS helper
//! commands.
//!
//! Each command is checked once with `sudo -n -l <command>`; the answer is
//! cached in the [`Sudo`] instance for its lifetime.

use crate::error::{AffinityError, Result};
use ahash::AHashMap;
use nix::unistd::{getuid, User};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn, Level};

pub const SUDO: &str = "sudo";

/// Privileged command launcher.
#[derive(Debug)]
pub struct Sudo {
    enabled: AtomicBool,
    program: String,
    authorized: Mutex<AHashMap<String, bool>>,
}

impl Default for Sudo {
    fn default() -> Self {
        Self::new()
    }
}

impl Sudo {
    pub fn new() -> Self {
        Self::with_program(SUDO)
    }

    /// Uses `program` in place of `sudo`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            program: program.into(),
            authorized: Mutex::new(AHashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Cached authorization result for `command`, if already checked.
    pub fn cached(&self, command: &str) -> Option<bool> {
        self.authorized
            .lock()
            .expect("sudo cache lock poisoned")
            .get(command)
            .copied()
    }

    /// Verifies that `command` can be run through sudo without a password.
    pub fn check_authorized(&self, command: &str) -> Result<()> {
        let authorized = match self.cached(command) {
            Some(authorized) => authorized,
            None => {
                let authorized = self.query_authorized(command);
                self.authorized
                    .lock()
                    .expect("sudo cache lock poisoned")
                    .insert(command.to_string(), authorized);
                authorized
            }
        };

        if authorized {
            return Ok(());
        }
        let login = login_name();
        Err(AffinityError::SudoNotAuthorized {
            command: command.to_string(),
            instructions: sudoers_instructions(&login, command),
            login,
        })
    }

    fn query_authorized(&self, command: &str) -> bool {
        let path = command_path(command);
        let status = Command::new(&self.program)
            .args(["-n", "-l", &path])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) => {
                debug!("{} -n -l {}: {}", self.program, path, status);
                status.success()
            }
            Err(e) => {
                warn!("cannot execute {}: {}", self.program, e);
                false
            }
        }
    }

    /// Builds a command running `program`, prefixed with `sudo -n` when
    /// escalation is enabled and authorized.
    pub fn command(&self, program: &str) -> Result<Command> {
        if !self.is_enabled() {
            return Ok(Command::new(program));
        }
        self.check_authorized(program)?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("-n").arg(program);
        Ok(cmd)
    }
}

/// Login name of the current user, as shown in sudoers.
pub fn login_name() -> String {
    let uid = getuid();
    match User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => std::env::var("USER").unwrap_or_else(|_| uid.to_string()),
    }
}

/// Full path of `command` when found in `PATH`.
pub fn command_path(command: &str) -> String {
    which::which(command)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| command.to_string())
}

/// Remediation text for a missing sudoers entry.
pub fn sudoers_instructions(login: &str, command: &str) -> String {
    format!(
        "Please add the following line to /etc/sudoers (using visudo):\n  {} ALL=(root) NOPASSWD: {}",
        login,
        command_path(command)
    )
}

/// Subprocess output goes to the terminal only while tracing.
pub(crate) fn output_stdio() -> Stdio {
    if tracing::enabled!(Level::TRACE) {
        Stdio::inherit()
    } else {
        Stdio::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_program_is_cached() {
        let sudo = Sudo::with_program("true");
        assert_eq!(sudo.cached("taskset"), None);
        sudo.check_authorized("taskset").unwrap();
        assert_eq!(sudo.cached("taskset"), Some(true));
    }

    #[test]
    fn test_denied_error_names_command_and_login() {
        let sudo = Sudo::with_program("false");
        let err = sudo.check_authorized("taskset").unwrap_err();
        assert!(err.is_config_error());
        let msg = err.to_string();
        assert!(msg.contains("taskset"));
        assert!(msg.contains(&login_name()));
        assert!(msg.contains("NOPASSWD"));
        assert_eq!(sudo.cached("taskset"), Some(false));
    }

    #[test]
    fn test_missing_sudo_program_denies() {
        let sudo = Sudo::with_program("/nonexistent/sudo");
        assert!(sudo.check_authorized("taskset").is_err());
    }

    #[test]
    fn test_command_prefix() {
        let sudo = Sudo::with_program("true");
        let cmd = sudo.command("taskset").unwrap();
        assert_eq!(cmd.get_program(), "true");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-n", "taskset"]);

        sudo.set_enabled(false);
        let cmd = sudo.command("taskset").unwrap();
        assert_eq!(cmd.get_program(), "taskset");
        assert_eq!(cmd.get_args().count(), 0);
    }

    #[test]
    fn test_disabled_skips_check() {
        let sudo = Sudo::with_program("false");
        sudo.set_enabled(false);
        assert!(sudo.command("taskset").is_ok());
        assert_eq!(sudo.cached("taskset"), None);
    }
}
