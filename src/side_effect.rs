//! Non-keystroke actions: external commands and configuration switches

use crate::event::{CommandSpec, SwitchSpec};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Global minimum spacing between two configuration switches
pub const SWITCH_INTERVAL: Duration = Duration::from_millis(500);

/// Starts external programs for command rules
pub trait Launcher {
    /// Fire and forget. Failure is reported to the caller, never fatal.
    fn launch(&mut self, cmd: &CommandSpec) -> std::io::Result<()>;
}

/// Spawns real child processes; they are reaped by [`reap_children`]
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&mut self, cmd: &CommandSpec) -> std::io::Result<()> {
        let mut command = Command::new(cmd.program());
        command.args(cmd.args()).stdin(Stdio::null());
        if let Some(uid) = cmd.uid {
            command.uid(uid);
        }

        let child = command.spawn()?;
        info!("Started {:?} (pid {})", cmd.program(), child.id());
        Ok(())
    }
}

/// Reap every terminated child without blocking. Returns how many were reaped.
pub fn reap_children() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                debug!("Reaped child: {:?}", status);
                reaped += 1;
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("waitpid failed: {e}");
                break;
            }
        }
    }
    reaped
}

/// Neighbours of the running configuration in the configuration ring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigNames {
    pub current: String,
    pub next: Option<String>,
    pub prev: Option<String>,
    /// Every configuration a named switch may target
    pub ring: Vec<String>,
}

impl ConfigNames {
    pub fn next_config_name(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn prev_config_name(&self) -> Option<&str> {
        self.prev.as_deref()
    }

    /// The configuration a switch rule points at
    pub fn resolve(&self, spec: &SwitchSpec) -> Option<String> {
        match spec {
            SwitchSpec::Next => self.next_config_name().map(str::to_string),
            SwitchSpec::Prev => self.prev_config_name().map(str::to_string),
            SwitchSpec::To(name) if self.ring.contains(name) => Some(name.clone()),
            SwitchSpec::To(name) => {
                warn!("Configuration '{}' does not exist, staying on '{}'", name, self.current);
                None
            }
        }
    }
}

/// Cross-rule rate limit for configuration switches
#[derive(Debug, Clone, Default)]
pub struct SwitchGate {
    last: Option<Instant>,
}

impl SwitchGate {
    /// A gate that treats `at` as the most recent switch. A freshly restarted
    /// daemon seeds it with its start time so a held switch button cannot
    /// cycle configurations.
    pub fn seeded(at: Instant) -> Self {
        Self { last: Some(at) }
    }

    /// Too soon after the previous switch?
    pub fn is_blocked(&self, now: Instant) -> bool {
        self.last
            .is_some_and(|last| now.saturating_duration_since(last) < SWITCH_INTERVAL)
    }

    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
