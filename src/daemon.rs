//! Process lifecycle: startup, the dispatch loop, teardown
//!
//! A running configuration is a [`Session`]: the open device handles plus the
//! dispatcher with its virtual devices. [`run`] drives it until a quit
//! signal, a lost device or a configuration switch ends the loop; the caller
//! then tears the session down and either exits or restarts.

use crate::config::{ConfigStore, DeviceConfig, LoadedConfig};
use crate::decode::decode;
use crate::dispatch::{Dispatcher, Verdict};
use crate::mux::{DeviceMux, InputHandle, RecordSource, Wake, discover};
use crate::output::{OutputSink, UinputPair, VirtualOutput};
use crate::side_effect::{Launcher, ProcessLauncher, SwitchGate, reap_children};
use anyhow::{Context, Result};
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::fmt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Fatal startup conditions and their process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    General,
    NoConfig,
    BadConfig,
    NoDevice,
    Uinput,
    PidFile,
    Signals,
}

impl Fatal {
    pub fn exit_code(self) -> u8 {
        match self {
            Fatal::General => 1,
            Fatal::NoConfig => 150,
            Fatal::BadConfig => 151,
            Fatal::NoDevice => 152,
            Fatal::Uinput => 153,
            Fatal::PidFile => 154,
            Fatal::Signals => 155,
        }
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Fatal::General => "fatal error",
            Fatal::NoConfig => "no configuration",
            Fatal::BadConfig => "invalid configuration",
            Fatal::NoDevice => "no input device",
            Fatal::Uinput => "uinput unavailable",
            Fatal::PidFile => "PID file",
            Fatal::Signals => "signal setup",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {cause:#}")]
pub struct StartupError {
    pub kind: Fatal,
    pub cause: anyhow::Error,
}

impl StartupError {
    pub fn new(kind: Fatal, cause: anyhow::Error) -> Self {
        Self { kind, cause }
    }
}

/// `result.fatal(Fatal::X)?` tags an error with its exit code
pub trait FatalContext<T> {
    fn fatal(self, kind: Fatal) -> Result<T, StartupError>;
}

impl<T> FatalContext<T> for Result<T> {
    fn fatal(self, kind: Fatal) -> Result<T, StartupError> {
        self.map_err(|cause| StartupError::new(kind, cause))
    }
}

/// Why the dispatch loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(Signal),
    /// A device handle failed or closed
    DeviceLost,
    /// Restart with the named configuration
    SwitchTo(String),
}

/// Readiness handle that reports pending quit requests
pub trait ControlHandle: AsFd {
    /// Consume one pending request, if any
    fn pending(&mut self) -> Option<Signal>;
}

/// SIGINT, SIGTERM and SIGQUIT delivered through a signalfd
pub struct SignalHandle {
    fd: SignalFd,
    old_mask: SigSet,
}

impl SignalHandle {
    /// Block the quit signals for this thread and route them to a signalfd.
    /// Must run before any other thread or child is started.
    pub fn install() -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGQUIT);

        let old_mask = mask
            .thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .context("Failed to block signals")?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .context("Failed to create signalfd")?;

        debug!("Quit signals routed to signalfd {}", fd.as_raw_fd());
        Ok(Self { fd, old_mask })
    }
}

impl AsFd for SignalHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl ControlHandle for SignalHandle {
    fn pending(&mut self) -> Option<Signal> {
        match self.fd.read_signal() {
            Ok(Some(info)) => Signal::try_from(info.ssi_signo as i32).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("signalfd read error: {}", e);
                None
            }
        }
    }
}

impl Drop for SignalHandle {
    fn drop(&mut self) {
        // The mask survives exec, restore it before a restart
        if let Err(e) = self.old_mask.thread_set_mask() {
            warn!("Failed to restore signal mask: {}", e);
        }
    }
}

/// Dispatch until a quit request, a device failure or a switch
pub fn run<S, O, L, C>(
    mux: &mut DeviceMux<S>,
    dispatcher: &mut Dispatcher<O, L>,
    control: &mut C,
) -> ShutdownReason
where
    S: RecordSource,
    O: VirtualOutput,
    L: Launcher,
    C: ControlHandle,
{
    info!("Dispatching events from {} input handle(s)", mux.len());
    loop {
        reap_children();

        match mux.wait(Some(control.as_fd())) {
            Ok(Wake::Control) => {
                if let Some(signal) = control.pending() {
                    info!("Received {}, shutting down", signal);
                    return ShutdownReason::Signal(signal);
                }
            }
            Ok(Wake::Record { record, .. }) => {
                let event = decode(record);
                match dispatcher.dispatch(event, Instant::now()) {
                    Verdict::SwitchTo(name) => return ShutdownReason::SwitchTo(name),
                    verdict => trace!("{:#010x} -> {:?}", event.rawcode, verdict),
                }
            }
            Err(e) => {
                error!("{:#}", e);
                return ShutdownReason::DeviceLost;
            }
        }
    }
}

/// Everything acquired for one running configuration
pub struct Session {
    pub name: String,
    pub mux: DeviceMux<InputHandle>,
    pub dispatcher: Dispatcher<UinputPair, ProcessLauncher>,
}

/// Walk the ring from the requested configuration until one whose device is
/// present. `open` returns the input handles for a device section; an empty
/// list moves on to the next configuration.
pub fn select_config<S, F>(
    store: &ConfigStore,
    requested: Option<&str>,
    mut open: F,
) -> Result<(LoadedConfig, Vec<S>), StartupError>
where
    F: FnMut(&DeviceConfig) -> Result<Vec<S>>,
{
    let first = store.resolve_name(requested);
    let ring = store.ring();
    let start = ring.iter().position(|n| n == first).unwrap_or(0);

    for name in ring.iter().cycle().skip(start).take(ring.len()) {
        let loaded = store.load(name).fatal(Fatal::BadConfig)?;
        let device = &loaded.config.device;

        let handles = open(device).fatal(Fatal::NoDevice)?;
        if handles.is_empty() {
            warn!(
                "No input handle for {:04x}:{:04x} ('{}'), trying the next configuration",
                device.vendor_id, device.product_id, name
            );
            continue;
        }
        return Ok((loaded, handles));
    }

    Err(StartupError::new(
        Fatal::NoDevice,
        anyhow::anyhow!("no configured device is connected"),
    ))
}

impl Session {
    /// Load the requested configuration and open its devices. When the
    /// device of a configuration is not present, the following ones in the
    /// ring are tried in turn.
    pub fn start(
        store: &ConfigStore,
        requested: Option<&str>,
        started: Instant,
    ) -> Result<Self, StartupError> {
        let (loaded, handles) = select_config(store, requested, |device| {
            discover(device.vendor_id, device.product_id, device.grab)
        })?;

        let output = UinputPair::create().fatal(Fatal::Uinput)?;
        let name = loaded.names.current.clone();
        let dispatcher = Dispatcher::new(loaded.table, OutputSink::new(output), ProcessLauncher)
            .with_config_names(loaded.names)
            .with_switch_gate(SwitchGate::seeded(started));

        info!("Running configuration '{}'", name);
        Ok(Self {
            name,
            mux: DeviceMux::new(handles),
            dispatcher,
        })
    }

    /// Close the input handles and destroy the virtual devices
    pub fn shutdown(self) {
        self.mux.close();
        drop(self.dispatcher);
        info!("Virtual devices destroyed");
    }
}
