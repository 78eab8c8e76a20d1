//! btnmap - mouse button remapping daemon
//!
//! Reads the buttons of one mouse through evdev and replays them as
//! keystrokes, wheel pulses, commands or configuration switches.

use btnmap::config::ConfigStore;
use btnmap::daemon::{Fatal, FatalContext, Session, ShutdownReason, SignalHandle, StartupError, run};
use btnmap::pidfile::{self, KILL_TIMEOUT, PidFile};
use clap::Parser;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "btnmap")]
#[command(version, about = "Mouse button remapping daemon", long_about = None)]
pub struct Args {
    /// Name of the configuration to start with
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory holding the configuration files
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Detach and run in the background
    #[arg(short, long)]
    pub background: bool,

    /// Stop the running instance and exit
    #[arg(short, long)]
    pub kill: bool,

    /// Log to the systemd journal instead of stderr
    #[arg(short = 'l', long)]
    pub syslog: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// PID file location
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
}

impl Args {
    /// Command line for the restart into `name`. Detaching already
    /// happened and must not be repeated.
    fn restart_args(&self, name: &str) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec!["-c".into(), name.into()];
        if let Some(dir) = &self.config_dir {
            argv.push("--config-dir".into());
            argv.push(dir.into());
        }
        if let Some(path) = &self.pid_file {
            argv.push("--pid-file".into());
            argv.push(path.into());
        }
        if self.syslog {
            argv.push("-l".into());
        }
        if self.verbose > 0 {
            argv.push(format!("-{}", "v".repeat(self.verbose.into())).into());
        }
        argv
    }
}

fn init_logging(args: &Args) {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("btnmap={log_level},warn")));

    let journald = if args.syslog {
        tracing_journald::layer().ok()
    } else {
        None
    };
    let stderr = journald
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let unavailable = args.syslog && journald.is_none();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(journald)
        .with(stderr)
        .init();

    if unavailable {
        warn!("systemd journal not reachable, logging to stderr");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match daemon_main(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.kind.exit_code())
        }
    }
}

fn daemon_main(args: &Args) -> Result<(), StartupError> {
    let pid_path = args.pid_file.clone().unwrap_or_else(pidfile::default_path);

    if args.kill {
        if !pidfile::kill_running(&pid_path, KILL_TIMEOUT).fatal(Fatal::PidFile)? {
            info!("No running instance");
        }
        return Ok(());
    }

    info!("btnmap v{} starting...", env!("CARGO_PKG_VERSION"));
    let mut started = Instant::now();

    pidfile::kill_running(&pid_path, KILL_TIMEOUT).fatal(Fatal::PidFile)?;

    let store = ConfigStore::open(args.config_dir.as_deref()).fatal(Fatal::NoConfig)?;

    // Resolved before any session starts; a failed lookup only disables
    // switching
    let exe = std::env::current_exe();
    if let Err(e) = &exe {
        warn!("Cannot locate the btnmap executable, configuration switches disabled: {}", e);
    }

    let mut config = args.config.clone();
    let mut detached = false;
    loop {
        let mut signals = SignalHandle::install().fatal(Fatal::Signals)?;
        let mut session = Session::start(&store, config.as_deref(), started)?;

        if args.background && !detached {
            nix::unistd::daemon(false, false)
                .map_err(anyhow::Error::from)
                .fatal(Fatal::General)?;
            detached = true;
        }
        let pid_file = PidFile::create(&pid_path).fatal(Fatal::PidFile)?;

        let reason = loop {
            match run(&mut session.mux, &mut session.dispatcher, &mut signals) {
                ShutdownReason::SwitchTo(name) if exe.is_err() => {
                    warn!("Cannot switch to '{}', staying on '{}'", name, session.name);
                }
                reason => break reason,
            }
        };

        let current = session.name.clone();
        session.shutdown();
        drop(signals);
        pid_file.remove();

        match reason {
            ShutdownReason::Signal(_) => return Ok(()),
            ShutdownReason::DeviceLost => {
                return Err(StartupError::new(
                    Fatal::General,
                    anyhow::anyhow!("input device lost"),
                ));
            }
            ShutdownReason::SwitchTo(name) => {
                if let Ok(exe) = &exe {
                    let err = exec_restart(exe, &args.restart_args(&name));
                    warn!("Failed to restart with '{}': {}, reopening '{}'", name, err, current);
                }
                config = Some(current);
                started = Instant::now();
            }
        }
    }
}

/// Replace this process with `exe argv`. Only returns on failure.
fn exec_restart(exe: &Path, argv: &[OsString]) -> std::io::Error {
    info!("Restarting {:?} with {:?}", exe, argv);
    Command::new(exe).args(argv).exec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_args_drop_background() {
        let args = Args::parse_from(["btnmap", "-b", "-vv", "-c", "work", "--config-dir", "/tmp/cfg"]);
        let argv = args.restart_args("gaming");
        assert_eq!(
            argv,
            ["-c", "gaming", "--config-dir", "/tmp/cfg", "-vv"]
                .map(OsString::from)
                .to_vec()
        );
    }

    #[test]
    fn test_restart_args_keep_syslog() {
        let args = Args::parse_from(["btnmap", "-l", "-b"]);
        assert_eq!(args.restart_args("a"), ["-c", "a", "-l"].map(OsString::from).to_vec());

        let again = Args::parse_from(["btnmap", "-c", "a", "--syslog"]);
        assert!(again.syslog);
    }

    #[test]
    fn test_failed_exec_returns() {
        let err = exec_restart(Path::new("/nonexistent/btnmap"), &["-c".into(), "a".into()]);
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_restart_args_reparse() {
        let args = Args::parse_from(["btnmap", "--pid-file", "/tmp/b.pid"]);
        let mut argv = vec![OsString::from("btnmap")];
        argv.extend(args.restart_args("x"));

        let again = Args::parse_from(argv);
        assert_eq!(again.config.as_deref(), Some("x"));
        assert_eq!(again.pid_file, Some(PathBuf::from("/tmp/b.pid")));
        assert!(!again.background);
    }
}
