//! Single-instance PID file

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, getpid};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_PATH: &str = "/run/btnmap.pid";
const FILE_NAME: &str = "btnmap.pid";

/// How long a previous instance gets to shut down after SIGINT
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// `/run/btnmap.pid` for root, otherwise the user's runtime dir
pub fn default_path() -> PathBuf {
    let run = Path::new("/run");
    if nix::unistd::access(run, nix::unistd::AccessFlags::W_OK).is_ok() {
        return PathBuf::from(DEFAULT_PATH);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(FILE_NAME)
}

/// PID stored in `path`, if the file exists and holds a number
pub fn read_pid(path: &Path) -> Option<Pid> {
    let content = fs::read_to_string(path).ok()?;
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(Pid::from_raw(pid)),
        _ => {
            warn!("Ignoring malformed PID file {:?}", path);
            None
        }
    }
}

fn is_alive(pid: Pid) -> bool {
    // EPERM means the process exists but belongs to someone else
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

/// Stop the instance recorded in `path`: SIGINT, wait up to `timeout`, then
/// SIGKILL. Returns whether an instance was running.
pub fn kill_running(path: &Path, timeout: Duration) -> Result<bool> {
    let Some(pid) = read_pid(path) else {
        return Ok(false);
    };
    if pid == getpid() || !is_alive(pid) {
        debug!("Stale PID file {:?} (pid {})", path, pid);
        return Ok(false);
    }

    info!("Stopping running instance (pid {})", pid);
    kill(pid, Signal::SIGINT).with_context(|| format!("Failed to signal pid {}", pid))?;

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(true);
        }
        thread::sleep(Duration::from_millis(50));
    }

    warn!("pid {} did not exit within {:?}, sending SIGKILL", pid, timeout);
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(true),
        Err(e) => Err(e).with_context(|| format!("Failed to kill pid {}", pid)),
    }
}

/// The PID file of this process. Removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write our PID to `path`
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        fs::write(path, format!("{}\n", getpid()))
            .with_context(|| format!("Failed to write PID file {:?}", path))?;
        debug!("PID file {:?} created", path);
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) {
        drop(self);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it is still ours
        if read_pid(&self.path) == Some(getpid()) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove PID file {:?}: {}", self.path, e);
            }
        }
    }
}
