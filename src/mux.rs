//! Device handle multiplexing
//!
//! [`DeviceMux`] owns every open source handle and blocks in `poll(2)` until
//! one of them, or the control (signal) handle, becomes readable. There is no
//! timeout: the loop is purely event driven.

use crate::decode::{RECORD_SIZE, RawRecord, ReadError, parse_record};
use anyhow::{Context, Result};
use evdev::Device;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use std::io::Read;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Something the multiplexer can wait on and read one input record from
pub trait RecordSource: AsFd {
    /// Read exactly one record with a single `read(2)`
    fn read_record(&mut self) -> Result<RawRecord, ReadError>;

    /// Label for logs
    fn label(&self) -> String {
        format!("fd {}", self.as_fd().as_raw_fd())
    }
}

/// An opened `/dev/input/event*` node
pub struct InputHandle {
    pub path: PathBuf,
    pub name: String,
    device: Device,
    grabbed: bool,
}

impl InputHandle {
    pub fn grab(&mut self) -> Result<()> {
        self.device
            .grab()
            .with_context(|| format!("Failed to grab evdev device: {:?}", self.path))?;
        self.grabbed = true;
        Ok(())
    }
}

impl AsFd for InputHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // The fd stays open for as long as `device` is alive
        unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) }
    }
}

impl RecordSource for InputHandle {
    fn read_record(&mut self) -> Result<RawRecord, ReadError> {
        let mut buf = [0u8; RECORD_SIZE];
        let n = nix::unistd::read(self.device.as_raw_fd(), &mut buf)
            .map_err(|e| ReadError::Io(e.into()))?;
        parse_record(&buf, n)
    }

    fn label(&self) -> String {
        format!("{:?} ({})", self.path, self.name)
    }
}

impl Drop for InputHandle {
    fn drop(&mut self) {
        // Best-effort, closing the fd releases the grab as well
        if self.grabbed {
            let _ = self.device.ungrab();
        }
    }
}

/// Socket-backed source, used to feed synthetic records
impl RecordSource for UnixStream {
    fn read_record(&mut self) -> Result<RawRecord, ReadError> {
        let mut buf = [0u8; RECORD_SIZE];
        let n = self.read(&mut buf)?;
        parse_record(&buf, n)
    }
}

/// Open every event node whose input id matches `vendor`/`product`
pub fn discover(vendor: u16, product: u16, grab: bool) -> Result<Vec<InputHandle>> {
    let mut handles = Vec::new();

    info!("Scanning /dev/input/event* for {:04x}:{:04x}...", vendor, product);
    for (path, device) in evdev::enumerate() {
        let id = device.input_id();
        let name = device.name().unwrap_or_default().to_string();
        debug!(
            "  {:?}: '{}' [{:04x}:{:04x}]",
            path,
            name,
            id.vendor(),
            id.product()
        );

        if id.vendor() != vendor || id.product() != product {
            continue;
        }

        let mut handle = InputHandle { path, name, device, grabbed: false };
        if grab {
            if let Err(e) = handle.grab() {
                warn!("{e:#}");
            }
        }
        info!("Using input handle {}", handle.label());
        handles.push(handle);
    }

    Ok(handles)
}

/// What woke the multiplexer up
#[derive(Debug)]
pub enum Wake {
    /// The control handle is readable
    Control,
    /// A record arrived on device `index`
    Record { index: usize, record: RawRecord },
}

/// The set of open device handles
pub struct DeviceMux<S> {
    sources: Vec<S>,
}

impl<S: RecordSource> DeviceMux<S> {
    pub fn new(sources: Vec<S>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Block until the control handle or a device is readable.
    ///
    /// The control handle wins when both are ready. Among devices the first
    /// ready one in discovery order is read; ordering across devices is not
    /// guaranteed beyond that. A failed or empty read is returned as an error
    /// and must end the dispatch loop.
    pub fn wait(&mut self, control: Option<BorrowedFd<'_>>) -> Result<Wake> {
        let (control_ready, index) = {
            let mut fds: Vec<PollFd> = Vec::with_capacity(self.sources.len() + 1);
            if let Some(fd) = control.as_ref() {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
            fds.extend(self.sources.iter().map(|s| PollFd::new(s, PollFlags::POLLIN)));

            loop {
                match poll(&mut fds, -1) {
                    Ok(0) | Err(Errno::EINTR) => continue,
                    Ok(_) => break,
                    Err(e) => return Err(e).context("poll() failed"),
                }
            }

            let ready = |p: &PollFd| {
                p.revents().is_some_and(|r| {
                    r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                })
            };
            let offset = usize::from(control.is_some());
            let control_ready = control.is_some() && ready(&fds[0]);
            (control_ready, fds[offset..].iter().position(ready))
        };

        if control_ready {
            return Ok(Wake::Control);
        }

        let index = index.context("poll() returned without a ready handle")?;
        let source = &mut self.sources[index];
        let record = source
            .read_record()
            .with_context(|| format!("Handler read failed on {}", source.label()))?;
        Ok(Wake::Record { index, record })
    }

    /// Close every handle
    pub fn close(self) {
        info!("Closing {} input handle(s)", self.sources.len());
        drop(self.sources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_from_ready_device() {
        let (dev0, _w0) = UnixStream::pair().unwrap();
        let (dev1, mut w1) = UnixStream::pair().unwrap();
        let mut mux = DeviceMux::new(vec![dev0, dev1]);

        w1.write_all(&RawRecord::new(1, 0x113, 1).to_bytes()).unwrap();
        match mux.wait(None).unwrap() {
            Wake::Record { index, record } => {
                assert_eq!(index, 1);
                assert_eq!(record, RawRecord::new(1, 0x113, 1));
            }
            other => panic!("unexpected wake: {other:?}"),
        }
    }
}
