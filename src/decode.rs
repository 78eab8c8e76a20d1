//! Raw evdev record decoding
//!
//! Every `struct input_event` read from a device handle is folded into a
//! 32-bit rawcode:
//!
//! ```text
//!  31      24 23      16 15               0
//! +----------+----------+------------------+
//! |   type   | value lo |       code       |
//! +----------+----------+------------------+
//! ```
//!
//! The value byte is only folded for relative events, which is what makes
//! wheel-forward (`value = 1`) and wheel-back (`value = -1`) distinct buttons.

use crate::event::CanonicalEvent;
use thiserror::Error;

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;

/// Size of one kernel `struct input_event`
pub const RECORD_SIZE: usize = std::mem::size_of::<libc::input_event>();

/// The fields of an input event the decoder looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawRecord {
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self { kind, code, value }
    }

    /// Reinterpret a full record buffer
    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        // SAFETY: input_event is plain old data and the buffer has its exact size.
        let raw: libc::input_event = unsafe { std::ptr::read_unaligned(buf.as_ptr().cast()) };
        Self::from(raw)
    }

    /// Serialize into the kernel layout (timestamp zeroed)
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let raw = libc::input_event {
            time: libc::timeval { tv_sec: 0, tv_usec: 0 },
            type_: self.kind,
            code: self.code,
            value: self.value,
        };
        let mut buf = [0u8; RECORD_SIZE];
        // SAFETY: same size, input_event has no padding-sensitive invariants.
        unsafe { std::ptr::write_unaligned(buf.as_mut_ptr().cast(), raw) };
        buf
    }
}

impl From<libc::input_event> for RawRecord {
    fn from(ev: libc::input_event) -> Self {
        Self::new(ev.type_, ev.code, ev.value)
    }
}

impl From<evdev::InputEvent> for RawRecord {
    fn from(ev: evdev::InputEvent) -> Self {
        Self::new(ev.event_type().0, ev.code(), ev.value())
    }
}

/// Why a record could not be read from a handle
#[derive(Debug, Error)]
pub enum ReadError {
    /// Zero-length read: the device went away
    #[error("device handle closed")]
    Closed,
    #[error("short read: got {got} of {expected} bytes")]
    Short { got: usize, expected: usize },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate the byte count of a single `read(2)` and decode the record
pub fn parse_record(buf: &[u8; RECORD_SIZE], got: usize) -> Result<RawRecord, ReadError> {
    match got {
        0 => Err(ReadError::Closed),
        n if n < RECORD_SIZE => Err(ReadError::Short { got: n, expected: RECORD_SIZE }),
        _ => Ok(RawRecord::from_bytes(buf)),
    }
}

/// Fold a record into its canonical form
pub fn decode(rec: RawRecord) -> CanonicalEvent {
    let is_motion = rec.kind == EV_REL && (rec.code == REL_X || rec.code == REL_Y);
    if rec.kind == EV_SYN || is_motion {
        return CanonicalEvent::NULL;
    }

    let mut rawcode = u32::from(rec.code);
    if rec.kind == EV_REL {
        rawcode |= ((rec.value & 0xFF) as u32) << 16;
    }
    rawcode |= u32::from(rec.kind & 0xFF) << 24;

    CanonicalEvent::new(rawcode, rec.value)
}
