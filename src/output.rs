//! Synthetic event output (uinput virtual keyboard + mouse)
//!
//! Two virtual devices are created because desktop consumers subscribe by
//! device class: keyboard-range codes go to the keyboard, everything else
//! (buttons, wheel, extra events) to the mouse.
//!
//! Ordering contract for a key with modifiers:
//! - press:   mod1 down, sync, ..., key down, sync
//! - release: key up, sync, mod1 up, sync, ...

use crate::event::WheelDirection;
use crate::keynames::{BTN_MISC, KEY_MAX, KEY_OK, KEY_UNKNOWN};
use anyhow::{Context, Result};
use evdev::{
    AttributeSet, BusType, EventType, InputEvent, InputId, Key, RelativeAxisType,
    uinput::{VirtualDevice, VirtualDeviceBuilder},
};
use std::thread;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Start of the reserved range for bespoke (non-evdev) outputs
pub const EXTRA_EVENTS: u16 = 0xFFF0;

const REL_WHEEL: u16 = 0x08;

/// Settle time between modifiers and the main key
const MODIFIER_SETTLE: Duration = Duration::from_micros(200);

const VIRTUAL_VENDOR: u16 = 0xB216;
const VIRTUAL_PRODUCT_MOUSE: u16 = 0x0001;
const VIRTUAL_PRODUCT_KBD: u16 = 0x0002;

/// Which virtual device an event is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    Keyboard,
    Mouse,
}

/// Keyboard-range codes go to the keyboard, the rest to the mouse
pub fn route(code: u16) -> OutputTarget {
    if (code <= KEY_UNKNOWN || code >= KEY_OK) && code < EXTRA_EVENTS {
        OutputTarget::Keyboard
    } else {
        OutputTarget::Mouse
    }
}

/// Sink for single synthetic events. Every write is followed by a
/// `SYN_REPORT` on the same device.
pub trait VirtualOutput {
    fn write(&mut self, target: OutputTarget, event: InputEvent) -> std::io::Result<()>;
}

/// Ordered key / wheel emission on top of a [`VirtualOutput`]
pub struct OutputSink<O> {
    out: O,
    settle: Duration,
}

impl<O: VirtualOutput> OutputSink<O> {
    pub fn new(out: O) -> Self {
        Self { out, settle: MODIFIER_SETTLE }
    }

    /// Override the modifier settle delay (tests use zero)
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn inner(&self) -> &O {
        &self.out
    }

    /// Emit one key edge with its modifiers in contract order.
    /// `value` 1 = press, 0 = release, 2 = autorepeat (main key only).
    pub fn key(&mut self, code: u16, mods: &[u16], value: i32) {
        let target = route(code);
        match value {
            0 => {
                self.send(target, EventType::KEY, code, 0);
                self.send_mods(mods, 0);
            }
            2 => {
                self.send(target, EventType::KEY, code, 2);
            }
            _ => {
                self.send_mods(mods, 1);
                self.send(target, EventType::KEY, code, 1);
            }
        }
    }

    /// Press immediately followed by release
    pub fn click(&mut self, code: u16, mods: &[u16]) {
        self.key(code, mods, 1);
        self.key(code, mods, 0);
    }

    /// A single wheel step; modifiers are held around it
    pub fn wheel(&mut self, direction: WheelDirection, mods: &[u16]) {
        self.send_mods(mods, 1);
        self.send(OutputTarget::Mouse, EventType::RELATIVE, REL_WHEEL, direction.value());
        self.send_mods(mods, 0);
    }

    fn send_mods(&mut self, mods: &[u16], value: i32) {
        for &m in mods.iter().filter(|&&m| m != 0) {
            self.send(OutputTarget::Keyboard, EventType::KEY, m, value);
        }
        if value == 1 && mods.iter().any(|&m| m != 0) && !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }

    fn send(&mut self, target: OutputTarget, kind: EventType, code: u16, value: i32) {
        trace!("emit {:?}: type={} code={} value={}", target, kind.0, code, value);
        if let Err(e) = self.out.write(target, InputEvent::new(kind, code, value)) {
            warn!("uinput emit failed: {e}");
        }
    }
}

/// The pair of uinput devices the daemon writes to
pub struct UinputPair {
    keyboard: VirtualDevice,
    mouse: VirtualDevice,
}

impl UinputPair {
    pub fn create() -> Result<Self> {
        load_uinput_module();

        let mut kbd_keys = AttributeSet::<Key>::new();
        for code in (0..BTN_MISC).chain(KEY_OK..KEY_MAX) {
            kbd_keys.insert(Key::new(code));
        }

        let mut mouse_keys = AttributeSet::<Key>::new();
        for code in BTN_MISC..KEY_OK {
            mouse_keys.insert(Key::new(code));
        }

        let mut mouse_rel = AttributeSet::<RelativeAxisType>::new();
        mouse_rel.insert(RelativeAxisType::REL_X);
        mouse_rel.insert(RelativeAxisType::REL_Y);
        mouse_rel.insert(RelativeAxisType::REL_WHEEL);
        mouse_rel.insert(RelativeAxisType::REL_HWHEEL);

        let keyboard = VirtualDeviceBuilder::new()
            .context("Failed to create uinput builder")?
            .name("btnmap keyboard")
            .input_id(InputId::new(BusType::BUS_USB, VIRTUAL_VENDOR, VIRTUAL_PRODUCT_KBD, 0))
            .with_keys(&kbd_keys)
            .context("Failed to set keyboard key capabilities")?
            .build()
            .context("Failed to build uinput keyboard")?;

        let mouse = VirtualDeviceBuilder::new()
            .context("Failed to create uinput builder")?
            .name("btnmap mouse")
            .input_id(InputId::new(BusType::BUS_USB, VIRTUAL_VENDOR, VIRTUAL_PRODUCT_MOUSE, 0))
            .with_keys(&mouse_keys)
            .context("Failed to set mouse button capabilities")?
            .with_relative_axes(&mouse_rel)
            .context("Failed to set relative axis capabilities")?
            .build()
            .context("Failed to build uinput mouse")?;

        info!("Virtual keyboard and mouse created");
        Ok(Self { keyboard, mouse })
    }
}

impl VirtualOutput for UinputPair {
    fn write(&mut self, target: OutputTarget, event: InputEvent) -> std::io::Result<()> {
        // emit() terminates the batch with SYN_REPORT
        match target {
            OutputTarget::Keyboard => self.keyboard.emit(&[event]),
            OutputTarget::Mouse => self.mouse.emit(&[event]),
        }
    }
}

/// Best effort, the module may be built in or already loaded
fn load_uinput_module() {
    match std::process::Command::new("modprobe").arg("uinput").status() {
        Ok(status) if status.success() => info!("uinput module loaded"),
        Ok(status) => warn!("modprobe uinput exited with {status}; assuming uinput is available"),
        Err(e) => warn!("Could not run modprobe uinput: {e}"),
    }
}
