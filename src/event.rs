//! Button rules and the event table
//!
//! A configuration is compiled into an [`EventTable`]: an ordered list of
//! [`ButtonRule`]s matched by rawcode. Lookup is a linear scan and the first
//! enabled-or-disabled rule with a matching rawcode decides the outcome, so a
//! duplicated rawcode never reaches the later entry.

use crate::decode::EV_REL;
use std::time::Instant;

/// Maximum number of modifier keys that can accompany a key output
pub const MAX_MODS: usize = 3;

/// How a rule reacts to the press and release edges of its button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonKind {
    /// Press and release are forwarded separately as they arrive
    #[default]
    Normal,
    /// Every accepted edge produces a full press + release
    Immediate,
    /// Like `Immediate`, but the release edge is ignored
    Release,
}

impl ButtonKind {
    /// `Immediate` and `Release` fire a complete click on their own
    pub fn is_instant(self) -> bool {
        matches!(self, ButtonKind::Immediate | ButtonKind::Release)
    }
}

/// Direction of a synthetic wheel pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelDirection {
    Forward,
    Back,
}

impl WheelDirection {
    /// Value written to `REL_WHEEL`
    pub fn value(self) -> i32 {
        match self {
            WheelDirection::Forward => 1,
            WheelDirection::Back => -1,
        }
    }
}

/// Which configuration a switch rule moves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchSpec {
    Next,
    Prev,
    To(String),
}

/// An external program started by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Absolute path of the executable followed by its arguments
    pub argv: Vec<String>,
    /// User id the child runs as (inherits ours when unset)
    pub uid: Option<u32>,
}

impl CommandSpec {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// What a rule produces when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutput {
    /// Plain key or mouse button code
    Key(u16),
    ConfigSwitch(SwitchSpec),
    Command(CommandSpec),
    WheelPulse(WheelDirection),
}

impl RuleOutput {
    /// Anything that is not a plain key code is an "extra action"
    pub fn is_extra(&self) -> bool {
        !matches!(self, RuleOutput::Key(_))
    }
}

/// One configured button
#[derive(Debug, Clone)]
pub struct ButtonRule {
    /// Informational name from the configuration
    pub name: String,
    pub rawcode: u32,
    pub kind: ButtonKind,
    /// Minimum spacing between two accepted firings, 0 disables throttling
    pub delay_ms: u32,
    pub output: RuleOutput,
    /// Sent around a key output, in this order on press
    pub modifiers: Vec<u16>,
    pub enabled: bool,

    // Runtime state, only ever touched by the dispatcher
    pub last_fired: Option<Instant>,
    pub pressed: i32,
    /// Parity of Normal-kind extra actions
    pub armed: bool,
}

impl ButtonRule {
    pub fn new(rawcode: u32, output: RuleOutput) -> Self {
        Self {
            name: String::new(),
            rawcode,
            kind: ButtonKind::Normal,
            delay_ms: 0,
            output,
            modifiers: Vec::new(),
            enabled: true,
            last_fired: None,
            pressed: 0,
            armed: false,
        }
    }

    pub fn with_kind(mut self, kind: ButtonKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_delay(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_modifiers(mut self, modifiers: &[u16]) -> Self {
        self.modifiers = modifiers.iter().copied().take(MAX_MODS).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Debounce gate. Passes when the rule never fired or more than
    /// `delay_ms` elapsed since it last did; a pass records `now`.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.delay_ms > 0 {
            if let Some(last) = self.last_fired {
                let elapsed = now.saturating_duration_since(last).as_millis();
                if elapsed <= u128::from(self.delay_ms) {
                    return false;
                }
            }
        }
        self.last_fired = Some(now);
        true
    }
}

/// A decoded hardware event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub rawcode: u32,
    /// Raw hardware value: 0/1/2 for keys, signed magnitude for relative axes
    pub pressed: i32,
}

impl CanonicalEvent {
    pub const NULL: CanonicalEvent = CanonicalEvent { rawcode: 0, pressed: 0 };

    pub fn new(rawcode: u32, pressed: i32) -> Self {
        Self { rawcode, pressed }
    }

    /// Sync and motion records carry no button identity
    pub fn is_null(&self) -> bool {
        self.rawcode == 0
    }

    /// Wheel-type controls report one event per notch and never a release
    pub fn is_relative(&self) -> bool {
        self.rawcode >> 24 == u32::from(EV_REL)
    }
}

/// Result of looking a rawcode up in the table
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
    Found(usize),
    Disabled(usize),
    NotFound,
}

/// The rule set of one configuration
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    rules: Vec<ButtonRule>,
}

impl EventTable {
    pub fn new(rules: Vec<ButtonRule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[ButtonRule] {
        &self.rules
    }

    pub fn get(&self, index: usize) -> Option<&ButtonRule> {
        self.rules.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ButtonRule> {
        self.rules.get_mut(index)
    }

    /// Linear first-match scan. A disabled first match shadows any later
    /// rule with the same rawcode.
    pub fn lookup(&self, rawcode: u32) -> Lookup {
        match self.rules.iter().position(|r| r.rawcode == rawcode) {
            Some(i) if self.rules[i].enabled => Lookup::Found(i),
            Some(i) => Lookup::Disabled(i),
            None => Lookup::NotFound,
        }
    }

    /// Rawcodes that appear more than once, in table order
    pub fn duplicate_rawcodes(&self) -> Vec<u32> {
        let mut dups = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            let seen_before = self.rules[..i].iter().any(|r| r.rawcode == rule.rawcode);
            if seen_before && !dups.contains(&rule.rawcode) {
                dups.push(rule.rawcode);
            }
        }
        dups
    }
}
