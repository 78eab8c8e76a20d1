//! Button event state machine
//!
//! Each canonical event is matched against the [`EventTable`] and run through
//! the rule's policy:
//!
//! 1. disabled or unknown rawcodes are dropped
//! 2. the rule's `pressed` field follows the hardware, even if the event is
//!    later suppressed
//! 3. `Release` rules drop their release edge outright
//! 4. presses, and every edge of `Immediate`/`Release` rules, must pass the
//!    debounce gate
//! 5. the output is produced: plain keys are forwarded or clicked, extra
//!    actions (wheel, command, switch) are invoked
//!
//! Relative controls (wheel, tilt) have no release edge: each notch is handled
//! like an `Immediate` firing whatever the rule's kind.
//!
//! `Normal` rules with an extra action only act on every other accepted edge,
//! so a press + release pair runs the action once. The parity lives in
//! `ButtonRule::armed`; an edge swallowed by the debounce gate shifts it until
//! the button goes through another full cycle.

use crate::event::{ButtonKind, CanonicalEvent, EventTable, Lookup, RuleOutput};
use crate::keynames::key_name;
use crate::output::{OutputSink, VirtualOutput};
use crate::side_effect::{ConfigNames, Launcher, SwitchGate};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Why an event produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Null,
    Unmatched,
    Disabled,
    Debounced,
    ReleaseIgnored,
    /// Normal-kind extra action waiting for the other half of the click
    Parity,
    /// Config switch inside the global rate limit
    SwitchThrottled,
    /// Config switch whose target could not be resolved
    NoSwitchTarget,
}

/// What the dispatcher did with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Dropped(DropReason),
    Emitted,
    Launched,
    LaunchFailed,
    /// The caller must tear down and restart with this configuration
    SwitchTo(String),
}

pub struct Dispatcher<O, L> {
    table: EventTable,
    sink: OutputSink<O>,
    launcher: L,
    names: ConfigNames,
    switch_gate: SwitchGate,
}

impl<O: VirtualOutput, L: Launcher> Dispatcher<O, L> {
    pub fn new(table: EventTable, sink: OutputSink<O>, launcher: L) -> Self {
        Self {
            table,
            sink,
            launcher,
            names: ConfigNames::default(),
            switch_gate: SwitchGate::default(),
        }
    }

    /// Configuration neighbours used by switch rules
    pub fn with_config_names(mut self, names: ConfigNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_switch_gate(mut self, gate: SwitchGate) -> Self {
        self.switch_gate = gate;
        self
    }

    pub fn table(&self) -> &EventTable {
        &self.table
    }

    pub fn sink(&self) -> &OutputSink<O> {
        &self.sink
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn dispatch(&mut self, event: CanonicalEvent, now: Instant) -> Verdict {
        if event.is_null() {
            return Verdict::Dropped(DropReason::Null);
        }

        let index = match self.table.lookup(event.rawcode) {
            Lookup::Found(i) => i,
            Lookup::Disabled(_) => {
                trace!("rawcode {:#010x} disabled", event.rawcode);
                return Verdict::Dropped(DropReason::Disabled);
            }
            Lookup::NotFound => {
                trace!("rawcode {:#010x} not configured", event.rawcode);
                return Verdict::Dropped(DropReason::Unmatched);
            }
        };
        let Some(rule) = self.table.get_mut(index) else {
            return Verdict::Dropped(DropReason::Unmatched);
        };

        rule.pressed = event.pressed;

        if rule.kind == ButtonKind::Release && event.pressed == 0 {
            return Verdict::Dropped(DropReason::ReleaseIgnored);
        }

        let instant = rule.kind.is_instant() || event.is_relative();
        if (rule.pressed == 1 || instant) && !rule.try_fire(now) {
            debug!("'{}' ({:#010x}) debounced", rule.name, rule.rawcode);
            return Verdict::Dropped(DropReason::Debounced);
        }

        if let RuleOutput::Key(code) = rule.output {
            trace!("'{}' -> {} value={}", rule.name, key_name(code), event.pressed);
            if instant {
                self.sink.click(code, &rule.modifiers);
            } else {
                self.sink.key(code, &rule.modifiers, event.pressed);
            }
            return Verdict::Emitted;
        }

        if !instant {
            rule.armed = !rule.armed;
            if !rule.armed {
                return Verdict::Dropped(DropReason::Parity);
            }
        }

        match &rule.output {
            RuleOutput::WheelPulse(direction) => {
                self.sink.wheel(*direction, &rule.modifiers);
                Verdict::Emitted
            }
            RuleOutput::Command(cmd) => match self.launcher.launch(cmd) {
                Ok(()) => Verdict::Launched,
                Err(e) => {
                    warn!("Could not start {:?}: {e}", cmd.program());
                    Verdict::LaunchFailed
                }
            },
            RuleOutput::ConfigSwitch(spec) => {
                if self.switch_gate.is_blocked(now) {
                    debug!("Config switch ignored, previous switch too recent");
                    return Verdict::Dropped(DropReason::SwitchThrottled);
                }
                match self.names.resolve(spec) {
                    Some(name) => {
                        self.switch_gate.record(now);
                        info!("Switching to configuration '{}'", name);
                        Verdict::SwitchTo(name)
                    }
                    None => {
                        warn!("Config switch failed: no configuration for {:?}", spec);
                        Verdict::Dropped(DropReason::NoSwitchTarget)
                    }
                }
            }
            RuleOutput::Key(_) => Verdict::Dropped(DropReason::Unmatched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ButtonRule, CommandSpec, WheelDirection};
    use crate::output::OutputTarget;
    use evdev::InputEvent;
    use std::time::Duration;

    #[derive(Default)]
    struct Log(Vec<(u16, i32)>);

    impl VirtualOutput for Log {
        fn write(&mut self, _: OutputTarget, ev: InputEvent) -> std::io::Result<()> {
            self.0.push((ev.code(), ev.value()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Count(usize);

    impl Launcher for Count {
        fn launch(&mut self, _: &CommandSpec) -> std::io::Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    fn dispatcher(rules: Vec<ButtonRule>) -> Dispatcher<Log, Count> {
        let sink = OutputSink::new(Log::default()).with_settle(Duration::ZERO);
        Dispatcher::new(EventTable::new(rules), sink, Count::default())
    }

    const RAW: u32 = 0x0100_0113;

    #[test]
    fn test_normal_key_forwards_edges() {
        let mut d = dispatcher(vec![ButtonRule::new(RAW, RuleOutput::Key(30))]);
        let t = Instant::now();
        assert_eq!(d.dispatch(CanonicalEvent::new(RAW, 1), t), Verdict::Emitted);
        assert_eq!(d.dispatch(CanonicalEvent::new(RAW, 0), t), Verdict::Emitted);
        assert_eq!(d.sink().inner().0, vec![(30, 1), (30, 0)]);
    }

    #[test]
    fn test_pressed_tracked_even_when_debounced() {
        let mut d = dispatcher(vec![ButtonRule::new(RAW, RuleOutput::Key(30)).with_delay(100)]);
        let t = Instant::now();
        d.dispatch(CanonicalEvent::new(RAW, 1), t);
        d.dispatch(CanonicalEvent::new(RAW, 0), t);
        let v = d.dispatch(CanonicalEvent::new(RAW, 1), t + Duration::from_millis(10));
        assert_eq!(v, Verdict::Dropped(DropReason::Debounced));
        assert_eq!(d.table().rules()[0].pressed, 1);
    }

    #[test]
    fn test_immediate_wheel_pulse_every_edge() {
        let mut d = dispatcher(vec![
            ButtonRule::new(RAW, RuleOutput::WheelPulse(WheelDirection::Forward))
                .with_kind(ButtonKind::Immediate),
        ]);
        let t = Instant::now();
        d.dispatch(CanonicalEvent::new(RAW, 1), t);
        d.dispatch(CanonicalEvent::new(RAW, 0), t);
        assert_eq!(d.sink().inner().0, vec![(8, 1), (8, 1)]);
    }

    #[test]
    fn test_wheel_notches_click_normal_key() {
        let tilt = crate::decode::decode(crate::decode::RawRecord::new(crate::decode::EV_REL, 6, -1));
        let mut d = dispatcher(vec![ButtonRule::new(tilt.rawcode, RuleOutput::Key(114))]);
        let t = Instant::now();
        for _ in 0..3 {
            assert_eq!(d.dispatch(tilt, t), Verdict::Emitted);
        }
        let expected: Vec<(u16, i32)> = [(114, 1), (114, 0)].repeat(3);
        assert_eq!(d.sink().inner().0, expected);
    }

    #[test]
    fn test_wheel_notch_runs_command_every_time() {
        let cmd = CommandSpec { argv: vec!["/bin/true".into()], uid: None };
        let notch = CanonicalEvent::new(0x0201_0008, 1);
        let mut d = dispatcher(vec![ButtonRule::new(notch.rawcode, RuleOutput::Command(cmd))]);
        let t = Instant::now();
        assert_eq!(d.dispatch(notch, t), Verdict::Launched);
        assert_eq!(d.dispatch(notch, t), Verdict::Launched);
        assert_eq!(d.launcher().0, 2);
    }

    #[test]
    fn test_normal_command_parity_desync() {
        let cmd = CommandSpec { argv: vec!["/bin/true".into()], uid: None };
        let mut d = dispatcher(vec![ButtonRule::new(RAW, RuleOutput::Command(cmd)).with_delay(100)]);
        let t0 = Instant::now();

        assert_eq!(d.dispatch(CanonicalEvent::new(RAW, 1), t0), Verdict::Launched);
        assert_eq!(d.dispatch(CanonicalEvent::new(RAW, 0), t0), Verdict::Dropped(DropReason::Parity));

        // A debounced press leaves the following release to flip the parity
        let t1 = t0 + Duration::from_millis(20);
        assert_eq!(d.dispatch(CanonicalEvent::new(RAW, 1), t1), Verdict::Dropped(DropReason::Debounced));
        assert_eq!(d.dispatch(CanonicalEvent::new(RAW, 0), t1), Verdict::Launched);
        assert_eq!(d.launcher().0, 2);
    }
}
