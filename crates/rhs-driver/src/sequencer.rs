// SPDX-License-Identifier: AGPL-3.0-only

//! Per-channel stimulation sequencer model
//!
//! The FPGA sequencer has no readable state, so the board handle keeps a host
//! mirror of every channel: the register table last written and an explicit
//! state driven through the transition functions below.
//!
//! ```text
//! Idle   ──rearm───▶ Armed     trigger, pulses and stim cmd mode all set
//! Armed  ──fire────▶ Active    trigger seen
//! Active ──advance─▶ Repeat    counter reached EventRepeatStim, pulses left
//! Repeat ──advance─▶ Repeat    same, for each later pulse
//! Active ──advance─▶ Armed     counter reached EventEnd on the last pulse
//! Repeat ──advance─▶ Armed     (Idle if the configuration is no longer complete)
//! any    ──reset───▶ Idle
//! ```
//!
//! [`ChannelSequencer::advance`] replays the FPGA event counter against the
//! channel's [`StimRegisterSet`]: the counter starts at zero on the trigger,
//! jumps back to `EventStartStim` at `EventRepeatStim` while pulses remain, and
//! stops at `EventEnd`.
//!
//! A channel with a trigger but no pulses, or pulses while stim command mode
//! is off, stays `Idle`: configured but inert.

use rhs_chip::stim::{StimRegister, StimShape, StimTrigger, NEVER};

/// Sequencer state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerState {
    /// Disarmed; triggers are ignored
    #[default]
    Idle,
    /// Waiting for the trigger
    Armed,
    /// Delivering the first pulse of a train
    Active {
        /// Pulses left in the train, including this one
        pulses_remaining: u16,
    },
    /// Delivering a later pulse of a train
    Repeat {
        /// Pulses left in the train, including this one
        pulses_remaining: u16,
    },
}

/// Pulse train parameters last programmed into a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseConfig {
    /// Pulses per trigger
    pub num_pulses: u16,
    /// Waveform shape
    pub shape: StimShape,
    /// Cathodic (negative) phase first
    pub neg_stim_first: bool,
}

/// Host mirror of one channel's sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSequencer {
    trigger: Option<StimTrigger>,
    pulses: Option<PulseConfig>,
    state: SequencerState,
    counter: u32,
}

impl ChannelSequencer {
    /// Unconfigured, idle channel.
    pub const fn new() -> Self {
        Self {
            trigger: None,
            pulses: None,
            state: SequencerState::Idle,
            counter: 0,
        }
    }

    /// Current state.
    pub const fn state(&self) -> SequencerState {
        self.state
    }

    /// Samples since the trigger, as the FPGA event counter sees them.
    ///
    /// Zero unless a train is in progress.
    pub const fn counter(&self) -> u32 {
        self.counter
    }

    /// Trigger configuration, if programmed.
    pub const fn trigger(&self) -> Option<StimTrigger> {
        self.trigger
    }

    /// Pulse configuration, if programmed.
    pub const fn pulses(&self) -> Option<PulseConfig> {
        self.pulses
    }

    /// True unless the channel is idle.
    pub fn is_enabled(&self) -> bool {
        self.state != SequencerState::Idle
    }

    /// Trigger enabled and pulses programmed.
    pub fn is_configured(&self) -> bool {
        self.pulses.is_some() && self.trigger.is_some_and(|t| t.enabled)
    }

    /// Record a trigger configuration.
    pub fn set_trigger(&mut self, trigger: StimTrigger, stim_cmd_mode: bool) {
        self.trigger = Some(trigger);
        self.rearm(stim_cmd_mode);
    }

    /// Record a pulse configuration.
    pub fn set_pulses(&mut self, pulses: PulseConfig, stim_cmd_mode: bool) {
        self.pulses = Some(pulses);
        self.rearm(stim_cmd_mode);
    }

    /// Re-evaluate arming after a configuration or mode change.
    ///
    /// A train in progress is left alone.
    pub fn rearm(&mut self, stim_cmd_mode: bool) {
        if matches!(self.state, SequencerState::Idle | SequencerState::Armed) {
            self.state = if stim_cmd_mode && self.is_configured() {
                SequencerState::Armed
            } else {
                SequencerState::Idle
            };
        }
    }

    /// Trigger fired. Returns true if a train started.
    pub fn fire(&mut self) -> bool {
        match (self.state, self.pulses) {
            (SequencerState::Armed, Some(p)) => {
                self.state = SequencerState::Active {
                    pulses_remaining: p.num_pulses,
                };
                self.counter = 0;
                true
            }
            _ => false,
        }
    }

    /// Run the event counter forward by `samples` sample periods.
    ///
    /// Returns true if the train ended during this step; the channel is then
    /// re-armed when its configuration is still complete.
    pub fn advance(&mut self, samples: u32, regs: &StimRegisterSet, stim_cmd_mode: bool) -> bool {
        let start = u32::from(regs.get(StimRegister::EventStartStim));
        let repeat = regs.get(StimRegister::EventRepeatStim);
        let end = u32::from(regs.get(StimRegister::EventEnd));
        let mut left = samples;
        while left > 0 {
            let pulses_remaining = match self.state {
                SequencerState::Active { pulses_remaining }
                | SequencerState::Repeat { pulses_remaining } => pulses_remaining,
                SequencerState::Idle | SequencerState::Armed => return false,
            };
            let repeats = pulses_remaining > 1 && repeat != NEVER;
            let target = if repeats { u32::from(repeat) } else { end };
            let to_go = target.saturating_sub(self.counter);
            if left < to_go {
                self.counter += left;
                return false;
            }
            left -= to_go;
            if repeats {
                self.counter = start;
                self.state = SequencerState::Repeat {
                    pulses_remaining: pulses_remaining - 1,
                };
            } else {
                self.counter = 0;
                self.state = SequencerState::Idle;
                self.rearm(stim_cmd_mode);
                return true;
            }
        }
        false
    }

    /// Abort any train and disarm.
    pub fn reset(&mut self) {
        self.state = SequencerState::Idle;
        self.counter = 0;
    }
}

/// Host copy of one channel's sequencer register table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimRegisterSet {
    words: [u16; StimRegister::COUNT],
}

impl Default for StimRegisterSet {
    fn default() -> Self {
        let mut words = [NEVER; StimRegister::COUNT];
        words[StimRegister::TriggerParams.index()] = 0;
        words[StimRegister::StimParams.index()] = 0;
        Self { words }
    }
}

impl StimRegisterSet {
    /// Value of one register.
    pub fn get(&self, reg: StimRegister) -> u16 {
        self.words[reg.index()]
    }

    /// Record a register write.
    pub fn set(&mut self, reg: StimRegister, value: u16) {
        self.words[reg.index()] = value;
    }

    /// True if an event register holds the never-reached value.
    pub fn is_neutral(&self, reg: StimRegister) -> bool {
        reg.is_event() && self.get(reg) == NEVER
    }

    /// Event registers holding a reachable time.
    pub fn active_events(&self) -> impl Iterator<Item = StimRegister> + '_ {
        StimRegister::EVENTS
            .into_iter()
            .filter(|&r| !self.is_neutral(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhs_chip::stim::TriggerSource;

    const PULSES: PulseConfig = PulseConfig {
        num_pulses: 2,
        shape: StimShape::Biphasic,
        neg_stim_first: true,
    };

    fn trigger() -> StimTrigger {
        StimTrigger::edge(TriggerSource::KeyPress(0))
    }

    #[test]
    fn arms_only_when_complete() {
        let mut seq = ChannelSequencer::new();
        seq.set_trigger(trigger(), true);
        assert_eq!(seq.state(), SequencerState::Idle);
        seq.set_pulses(PULSES, true);
        assert_eq!(seq.state(), SequencerState::Armed);
    }

    #[test]
    fn order_of_configuration_does_not_matter() {
        let mut a = ChannelSequencer::new();
        a.set_trigger(trigger(), true);
        a.set_pulses(PULSES, true);
        let mut b = ChannelSequencer::new();
        b.set_pulses(PULSES, true);
        b.set_trigger(trigger(), true);
        assert_eq!(a, b);
    }

    #[test]
    fn stim_cmd_mode_off_leaves_channel_inert() {
        let mut seq = ChannelSequencer::new();
        seq.set_trigger(trigger(), false);
        seq.set_pulses(PULSES, false);
        assert!(seq.is_configured());
        assert!(!seq.is_enabled());
        assert!(!seq.fire());
        seq.rearm(true);
        assert!(seq.is_enabled());
    }

    #[test]
    fn disabled_trigger_never_arms() {
        let mut seq = ChannelSequencer::new();
        seq.set_pulses(PULSES, true);
        seq.set_trigger(StimTrigger { enabled: false, ..trigger() }, true);
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    fn train_registers(start: u16, repeat: u16, end: u16) -> StimRegisterSet {
        let mut regs = StimRegisterSet::default();
        regs.set(StimRegister::EventStartStim, start);
        regs.set(StimRegister::EventRepeatStim, repeat);
        regs.set(StimRegister::EventEnd, end);
        regs
    }

    #[test]
    fn train_repeats_then_rearms() {
        let regs = train_registers(5, 100, 40);
        let mut seq = ChannelSequencer::new();
        seq.set_trigger(trigger(), true);
        seq.set_pulses(PULSES, true);
        assert!(seq.fire());
        assert_eq!(seq.state(), SequencerState::Active { pulses_remaining: 2 });
        assert!(!seq.fire());

        assert!(!seq.advance(99, &regs, true));
        assert_eq!(seq.state(), SequencerState::Active { pulses_remaining: 2 });
        assert!(!seq.advance(1, &regs, true));
        assert_eq!(seq.state(), SequencerState::Repeat { pulses_remaining: 1 });
        assert_eq!(seq.counter(), 5);

        assert!(!seq.advance(34, &regs, true));
        assert!(seq.advance(1, &regs, true));
        assert_eq!(seq.state(), SequencerState::Armed);
        assert_eq!(seq.counter(), 0);
        assert!(seq.fire());
    }

    #[test]
    fn one_step_can_cover_a_whole_train() {
        let regs = train_registers(0, 10, 20);
        let mut seq = ChannelSequencer::new();
        seq.set_trigger(trigger(), true);
        seq.set_pulses(PulseConfig { num_pulses: 3, ..PULSES }, true);
        seq.fire();
        assert!(seq.advance(10_000, &regs, true));
        assert_eq!(seq.state(), SequencerState::Armed);
    }

    #[test]
    fn train_ends_idle_once_mode_is_off() {
        let regs = train_registers(0, NEVER, 8);
        let mut seq = ChannelSequencer::new();
        seq.set_trigger(trigger(), true);
        seq.set_pulses(PulseConfig { num_pulses: 1, ..PULSES }, true);
        seq.fire();
        assert!(seq.advance(8, &regs, false));
        assert_eq!(seq.state(), SequencerState::Idle);
        assert!(!seq.advance(8, &regs, false));
    }

    #[test]
    fn reset_from_any_state() {
        let mut seq = ChannelSequencer::new();
        seq.set_trigger(trigger(), true);
        seq.set_pulses(PULSES, true);
        seq.fire();
        seq.reset();
        assert!(!seq.is_enabled());
        seq.rearm(true);
        seq.reset();
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    #[test]
    fn register_set_defaults_to_neutral_events() {
        let set = StimRegisterSet::default();
        assert_eq!(set.active_events().count(), 0);
        assert_eq!(set.get(StimRegister::TriggerParams), 0);
        assert!(!set.is_neutral(StimRegister::StimParams));
    }
}
