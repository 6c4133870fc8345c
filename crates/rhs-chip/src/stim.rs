// SPDX-License-Identifier: AGPL-3.0-only

//! Stimulation sequencer register model.
//!
//! Each (stream, channel) pair owns a small table in the FPGA. Entries 0 and
//! 1 hold trigger and pulse parameters; entries 2-13 hold the time, in sample
//! periods after the trigger, at which one waveform event occurs. An event
//! programmed to [`NEVER`] is never reached by the 16-bit event counter.
//!
//! ```text
//! address = (stream << 8) | (channel << 4) | register
//! ```

use crate::board::{CHANNELS_PER_STREAM, MAX_NUM_DATA_STREAMS};

/// Event time the sequencer counter never reaches.
pub const NEVER: u16 = 0xffff;

/// Largest number of pulses in one train (8-bit `num_pulses - 1` field).
pub const MAX_PULSES: u16 = 256;

/// Sequencer table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StimRegister {
    /// Trigger enable, polarity, edge/level and source.
    TriggerParams = 0,
    /// Polarity, shape and pulse count.
    StimParams = 1,
    /// Amplifier settle begins.
    EventAmpSettleOn = 2,
    /// Amplifier settle ends.
    EventAmpSettleOff = 3,
    /// First phase begins.
    EventStartStim = 4,
    /// Second phase (or interphase gap) begins.
    EventStimPhase2 = 5,
    /// Third phase (or second phase after a gap) begins.
    EventStimPhase3 = 6,
    /// Current returns to baseline.
    EventEndStim = 7,
    /// Counter jumps back for the next pulse of a train.
    EventRepeatStim = 8,
    /// Charge recovery begins.
    EventChargeRecovOn = 9,
    /// Charge recovery ends.
    EventChargeRecovOff = 10,
    /// Amplifier settle begins before a repeated pulse.
    EventAmpSettleOnRepeat = 11,
    /// Amplifier settle ends after a repeated pulse.
    EventAmpSettleOffRepeat = 12,
    /// Sequence complete; counter stops until the next trigger.
    EventEnd = 13,
}

impl StimRegister {
    /// Number of table entries per channel.
    pub const COUNT: usize = 14;

    /// All entries in address order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::TriggerParams,
        Self::StimParams,
        Self::EventAmpSettleOn,
        Self::EventAmpSettleOff,
        Self::EventStartStim,
        Self::EventStimPhase2,
        Self::EventStimPhase3,
        Self::EventEndStim,
        Self::EventRepeatStim,
        Self::EventChargeRecovOn,
        Self::EventChargeRecovOff,
        Self::EventAmpSettleOnRepeat,
        Self::EventAmpSettleOffRepeat,
        Self::EventEnd,
    ];

    /// The twelve event (timestamp) entries.
    pub const EVENTS: [Self; 12] = [
        Self::EventAmpSettleOn,
        Self::EventAmpSettleOff,
        Self::EventStartStim,
        Self::EventStimPhase2,
        Self::EventStimPhase3,
        Self::EventEndStim,
        Self::EventRepeatStim,
        Self::EventChargeRecovOn,
        Self::EventChargeRecovOff,
        Self::EventAmpSettleOnRepeat,
        Self::EventAmpSettleOffRepeat,
        Self::EventEnd,
    ];

    /// Table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// True for timestamp entries.
    #[must_use]
    pub const fn is_event(self) -> bool {
        !matches!(self, Self::TriggerParams | Self::StimParams)
    }

    /// Value written to `StimRegAddr`, or `None` if stream or channel is out of range.
    #[must_use]
    pub const fn address(self, stream: usize, channel: usize) -> Option<u32> {
        if stream >= MAX_NUM_DATA_STREAMS || channel >= CHANNELS_PER_STREAM {
            return None;
        }
        Some(((stream as u32) << 8) | ((channel as u32) << 4) | self as u32)
    }
}

/// Stimulation waveform shapes, with their stable integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StimShape {
    /// Two opposite phases back to back.
    Biphasic = 0,
    /// Two opposite phases separated by a gap at baseline.
    BiphasicWithInterphaseDelay = 1,
    /// First phase, opposite phase, first phase again.
    Triphasic = 2,
    /// A single phase.
    Monophasic = 3,
    /// Linear ramp up then down through zero.
    Triangular = 4,
    /// Linear ramp, step through zero, ramp back.
    Ramp = 5,
    /// Ramp with a gap at baseline between the halves.
    RampWithInterphaseDelay = 6,
}

impl StimShape {
    /// All shapes in encoding order.
    pub const ALL: [Self; 7] = [
        Self::Biphasic,
        Self::BiphasicWithInterphaseDelay,
        Self::Triphasic,
        Self::Monophasic,
        Self::Triangular,
        Self::Ramp,
        Self::RampWithInterphaseDelay,
    ];

    /// Integer encoding shared with display collaborators.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decode an integer shape code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Biphasic),
            1 => Some(Self::BiphasicWithInterphaseDelay),
            2 => Some(Self::Triphasic),
            3 => Some(Self::Monophasic),
            4 => Some(Self::Triangular),
            5 => Some(Self::Ramp),
            6 => Some(Self::RampWithInterphaseDelay),
            _ => None,
        }
    }

    /// Whether the waveform has a second transition (`EventStimPhase2`).
    #[must_use]
    pub const fn uses_phase2(self) -> bool {
        !matches!(self, Self::Monophasic)
    }

    /// Whether the waveform has a third transition (`EventStimPhase3`).
    #[must_use]
    pub const fn uses_phase3(self) -> bool {
        matches!(
            self,
            Self::BiphasicWithInterphaseDelay | Self::Triphasic | Self::RampWithInterphaseDelay
        )
    }

    /// Whether the waveform has a baseline gap between its halves.
    #[must_use]
    pub const fn has_interphase_delay(self) -> bool {
        matches!(self, Self::BiphasicWithInterphaseDelay | Self::RampWithInterphaseDelay)
    }
}

/// Where a channel's stimulation trigger comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// Digital (TTL) input 0-15.
    DigitalIn(u8),
    /// Analog input 0-7 compared against the ADC threshold.
    AnalogIn(u8),
    /// Manual trigger 0-7 driven by the host.
    KeyPress(u8),
}

impl TriggerSource {
    /// 5-bit source code, or `None` if the index is out of range.
    #[must_use]
    pub const fn code(self) -> Option<u16> {
        match self {
            Self::DigitalIn(n) if n < 16 => Some(n as u16),
            Self::AnalogIn(n) if n < 8 => Some(16 + n as u16),
            Self::KeyPress(n) if n < 8 => Some(24 + n as u16),
            _ => None,
        }
    }

    /// Decode a 5-bit source code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0..=15 => Some(Self::DigitalIn(code as u8)),
            16..=23 => Some(Self::AnalogIn((code - 16) as u8)),
            24..=31 => Some(Self::KeyPress((code - 24) as u8)),
            _ => None,
        }
    }
}

/// Trigger configuration of one channel's sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimTrigger {
    /// Source signal.
    pub source: TriggerSource,
    /// Sequencer responds to the source at all.
    pub enabled: bool,
    /// Edge-triggered (fire once per transition) rather than level-triggered.
    pub edge_triggered: bool,
    /// Active-low source.
    pub trigger_on_low: bool,
}

impl StimTrigger {
    /// Enabled, rising-edge trigger from `source`.
    #[must_use]
    pub const fn edge(source: TriggerSource) -> Self {
        Self {
            source,
            enabled: true,
            edge_triggered: true,
            trigger_on_low: false,
        }
    }

    /// `TriggerParams` word, or `None` if the source index is out of range.
    #[must_use]
    pub const fn encode(self) -> Option<u16> {
        let Some(source) = self.source.code() else {
            return None;
        };
        Some(
            (if self.enabled { 1 << 7 } else { 0 })
                | (if self.trigger_on_low { 1 << 6 } else { 0 })
                | (if self.edge_triggered { 1 << 5 } else { 0 })
                | source,
        )
    }

    /// Decode a `TriggerParams` word.
    #[must_use]
    pub const fn decode(word: u16) -> Option<Self> {
        let Some(source) = TriggerSource::from_code(word & 0x1f) else {
            return None;
        };
        Some(Self {
            source,
            enabled: word & (1 << 7) != 0,
            edge_triggered: word & (1 << 5) != 0,
            trigger_on_low: word & (1 << 6) != 0,
        })
    }
}

/// `StimParams` word: polarity in bit 11, shape in bits 8-10, `num_pulses - 1` in bits 0-7.
///
/// Returns `None` if `num_pulses` is outside `1..=MAX_PULSES`.
#[must_use]
pub const fn stim_params_word(num_pulses: u16, shape: StimShape, neg_stim_first: bool) -> Option<u16> {
    if num_pulses == 0 || num_pulses > MAX_PULSES {
        return None;
    }
    Some((if neg_stim_first { 1 << 11 } else { 0 }) | (shape.code() << 8) | (num_pulses - 1))
}
