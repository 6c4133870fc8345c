// SPDX-License-Identifier: AGPL-3.0-only

//! Stimulation waveform timing
//!
//! Converts a pulse description into the twelve sequencer event times. All
//! times are in sample periods counted from the trigger. The event counter is
//! 16 bits wide and [`NEVER`] is reserved for events that must not occur.
//!
//! ```text
//! shape                  phase 2         phase 3           end
//! Monophasic             -               -                 start+D1
//! Biphasic/Triangular    start+D1        -                 phase2+D2
//! Ramp                   start+D1        -                 phase2+D2
//! ..WithInterphaseDelay  start+D1        phase2+gap        phase3+D2
//! Triphasic              start+D1        phase2+D2         phase3+D1
//! ```

use crate::error::{Result, RhsError};
use rhs_chip::stim::{stim_params_word, StimRegister, StimShape, MAX_PULSES, NEVER};

/// Timing of one stimulation pulse train, in sample periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimTiming {
    /// Delay from trigger to the start of the first phase
    pub post_trigger_delay: u16,
    /// First phase duration
    pub first_phase: u16,
    /// Second phase duration (also the middle phase of a triphasic pulse)
    pub second_phase: u16,
    /// Gap at baseline between phases, for shapes that have one
    pub interphase_delay: u16,
    /// Amplifier settle lead time before each pulse
    pub pre_stim_amp_settle: u16,
    /// Amplifier settle hold time after each pulse
    pub post_stim_amp_settle: u16,
    /// Charge recovery start, after the end of a pulse
    pub post_stim_charge_recovery_on: u16,
    /// Charge recovery stop, after the end of a pulse
    pub post_stim_charge_recovery_off: u16,
    /// Start-to-start spacing of pulses in a train
    pub pulse_train_period: u16,
    /// Dead time after the train before the sequencer can retrigger
    pub refractory_period: u16,
    /// Drive amplifier settle around pulses
    pub enable_amp_settle: bool,
    /// Hold amplifier settle across the whole train
    pub maintain_amp_settle: bool,
    /// Drive charge recovery after pulses
    pub enable_charge_recovery: bool,
}

impl Default for StimTiming {
    /// 100 µs phases at 30 kHz, 10 ms train period, 1 ms refractory.
    fn default() -> Self {
        Self {
            post_trigger_delay: 0,
            first_phase: 3,
            second_phase: 3,
            interphase_delay: 3,
            pre_stim_amp_settle: 0,
            post_stim_amp_settle: 0,
            post_stim_charge_recovery_on: 0,
            post_stim_charge_recovery_off: 0,
            pulse_train_period: 300,
            refractory_period: 30,
            enable_amp_settle: false,
            maintain_amp_settle: false,
            enable_charge_recovery: false,
        }
    }
}

fn event(what: &str, t: u32) -> Result<u16> {
    match u16::try_from(t) {
        Ok(v) if v != NEVER => Ok(v),
        _ => Err(RhsError::invalid_stim_timing(format!(
            "{what} at sample {t} overflows the event counter"
        ))),
    }
}

/// `StimParams` word followed by the twelve event registers, in address order.
///
/// Events the shape or the enable flags do not use are set to [`NEVER`].
///
/// # Errors
///
/// Returns error if `num_pulses` is outside `1..=256`, if a train period is not
/// longer than one pulse, if charge recovery would stop before it starts, or if
/// any event time does not fit the event counter.
pub fn pulse_registers(
    num_pulses: u16,
    shape: StimShape,
    neg_stim_first: bool,
    timing: &StimTiming,
) -> Result<[(StimRegister, u16); 13]> {
    let params = stim_params_word(num_pulses, shape, neg_stim_first)
        .ok_or_else(|| RhsError::out_of_range("num_pulses", num_pulses, 1, MAX_PULSES))?;

    let d1 = u32::from(timing.first_phase);
    let d2 = u32::from(timing.second_phase);
    let gap = u32::from(timing.interphase_delay);
    let start = u32::from(timing.post_trigger_delay);

    let p2 = start + d1;
    let (phase2, phase3, end) = if !shape.uses_phase2() {
        (None, None, p2)
    } else if shape.has_interphase_delay() {
        let p3 = p2 + gap;
        (Some(p2), Some(p3), p3 + d2)
    } else if shape.uses_phase3() {
        // triphasic: the third phase repeats the first
        let p3 = p2 + d2;
        (Some(p2), Some(p3), p3 + d1)
    } else {
        (Some(p2), None, p2 + d2)
    };

    let train = num_pulses > 1;
    let repeat = if train {
        let period = u32::from(timing.pulse_train_period);
        if period <= end - start {
            return Err(RhsError::invalid_stim_timing(format!(
                "pulse train period {period} is not longer than one pulse ({})",
                end - start
            )));
        }
        Some(start + period)
    } else {
        None
    };

    let pre = u32::from(timing.pre_stim_amp_settle);
    let post = u32::from(timing.post_stim_amp_settle);
    let (settle_on, settle_off, settle_on_repeat, settle_off_repeat) = if timing.enable_amp_settle {
        let on = Some(start.saturating_sub(pre));
        let off = end + post;
        match repeat {
            Some(_) if timing.maintain_amp_settle => (on, None, None, Some(off)),
            Some(r) => (on, Some(off), Some(r.saturating_sub(pre)), Some(off)),
            None => (on, Some(off), None, None),
        }
    } else {
        (None, None, None, None)
    };

    let (recov_on, recov_off) = if timing.enable_charge_recovery {
        let on = timing.post_stim_charge_recovery_on;
        let off = timing.post_stim_charge_recovery_off;
        if off < on {
            return Err(RhsError::invalid_stim_timing(format!(
                "charge recovery stops ({off}) before it starts ({on})"
            )));
        }
        (Some(end + u32::from(on)), Some(end + u32::from(off)))
    } else {
        (None, None)
    };

    let last = [Some(end), settle_off, settle_off_repeat, recov_off]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(end);
    let done = last + u32::from(timing.refractory_period);

    let opt = |what: &str, t: Option<u32>| t.map_or(Ok(NEVER), |t| event(what, t));
    Ok([
        (StimRegister::StimParams, params),
        (StimRegister::EventAmpSettleOn, opt("amp settle on", settle_on)?),
        (StimRegister::EventAmpSettleOff, opt("amp settle off", settle_off)?),
        (StimRegister::EventStartStim, event("stim start", start)?),
        (StimRegister::EventStimPhase2, opt("phase 2", phase2)?),
        (StimRegister::EventStimPhase3, opt("phase 3", phase3)?),
        (StimRegister::EventEndStim, event("stim end", end)?),
        (StimRegister::EventRepeatStim, opt("repeat", repeat)?),
        (StimRegister::EventChargeRecovOn, opt("charge recovery on", recov_on)?),
        (StimRegister::EventChargeRecovOff, opt("charge recovery off", recov_off)?),
        (StimRegister::EventAmpSettleOnRepeat, opt("repeat amp settle on", settle_on_repeat)?),
        (StimRegister::EventAmpSettleOffRepeat, opt("repeat amp settle off", settle_off_repeat)?),
        (StimRegister::EventEnd, event("end", done)?),
    ])
}
