// SPDX-License-Identifier: AGPL-3.0-only

//! Stimulation sequencer configurator
//!
//! Programs the per-channel sequencer tables and keeps the host mirror in
//! [`crate::sequencer`] in step with what was written.

use crate::board::BoardGuard;
use crate::error::{check_index, Result, RhsError};
use crate::sequencer::{ChannelSequencer, PulseConfig, StimRegisterSet};
use crate::timing::{pulse_registers, StimTiming};
use crate::transport::Transport;
use rhs_chip::board::{BoardPort, CHANNELS_PER_STREAM, MAX_NUM_DATA_STREAMS, NUM_MANUAL_TRIGGERS};
use rhs_chip::endpoints::{global_settle, ram_addr_reset, reset_run, spi_start, TriggerIn, WireIn};
use rhs_chip::stim::{StimRegister, StimShape, StimTrigger, TriggerSource};
use tracing::{debug, info};

/// How amplifiers are settled around a pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmpSettleMode {
    /// Switch the amplifier to its lower cutoff frequency
    #[default]
    LowerBandwidth,
    /// Drive the amplifier fast-settle switch
    FastSettle,
}

/// How electrode charge is recovered after a pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeRecoveryMode {
    /// Current-limited driver toward the recovery target voltage
    #[default]
    CurrentLimited,
    /// Switch the electrode to ground
    Switch,
}

/// Which headstages settle together when any channel settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalSettlePolicy {
    /// Settle the whole headstage on a port, indexed by port
    pub whole_headstage: [bool; 4],
    /// Settle every headstage on the board
    pub all_headstages: bool,
}

impl GlobalSettlePolicy {
    /// `GlobalSettleSelect` wire-in value.
    pub fn word(&self) -> u32 {
        let ports = BoardPort::ALL
            .iter()
            .filter(|p| self.whole_headstage[p.index()])
            .fold(0, |w, p| w | (1 << p.index()));
        ports | if self.all_headstages { global_settle::ALL_HEADSTAGES } else { 0 }
    }
}

fn source_out_of_range(source: TriggerSource) -> RhsError {
    let (what, index, max) = match source {
        TriggerSource::DigitalIn(n) => ("digital trigger input", n, 15),
        TriggerSource::AnalogIn(n) => ("analog trigger input", n, 7),
        TriggerSource::KeyPress(n) => ("manual trigger", n, 7),
    };
    RhsError::out_of_range(what, index, 0, max)
}

fn check_channel(stream: usize, channel: usize) -> Result<()> {
    check_index("stream", stream, MAX_NUM_DATA_STREAMS)?;
    check_index("channel", channel, CHANNELS_PER_STREAM)
}

impl<T: Transport> BoardGuard<'_, T> {
    /// Allow the command streams to drive stimulation.
    ///
    /// Channels with a complete configuration arm when this is enabled; all
    /// channels disarm when it is disabled.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_stim_cmd_mode(&mut self, enabled: bool) -> Result<()> {
        self.write_wire(WireIn::StimCmdMode, u32::from(enabled), 1)?;
        let state = self.state_mut();
        state.stim_cmd_mode = enabled;
        for seq in state.sequencers.iter_mut().flatten() {
            seq.rearm(enabled);
        }
        info!("Stimulation command mode {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    /// Whether stimulation command mode is on.
    pub fn stim_cmd_mode(&self) -> bool {
        self.state().stim_cmd_mode
    }

    /// Write one sequencer table entry: address, value, commit, strobe.
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range or the transport fails.
    pub fn program_stim_reg(
        &mut self,
        stream: usize,
        channel: usize,
        reg: StimRegister,
        value: u16,
    ) -> Result<()> {
        check_channel(stream, channel)?;
        let address = reg
            .address(stream, channel)
            .ok_or_else(|| RhsError::out_of_range("stream", stream as i64, 0, 7))?;
        let t = self.transport();
        t.set_wire_in(WireIn::StimRegAddr, address, 0xffff_ffff)?;
        t.set_wire_in(WireIn::StimRegWord, u32::from(value), 0xffff_ffff)?;
        t.update_wire_ins()?;
        t.activate_trigger_in(TriggerIn::RamAddrReset, ram_addr_reset::STIM_REGISTER)?;
        self.state_mut().stim_regs[stream][channel].set(reg, value);
        Ok(())
    }

    /// Program a channel's trigger source, sensitivity and polarity.
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range or the transport fails.
    pub fn configure_stim_trigger(
        &mut self,
        stream: usize,
        channel: usize,
        trigger: StimTrigger,
    ) -> Result<()> {
        let word = trigger
            .encode()
            .ok_or_else(|| source_out_of_range(trigger.source))?;
        self.program_stim_reg(stream, channel, StimRegister::TriggerParams, word)?;
        let mode = self.state().stim_cmd_mode;
        self.state_mut().sequencers[stream][channel].set_trigger(trigger, mode);
        debug!("Stream {stream} channel {channel}: trigger {trigger:?}");
        Ok(())
    }

    /// Program a channel's pulse train.
    ///
    /// All event times are computed and checked before the first write;
    /// events the shape does not use are written as never-reached.
    ///
    /// # Errors
    ///
    /// Returns error if an index or `num_pulses` is out of range, the timing is
    /// inconsistent, or the transport fails.
    pub fn configure_stim_pulses(
        &mut self,
        stream: usize,
        channel: usize,
        num_pulses: u16,
        shape: StimShape,
        neg_stim_first: bool,
        timing: &StimTiming,
    ) -> Result<()> {
        check_channel(stream, channel)?;
        let regs = pulse_registers(num_pulses, shape, neg_stim_first, timing)?;
        for (reg, value) in regs {
            self.program_stim_reg(stream, channel, reg, value)?;
        }
        let mode = self.state().stim_cmd_mode;
        self.state_mut().sequencers[stream][channel].set_pulses(
            PulseConfig {
                num_pulses,
                shape,
                neg_stim_first,
            },
            mode,
        );
        debug!("Stream {stream} channel {channel}: {num_pulses} x {shape:?}");
        Ok(())
    }

    /// Drive a manual trigger line, firing armed channels that listen to it.
    ///
    /// Returns the number of channels that started a train.
    ///
    /// # Errors
    ///
    /// Returns error if `trigger` is out of range or the transport fails.
    pub fn set_manual_stim_trigger(&mut self, trigger: usize, on: bool) -> Result<usize> {
        check_index("manual trigger", trigger, NUM_MANUAL_TRIGGERS)?;
        let bit = 1u32 << trigger;
        self.write_wire(WireIn::ManualTriggers, if on { bit } else { 0 }, bit)?;

        let state = self.state_mut();
        let was_on = state.manual_triggers & (1 << trigger) != 0;
        if on {
            state.manual_triggers |= 1 << trigger;
        } else {
            state.manual_triggers &= !(1 << trigger);
        }
        let source = TriggerSource::KeyPress(trigger as u8);
        let mut fired = 0;
        for seq in state.sequencers.iter_mut().flatten() {
            let Some(t) = seq.trigger().filter(|t| t.source == source) else {
                continue;
            };
            let active = on != t.trigger_on_low;
            let was_active = was_on != t.trigger_on_low;
            let fires = active && !(t.edge_triggered && was_active);
            if fires && seq.fire() {
                fired += 1;
            }
        }
        debug!("Manual trigger {trigger} {}: {fired} channels fired", if on { "on" } else { "off" });
        Ok(fired)
    }

    /// Advance every running sequencer by `samples` sample periods.
    ///
    /// The board runs its sequencers in sample time and reports nothing back;
    /// call this with the number of frames acquired to keep the host mirror in
    /// step. Channels whose train ends re-arm if still fully configured.
    ///
    /// Returns the number of channels whose train ended.
    pub fn advance_sequencers(&mut self, samples: u32) -> usize {
        let state = self.state_mut();
        let mode = state.stim_cmd_mode;
        let mut finished = 0;
        for (seqs, regs) in state.sequencers.iter_mut().zip(&state.stim_regs) {
            for (seq, regs) in seqs.iter_mut().zip(regs) {
                if seq.advance(samples, regs, mode) {
                    finished += 1;
                }
            }
        }
        if finished > 0 {
            debug!("{finished} stimulation trains ended");
        }
        finished
    }

    /// Abort every waveform and disarm every channel.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn reset_sequencers(&mut self) -> Result<()> {
        self.transport()
            .activate_trigger_in(TriggerIn::SpiStart, spi_start::RESET_SEQUENCERS)?;
        for seq in self.state_mut().sequencers.iter_mut().flatten() {
            seq.reset();
        }
        info!("Stimulation sequencers reset");
        Ok(())
    }

    /// Select how amplifiers are settled.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_amp_settle_mode(&mut self, mode: AmpSettleMode) -> Result<()> {
        self.write_flag(WireIn::ResetRun, reset_run::AMP_SETTLE_MODE, mode == AmpSettleMode::FastSettle)
    }

    /// Select how charge is recovered.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_charge_recovery_mode(&mut self, mode: ChargeRecoveryMode) -> Result<()> {
        self.write_flag(
            WireIn::ResetRun,
            reset_run::CHARGE_RECOVERY_MODE,
            mode == ChargeRecoveryMode::Switch,
        )
    }

    /// Select which headstages settle together.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_global_settle_policy(&mut self, policy: GlobalSettlePolicy) -> Result<()> {
        self.write_wire(WireIn::GlobalSettleSelect, policy.word(), global_settle::MASK)
    }

    /// Host mirror of a channel's sequencer.
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range.
    pub fn sequencer(&self, stream: usize, channel: usize) -> Result<ChannelSequencer> {
        check_channel(stream, channel)?;
        Ok(self.state().sequencers[stream][channel])
    }

    /// Whether a channel's sequencer is armed or running.
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range.
    pub fn is_sequencer_enabled(&self, stream: usize, channel: usize) -> Result<bool> {
        self.sequencer(stream, channel).map(|s| s.is_enabled())
    }

    /// Sequencer table last written for a channel.
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range.
    pub fn stim_registers(&self, stream: usize, channel: usize) -> Result<StimRegisterSet> {
        check_channel(stream, channel)?;
        Ok(self.state().stim_regs[stream][channel])
    }
}
