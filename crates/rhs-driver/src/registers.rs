// SPDX-License-Identifier: AGPL-3.0-only

//! Register programmer
//!
//! Board-configuration wire-ins (clocking, DACs, TTL, LEDs, thresholds) and
//! single chip-register writes through the `MultiUse` strobe.

use crate::board::BoardGuard;
use crate::error::{check_index, Result, RhsError};
use crate::transport::Transport;
use rhs_chip::board::{MAX_NUM_DATA_STREAMS, NUM_BOARD_DACS, NUM_TTL_CHANNELS};
use rhs_chip::command::{ChipCommand, ChipRegisters};
use rhs_chip::endpoints::{
    clock_status, dac_source, reset_run, spi_start, TriggerIn, WireIn, WireOut,
};
use rhs_chip::rates::SampleRate;
use tracing::{debug, info, warn};

/// Polls of the clock status before giving up on DCM programming.
pub const MAX_CLOCK_POLLS: u32 = 1000;

/// Full-scale range of the analog inputs in volts (±).
pub const ANALOG_IN_FULL_SCALE_VOLTS: f64 = 10.24;

/// Whether the FPGA is rated to run at the selected sample rate
#[must_use = "the top sample rate is not guaranteed to stream reliably"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateReliability {
    /// Rated rate
    Reliable,
    /// Rate accepted but data may be lost
    Unreliable,
}

/// IIR coefficient of the DAC high-pass filter for a cutoff at `sample_rate_hz`.
///
/// `65536 · (1 − e^(−2π·fc/fs))`, rounded, kept within `1..=65535`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn dac_highpass_coefficient(cutoff_hz: f64, sample_rate_hz: f64) -> u16 {
    let b = 1.0 - (-2.0 * std::f64::consts::PI * cutoff_hz / sample_rate_hz).exp();
    (65536.0 * b + 0.5).floor().clamp(1.0, 65535.0) as u16
}

/// Offset-binary `AdcThreshold` word for a threshold in volts.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn analog_threshold_word(volts: f64) -> u16 {
    (32768.0 * (volts / ANALOG_IN_FULL_SCALE_VOLTS) + 32768.0)
        .round()
        .clamp(0.0, 65535.0) as u16
}

fn bits_from_flags(flags: &[bool]) -> u32 {
    flags
        .iter()
        .enumerate()
        .filter(|(_, &on)| on)
        .fold(0, |acc, (i, _)| acc | (1 << i))
}

impl<T: Transport> BoardGuard<'_, T> {
    /// Pulse the reset bit and clear host state.
    ///
    /// Stops any run, returns every sequencer to idle and forgets cached FIFO
    /// counts. Wire-in settings other than `ResetRun` are left as written.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn reset_board(&mut self) -> Result<()> {
        self.write_flag(WireIn::ResetRun, reset_run::RESET, true)?;
        self.write_flag(WireIn::ResetRun, reset_run::RESET, false)?;
        let state = self.state_mut();
        state.last_num_words = 0;
        state.num_words_updated = false;
        state.carry.clear();
        for seq in state.sequencers.iter_mut().flatten() {
            seq.reset();
        }
        info!("Board reset");
        Ok(())
    }

    fn wait_for_clock(&mut self, bit: u32, what: &'static str) -> Result<()> {
        for _ in 0..MAX_CLOCK_POLLS {
            if self.read_wire(WireOut::DataClkLocked)? & bit != 0 {
                return Ok(());
            }
        }
        Err(RhsError::NotLocked {
            what,
            attempts: MAX_CLOCK_POLLS,
        })
    }

    /// Reprogram the data clock for a new amplifier sample rate.
    ///
    /// The 40 kHz rate is accepted but reported as [`RateReliability::Unreliable`]
    /// and logged as a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the clock does not lock.
    pub fn set_sample_rate(&mut self, rate: SampleRate) -> Result<RateReliability> {
        self.wait_for_clock(clock_status::DCM_PROG_DONE, "DCM programming done")?;
        self.write_wire(WireIn::DataFreqPll, rate.dcm_word(), 0xffff)?;
        self.transport().activate_trigger_in(TriggerIn::DcmProg, 0)?;
        self.wait_for_clock(clock_status::DATA_CLOCK_LOCKED, "data clock lock")?;
        self.state_mut().sample_rate = rate;
        if rate.is_reliable() {
            info!("Sample rate set to {rate}");
            Ok(RateReliability::Reliable)
        } else {
            warn!("Sample rate {rate} is above the rated maximum; data may be lost");
            Ok(RateReliability::Unreliable)
        }
    }

    /// Current sample rate.
    pub fn sample_rate(&self) -> SampleRate {
        self.state().sample_rate
    }

    /// Current sample rate in Hz.
    pub fn sample_rate_hz(&self) -> f64 {
        self.state().sample_rate.hz()
    }

    /// Enable DSP offset-removal settle on every amplifier.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_dsp_settle(&mut self, enabled: bool) -> Result<()> {
        self.write_flag(WireIn::ResetRun, reset_run::DSP_SETTLE, enabled)
    }

    /// Convert DC amplifiers alongside the AC amplifiers.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn enable_dc_amp_convert(&mut self, enabled: bool) -> Result<()> {
        self.write_wire(WireIn::DcAmpConvert, u32::from(enabled), 1)
    }

    /// Extra idle SPI states per sample period.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_extra_states(&mut self, states: u32) -> Result<()> {
        self.write_wire(WireIn::ExtraStates, states, 0xffff_ffff)
    }

    /// Front-panel LEDs, one flag per LED.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_led_display(&mut self, leds: &[bool; 8]) -> Result<()> {
        self.write_wire(WireIn::LedDisplay, bits_from_flags(leds), 0x00ff)
    }

    /// SPI port status LEDs, one flag per LED.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_spi_led_display(&mut self, leds: &[bool; 8]) -> Result<()> {
        self.write_wire(WireIn::LedDisplay, bits_from_flags(leds) << 8, 0xff00)
    }

    /// Drive the low eight TTL outputs from the stimulation sequencers
    /// (`true`) or from the host (`false`).
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_ttl_out_mode(&mut self, sequencer_driven: &[bool; 8]) -> Result<()> {
        self.write_wire(WireIn::TtlOutMode, bits_from_flags(sequencer_driven), 0x00ff)
    }

    /// Digital inputs, one bit per line.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn ttl_in(&mut self) -> Result<[bool; NUM_TTL_CHANNELS]> {
        let word = self.read_wire(WireOut::TtlIn)?;
        let mut lines = [false; NUM_TTL_CHANNELS];
        for (i, line) in lines.iter_mut().enumerate() {
            *line = word & (1 << i) != 0;
        }
        Ok(lines)
    }

    /// Value output by DACs routed to the manual source.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_dac_manual(&mut self, value: u16) -> Result<()> {
        self.write_wire(WireIn::DacManual, u32::from(value), 0xffff)
    }

    fn dac_endpoint(dac: usize) -> Result<WireIn> {
        check_index("dac", dac, NUM_BOARD_DACS)?;
        WireIn::dac_source(dac).ok_or_else(|| RhsError::out_of_range("dac", dac as i64, 0, 7))
    }

    /// Enable or disable one board DAC.
    ///
    /// # Errors
    ///
    /// Returns error if `dac` is out of range or the transport fails.
    pub fn enable_dac(&mut self, dac: usize, enabled: bool) -> Result<()> {
        let ep = Self::dac_endpoint(dac)?;
        self.write_flag(ep, dac_source::ENABLE, enabled)
    }

    /// Gain applied to all DAC outputs (`2^gain`).
    ///
    /// # Errors
    ///
    /// Returns error if `gain` exceeds 7 or the transport fails.
    pub fn set_dac_gain(&mut self, gain: u32) -> Result<()> {
        if gain > 7 {
            return Err(RhsError::out_of_range("dac gain", gain, 0, 7));
        }
        self.write_wire(WireIn::ResetRun, gain << reset_run::DAC_GAIN_SHIFT, reset_run::DAC_GAIN_MASK)
    }

    /// Audio noise-suppression threshold on DACs 1 and 2.
    ///
    /// # Errors
    ///
    /// Returns error if `level` exceeds 127 or the transport fails.
    pub fn set_audio_noise_suppress(&mut self, level: u32) -> Result<()> {
        if level > 127 {
            return Err(RhsError::out_of_range("noise suppress", level, 0, 127));
        }
        self.write_wire(
            WireIn::ResetRun,
            level << reset_run::NOISE_SUPPRESS_SHIFT,
            reset_run::NOISE_SUPPRESS_MASK,
        )
    }

    /// Route a DAC to a data stream (0-7) or to the manual value (8).
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range or the transport fails.
    pub fn select_dac_data_stream(&mut self, dac: usize, stream: u32) -> Result<()> {
        let ep = Self::dac_endpoint(dac)?;
        if stream > dac_source::MANUAL_STREAM {
            return Err(RhsError::out_of_range("dac stream", stream, 0, dac_source::MANUAL_STREAM));
        }
        self.write_wire(ep, stream << dac_source::STREAM_SHIFT, dac_source::STREAM_MASK)
    }

    /// Select the channel within the DAC's stream (16-31 address the DC amplifiers).
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range or the transport fails.
    pub fn select_dac_data_channel(&mut self, dac: usize, channel: u32) -> Result<()> {
        let ep = Self::dac_endpoint(dac)?;
        if channel > dac_source::CHANNEL_MASK {
            return Err(RhsError::out_of_range("dac channel", channel, 0, dac_source::CHANNEL_MASK));
        }
        self.write_wire(ep, channel, dac_source::CHANNEL_MASK)
    }

    /// Enable the high-pass filter on DAC outputs.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn enable_dac_highpass_filter(&mut self, enabled: bool) -> Result<()> {
        self.write_wire(WireIn::MultiUse, u32::from(enabled), 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::DacHpf, 0)
    }

    /// Set the DAC high-pass cutoff, returning the programmed coefficient.
    ///
    /// The coefficient depends on the sample rate; call again after changing it.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_dac_highpass_filter(&mut self, cutoff_hz: f64) -> Result<u16> {
        let coefficient = dac_highpass_coefficient(cutoff_hz, self.sample_rate_hz());
        debug!("DAC high-pass {cutoff_hz} Hz -> coefficient {coefficient}");
        self.write_wire(WireIn::MultiUse, u32::from(coefficient), 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::DacHpf, 1)?;
        Ok(coefficient)
    }

    /// Threshold and polarity of the digital output driven by a DAC.
    ///
    /// # Errors
    ///
    /// Returns error if `dac` is out of range or the transport fails.
    pub fn set_dac_threshold(&mut self, dac: usize, threshold: u16, trigger_polarity: bool) -> Result<()> {
        check_index("dac", dac, NUM_BOARD_DACS)?;
        let bit = dac as u32;
        self.write_wire(WireIn::MultiUse, u32::from(threshold), 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::DacThresh, bit)?;
        self.write_wire(WireIn::MultiUse, u32::from(trigger_polarity), 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::DacThresh, bit + 8)
    }

    /// Route every DAC to the manual source and set it to mid-scale.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_all_dacs_to_zero(&mut self) -> Result<()> {
        self.set_dac_manual(0x8000)?;
        for dac in 0..NUM_BOARD_DACS {
            self.select_dac_data_stream(dac, dac_source::MANUAL_STREAM)?;
        }
        Ok(())
    }

    /// Channel subtracted from every DAC output when re-referencing is on.
    ///
    /// # Errors
    ///
    /// Returns error if an index is out of range or the transport fails.
    pub fn set_dac_reref_source(&mut self, stream: u32, channel: u32) -> Result<()> {
        if stream >= dac_source::MANUAL_STREAM {
            return Err(RhsError::out_of_range("reref stream", stream, 0, dac_source::MANUAL_STREAM - 1));
        }
        if channel > dac_source::CHANNEL_MASK {
            return Err(RhsError::out_of_range("reref channel", channel, 0, dac_source::CHANNEL_MASK));
        }
        self.write_wire(
            WireIn::DacReref,
            (stream << dac_source::STREAM_SHIFT) | channel,
            dac_source::STREAM_MASK | dac_source::CHANNEL_MASK,
        )
    }

    /// Enable DAC re-referencing.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn enable_dac_reref(&mut self, enabled: bool) -> Result<()> {
        self.write_flag(WireIn::DacReref, dac_source::ENABLE, enabled)
    }

    /// Analog-input stimulation trigger threshold, in volts.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_analog_in_trigger_threshold(&mut self, volts: f64) -> Result<()> {
        let word = analog_threshold_word(volts);
        if volts.abs() > ANALOG_IN_FULL_SCALE_VOLTS {
            warn!("Analog trigger threshold {volts} V clamped to full scale");
        }
        self.write_wire(WireIn::AdcThreshold, u32::from(word), 0xffff)
    }

    /// Send auxiliary command results on every stream.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn enable_aux_commands_on_all_streams(&mut self) -> Result<()> {
        self.write_wire(WireIn::AuxEnable, 0x00ff, 0x00ff)
    }

    /// Send auxiliary command results on a single stream only.
    ///
    /// # Errors
    ///
    /// Returns error if `stream` is out of range or the transport fails.
    pub fn enable_aux_commands_on_one_stream(&mut self, stream: usize) -> Result<()> {
        check_index("stream", stream, MAX_NUM_DATA_STREAMS)?;
        self.write_wire(WireIn::AuxEnable, 1 << stream, 0x00ff)
    }

    /// Board mode reported by the bitfile.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn board_mode(&mut self) -> Result<u32> {
        self.read_wire(WireOut::BoardMode)
    }

    /// Board ID and bitfile version.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn board_id_and_version(&mut self) -> Result<(u32, u32)> {
        let t = self.transport();
        t.update_wire_outs()?;
        Ok((t.wire_out(WireOut::BoardId), t.wire_out(WireOut::BoardVersion)))
    }

    /// Whether the data clock is locked.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn is_data_clock_locked(&mut self) -> Result<bool> {
        Ok(self.read_wire(WireOut::DataClkLocked)? & clock_status::DATA_CLOCK_LOCKED != 0)
    }

    /// Shift one command out to every chip, outside the auxiliary command stream.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn configure_register(&mut self, command: ChipCommand) -> Result<()> {
        let word = command.encode();
        debug!("Chip register command {word:#010x}");
        self.write_wire(WireIn::MultiUse, word, 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::SpiStart, spi_start::REGISTER_WRITE)
    }

    /// Write every register of `regs` to the chips, in address order.
    ///
    /// Returns the number of registers written. A failure part-way leaves the
    /// chips partially configured; re-issue the whole bank.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn configure_chip(&mut self, regs: &ChipRegisters) -> Result<usize> {
        let mut written = 0;
        for reg in regs.addresses() {
            if let Some(cmd) = regs.write_command(reg) {
                self.configure_register(cmd)?;
                written += 1;
            }
        }
        info!("Configured {written} chip registers");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::{MockTransport, TransportOp};
    use crate::Board;

    fn board() -> (Board<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        (Board::open(mock.clone()).unwrap(), mock)
    }

    #[test]
    fn sample_rate_round_trips_for_every_rate() {
        let (board, mock) = board();
        let mut guard = board.lock();
        for rate in SampleRate::ALL {
            let reliability = guard.set_sample_rate(rate).unwrap();
            assert_eq!(reliability == RateReliability::Reliable, rate.is_reliable());
            assert_eq!(guard.sample_rate(), rate);
            assert!((guard.sample_rate_hz() - rate.hz()).abs() < 1e-9);
            assert_eq!(SampleRate::from_dcm_word(mock.wire_in(WireIn::DataFreqPll)), Some(rate));
        }
    }

    #[test]
    fn unlocked_clock_times_out() {
        let (board, mock) = board();
        mock.set_wire_out(WireOut::DataClkLocked, clock_status::DCM_PROG_DONE);
        let err = board.lock().set_sample_rate(SampleRate::Hz20000).unwrap_err();
        assert!(matches!(err, RhsError::NotLocked { what: "data clock lock", .. }));
        assert_eq!(board.lock().sample_rate(), SampleRate::Hz30000);
    }

    #[test]
    fn dac_routing_fields() {
        let (board, mock) = board();
        let mut guard = board.lock();
        guard.enable_dac(2, true).unwrap();
        guard.select_dac_data_stream(2, 5).unwrap();
        guard.select_dac_data_channel(2, 13).unwrap();
        assert_eq!(mock.wire_in(WireIn::DacSource3), (1 << 9) | (5 << 5) | 13);
        assert!(guard.enable_dac(8, true).is_err());
        assert!(guard.select_dac_data_stream(0, 9).is_err());
    }

    #[test]
    fn reset_run_fields_share_one_wire() {
        let (board, mock) = board();
        let mut guard = board.lock();
        guard.set_dac_gain(5).unwrap();
        guard.set_audio_noise_suppress(100).unwrap();
        guard.set_dsp_settle(true).unwrap();
        assert_eq!(
            mock.wire_in(WireIn::ResetRun),
            (5 << 13) | (100 << 6) | reset_run::DSP_SETTLE
        );
        assert!(guard.set_dac_gain(8).is_err());
    }

    #[test]
    fn threshold_words() {
        assert_eq!(analog_threshold_word(0.0), 32768);
        assert_eq!(analog_threshold_word(20.0), 65535);
        assert_eq!(analog_threshold_word(-10.24), 0);
        assert_eq!(analog_threshold_word(5.12), 49152);
    }

    #[test]
    fn highpass_coefficient_range() {
        let c = dac_highpass_coefficient(300.0, 30_000.0);
        let expected = (65536.0 * (1.0 - (-2.0 * std::f64::consts::PI * 0.01_f64).exp()) + 0.5).floor();
        assert_eq!(f64::from(c), expected);
        assert_eq!(dac_highpass_coefficient(0.0, 30_000.0), 1);
        assert_eq!(dac_highpass_coefficient(1.0e9, 30_000.0), 65535);
    }

    #[test]
    fn highpass_programs_multi_use_then_strobe() {
        let (board, mock) = board();
        mock.clear_ops();
        let c = board.lock().set_dac_highpass_filter(250.0).unwrap();
        assert_eq!(mock.wire_in(WireIn::MultiUse), u32::from(c));
        assert_eq!(
            mock.ops().last(),
            Some(&TransportOp::ActivateTriggerIn { ep: TriggerIn::DacHpf, bit: 1 })
        );
    }

    #[test]
    fn led_and_ttl_masks() {
        let (board, mock) = board();
        let mut guard = board.lock();
        guard.set_led_display(&[true, false, true, false, false, false, false, true]).unwrap();
        guard.set_spi_led_display(&[true; 8]).unwrap();
        assert_eq!(mock.wire_in(WireIn::LedDisplay), 0xff85);
        guard.set_ttl_out_mode(&[false, true, false, false, false, false, false, false]).unwrap();
        assert_eq!(mock.wire_in(WireIn::TtlOutMode), 0b10);
        mock.set_wire_out(WireOut::TtlIn, 0x8001);
        let lines = guard.ttl_in().unwrap();
        assert!(lines[0] && lines[15] && !lines[1]);
    }

    #[test]
    fn configure_chip_strobes_every_register() {
        let (board, mock) = board();
        let regs = ChipRegisters::new();
        let written = board.lock().configure_chip(&regs).unwrap();
        assert_eq!(written, regs.len());
        let words = mock.register_writes();
        assert_eq!(words.len(), regs.len());
        assert_eq!(words[0], regs.write_command(0).unwrap().encode());
    }

    #[test]
    fn identity_queries() {
        let (board, _mock) = board();
        let mut guard = board.lock();
        assert_eq!(guard.board_mode().unwrap(), 14);
        assert_eq!(guard.board_id_and_version().unwrap().0, 800);
        assert!(guard.is_data_clock_locked().unwrap());
    }

    #[test]
    fn all_dacs_to_zero_routes_manual() {
        let (board, mock) = board();
        board.lock().set_all_dacs_to_zero().unwrap();
        assert_eq!(mock.wire_in(WireIn::DacManual), 0x8000);
        assert_eq!(mock.wire_in(WireIn::DacSource8), 8 << 5);
    }
}
