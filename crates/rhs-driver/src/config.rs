// SPDX-License-Identifier: AGPL-3.0-only

//! Whole-board configuration
//!
//! A failed write partway through a configuration sequence leaves the board
//! in an unknown mix of old and new settings. There is no rollback; recover by
//! applying a complete [`BoardConfig`] again.

use crate::board::{Board, BoardGuard};
use crate::error::Result;
use crate::registers::RateReliability;
use crate::stimulation::{AmpSettleMode, ChargeRecoveryMode, GlobalSettlePolicy};
use crate::streams::DataStreamEnableMap;
use crate::transport::Transport;
use rhs_chip::board::{BoardPort, MAX_NUM_SPI_PORTS, NUM_BOARD_DACS, NUM_MANUAL_TRIGGERS};
use rhs_chip::rates::SampleRate;
use tracing::{info, warn};

/// Default headstage cable length: 3 ft.
pub const DEFAULT_CABLE_LENGTH_METERS: f64 = 0.9144;

/// Mid-scale value for DAC outputs and thresholds.
const DAC_MIDSCALE: u16 = 0x8000;

/// Board settings applied together
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    /// Amplifier sample rate
    pub sample_rate: SampleRate,
    /// Headstage cable length per port, metres
    pub cable_length_meters: [f64; MAX_NUM_SPI_PORTS],
    /// Enabled data streams
    pub streams: DataStreamEnableMap,
    /// DSP offset-removal settle
    pub dsp_settle: bool,
    /// Report DC amplifier conversions in the data frame
    pub dc_amp_convert: bool,
    /// Amplifier settle method
    pub amp_settle_mode: AmpSettleMode,
    /// Charge recovery method
    pub charge_recovery_mode: ChargeRecoveryMode,
    /// Settle scope
    pub global_settle: GlobalSettlePolicy,
    /// Analog-input trigger threshold, volts
    pub analog_in_trigger_threshold_volts: f64,
    /// DAC high-pass filter enabled
    pub dac_highpass_enabled: bool,
    /// DAC high-pass cutoff, Hz
    pub dac_highpass_cutoff_hz: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz30000,
            cable_length_meters: [DEFAULT_CABLE_LENGTH_METERS; MAX_NUM_SPI_PORTS],
            streams: DataStreamEnableMap::from_mask(0x01),
            dsp_settle: false,
            dc_amp_convert: true,
            amp_settle_mode: AmpSettleMode::default(),
            charge_recovery_mode: ChargeRecoveryMode::default(),
            global_settle: GlobalSettlePolicy::default(),
            analog_in_trigger_threshold_volts: 1.65,
            dac_highpass_enabled: false,
            dac_highpass_cutoff_hz: 250.0,
        }
    }
}

impl<T: Transport> BoardGuard<'_, T> {
    /// Apply every setting in `config`.
    ///
    /// The sample rate is set first; cable delays and the DAC filter
    /// coefficient are derived from it.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the clock does not lock. The
    /// board may then be partially configured.
    pub fn apply_config(&mut self, config: &BoardConfig) -> Result<RateReliability> {
        let reliability = self.set_sample_rate(config.sample_rate)?;
        for port in BoardPort::ALL {
            self.set_cable_length_meters(port, config.cable_length_meters[port.index()])?;
        }
        self.set_data_streams(config.streams)?;
        self.set_dsp_settle(config.dsp_settle)?;
        self.enable_dc_amp_convert(config.dc_amp_convert)?;
        self.set_amp_settle_mode(config.amp_settle_mode)?;
        self.set_charge_recovery_mode(config.charge_recovery_mode)?;
        self.set_global_settle_policy(config.global_settle)?;
        self.set_analog_in_trigger_threshold(config.analog_in_trigger_threshold_volts)?;
        self.set_dac_highpass_filter(config.dac_highpass_cutoff_hz)?;
        self.enable_dac_highpass_filter(config.dac_highpass_enabled)?;
        Ok(reliability)
    }

    /// Reset the board and bring every setting to a known state.
    ///
    /// Stops acquisition, disables stimulation, routes DACs off, releases
    /// the manual triggers and applies [`BoardConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the clock does not lock.
    pub fn initialize(&mut self) -> Result<()> {
        self.reset_board()?;
        self.set_continuous_run_mode(false)?;
        self.set_max_time_step(0)?;
        if self.apply_config(&BoardConfig::default())? == RateReliability::Unreliable {
            warn!("Default sample rate {} is above the rated maximum", self.sample_rate());
        }
        self.set_extra_states(0)?;
        self.set_stim_cmd_mode(false)?;
        self.enable_aux_commands_on_all_streams()?;
        self.set_ttl_out_mode(&[false; 8])?;
        self.set_led_display(&[false; 8])?;

        for dac in 0..NUM_BOARD_DACS {
            self.enable_dac(dac, false)?;
            self.select_dac_data_stream(dac, 0)?;
            self.select_dac_data_channel(dac, 0)?;
            self.set_dac_threshold(dac, DAC_MIDSCALE, true)?;
        }
        self.set_dac_manual(DAC_MIDSCALE)?;
        self.set_dac_gain(0)?;
        self.set_audio_noise_suppress(0)?;
        self.enable_dac_reref(false)?;

        for trigger in 0..NUM_MANUAL_TRIGGERS {
            self.set_manual_stim_trigger(trigger, false)?;
        }
        self.reset_sequencers()?;
        info!("Board initialized");
        Ok(())
    }
}

impl<T: Transport> Board<T> {
    /// Lock the board and run [`BoardGuard::initialize`].
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the clock does not lock.
    pub fn initialize(&self) -> Result<()> {
        self.lock().initialize()
    }

    /// Lock the board and run [`BoardGuard::apply_config`].
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the clock does not lock.
    pub fn apply_config(&self, config: &BoardConfig) -> Result<RateReliability> {
        self.lock().apply_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::MockTransport;
    use crate::RhsError;
    use rhs_chip::endpoints::WireIn;

    #[test]
    fn initialize_applies_defaults() {
        let mock = MockTransport::new();
        let board = Board::open(mock.clone()).unwrap();
        board.initialize().unwrap();
        assert_eq!(mock.wire_in(WireIn::DataStreamEn), 0x01);
        assert_eq!(mock.wire_in(WireIn::DataFreqPll), SampleRate::Hz30000.dcm_word());
        assert_eq!(mock.wire_in(WireIn::MisoDelay), 0x4444);
        assert_eq!(mock.wire_in(WireIn::StimCmdMode), 0);
        assert_eq!(mock.wire_in(WireIn::DacManual), 0x8000);
        let guard = board.lock();
        assert_eq!(guard.cable_delays(), [4; 4]);
        assert!(!guard.stim_cmd_mode());
        assert!(guard.sample_rate().is_reliable());
    }

    #[test]
    fn unreliable_rate_is_reported() {
        let board = Board::open(MockTransport::new()).unwrap();
        let config = BoardConfig {
            sample_rate: SampleRate::Hz40000,
            ..BoardConfig::default()
        };
        assert_eq!(board.apply_config(&config).unwrap(), RateReliability::Unreliable);
        assert_eq!(board.lock().sample_rate(), SampleRate::Hz40000);
    }

    #[test]
    fn reapplying_recovers_after_failure() {
        let mock = MockTransport::new();
        let board = Board::open(mock.clone()).unwrap();
        let config = BoardConfig {
            streams: DataStreamEnableMap::first(4).unwrap(),
            ..BoardConfig::default()
        };
        mock.fail_after(12);
        assert!(matches!(board.apply_config(&config), Err(RhsError::Transport { .. })));
        board.apply_config(&config).unwrap();
        assert_eq!(mock.wire_in(WireIn::DataStreamEn), 0x0f);
        assert_eq!(board.lock().num_enabled_data_streams(), 4);
    }
}
