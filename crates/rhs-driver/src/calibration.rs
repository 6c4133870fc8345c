// SPDX-License-Identifier: AGPL-3.0-only

//! Cable delay calibration
//!
//! MISO data returning from a headstage is late by the cable round trip plus a
//! fixed I/O latency. The board compensates by sampling each port a whole
//! number of data-clock periods later; that count is the cable delay. One
//! delay step corresponds to a length that depends on the sample rate (about
//! one metre at 30 kHz), so converting a length to a delay and back is only
//! accurate to within that quantum.

use crate::board::BoardGuard;
use crate::error::Result;
use crate::transport::Transport;
use rhs_chip::board::{BoardPort, MAX_CABLE_DELAY, MAX_NUM_SPI_PORTS};
use rhs_chip::endpoints::WireIn;
use rhs_chip::rates::{SampleRate, CLOCKS_PER_SAMPLE};
use tracing::{debug, warn};

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Signal velocity in the headstage cable as a fraction of c.
pub const CABLE_VELOCITY_FACTOR: f64 = 0.555;

/// Round-trip latency outside the cable (s): FPGA output, LVDS driver,
/// LVDS receiver and FPGA input.
pub const IO_DELAY_SECONDS: f64 = (1.9 + 9.0 + 1.4 + 6.7) * 1.0e-9;

/// Metres per foot.
pub const METERS_PER_FOOT: f64 = 0.3048;

fn cable_velocity() -> f64 {
    CABLE_VELOCITY_FACTOR * SPEED_OF_LIGHT
}

/// Duration of one data-clock period at `rate` (s).
fn clock_step(rate: SampleRate) -> f64 {
    1.0 / (CLOCKS_PER_SAMPLE * rate.hz())
}

/// Delay setting for a cable of `meters` at `rate`, at least 1.
///
/// Not limited to [`MAX_CABLE_DELAY`]; the board setter clamps.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn cable_delay_for_length(meters: f64, rate: SampleRate) -> u32 {
    let round_trip = 2.0 * meters / cable_velocity() + IO_DELAY_SECONDS;
    let delay = (round_trip / clock_step(rate) + 1.5).floor();
    if delay.is_nan() || delay < 1.0 {
        1
    } else {
        delay as u32
    }
}

/// Cable length in metres implied by a delay setting at `rate`, never negative.
pub fn cable_length_for_delay(delay: u32, rate: SampleRate) -> f64 {
    let round_trip = f64::from(delay.saturating_sub(1)) * clock_step(rate) - IO_DELAY_SECONDS;
    (cable_velocity() * round_trip / 2.0).max(0.0)
}

/// Cable length covered by one delay step at `rate` (m).
pub fn calibration_quantum(rate: SampleRate) -> f64 {
    cable_velocity() * clock_step(rate) / 2.0
}

/// Feet to metres.
pub fn feet_to_meters(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

/// Metres to feet.
pub fn meters_to_feet(meters: f64) -> f64 {
    meters / METERS_PER_FOOT
}

impl<T: Transport> BoardGuard<'_, T> {
    /// Set one port's MISO sampling delay in data-clock periods.
    ///
    /// Values above the 4-bit field are clamped with a warning. Returns the
    /// delay written.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_cable_delay(&mut self, port: BoardPort, delay: u32) -> Result<u8> {
        let written = if delay > u32::from(MAX_CABLE_DELAY) {
            warn!("Cable delay {delay} for port {port:?} out of range, using {MAX_CABLE_DELAY}");
            MAX_CABLE_DELAY
        } else {
            delay as u8
        };
        let shift = port.miso_delay_shift();
        self.write_wire(WireIn::MisoDelay, u32::from(written) << shift, 0xf << shift)?;
        self.state_mut().cable_delays[port.index()] = written;
        debug!("Port {port:?} cable delay {written}");
        Ok(written)
    }

    /// Set one port's delay from a cable length at the current sample rate.
    ///
    /// Must be repeated after a sample-rate change.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_cable_length_meters(&mut self, port: BoardPort, meters: f64) -> Result<u8> {
        let delay = cable_delay_for_length(meters, self.sample_rate());
        self.set_cable_delay(port, delay)
    }

    /// [`set_cable_length_meters`](Self::set_cable_length_meters) in feet.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_cable_length_feet(&mut self, port: BoardPort, feet: f64) -> Result<u8> {
        self.set_cable_length_meters(port, feet_to_meters(feet))
    }

    /// Delay last written for a port.
    pub fn cable_delay(&self, port: BoardPort) -> u8 {
        self.state().cable_delays[port.index()]
    }

    /// Delays last written, by port index.
    pub fn cable_delays(&self) -> [u8; MAX_NUM_SPI_PORTS] {
        self.state().cable_delays
    }

    /// Cable length implied by `delay` at the current sample rate (m).
    pub fn estimate_cable_length_meters(&self, delay: u32) -> f64 {
        cable_length_for_delay(delay, self.sample_rate())
    }

    /// Cable length implied by `delay` at the current sample rate (ft).
    pub fn estimate_cable_length_feet(&self, delay: u32) -> f64 {
        meters_to_feet(self.estimate_cable_length_meters(delay))
    }

    /// Length resolution of the delay setting at the current sample rate (m).
    pub fn calibration_quantum_meters(&self) -> f64 {
        calibration_quantum(self.sample_rate())
    }
}
