// SPDX-License-Identifier: AGPL-3.0-only

//! Amplifier sample rates and the data-clock synthesis table.
//!
//! The FPGA derives its SPI data clock from a 100 MHz reference through a
//! digital clock manager:
//!
//! ```text
//! data clock = 100 MHz × (M / D) / 2
//! ```
//!
//! One sample period is 2800 data-clock cycles (20 SPI commands of 140
//! cycles each), so every entry below satisfies
//! `100e6 × M / D / 2 == 2800 × sample rate`.
//! M must lie in 2-256, D in 1-256.

/// Reference clock feeding the DCM (Hz).
pub const REFERENCE_CLOCK_HZ: f64 = 100.0e6;

/// Data-clock cycles per amplifier sample period.
pub const CLOCKS_PER_SAMPLE: f64 = 2800.0;

/// Supported amplifier sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleRate {
    /// 1.00 kS/s
    Hz1000,
    /// 1.25 kS/s
    Hz1250,
    /// 1.50 kS/s
    Hz1500,
    /// 2.00 kS/s
    Hz2000,
    /// 2.50 kS/s
    Hz2500,
    /// 3.00 kS/s
    Hz3000,
    /// 3.33 kS/s
    Hz3333,
    /// 4.00 kS/s
    Hz4000,
    /// 5.00 kS/s
    Hz5000,
    /// 6.25 kS/s
    Hz6250,
    /// 8.00 kS/s
    Hz8000,
    /// 10.0 kS/s
    Hz10000,
    /// 12.5 kS/s
    Hz12500,
    /// 15.0 kS/s
    Hz15000,
    /// 20.0 kS/s
    Hz20000,
    /// 25.0 kS/s
    Hz25000,
    /// 30.0 kS/s
    Hz30000,
    /// 40.0 kS/s. The FPGA does not run reliably at this rate.
    Hz40000,
}

impl SampleRate {
    /// Every rate, slowest first.
    pub const ALL: [Self; 18] = [
        Self::Hz1000,
        Self::Hz1250,
        Self::Hz1500,
        Self::Hz2000,
        Self::Hz2500,
        Self::Hz3000,
        Self::Hz3333,
        Self::Hz4000,
        Self::Hz5000,
        Self::Hz6250,
        Self::Hz8000,
        Self::Hz10000,
        Self::Hz12500,
        Self::Hz15000,
        Self::Hz20000,
        Self::Hz25000,
        Self::Hz30000,
        Self::Hz40000,
    ];

    /// DCM multiply (M) and divide (D) values.
    #[must_use]
    pub const fn dcm_multiply_divide(self) -> (u32, u32) {
        match self {
            Self::Hz1000 => (7, 125),
            Self::Hz1250 => (7, 100),
            Self::Hz1500 => (21, 250),
            Self::Hz2000 => (14, 125),
            Self::Hz2500 => (35, 250),
            Self::Hz3000 => (21, 125),
            Self::Hz3333 => (14, 75),
            Self::Hz4000 => (28, 125),
            Self::Hz5000 => (7, 25),
            Self::Hz6250 => (7, 20),
            Self::Hz8000 => (112, 250),
            Self::Hz10000 => (14, 25),
            Self::Hz12500 => (7, 10),
            Self::Hz15000 => (21, 25),
            Self::Hz20000 => (28, 25),
            Self::Hz25000 => (35, 25),
            Self::Hz30000 => (42, 25),
            Self::Hz40000 => (56, 25),
        }
    }

    /// Value written to the `DataFreqPll` wire-in: `256 × M + D`.
    #[must_use]
    pub const fn dcm_word(self) -> u32 {
        let (m, d) = self.dcm_multiply_divide();
        256 * m + d
    }

    /// Inverse of [`SampleRate::dcm_word`].
    #[must_use]
    pub fn from_dcm_word(word: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.dcm_word() == word)
    }

    /// Sample rate in Hz, derived from the clock table.
    #[must_use]
    pub fn hz(self) -> f64 {
        self.system_clock_hz() / CLOCKS_PER_SAMPLE
    }

    /// Data-clock frequency the DCM produces for this rate (Hz).
    #[must_use]
    pub fn system_clock_hz(self) -> f64 {
        let (m, d) = self.dcm_multiply_divide();
        REFERENCE_CLOCK_HZ * f64::from(m) / f64::from(d) / 2.0
    }

    /// Whether the FPGA runs reliably at this rate.
    #[must_use]
    pub const fn is_reliable(self) -> bool {
        !matches!(self, Self::Hz40000)
    }

    /// Look up a rate from its nominal value in Hz (3333 and 3333.33 both match `Hz3333`).
    #[must_use]
    pub fn from_hz(hz: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| (r.hz() - hz).abs() < 0.5)
    }
}

impl std::fmt::Display for SampleRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.0} Hz", self.hz())
    }
}
