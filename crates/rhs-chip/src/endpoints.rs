// SPDX-License-Identifier: AGPL-3.0-only

//! Front-panel endpoint map of the Rhythm Stim bitfile.
//!
//! The USB bridge exposes four kinds of endpoint, each in its own address
//! range. They are modelled as separate closed enums so an address of one
//! kind can never be passed where another is expected.
//!
//! ```text
//! 0x00-0x1f  wire-in     host → FPGA static values (latched on update)
//! 0x20-0x3f  wire-out    FPGA → host static values (sampled on update)
//! 0x40-0x5f  trigger-in  host → FPGA one-shot strobes (bit-addressed)
//! 0x80-0x9f  pipe-in     host → FPGA byte streams
//! 0xa0-0xbf  pipe-out    FPGA → host byte streams (block transfers)
//! ```

/// Wire-in endpoints (host → FPGA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum WireIn {
    /// Reset, run mode, DSP settle, settle/recovery modes, audio and DAC gain.
    ResetRun = 0x00,
    /// Low 16 bits of the fixed-length run time step count.
    MaxTimeStepLsb = 0x01,
    /// High 16 bits of the fixed-length run time step count.
    MaxTimeStepMsb = 0x02,
    /// DCM multiply/divide word for the data clock PLL.
    DataFreqPll = 0x03,
    /// Per-port 4-bit MISO sampling delays.
    MisoDelay = 0x04,
    /// Global gate for stimulation output from the command streams.
    StimCmdMode = 0x05,
    /// Sequencer register address (stream, channel, register).
    StimRegAddr = 0x06,
    /// Sequencer register value.
    StimRegWord = 0x07,
    /// DC amplifier conversion enable.
    DcAmpConvert = 0x08,
    /// Extra idle states appended to each SPI cycle.
    ExtraStates = 0x09,
    /// DAC re-referencing source and enable.
    DacReref = 0x0a,
    /// Per-stream auxiliary command enable mask.
    AuxEnable = 0x0c,
    /// Global amplifier settle policy.
    GlobalSettleSelect = 0x0d,
    /// Analog-in trigger threshold.
    AdcThreshold = 0x0f,
    /// Serial digital input control.
    SerialDigitalInCntl = 0x10,
    /// LED display (low byte) and SPI port LEDs (high byte).
    LedDisplay = 0x11,
    /// Manual (key-press) stimulation triggers.
    ManualTriggers = 0x12,
    /// TTL output mode bits.
    TtlOutMode = 0x13,
    /// Data stream enable mask.
    DataStreamEn = 0x14,
    /// DAC 1 source selection.
    DacSource1 = 0x16,
    /// DAC 2 source selection.
    DacSource2 = 0x17,
    /// DAC 3 source selection.
    DacSource3 = 0x18,
    /// DAC 4 source selection.
    DacSource4 = 0x19,
    /// DAC 5 source selection.
    DacSource5 = 0x1a,
    /// DAC 6 source selection.
    DacSource6 = 0x1b,
    /// DAC 7 source selection.
    DacSource7 = 0x1c,
    /// DAC 8 source selection.
    DacSource8 = 0x1d,
    /// Manual DAC output value.
    DacManual = 0x1e,
    /// Shared operand for strobed operations (aux lengths, DAC thresholds, HPF, register writes).
    MultiUse = 0x1f,
}

impl WireIn {
    /// Endpoint address.
    #[must_use]
    pub const fn addr(self) -> u8 {
        self as u8
    }

    /// DAC source endpoint for a zero-based DAC channel.
    #[must_use]
    pub const fn dac_source(dac_channel: usize) -> Option<Self> {
        match dac_channel {
            0 => Some(Self::DacSource1),
            1 => Some(Self::DacSource2),
            2 => Some(Self::DacSource3),
            3 => Some(Self::DacSource4),
            4 => Some(Self::DacSource5),
            5 => Some(Self::DacSource6),
            6 => Some(Self::DacSource7),
            7 => Some(Self::DacSource8),
            _ => None,
        }
    }
}

/// Trigger-in endpoints (host → FPGA strobes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TriggerIn {
    /// Reprogram the data clock DCM from `DataFreqPll`.
    DcmProg = 0x40,
    /// SPI engine control: start run, reset sequencers, single register write.
    SpiStart = 0x41,
    /// Command RAM address reset (bit 0) and sequencer register write (bit 1).
    RamAddrReset = 0x42,
    /// Latch a DAC threshold (bits 0-7) or threshold polarity (bits 8-15).
    DacThresh = 0x43,
    /// DAC high-pass filter enable (bit 0) and coefficient (bit 1).
    DacHpf = 0x44,
    /// Auxiliary command end index (bits 0-3) and loop index (bits 4-7).
    AuxCmdLength = 0x45,
}

impl TriggerIn {
    /// Endpoint address.
    #[must_use]
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// Wire-out endpoints (FPGA → host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum WireOut {
    /// FIFO word count, low 16 bits.
    NumWordsLsb = 0x20,
    /// FIFO word count, high 16 bits.
    NumWordsMsb = 0x21,
    /// SPI engine running flag.
    SpiRunning = 0x22,
    /// TTL input levels.
    TtlIn = 0x23,
    /// Data clock locked (bit 0) and DCM programming done (bit 1).
    DataClkLocked = 0x24,
    /// Board mode.
    BoardMode = 0x25,
    /// Serial digital input word.
    SerialDigitalIn = 0x26,
    /// Board ID of the loaded bitfile.
    BoardId = 0x3e,
    /// Bitfile version.
    BoardVersion = 0x3f,
}

impl WireOut {
    /// Endpoint address.
    #[must_use]
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// Pipe-in endpoints (host → FPGA command RAM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PipeIn {
    /// Auxiliary command slot 1, most significant half-words.
    AuxCmd1Msw = 0x80,
    /// Auxiliary command slot 1, least significant half-words.
    AuxCmd1Lsw = 0x81,
    /// Auxiliary command slot 2, most significant half-words.
    AuxCmd2Msw = 0x82,
    /// Auxiliary command slot 2, least significant half-words.
    AuxCmd2Lsw = 0x83,
    /// Auxiliary command slot 3, most significant half-words.
    AuxCmd3Msw = 0x84,
    /// Auxiliary command slot 3, least significant half-words.
    AuxCmd3Lsw = 0x85,
    /// Auxiliary command slot 4, most significant half-words.
    AuxCmd4Msw = 0x86,
    /// Auxiliary command slot 4, least significant half-words.
    AuxCmd4Lsw = 0x87,
}

impl PipeIn {
    /// Endpoint address.
    #[must_use]
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// Pipe-out endpoints (FPGA → host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PipeOut {
    /// Sample data drained from the SDRAM FIFO.
    Data = 0xa0,
}

impl PipeOut {
    /// Endpoint address.
    #[must_use]
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// `ResetRun` wire-in bit fields.
pub mod reset_run {
    /// Hold the board in reset.
    pub const RESET: u32 = 1 << 0;
    /// Run continuously instead of for `MaxTimeStep` samples.
    pub const CONTINUOUS: u32 = 1 << 1;
    /// Enable DSP offset-removal settle.
    pub const DSP_SETTLE: u32 = 1 << 2;
    /// Amplifier settle by fast-settle instead of lower-bandwidth switch.
    pub const AMP_SETTLE_MODE: u32 = 1 << 3;
    /// Charge recovery by switch instead of current-limited driver.
    pub const CHARGE_RECOVERY_MODE: u32 = 1 << 4;
    /// Audio noise suppression field (7 bits).
    pub const NOISE_SUPPRESS_SHIFT: u32 = 6;
    /// Mask of the audio noise suppression field.
    pub const NOISE_SUPPRESS_MASK: u32 = 0x7f << NOISE_SUPPRESS_SHIFT;
    /// DAC gain field (3 bits).
    pub const DAC_GAIN_SHIFT: u32 = 13;
    /// Mask of the DAC gain field.
    pub const DAC_GAIN_MASK: u32 = 0x7 << DAC_GAIN_SHIFT;
}

/// `DacSourceN` and `DacReref` wire-in bit fields.
pub mod dac_source {
    /// Channel-within-stream field.
    pub const CHANNEL_MASK: u32 = 0x001f;
    /// Stream field shift.
    pub const STREAM_SHIFT: u32 = 5;
    /// Stream field mask (streams 0-7, 8 selects the manual DAC value).
    pub const STREAM_MASK: u32 = 0xf << STREAM_SHIFT;
    /// Output enable.
    pub const ENABLE: u32 = 1 << 9;
    /// Stream value routing the manual DAC register to an output.
    pub const MANUAL_STREAM: u32 = 8;
}

/// `DataClkLocked` wire-out bits.
pub mod clock_status {
    /// Data clock PLL has locked.
    pub const DATA_CLOCK_LOCKED: u32 = 1 << 0;
    /// DCM reprogramming has completed.
    pub const DCM_PROG_DONE: u32 = 1 << 1;
}

/// `SpiStart` trigger bits.
pub mod spi_start {
    /// Start a run.
    pub const RUN: u32 = 0;
    /// Reset every stimulation sequencer to idle.
    pub const RESET_SEQUENCERS: u32 = 1;
    /// Shift the command word in `MultiUse` out as a single register write.
    pub const REGISTER_WRITE: u32 = 2;
}

/// `RamAddrReset` trigger bits.
pub mod ram_addr_reset {
    /// Rewind the command RAM write pointer before a pipe upload.
    pub const COMMAND_RAM: u32 = 0;
    /// Latch `StimRegAddr`/`StimRegWord` into the sequencer table.
    pub const STIM_REGISTER: u32 = 1;
}

/// `GlobalSettleSelect` wire-in bits.
pub mod global_settle {
    /// Settle the whole headstage on a port when any of its channels settles; bit `n` for port `n`.
    pub const PORT_MASK: u32 = 0x0f;
    /// Settle every headstage together.
    pub const ALL_HEADSTAGES: u32 = 1 << 4;
    /// All defined bits.
    pub const MASK: u32 = PORT_MASK | ALL_HEADSTAGES;
}
