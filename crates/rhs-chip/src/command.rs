// SPDX-License-Identifier: AGPL-3.0-only

//! RHS2000 command words and the auxiliary command RAM.
//!
//! Every sample period the FPGA sends each chip 16 `CONVERT` commands (one per
//! amplifier) followed by one command from each of four auxiliary slots. The
//! auxiliary slots step through host-uploaded command lists held in on-board
//! RAM, looping between a loop index and an end index.
//!
//! ## Command format (32 bits, MSB first)
//!
//! ```text
//! CONVERT(C)    00UM DH00 00CC CCCC 0000 0000 0000 0000
//! CALIBRATE     0101 0101 0000 0000 0000 0000 0000 0000
//! CLEAR         0110 1010 0000 0000 0000 0000 0000 0000
//! WRITE(R, D)   10UM 0000 RRRR RRRR DDDD DDDD DDDD DDDD
//! READ(R)       11UM 0000 RRRR RRRR 0000 0000 0000 0000
//! ```
//!
//! U latches triggered registers, M clears compliance monitor history,
//! D selects DC-amplifier conversion, H marks a high-pass filter reset.

use crate::endpoints::PipeIn;
use std::collections::BTreeMap;

/// Words of command RAM behind each auxiliary slot.
pub const COMMAND_RAM_WORDS: usize = 65_536;

const U_FLAG: u32 = 1 << 29;
const M_FLAG: u32 = 1 << 28;
const D_FLAG: u32 = 1 << 27;
const H_FLAG: u32 = 1 << 26;

/// One command to an RHS2000 chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipCommand {
    /// Convert one amplifier channel.
    Convert {
        /// Channel 0-15 (values up to 63 address internal sources).
        channel: u8,
        /// Latch triggered registers.
        update: bool,
        /// Clear compliance monitor.
        clear_monitor: bool,
        /// Also convert the DC amplifier.
        dc_amp: bool,
        /// Reset the high-pass filter.
        hpf_reset: bool,
    },
    /// Start ADC self-calibration.
    Calibrate,
    /// Clear ADC calibration.
    Clear,
    /// Write a register.
    Write {
        /// Register address.
        reg: u8,
        /// Value.
        data: u16,
        /// Latch triggered registers.
        update: bool,
        /// Clear compliance monitor.
        clear_monitor: bool,
    },
    /// Read a register.
    Read {
        /// Register address.
        reg: u8,
        /// Latch triggered registers.
        update: bool,
        /// Clear compliance monitor.
        clear_monitor: bool,
    },
}

impl ChipCommand {
    /// Plain `WRITE(reg, data)`.
    #[must_use]
    pub const fn write(reg: u8, data: u16) -> Self {
        Self::Write { reg, data, update: false, clear_monitor: false }
    }

    /// Plain `READ(reg)`.
    #[must_use]
    pub const fn read(reg: u8) -> Self {
        Self::Read { reg, update: false, clear_monitor: false }
    }

    /// Plain `CONVERT(channel)`.
    #[must_use]
    pub const fn convert(channel: u8) -> Self {
        Self::Convert {
            channel,
            update: false,
            clear_monitor: false,
            dc_amp: false,
            hpf_reset: false,
        }
    }

    /// Encode to the 32-bit word shifted out on MOSI.
    #[must_use]
    pub const fn encode(self) -> u32 {
        const fn flags(update: bool, clear_monitor: bool) -> u32 {
            (if update { U_FLAG } else { 0 }) | (if clear_monitor { M_FLAG } else { 0 })
        }
        match self {
            Self::Convert { channel, update, clear_monitor, dc_amp, hpf_reset } => {
                flags(update, clear_monitor)
                    | (if dc_amp { D_FLAG } else { 0 })
                    | (if hpf_reset { H_FLAG } else { 0 })
                    | (((channel & 0x3f) as u32) << 16)
            }
            Self::Calibrate => 0x5500_0000,
            Self::Clear => 0x6a00_0000,
            Self::Write { reg, data, update, clear_monitor } => {
                0x8000_0000 | flags(update, clear_monitor) | ((reg as u32) << 16) | data as u32
            }
            Self::Read { reg, update, clear_monitor } => {
                0xc000_0000 | flags(update, clear_monitor) | ((reg as u32) << 16)
            }
        }
    }
}

impl From<ChipCommand> for u32 {
    fn from(cmd: ChipCommand) -> Self {
        cmd.encode()
    }
}

/// One of the four auxiliary command slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuxCmdSlot {
    /// Slot 1.
    AuxCmd1 = 0,
    /// Slot 2.
    AuxCmd2 = 1,
    /// Slot 3.
    AuxCmd3 = 2,
    /// Slot 4.
    AuxCmd4 = 3,
}

impl AuxCmdSlot {
    /// All slots in index order.
    pub const ALL: [Self; 4] = [Self::AuxCmd1, Self::AuxCmd2, Self::AuxCmd3, Self::AuxCmd4];

    /// Zero-based slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Pipe endpoints carrying the (most, least) significant half-words.
    #[must_use]
    pub const fn pipes(self) -> (PipeIn, PipeIn) {
        match self {
            Self::AuxCmd1 => (PipeIn::AuxCmd1Msw, PipeIn::AuxCmd1Lsw),
            Self::AuxCmd2 => (PipeIn::AuxCmd2Msw, PipeIn::AuxCmd2Lsw),
            Self::AuxCmd3 => (PipeIn::AuxCmd3Msw, PipeIn::AuxCmd3Lsw),
            Self::AuxCmd4 => (PipeIn::AuxCmd4Msw, PipeIn::AuxCmd4Lsw),
        }
    }
}

/// A command list for one auxiliary slot, with its loop bounds.
///
/// The sequencer runs words `0..=end_index` once, then cycles through
/// `loop_index..=end_index` for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
    words: Vec<u32>,
    loop_index: usize,
}

impl CommandList {
    /// List that loops over all of its words.
    #[must_use]
    pub fn new(words: Vec<u32>) -> Self {
        Self { words, loop_index: 0 }
    }

    /// List built from typed commands.
    #[must_use]
    pub fn from_commands(commands: impl IntoIterator<Item = ChipCommand>) -> Self {
        Self::new(commands.into_iter().map(ChipCommand::encode).collect())
    }

    /// Set the index the sequencer jumps back to after the last word.
    #[must_use]
    pub fn with_loop_index(mut self, loop_index: usize) -> Self {
        self.loop_index = loop_index;
        self
    }

    /// Raw command words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True if the list holds no words.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Loop start index.
    #[must_use]
    pub const fn loop_index(&self) -> usize {
        self.loop_index
    }

    /// Index of the final word (0 for an empty list).
    #[must_use]
    pub fn end_index(&self) -> usize {
        self.words.len().saturating_sub(1)
    }

    /// Append `count` harmless register reads, e.g. to pad a list to a period.
    pub fn pad_with_dummy(&mut self, count: usize) {
        let dummy = ChipCommand::read(DUMMY_READ_REGISTER).encode();
        self.words.extend(std::iter::repeat(dummy).take(count));
    }

    /// Split words into (most, least) significant 16-bit halves, little-endian
    /// byte order, as the command RAM pipes expect.
    #[must_use]
    pub fn to_pipe_buffers(&self) -> (Vec<u8>, Vec<u8>) {
        split_half_words(&self.words)
    }
}

/// Split words into MSW and LSW byte streams for the command RAM pipes.
#[must_use]
pub fn split_half_words(words: &[u32]) -> (Vec<u8>, Vec<u8>) {
    let mut msw = Vec::with_capacity(2 * words.len());
    let mut lsw = Vec::with_capacity(2 * words.len());
    for &w in words {
        let [b0, b1, b2, b3] = w.to_le_bytes();
        lsw.extend_from_slice(&[b0, b1]);
        msw.extend_from_slice(&[b2, b3]);
    }
    (msw, lsw)
}

/// Register read used as a no-op filler command.
pub const DUMMY_READ_REGISTER: u8 = 255;

/// Read-only registers holding the ASCII company ID "INTAN".
pub const COMPANY_ID_REGISTERS: [u8; 5] = [251, 252, 253, 254, 255];

/// Chip revision register.
pub const CHIP_REVISION_REGISTER: u8 = 250;

/// Stimulation enable registers and the values that unlock the stimulators.
pub mod stim_enable {
    /// Stimulation enable A register.
    pub const REG_A: u8 = 32;
    /// Stimulation enable B register.
    pub const REG_B: u8 = 33;
    /// Unlock value for register A.
    pub const ENABLE_A: u16 = 0xaaaa;
    /// Unlock value for register B.
    pub const ENABLE_B: u16 = 0x00ff;
}

/// Registers whose writes take effect only on a command with the U flag.
pub const TRIGGERED_REGISTERS: [u8; 6] = [10, 12, 42, 44, 46, 48];

const fn is_current_register(reg: u8) -> bool {
    matches!(reg, 64..=79 | 96..=111)
}

/// Host-side model of one chip's writable register bank.
///
/// Holds the value the host intends each register to take. The board
/// programmer walks the bank address by address; command lists built from it
/// reproduce the same writes in the auxiliary command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipRegisters {
    values: BTreeMap<u8, u16>,
}

impl Default for ChipRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipRegisters {
    /// Power-on configuration used before any user settings are applied.
    #[must_use]
    pub fn new() -> Self {
        let mut values = BTreeMap::new();
        let defaults: [(u8, u16); 23] = [
            (0, 0x00c5),  // ADC buffer and MUX bias
            (1, 0x051a),  // ADC format, DSP offset removal, weak MISO
            (2, 0x0040),  // impedance check control
            (3, 0x0080),  // impedance check DAC
            (4, 0x0016),  // amplifier upper cutoff RH1
            (5, 0x0017),  // amplifier upper cutoff RH2
            (6, 0x00a8),  // amplifier lower cutoff RL A
            (7, 0x000a),  // amplifier lower cutoff RL B
            (8, 0xffff),  // individual amplifier power
            (10, 0x0000), // amplifier fast settle (triggered)
            (12, 0xffff), // amplifier lower cutoff select (triggered)
            (stim_enable::REG_A, 0x0000),
            (stim_enable::REG_B, 0x0000),
            (34, 0x00e2), // stimulation step size
            (35, 0x00aa), // stimulation bias voltages
            (36, 0x0080), // current-limited charge recovery target
            (37, 0x4f00), // charge recovery current limit
            (38, 0xffff), // DC amplifier power
            (40, 0x0000), // compliance monitor
            (42, 0x0000), // stimulation on (triggered)
            (44, 0x0000), // stimulation polarity (triggered)
            (46, 0x0000), // charge recovery switch (triggered)
            (48, 0x0000), // current-limited charge recovery enable (triggered)
        ];
        values.extend(defaults);
        for ch in 0..16u8 {
            values.insert(64 + ch, 0x8000); // negative current magnitude/trim
            values.insert(96 + ch, 0x8000); // positive current magnitude/trim
        }
        Self { values }
    }

    /// Current value of a register, if it is part of the writable bank.
    #[must_use]
    pub fn get(&self, reg: u8) -> Option<u16> {
        self.values.get(&reg).copied()
    }

    /// Set a register value. Returns the previous value if the register existed.
    pub fn set(&mut self, reg: u8, value: u16) -> Option<u16> {
        self.values.insert(reg, value)
    }

    /// Writable register addresses, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.values.keys().copied()
    }

    /// Number of writable registers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no registers are modelled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Unlock or lock the on-chip stimulators.
    pub fn set_stim_enable(&mut self, enabled: bool) {
        let (a, b) = if enabled {
            (stim_enable::ENABLE_A, stim_enable::ENABLE_B)
        } else {
            (0, 0)
        };
        self.values.insert(stim_enable::REG_A, a);
        self.values.insert(stim_enable::REG_B, b);
    }

    /// Whether a register write must carry the U flag to take effect.
    #[must_use]
    pub fn is_triggered(reg: u8) -> bool {
        TRIGGERED_REGISTERS.contains(&reg) || is_current_register(reg)
    }

    /// Write command for one register, or `None` if the address is not in the bank.
    #[must_use]
    pub fn write_command(&self, reg: u8) -> Option<ChipCommand> {
        self.get(reg).map(|data| ChipCommand::Write {
            reg,
            data,
            update: Self::is_triggered(reg),
            clear_monitor: false,
        })
    }

    /// Command list writing every register, then reading back the chip
    /// revision and company ID.
    ///
    /// With `update_stim == false` the stimulation current registers are
    /// skipped so a running stimulation pattern is not disturbed.
    #[must_use]
    pub fn command_list_register_config(&self, update_stim: bool) -> CommandList {
        let writes = self
            .addresses()
            .filter(|&reg| update_stim || !is_current_register(reg))
            .filter_map(|reg| self.write_command(reg));
        let reads = std::iter::once(CHIP_REVISION_REGISTER)
            .chain(COMPANY_ID_REGISTERS)
            .map(ChipCommand::read);
        CommandList::from_commands(writes.chain(reads))
    }

    /// Command list of `n` dummy reads, used to idle an auxiliary slot.
    #[must_use]
    pub fn command_list_dummy(n: usize) -> CommandList {
        let mut list = CommandList::new(Vec::with_capacity(n));
        list.pad_with_dummy(n);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_encodings() {
        assert_eq!(ChipCommand::convert(5).encode(), 0x0005_0000);
        assert_eq!(ChipCommand::Calibrate.encode(), 0x5500_0000);
        assert_eq!(ChipCommand::Clear.encode(), 0x6a00_0000);
        assert_eq!(ChipCommand::write(34, 0x00e2).encode(), 0x8022_00e2);
        assert_eq!(ChipCommand::read(255).encode(), 0xc0ff_0000);
        let convert = ChipCommand::Convert {
            channel: 15,
            update: true,
            clear_monitor: true,
            dc_amp: true,
            hpf_reset: true,
        };
        assert_eq!(convert.encode(), 0x3c0f_0000);
        let write_u = ChipCommand::Write { reg: 42, data: 1, update: true, clear_monitor: false };
        assert_eq!(write_u.encode(), 0xa02a_0001);
    }

    #[test]
    fn half_word_split_is_little_endian() {
        let (msw, lsw) = split_half_words(&[0x1234_5678, 0xaabb_ccdd]);
        assert_eq!(msw, vec![0x34, 0x12, 0xbb, 0xaa]);
        assert_eq!(lsw, vec![0x78, 0x56, 0xdd, 0xcc]);
    }

    #[test]
    fn command_list_loop_bounds() {
        let list = CommandList::new(vec![0; 128]).with_loop_index(64);
        assert_eq!(list.loop_index(), 64);
        assert_eq!(list.end_index(), 127);
        assert_eq!(CommandList::new(Vec::new()).end_index(), 0);
    }

    #[test]
    fn register_config_writes_then_reads_company_id() {
        let regs = ChipRegisters::new();
        let list = regs.command_list_register_config(true);
        assert_eq!(list.len(), regs.len() + 6);
        let tail: Vec<u32> = list.words()[regs.len()..].to_vec();
        assert_eq!(tail[0], ChipCommand::read(CHIP_REVISION_REGISTER).encode());
        assert_eq!(tail[5], ChipCommand::read(255).encode());
        assert!(list.words()[..regs.len()].iter().all(|w| w >> 30 == 0b10));
    }

    #[test]
    fn register_config_can_skip_current_registers() {
        let regs = ChipRegisters::new();
        let full = regs.command_list_register_config(true);
        let partial = regs.command_list_register_config(false);
        assert_eq!(full.len() - partial.len(), 32);
    }

    #[test]
    fn triggered_registers_carry_update_flag() {
        let regs = ChipRegisters::new();
        let w = regs.write_command(42).unwrap().encode();
        assert_ne!(w & U_FLAG, 0);
        let w = regs.write_command(34).unwrap().encode();
        assert_eq!(w & U_FLAG, 0);
        assert!(regs.write_command(9).is_none());
    }

    #[test]
    fn stim_enable_unlock_values() {
        let mut regs = ChipRegisters::new();
        regs.set_stim_enable(true);
        assert_eq!(regs.get(stim_enable::REG_A), Some(0xaaaa));
        assert_eq!(regs.get(stim_enable::REG_B), Some(0x00ff));
        regs.set_stim_enable(false);
        assert_eq!(regs.get(stim_enable::REG_A), Some(0));
    }

    #[test]
    fn dummy_list_has_requested_length() {
        let list = ChipRegisters::command_list_dummy(60);
        assert_eq!(list.len(), 60);
        assert!(list.words().iter().all(|&w| w == 0xc0ff_0000));
    }
}
