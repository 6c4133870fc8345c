// SPDX-License-Identifier: AGPL-3.0-only

//! Board identity and capacity constants.
//!
//! Source: Rhythm Stim FPGA bitfile, RHS2000 evaluation board API v1.01.

/// Value read from the board-ID wire-out when the Rhythm Stim bitfile is loaded.
pub const RHYTHM_BOARD_ID: u32 = 800;

/// Value read from the board-mode wire-out on a stimulation/recording controller.
pub const RHS_BOARD_MODE: u32 = 14;

/// Number of SPI ports (A-D) on the board.
pub const MAX_NUM_SPI_PORTS: usize = 4;

/// Number of logical data streams (two per SPI port).
pub const MAX_NUM_DATA_STREAMS: usize = 8;

/// Amplifier channels carried by one data stream.
pub const CHANNELS_PER_STREAM: usize = 16;

/// Capacity of the on-board SDRAM FIFO in 16-bit words (128 MB).
///
/// The FIFO does not report overflow. Once full, the oldest unread data is
/// lost silently, so the host must poll the word count and drain ahead of it.
pub const FIFO_CAPACITY_WORDS: u32 = 67_108_864;

/// Largest single USB transfer the host performs, in bytes.
pub const USB_BUFFER_SIZE: usize = 2_400_000;

/// Block size for block-pipe transfers. Every read length is a multiple of it.
pub const USB_BLOCK_SIZE: usize = 1024;

/// Largest legal cable delay setting (4-bit field per port).
pub const MAX_CABLE_DELAY: u8 = 15;

/// Number of TTL inputs and outputs.
pub const NUM_TTL_CHANNELS: usize = 16;

/// Number of board DACs (analog outputs).
pub const NUM_BOARD_DACS: usize = 8;

/// Number of board ADCs (analog inputs).
pub const NUM_BOARD_ADCS: usize = 8;

/// Number of manual (key-press) stimulation triggers.
pub const NUM_MANUAL_TRIGGERS: usize = 8;

/// SPI port a headstage cable plugs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoardPort {
    /// Port A (streams 0 and 1).
    A = 0,
    /// Port B (streams 2 and 3).
    B = 1,
    /// Port C (streams 4 and 5).
    C = 2,
    /// Port D (streams 6 and 7).
    D = 3,
}

impl BoardPort {
    /// All ports in index order.
    pub const ALL: [Self; MAX_NUM_SPI_PORTS] = [Self::A, Self::B, Self::C, Self::D];

    /// Zero-based port index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit offset of this port's 4-bit field in the MISO-delay wire-in.
    #[must_use]
    pub const fn miso_delay_shift(self) -> u32 {
        4 * self as u32
    }

    /// The two data streams served by this port.
    #[must_use]
    pub const fn streams(self) -> [usize; 2] {
        let base = 2 * self as usize;
        [base, base + 1]
    }

    /// Port serving a given stream index.
    #[must_use]
    pub const fn from_stream(stream: usize) -> Option<Self> {
        match stream {
            0 | 1 => Some(Self::A),
            2 | 3 => Some(Self::B),
            4 | 5 => Some(Self::C),
            6 | 7 => Some(Self::D),
            _ => None,
        }
    }
}

impl std::fmt::Display for BoardPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        write!(f, "Port {name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_map_back_to_their_port() {
        for port in BoardPort::ALL {
            for stream in port.streams() {
                assert_eq!(BoardPort::from_stream(stream), Some(port));
            }
        }
        assert_eq!(BoardPort::from_stream(MAX_NUM_DATA_STREAMS), None);
    }

    #[test]
    fn miso_delay_fields_do_not_overlap() {
        let mut seen = 0u32;
        for port in BoardPort::ALL {
            let field = 0xf << port.miso_delay_shift();
            assert_eq!(seen & field, 0);
            seen |= field;
        }
        assert_eq!(seen, 0xffff);
    }
}
