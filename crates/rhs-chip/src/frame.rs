// SPDX-License-Identifier: AGPL-3.0-only

//! USB data-frame layout.
//!
//! The FPGA writes one frame per sample period into the SDRAM FIFO. All
//! fields are little-endian. For `S` enabled streams:
//!
//! ```text
//! offset  size    field
//! ──────  ──────  ────────────────────────────────────────────────────────
//!      0       8  magic 0x8d542c8a49712f0b
//!      8       4  timestamp (sample counter)
//!     12     4·S  auxiliary command 1 result, one u32 per stream
//!  12+4S    64·S  for channel 0..16, for stream 0..S: DC amp u16, amp u16
//!  12+68S   12·S  auxiliary command 2..4 results, slot-major, u32 each
//!  12+80S     16  8 board DAC words
//!  28+80S     16  8 board ADC words
//!  44+80S      4  TTL in, TTL out
//! ```
//!
//! Frame size in 16-bit words is `24 + 40·S`. Both terms are multiples of
//! eight words, so a block of [`SAMPLES_PER_DATA_BLOCK`] frames is always a
//! whole number of 1024-byte USB blocks.

use crate::board::{CHANNELS_PER_STREAM, NUM_BOARD_ADCS, NUM_BOARD_DACS};

/// Magic number opening every frame.
pub const FRAME_MAGIC: u64 = 0x8d54_2c8a_4971_2f0b;

/// Frames per data block.
pub const SAMPLES_PER_DATA_BLOCK: usize = 128;

/// Auxiliary command results carried per stream per frame.
pub const NUM_AUX_RESULTS: usize = 4;

/// Fixed (stream-independent) 16-bit words per frame: magic, timestamp, DACs, ADCs, TTL.
pub const FRAME_FIXED_WORDS: usize = 4 + 2 + NUM_BOARD_DACS + NUM_BOARD_ADCS + 2;

/// 16-bit words contributed by each enabled stream per frame.
pub const FRAME_WORDS_PER_STREAM: usize = 2 * NUM_AUX_RESULTS + 2 * CHANNELS_PER_STREAM;

/// Size of one frame in 16-bit words.
#[must_use]
pub const fn frame_size_in_words(num_streams: usize) -> usize {
    FRAME_FIXED_WORDS + FRAME_WORDS_PER_STREAM * num_streams
}

/// Size of one frame in bytes.
#[must_use]
pub const fn frame_size_in_bytes(num_streams: usize) -> usize {
    2 * frame_size_in_words(num_streams)
}

/// Size of one data block in 16-bit words.
#[must_use]
pub const fn data_block_size_in_words(num_streams: usize) -> usize {
    SAMPLES_PER_DATA_BLOCK * frame_size_in_words(num_streams)
}

/// Size of one data block in bytes.
#[must_use]
pub const fn data_block_size_in_bytes(num_streams: usize) -> usize {
    2 * data_block_size_in_words(num_streams)
}
