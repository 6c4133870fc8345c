// SPDX-License-Identifier: AGPL-3.0-only

//! Board-control and data-streaming driver for the Rhythm Stim FPGA board.
//!
//! Programs RHS2000 stimulation/recording headstages through the board's
//! front-panel endpoints: sample rate and cable delays, auxiliary command
//! lists, per-channel stimulation sequencers, and continuous FIFO streaming.
//! The USB bridge itself is a [`Transport`] supplied by the caller;
//! [`transports::MockTransport`] simulates a board for tests and dry runs.
//!
//! # Access model
//!
//! ```text
//! Board<T: Transport>          owns the transport and the host mirror
//!   └── lock() -> BoardGuard   exclusive; every operation is a guard method
//! ```
//!
//! A guard method is one whole transport transaction (for a sequencer register:
//! address, value, commit, strobe). Threads sharing a board block on
//! [`Board::lock`]; hold one guard across several calls to make them atomic.
//!
//! # Quick start
//!
//! ```no_run
//! use rhs_driver::{Board, transports::MockTransport};
//! use std::collections::VecDeque;
//!
//! # fn main() -> rhs_driver::Result<()> {
//! let board = Board::open(MockTransport::new())?;
//! board.initialize()?;
//!
//! let mut guard = board.lock();
//! guard.set_data_stream_enabled(1, true)?;
//! guard.set_continuous_run_mode(true)?;
//! guard.run()?;
//!
//! let mut queue = VecDeque::new();
//! guard.read_data_blocks(16, &mut queue)?;
//! # Ok(())
//! # }
//! ```
//!
//! # FIFO overflow
//!
//! The board FIFO holds 64 Mi words and drops the oldest data silently when
//! full; nothing on the board reports it. Poll
//! [`BoardGuard::num_words_in_fifo`] and drain before
//! [`BoardGuard::fifo_headroom_seconds`] reaches zero.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod board;
pub mod calibration;
mod commands;
pub mod config;
pub mod data_block;
mod error;
pub mod registers;
pub mod sequencer;
pub mod stimulation;
pub mod streaming;
pub mod streams;
pub mod timing;
mod transport;
pub mod transports;

pub use board::{Board, BoardGuard};
pub use config::BoardConfig;
pub use data_block::{DataBlock, Frame};
pub use error::{Result, RhsError};
pub use registers::RateReliability;
pub use sequencer::{ChannelSequencer, PulseConfig, SequencerState, StimRegisterSet};
pub use stimulation::{AmpSettleMode, ChargeRecoveryMode, GlobalSettlePolicy};
pub use streaming::{fifo_capacity_in_words, queue_to_file};
pub use streams::DataStreamEnableMap;
pub use timing::StimTiming;
pub use transport::{Transport, TransportKind};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Board, BoardConfig, BoardGuard, DataBlock, DataStreamEnableMap, RateReliability, Result,
        RhsError, StimTiming, Transport,
    };
    pub use rhs_chip::board::BoardPort;
    pub use rhs_chip::command::AuxCmdSlot;
    pub use rhs_chip::rates::SampleRate;
    pub use rhs_chip::stim::{StimShape, StimTrigger, TriggerSource};
}
