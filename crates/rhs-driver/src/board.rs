// SPDX-License-Identifier: AGPL-3.0-only

//! Board handle and its exclusive-access guard
//!
//! [`Board`] owns the transport together with the host-side mirror of board
//! state. Every operation runs through a [`BoardGuard`] obtained from
//! [`Board::lock`]; each guard method is one complete transport transaction,
//! and holding a guard across several calls makes the whole sequence atomic
//! with respect to other threads sharing the board.
//!
//! ```no_run
//! use rhs_driver::{Board, transports::MockTransport};
//! use rhs_chip::rates::SampleRate;
//!
//! # fn main() -> rhs_driver::Result<()> {
//! let board = Board::open(MockTransport::new())?;
//! let mut guard = board.lock();
//! guard.set_sample_rate(SampleRate::Hz30000)?;
//! guard.set_data_stream_enabled(0, true)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, RhsError};
use crate::sequencer::{ChannelSequencer, StimRegisterSet};
use crate::streams::DataStreamEnableMap;
use crate::transport::{Transport, TransportKind};
use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use rhs_chip::board::{
    CHANNELS_PER_STREAM, MAX_NUM_DATA_STREAMS, MAX_NUM_SPI_PORTS, RHS_BOARD_MODE,
    RHYTHM_BOARD_ID,
};
use rhs_chip::command::AuxCmdSlot;
use rhs_chip::endpoints::{WireIn, WireOut};
use rhs_chip::rates::SampleRate;
use tracing::{debug, info};

/// Host mirror of everything the board cannot report back
#[derive(Debug)]
pub(crate) struct BoardState {
    pub(crate) sample_rate: SampleRate,
    pub(crate) streams: DataStreamEnableMap,
    pub(crate) cable_delays: [u8; MAX_NUM_SPI_PORTS],
    pub(crate) last_num_words: u32,
    pub(crate) num_words_updated: bool,
    pub(crate) continuous: bool,
    pub(crate) max_time_step: u32,
    pub(crate) stim_cmd_mode: bool,
    pub(crate) manual_triggers: u8,
    pub(crate) aux_lengths: [Option<(usize, usize)>; AuxCmdSlot::ALL.len()],
    pub(crate) sequencers: [[ChannelSequencer; CHANNELS_PER_STREAM]; MAX_NUM_DATA_STREAMS],
    pub(crate) stim_regs: [[StimRegisterSet; CHANNELS_PER_STREAM]; MAX_NUM_DATA_STREAMS],
    /// Bytes of a partly read data block, drained from the FIFO but not yet parsed
    pub(crate) carry: BytesMut,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz30000,
            streams: DataStreamEnableMap::none(),
            cable_delays: [0; MAX_NUM_SPI_PORTS],
            last_num_words: 0,
            num_words_updated: false,
            continuous: false,
            max_time_step: 0,
            stim_cmd_mode: false,
            manual_triggers: 0,
            aux_lengths: [None; AuxCmdSlot::ALL.len()],
            sequencers: [[ChannelSequencer::new(); CHANNELS_PER_STREAM]; MAX_NUM_DATA_STREAMS],
            stim_regs: [[StimRegisterSet::default(); CHANNELS_PER_STREAM]; MAX_NUM_DATA_STREAMS],
            carry: BytesMut::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct BoardInner<T> {
    pub(crate) transport: T,
    pub(crate) state: BoardState,
}

/// Rhythm Stim board reached through a transport
///
/// Share between threads by reference or `Arc`; all access goes through
/// [`Board::lock`].
#[derive(Debug)]
pub struct Board<T: Transport> {
    inner: Mutex<BoardInner<T>>,
}

impl<T: Transport> Board<T> {
    /// Take ownership of an open transport and verify the board identity.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails, or the board ID or mode shows the
    /// stimulation bitfile is not loaded.
    pub fn open(mut transport: T) -> Result<Self> {
        debug!("Opening board over {}", transport.kind());
        transport.update_wire_outs()?;
        let id = transport.wire_out(WireOut::BoardId);
        if id != RHYTHM_BOARD_ID {
            return Err(RhsError::UnexpectedBoardId {
                found: id,
                expected: RHYTHM_BOARD_ID,
            });
        }
        let mode = transport.wire_out(WireOut::BoardMode);
        if mode != RHS_BOARD_MODE {
            return Err(RhsError::UnexpectedBoardMode {
                found: mode,
                expected: RHS_BOARD_MODE,
            });
        }
        let version = transport.wire_out(WireOut::BoardVersion);
        info!("Opened Rhythm Stim board (ID {id}, version {version}) over {}", transport.kind());
        Ok(Self {
            inner: Mutex::new(BoardInner {
                transport,
                state: BoardState::default(),
            }),
        })
    }

    /// Acquire exclusive access, blocking until available.
    pub fn lock(&self) -> BoardGuard<'_, T> {
        BoardGuard {
            inner: self.inner.lock(),
        }
    }

    /// Acquire exclusive access if no other thread holds it.
    pub fn try_lock(&self) -> Option<BoardGuard<'_, T>> {
        self.inner.try_lock().map(|inner| BoardGuard { inner })
    }

    /// Release the board and hand back the transport.
    pub fn into_transport(self) -> T {
        self.inner.into_inner().transport
    }
}

/// Exclusive access to a [`Board`]
///
/// Board operations are methods on the guard. The lock is released when the
/// guard is dropped.
#[derive(Debug)]
pub struct BoardGuard<'a, T: Transport> {
    inner: MutexGuard<'a, BoardInner<T>>,
}

impl<T: Transport> BoardGuard<'_, T> {
    pub(crate) fn transport(&mut self) -> &mut T {
        &mut self.inner.transport
    }

    pub(crate) fn state(&self) -> &BoardState {
        &self.inner.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut BoardState {
        &mut self.inner.state
    }

    /// Stage and commit one wire-in field.
    pub(crate) fn write_wire(&mut self, ep: WireIn, value: u32, mask: u32) -> Result<()> {
        let t = self.transport();
        t.set_wire_in(ep, value, mask)?;
        t.update_wire_ins()
    }

    /// Set or clear `bits` of a wire-in and commit.
    pub(crate) fn write_flag(&mut self, ep: WireIn, bits: u32, on: bool) -> Result<()> {
        self.write_wire(ep, if on { bits } else { 0 }, bits)
    }

    /// Sample the wire-outs and read one.
    pub(crate) fn read_wire(&mut self, ep: WireOut) -> Result<u32> {
        let t = self.transport();
        t.update_wire_outs()?;
        Ok(t.wire_out(ep))
    }

    /// Kind of transport behind the board.
    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::MockTransport;

    #[test]
    fn open_checks_identity() {
        let mock = MockTransport::new();
        assert!(Board::open(mock.clone()).is_ok());

        mock.set_wire_out(WireOut::BoardId, 500);
        assert!(matches!(
            Board::open(mock.clone()),
            Err(RhsError::UnexpectedBoardId { found: 500, .. })
        ));

        mock.set_wire_out(WireOut::BoardId, RHYTHM_BOARD_ID);
        mock.set_wire_out(WireOut::BoardMode, 13);
        assert!(matches!(
            Board::open(mock),
            Err(RhsError::UnexpectedBoardMode { found: 13, .. })
        ));
    }

    #[test]
    fn open_propagates_transport_failure() {
        let mock = MockTransport::new();
        mock.fail_after(0);
        assert!(matches!(Board::open(mock), Err(RhsError::Transport { .. })));
    }

    #[test]
    fn guard_excludes_second_locker() {
        let board = Board::open(MockTransport::new()).unwrap();
        let guard = board.lock();
        assert!(board.try_lock().is_none());
        drop(guard);
        assert!(board.try_lock().is_some());
    }

    #[test]
    fn into_transport_returns_shared_mock() {
        let mock = MockTransport::new();
        let board = Board::open(mock.clone()).unwrap();
        board.lock().write_wire(WireIn::LedDisplay, 0x5a, 0xff).unwrap();
        let back = board.into_transport();
        assert_eq!(back.wire_in(WireIn::LedDisplay), 0x5a);
        assert_eq!(back.kind(), TransportKind::Mock);
    }
}
