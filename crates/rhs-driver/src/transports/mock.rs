// SPDX-License-Identifier: AGPL-3.0-only

//! Mock transport (simulated board)
//!
//! Implements [`Transport`] entirely in memory. The mock behaves like a
//! Rhythm Stim board with the bitfile loaded:
//!
//! 1. **Operation log**: every transport call is appended to a log so tests
//!    can check ordering and atomicity of multi-step register writes.
//!
//! 2. **Wire semantics**: wire-ins are staged then committed by
//!    `update_wire_ins`; wire-outs are sampled by `update_wire_outs`, with the
//!    FIFO word count derived from the simulated FIFO.
//!
//! 3. **Acquisition**: the run trigger synthesizes valid frames into the
//!    FIFO, `MaxTimeStep` frames for a fixed-length run or frames on demand via
//!    [`MockTransport::advance`] in continuous mode. The FIFO is bounded by
//!    [`FIFO_CAPACITY_WORDS`] and drops its oldest frames when full.
//!
//! 4. **Fault injection**: a per-operation delay, a one-shot failure and a
//!    cap on block-pipe transfer size.
//!
//! Clones share state, so a test can hand one clone to a
//! [`Board`](crate::Board) and keep another to inspect the log.

use crate::data_block::{DataBlock, Frame};
use crate::error::{Result, RhsError};
use crate::transport::{Transport, TransportKind};
use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use rhs_chip::board::{FIFO_CAPACITY_WORDS, RHS_BOARD_MODE, RHYTHM_BOARD_ID};
use rhs_chip::endpoints::{
    clock_status, ram_addr_reset, reset_run, spi_start, PipeIn, PipeOut, TriggerIn, WireIn,
    WireOut,
};
use rhs_chip::frame::frame_size_in_bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const NUM_WIRE_INS: usize = 0x20;
const NUM_WIRE_OUTS: usize = 0x20;
const WIRE_OUT_BASE: u8 = 0x20;

/// Board version reported by the mock
pub const MOCK_BOARD_VERSION: u32 = 1;

/// One recorded transport call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    /// `set_wire_in`
    SetWireIn {
        /// Endpoint
        ep: WireIn,
        /// Value staged
        value: u32,
        /// Bits affected
        mask: u32,
    },
    /// `update_wire_ins`
    UpdateWireIns,
    /// `update_wire_outs`
    UpdateWireOuts,
    /// `activate_trigger_in`
    ActivateTriggerIn {
        /// Endpoint
        ep: TriggerIn,
        /// Bit pulsed
        bit: u32,
    },
    /// `write_to_pipe_in`
    WriteToPipeIn {
        /// Endpoint
        ep: PipeIn,
        /// Bytes written
        len: usize,
    },
    /// `read_from_block_pipe_out`
    ReadFromBlockPipeOut {
        /// Endpoint
        ep: PipeOut,
        /// Bytes requested
        len: usize,
    },
}

#[derive(Debug)]
struct MockState {
    staged: [u32; NUM_WIRE_INS],
    committed: [u32; NUM_WIRE_INS],
    live_outs: [u32; NUM_WIRE_OUTS],
    sampled_outs: [u32; NUM_WIRE_OUTS],
    fifo: VecDeque<u8>,
    pipes: HashMap<PipeIn, Vec<u8>>,
    stim_regs: HashMap<u32, u16>,
    register_writes: Vec<u32>,
    ops: Vec<TransportOp>,
    running: bool,
    timestamp: u32,
    dropped_frames: u64,
    op_delay: Duration,
    fail_after: Option<usize>,
    read_limit: Option<usize>,
}

impl MockState {
    fn new() -> Self {
        let mut live_outs = [0; NUM_WIRE_OUTS];
        live_outs[out_index(WireOut::BoardId)] = RHYTHM_BOARD_ID;
        live_outs[out_index(WireOut::BoardVersion)] = MOCK_BOARD_VERSION;
        live_outs[out_index(WireOut::BoardMode)] = RHS_BOARD_MODE;
        live_outs[out_index(WireOut::DataClkLocked)] =
            clock_status::DATA_CLOCK_LOCKED | clock_status::DCM_PROG_DONE;
        Self {
            staged: [0; NUM_WIRE_INS],
            committed: [0; NUM_WIRE_INS],
            live_outs,
            sampled_outs: [0; NUM_WIRE_OUTS],
            fifo: VecDeque::new(),
            pipes: HashMap::new(),
            stim_regs: HashMap::new(),
            register_writes: Vec::new(),
            ops: Vec::new(),
            running: false,
            timestamp: 0,
            dropped_frames: 0,
            op_delay: Duration::ZERO,
            fail_after: None,
            read_limit: None,
        }
    }

    fn wire(&self, ep: WireIn) -> u32 {
        self.committed[usize::from(ep.addr())]
    }

    fn num_streams(&self) -> usize {
        (self.wire(WireIn::DataStreamEn) & 0xff).count_ones() as usize
    }

    fn max_time_step(&self) -> u32 {
        (self.wire(WireIn::MaxTimeStepMsb) << 16) | (self.wire(WireIn::MaxTimeStepLsb) & 0xffff)
    }

    /// Append frames, dropping the oldest whole frames on overflow.
    fn produce_frames(&mut self, count: u32) {
        let num_streams = self.num_streams();
        let frame_bytes = frame_size_in_bytes(num_streams);
        let capacity_bytes = 2 * FIFO_CAPACITY_WORDS as usize;
        let mut buf = BytesMut::with_capacity(frame_bytes);
        for _ in 0..count {
            buf.clear();
            Frame::pattern(num_streams, self.timestamp).encode(&mut buf);
            self.timestamp = self.timestamp.wrapping_add(1);
            while self.fifo.len() + frame_bytes > capacity_bytes && !self.fifo.is_empty() {
                let n = frame_bytes.min(self.fifo.len());
                self.fifo.drain(..n);
                self.dropped_frames += 1;
            }
            self.fifo.extend(buf.iter().copied());
        }
    }

    fn trigger(&mut self, ep: TriggerIn, bit: u32) {
        match (ep, bit) {
            (TriggerIn::SpiStart, spi_start::RUN) => {
                if self.wire(WireIn::ResetRun) & reset_run::CONTINUOUS != 0 {
                    self.running = true;
                } else {
                    let frames = self.max_time_step();
                    self.produce_frames(frames);
                    self.running = false;
                }
            }
            (TriggerIn::SpiStart, spi_start::REGISTER_WRITE) => {
                let word = self.wire(WireIn::MultiUse);
                self.register_writes.push(word);
            }
            (TriggerIn::RamAddrReset, ram_addr_reset::STIM_REGISTER) => {
                let addr = self.wire(WireIn::StimRegAddr);
                let word = (self.wire(WireIn::StimRegWord) & 0xffff) as u16;
                self.stim_regs.insert(addr, word);
            }
            _ => {}
        }
    }
}

const fn out_index(ep: WireOut) -> usize {
    (ep.addr() - WIRE_OUT_BASE) as usize
}

/// In-memory Rhythm Stim board
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Simulated board with the stimulation bitfile loaded and clocks locked.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
        }
    }

    /// Sleep this long before every transport call.
    pub fn set_op_delay(&self, delay: Duration) {
        self.state.lock().op_delay = delay;
    }

    /// Let `ops` more calls succeed, then fail exactly one.
    pub fn fail_after(&self, ops: usize) {
        self.state.lock().fail_after = Some(ops);
    }

    /// Cap every block-pipe read at `bytes` (rounded down to the block size),
    /// as a USB transfer that completes short would.
    pub fn set_read_limit(&self, bytes: Option<usize>) {
        self.state.lock().read_limit = bytes;
    }

    /// Override the live value of a wire-out (visible after the next sample).
    pub fn set_wire_out(&self, ep: WireOut, value: u32) {
        self.state.lock().live_outs[out_index(ep)] = value;
    }

    /// Committed value of a wire-in.
    pub fn wire_in(&self, ep: WireIn) -> u32 {
        self.state.lock().wire(ep)
    }

    /// Copy of the operation log.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.state.lock().ops.clone()
    }

    /// Clear the operation log.
    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Bytes last written to a pipe.
    pub fn pipe_contents(&self, ep: PipeIn) -> Vec<u8> {
        self.state.lock().pipes.get(&ep).cloned().unwrap_or_default()
    }

    /// Value last strobed into a stimulation sequencer register address.
    pub fn stim_register(&self, address: u32) -> Option<u16> {
        self.state.lock().stim_regs.get(&address).copied()
    }

    /// Command words strobed to the chips through `MultiUse`.
    pub fn register_writes(&self) -> Vec<u32> {
        self.state.lock().register_writes.clone()
    }

    /// Append raw bytes to the FIFO.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().fifo.extend(bytes.iter().copied());
    }

    /// Append one encoded data block to the FIFO.
    pub fn push_data_block(&self, block: &DataBlock) {
        self.push_bytes(&block.to_bytes());
    }

    /// Produce `frames` frames if a continuous run is in progress.
    pub fn advance(&self, frames: u32) {
        let mut state = self.state.lock();
        if state.running {
            state.produce_frames(frames);
        }
    }

    /// Start or stop a simulated run without touching the wire-ins.
    pub fn set_running(&self, running: bool) {
        self.state.lock().running = running;
    }

    /// Words currently held in the simulated FIFO.
    pub fn fifo_words(&self) -> usize {
        self.state.lock().fifo.len() / 2
    }

    /// Whole frames discarded because the FIFO was full.
    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().dropped_frames
    }

    fn begin(&self, op: TransportOp) -> Result<MutexGuard<'_, MockState>> {
        let delay = self.state.lock().op_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        match state.fail_after {
            Some(0) => {
                state.fail_after = None;
                debug!("MockTransport: injected failure on {op:?}");
                return Err(RhsError::transport(format!("injected failure on {op:?}")));
            }
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }
        trace!("MockTransport: {op:?}");
        state.ops.push(op);
        Ok(state)
    }
}

impl Transport for MockTransport {
    fn set_wire_in(&mut self, ep: WireIn, value: u32, mask: u32) -> Result<()> {
        let mut state = self.begin(TransportOp::SetWireIn { ep, value, mask })?;
        let slot = &mut state.staged[usize::from(ep.addr())];
        *slot = (*slot & !mask) | (value & mask);
        Ok(())
    }

    fn update_wire_ins(&mut self) -> Result<()> {
        let mut state = self.begin(TransportOp::UpdateWireIns)?;
        state.committed = state.staged;
        if state.wire(WireIn::ResetRun) & reset_run::RESET != 0 {
            state.running = false;
            state.timestamp = 0;
        }
        Ok(())
    }

    fn update_wire_outs(&mut self) -> Result<()> {
        let mut state = self.begin(TransportOp::UpdateWireOuts)?;
        let words = u32::try_from(state.fifo.len() / 2).unwrap_or(u32::MAX);
        state.live_outs[out_index(WireOut::NumWordsLsb)] = words & 0xffff;
        state.live_outs[out_index(WireOut::NumWordsMsb)] = words >> 16;
        state.live_outs[out_index(WireOut::SpiRunning)] = u32::from(state.running);
        state.sampled_outs = state.live_outs;
        Ok(())
    }

    fn wire_out(&self, ep: WireOut) -> u32 {
        self.state.lock().sampled_outs[out_index(ep)]
    }

    fn activate_trigger_in(&mut self, ep: TriggerIn, bit: u32) -> Result<()> {
        let mut state = self.begin(TransportOp::ActivateTriggerIn { ep, bit })?;
        state.trigger(ep, bit);
        Ok(())
    }

    fn write_to_pipe_in(&mut self, ep: PipeIn, data: &[u8]) -> Result<usize> {
        let mut state = self.begin(TransportOp::WriteToPipeIn { ep, len: data.len() })?;
        state.pipes.insert(ep, data.to_vec());
        Ok(data.len())
    }

    fn read_from_block_pipe_out(
        &mut self,
        ep: PipeOut,
        block_size: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut state = self.begin(TransportOp::ReadFromBlockPipeOut { ep, len: buf.len() })?;
        if block_size == 0 || buf.len() % block_size != 0 {
            return Err(RhsError::transport(format!(
                "read of {} bytes is not a multiple of block size {block_size}",
                buf.len()
            )));
        }
        let limit = state.read_limit.unwrap_or(usize::MAX);
        let available = state.fifo.len().min(buf.len()).min(limit);
        let n = available - available % block_size;
        for (dst, src) in buf[..n].iter_mut().zip(state.fifo.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ins_commit_on_update() {
        let mut mock = MockTransport::new();
        mock.set_wire_in(WireIn::LedDisplay, 0xab, 0xff).unwrap();
        assert_eq!(mock.wire_in(WireIn::LedDisplay), 0);
        mock.update_wire_ins().unwrap();
        assert_eq!(mock.wire_in(WireIn::LedDisplay), 0xab);
        mock.set_wire_in(WireIn::LedDisplay, 0x0100, 0xff00).unwrap();
        mock.update_wire_ins().unwrap();
        assert_eq!(mock.wire_in(WireIn::LedDisplay), 0x01ab);
    }

    #[test]
    fn identity_is_visible_after_sampling() {
        let mut mock = MockTransport::new();
        assert_eq!(mock.wire_out(WireOut::BoardId), 0);
        mock.update_wire_outs().unwrap();
        assert_eq!(mock.wire_out(WireOut::BoardId), RHYTHM_BOARD_ID);
        assert_eq!(mock.wire_out(WireOut::BoardMode), RHS_BOARD_MODE);
    }

    #[test]
    fn fixed_length_run_fills_fifo() {
        let mut mock = MockTransport::new();
        mock.set_wire_in(WireIn::DataStreamEn, 0b11, 0xff).unwrap();
        mock.set_wire_in(WireIn::MaxTimeStepLsb, 256, 0xffff).unwrap();
        mock.update_wire_ins().unwrap();
        mock.activate_trigger_in(TriggerIn::SpiStart, spi_start::RUN).unwrap();
        assert_eq!(mock.fifo_words(), 256 * 104);
        mock.update_wire_outs().unwrap();
        assert_eq!(mock.wire_out(WireOut::NumWordsLsb), (256 * 104) & 0xffff);
        assert_eq!(mock.wire_out(WireOut::NumWordsMsb), (256 * 104) >> 16);
        assert_eq!(mock.wire_out(WireOut::SpiRunning), 0);
    }

    #[test]
    fn block_reads_return_whole_blocks_only() {
        let mut mock = MockTransport::new();
        mock.push_bytes(&[7u8; 1500]);
        let mut buf = vec![0u8; 2048];
        let n = mock.read_from_block_pipe_out(PipeOut::Data, 1024, &mut buf).unwrap();
        assert_eq!(n, 1024);
        assert_eq!(mock.fifo_words(), 238);
        assert!(mock.read_from_block_pipe_out(PipeOut::Data, 1000, &mut buf).is_err());
    }

    #[test]
    fn read_limit_shortens_transfers() {
        let mut mock = MockTransport::new();
        mock.push_bytes(&[1u8; 4096]);
        mock.set_read_limit(Some(1500));
        let mut buf = vec![0u8; 4096];
        assert_eq!(mock.read_from_block_pipe_out(PipeOut::Data, 1024, &mut buf).unwrap(), 1024);
        mock.set_read_limit(None);
        assert_eq!(mock.read_from_block_pipe_out(PipeOut::Data, 1024, &mut buf[..3072]).unwrap(), 3072);
    }

    #[test]
    fn injected_failure_fires_once() {
        let mut mock = MockTransport::new();
        mock.fail_after(1);
        assert!(mock.update_wire_ins().is_ok());
        assert!(matches!(mock.update_wire_ins(), Err(RhsError::Transport { .. })));
        assert!(mock.update_wire_ins().is_ok());
        assert_eq!(mock.ops().len(), 2);
    }

    #[test]
    fn clones_share_state() {
        let mock = MockTransport::new();
        let mut handle = mock.clone();
        handle.activate_trigger_in(TriggerIn::DcmProg, 0).unwrap();
        assert_eq!(
            mock.ops(),
            vec![TransportOp::ActivateTriggerIn { ep: TriggerIn::DcmProg, bit: 0 }]
        );
    }

    #[test]
    fn continuous_run_produces_on_advance() {
        let mut mock = MockTransport::new();
        mock.set_wire_in(WireIn::ResetRun, reset_run::CONTINUOUS, reset_run::CONTINUOUS).unwrap();
        mock.update_wire_ins().unwrap();
        mock.activate_trigger_in(TriggerIn::SpiStart, spi_start::RUN).unwrap();
        assert_eq!(mock.fifo_words(), 0);
        mock.advance(10);
        assert_eq!(mock.fifo_words(), 10 * 24);
        mock.set_wire_in(WireIn::ResetRun, reset_run::RESET, reset_run::RESET).unwrap();
        mock.update_wire_ins().unwrap();
        mock.advance(10);
        assert_eq!(mock.fifo_words(), 10 * 24);
    }
}
