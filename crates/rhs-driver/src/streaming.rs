// SPDX-License-Identifier: AGPL-3.0-only

//! Data streaming engine
//!
//! Drains the board FIFO through the block pipe into [`DataBlock`]s.
//!
//! The FIFO never reports overflow: once it holds [`FIFO_CAPACITY_WORDS`] the
//! oldest data is silently lost. Callers poll [`BoardGuard::num_words_in_fifo`]
//! (or [`BoardGuard::fifo_headroom_seconds`]) and drain before it fills. A
//! read that finds too little data returns `Ok(None)` / `Ok(0)` rather than an
//! error.

use crate::board::BoardGuard;
use crate::data_block::DataBlock;
use crate::error::Result;
use crate::streams::DataStreamEnableMap;
use crate::transport::Transport;
use rhs_chip::board::{FIFO_CAPACITY_WORDS, MAX_NUM_DATA_STREAMS, USB_BLOCK_SIZE, USB_BUFFER_SIZE};
use rhs_chip::endpoints::{reset_run, spi_start, PipeOut, TriggerIn, WireIn, WireOut};
use rhs_chip::frame::{data_block_size_in_bytes, frame_size_in_words};
use std::collections::VecDeque;
use std::io::Write;
use tracing::{debug, info, warn};

pub use rhs_chip::frame::data_block_size_in_words;

/// Capacity of the board FIFO in 16-bit words.
pub const fn fifo_capacity_in_words() -> u32 {
    FIFO_CAPACITY_WORDS
}

/// Write every queued block to `sink`, emptying the queue.
///
/// The bytes are exactly what the block pipe delivered, so a file written here
/// reads back with [`DataBlock::read_from`].
///
/// # Errors
///
/// Returns error if the sink fails; blocks not yet written stay queued.
pub fn queue_to_file<W: Write + ?Sized>(queue: &mut VecDeque<DataBlock>, sink: &mut W) -> Result<usize> {
    let mut written = 0;
    while let Some(block) = queue.front() {
        block.write_to(sink)?;
        queue.pop_front();
        written += 1;
    }
    Ok(written)
}

impl<T: Transport> BoardGuard<'_, T> {
    /// Enable or disable one data stream.
    ///
    /// # Errors
    ///
    /// Returns error if `stream` is out of range or the transport fails.
    pub fn set_data_stream_enabled(&mut self, stream: usize, enabled: bool) -> Result<()> {
        let mut map = self.state().streams;
        map.set(stream, enabled)?;
        self.set_data_streams(map)
    }

    /// Replace the whole enable map in one wire write.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_data_streams(&mut self, map: DataStreamEnableMap) -> Result<()> {
        self.write_wire(WireIn::DataStreamEn, map.mask(), (1 << MAX_NUM_DATA_STREAMS) - 1)?;
        let state = self.state_mut();
        if state.streams != map && !state.carry.is_empty() {
            warn!("Stream layout changed; dropping {} bytes of a partial block", state.carry.len());
            state.carry.clear();
        }
        state.streams = map;
        debug!("Data streams enabled: {:#04x}", map.mask());
        Ok(())
    }

    /// Current enable map.
    pub fn data_streams(&self) -> DataStreamEnableMap {
        self.state().streams
    }

    /// Number of enabled data streams.
    pub fn num_enabled_data_streams(&self) -> usize {
        self.state().streams.num_enabled()
    }

    /// Start acquisition, continuous or for the programmed number of steps.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn run(&mut self) -> Result<()> {
        self.transport().activate_trigger_in(TriggerIn::SpiStart, spi_start::RUN)?;
        let state = self.state();
        if state.continuous {
            info!("Run started (continuous, {} streams)", state.streams.num_enabled());
        } else {
            info!("Run started ({} steps, {} streams)", state.max_time_step, state.streams.num_enabled());
        }
        Ok(())
    }

    /// Whether the SPI sequencer is running.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn is_running(&mut self) -> Result<bool> {
        Ok(self.read_wire(WireOut::SpiRunning)? & 1 != 0)
    }

    /// Run until stopped instead of for a fixed number of steps.
    ///
    /// Clearing this during a continuous run stops acquisition.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_continuous_run_mode(&mut self, continuous: bool) -> Result<()> {
        self.write_flag(WireIn::ResetRun, reset_run::CONTINUOUS, continuous)?;
        self.state_mut().continuous = continuous;
        Ok(())
    }

    /// Number of sample steps a non-continuous run acquires.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn set_max_time_step(&mut self, steps: u32) -> Result<()> {
        let t = self.transport();
        t.set_wire_in(WireIn::MaxTimeStepLsb, steps & 0xffff, 0xffff)?;
        t.set_wire_in(WireIn::MaxTimeStepMsb, steps >> 16, 0xffff)?;
        t.update_wire_ins()?;
        self.state_mut().max_time_step = steps;
        Ok(())
    }

    /// Read the FIFO fill level from the board, in 16-bit words.
    ///
    /// Updates the cached value reported by
    /// [`last_num_words_in_fifo`](Self::last_num_words_in_fifo).
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn num_words_in_fifo(&mut self) -> Result<u32> {
        let t = self.transport();
        t.update_wire_outs()?;
        let words = (t.wire_out(WireOut::NumWordsMsb) << 16) | (t.wire_out(WireOut::NumWordsLsb) & 0xffff);
        let state = self.state_mut();
        if words != state.last_num_words {
            state.last_num_words = words;
            state.num_words_updated = true;
        }
        Ok(words)
    }

    /// Cached FIFO fill level and whether it changed since last asked.
    ///
    /// No transport traffic; an unchanged value across polls during a run
    /// points to a stalled clock.
    pub fn last_num_words_in_fifo(&mut self) -> (u32, bool) {
        let state = self.state_mut();
        let updated = std::mem::take(&mut state.num_words_updated);
        (state.last_num_words, updated)
    }

    /// Fraction of the FIFO currently occupied.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn fifo_fill_fraction(&mut self) -> Result<f64> {
        Ok(f64::from(self.num_words_in_fifo()?) / f64::from(FIFO_CAPACITY_WORDS))
    }

    /// Seconds until the FIFO fills at the current rate and stream count.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn fifo_headroom_seconds(&mut self) -> Result<f64> {
        let words = self.num_words_in_fifo()?;
        let free = f64::from(FIFO_CAPACITY_WORDS.saturating_sub(words));
        let words_per_second =
            frame_size_in_words(self.num_enabled_data_streams()) as f64 * self.sample_rate_hz();
        Ok(free / words_per_second)
    }

    /// Discard everything in the FIFO, returning the bytes dropped.
    ///
    /// Reads are whole USB blocks, so a tail shorter than one USB block stays
    /// in the FIFO. Bytes held back from an earlier short read are dropped too.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn flush(&mut self) -> Result<usize> {
        let mut discarded = std::mem::take(&mut self.state_mut().carry).len();
        let mut buf = vec![0u8; USB_BUFFER_SIZE];
        loop {
            let words = self.num_words_in_fifo()? as usize;
            let want = (2 * words).min(USB_BUFFER_SIZE) / USB_BLOCK_SIZE * USB_BLOCK_SIZE;
            if want == 0 {
                break;
            }
            let n = self
                .transport()
                .read_from_block_pipe_out(PipeOut::Data, USB_BLOCK_SIZE, &mut buf[..want])?;
            if n == 0 {
                break;
            }
            discarded += n;
        }
        debug!("Flushed {discarded} bytes from FIFO");
        Ok(discarded)
    }

    /// Whole blocks available from the carried bytes plus the FIFO, capped at
    /// `max` and at one USB transfer.
    fn blocks_available(&mut self, max: usize) -> Result<usize> {
        let block_bytes = data_block_size_in_bytes(self.num_enabled_data_streams());
        let bytes = self.state().carry.len() + 2 * self.num_words_in_fifo()? as usize;
        Ok(max.min(bytes / block_bytes).min(USB_BUFFER_SIZE / block_bytes))
    }

    /// Read and parse one block, or `None` if a whole block is not yet buffered.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the frame header is corrupt.
    pub fn read_data_block(&mut self) -> Result<Option<DataBlock>> {
        let mut queue = VecDeque::with_capacity(1);
        self.read_data_blocks(1, &mut queue)?;
        Ok(queue.pop_front())
    }

    /// Read up to `n` blocks into `queue`, returning how many were appended.
    ///
    /// A short transfer keeps its trailing partial block for the next read, so
    /// frame alignment survives.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or a frame header is corrupt.
    /// Blocks parsed before the corrupt one are still appended.
    pub fn read_data_blocks(&mut self, n: usize, queue: &mut VecDeque<DataBlock>) -> Result<usize> {
        let num_streams = self.num_enabled_data_streams();
        let block_bytes = data_block_size_in_bytes(num_streams);
        let blocks = self.blocks_available(n)?;
        if blocks == 0 {
            return Ok(0);
        }
        let mut buf = vec![0u8; blocks * block_bytes - self.state().carry.len()];
        let read = self
            .transport()
            .read_from_block_pipe_out(PipeOut::Data, USB_BLOCK_SIZE, &mut buf)?;

        let carry = &mut self.state_mut().carry;
        carry.extend_from_slice(&buf[..read]);
        let whole = carry.len() / block_bytes;
        if whole < blocks {
            debug!("Short block read: {read} of {} bytes, {} carried", buf.len(), carry.len() % block_bytes);
        }
        for _ in 0..whole {
            let bytes = carry.split_to(block_bytes);
            queue.push_back(DataBlock::parse(&bytes, num_streams)?);
        }
        Ok(whole)
    }

    /// Read up to `n` blocks of raw bytes into `buf`, returning bytes read.
    ///
    /// Never reads more whole blocks than fit in `buf`. The count is always a
    /// whole number of blocks; a partial block is held back for the next read.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn read_data_blocks_raw(&mut self, n: usize, buf: &mut [u8]) -> Result<usize> {
        let block_bytes = data_block_size_in_bytes(self.num_enabled_data_streams());
        let blocks = self.blocks_available(n.min(buf.len() / block_bytes))?;
        if blocks == 0 {
            return Ok(0);
        }
        let carried = std::mem::take(&mut self.state_mut().carry);
        buf[..carried.len()].copy_from_slice(&carried);
        let read = match self.transport().read_from_block_pipe_out(
            PipeOut::Data,
            USB_BLOCK_SIZE,
            &mut buf[carried.len()..blocks * block_bytes],
        ) {
            Ok(read) => read,
            Err(e) => {
                self.state_mut().carry = carried;
                return Err(e);
            }
        };
        let total = carried.len() + read;
        let whole = total - total % block_bytes;
        self.state_mut().carry.extend_from_slice(&buf[whole..total]);
        Ok(whole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::{MockTransport, TransportOp};
    use crate::Board;
    use rhs_chip::frame::SAMPLES_PER_DATA_BLOCK;

    fn streaming_board(streams: usize) -> (Board<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let board = Board::open(mock.clone()).unwrap();
        board
            .lock()
            .set_data_streams(DataStreamEnableMap::first(streams).unwrap())
            .unwrap();
        mock.set_running(true);
        (board, mock)
    }

    #[test]
    fn stream_enable_writes_mask() {
        let (board, mock) = streaming_board(0);
        let mut guard = board.lock();
        guard.set_data_stream_enabled(2, true).unwrap();
        guard.set_data_stream_enabled(6, true).unwrap();
        assert_eq!(mock.wire_in(WireIn::DataStreamEn), 0b0100_0100);
        assert_eq!(guard.num_enabled_data_streams(), 2);
        assert!(guard.set_data_stream_enabled(8, true).is_err());
        assert_eq!(guard.num_enabled_data_streams(), 2);
    }

    #[test]
    fn underrun_is_not_an_error() {
        let (board, mock) = streaming_board(2);
        let mut guard = board.lock();
        assert!(guard.read_data_block().unwrap().is_none());
        mock.advance(SAMPLES_PER_DATA_BLOCK as u32 - 1);
        assert!(guard.read_data_block().unwrap().is_none());
        mock.advance(1);
        let block = guard.read_data_block().unwrap().unwrap();
        assert_eq!(block.num_streams(), 2);
        assert_eq!(block.first_timestamp(), 0);
        assert!(block.timestamps_contiguous());
    }

    #[test]
    fn batched_read_is_capped() {
        let (board, mock) = streaming_board(4);
        mock.advance(5 * SAMPLES_PER_DATA_BLOCK as u32);
        let mut queue = VecDeque::new();
        let mut guard = board.lock();
        assert_eq!(guard.read_data_blocks(3, &mut queue).unwrap(), 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(guard.read_data_blocks(10, &mut queue).unwrap(), 2);
        assert_eq!(queue.len(), 5);
        let stamps: Vec<u32> = queue.iter().map(DataBlock::first_timestamp).collect();
        assert_eq!(stamps, vec![0, 128, 256, 384, 512]);
    }

    #[test]
    fn fifo_cache_tracks_changes() {
        let (board, mock) = streaming_board(1);
        let mut guard = board.lock();
        assert_eq!(guard.last_num_words_in_fifo(), (0, false));
        mock.advance(10);
        let words = guard.num_words_in_fifo().unwrap();
        assert_eq!(words, 10 * 64);
        assert_eq!(guard.last_num_words_in_fifo(), (640, true));
        assert_eq!(guard.last_num_words_in_fifo(), (640, false));
        guard.num_words_in_fifo().unwrap();
        assert_eq!(guard.last_num_words_in_fifo(), (640, false));
    }

    #[test]
    fn fixed_length_run_then_drain() {
        let (board, _mock) = streaming_board(1);
        let mut guard = board.lock();
        guard.set_continuous_run_mode(false).unwrap();
        guard.set_max_time_step(2 * SAMPLES_PER_DATA_BLOCK as u32).unwrap();
        guard.run().unwrap();
        assert!(!guard.is_running().unwrap());
        let mut queue = VecDeque::new();
        assert_eq!(guard.read_data_blocks(8, &mut queue).unwrap(), 2);
        let mut file = Vec::new();
        assert_eq!(queue_to_file(&mut queue, &mut file).unwrap(), 2);
        assert!(queue.is_empty());
        assert_eq!(file.len(), 2 * data_block_size_in_bytes(1));
        let back = DataBlock::read_from(&mut file.as_slice(), 1).unwrap().unwrap();
        assert_eq!(back.first_timestamp(), 0);
    }

    #[test]
    fn continuous_mode_reports_running() {
        let (board, _mock) = streaming_board(1);
        let mut guard = board.lock();
        guard.set_continuous_run_mode(true).unwrap();
        guard.run().unwrap();
        assert!(guard.is_running().unwrap());
        guard.set_continuous_run_mode(false).unwrap();
        guard.reset_board().unwrap();
        assert!(!guard.is_running().unwrap());
    }

    #[test]
    fn flush_empties_whole_blocks() {
        let (board, mock) = streaming_board(2);
        mock.advance(3 * SAMPLES_PER_DATA_BLOCK as u32);
        let mut guard = board.lock();
        let dropped = guard.flush().unwrap();
        assert_eq!(dropped, 3 * data_block_size_in_bytes(2));
        assert_eq!(guard.num_words_in_fifo().unwrap(), 0);
    }

    #[test]
    fn flush_never_requests_more_than_the_fifo_holds() {
        let (board, mock) = streaming_board(1);
        mock.push_bytes(&[0u8; 3 * USB_BLOCK_SIZE + 500]);
        let mut guard = board.lock();
        mock.clear_ops();
        assert_eq!(guard.flush().unwrap(), 3 * USB_BLOCK_SIZE);
        let reads: Vec<usize> = mock
            .ops()
            .iter()
            .filter_map(|op| match op {
                TransportOp::ReadFromBlockPipeOut { len, .. } => Some(*len),
                _ => None,
            })
            .collect();
        assert_eq!(reads, vec![3 * USB_BLOCK_SIZE]);
        assert_eq!(mock.fifo_words(), 250);
    }

    #[test]
    fn short_transfer_keeps_frame_alignment() {
        let (board, mock) = streaming_board(2);
        mock.advance(3 * SAMPLES_PER_DATA_BLOCK as u32);
        let block_bytes = data_block_size_in_bytes(2);
        mock.set_read_limit(Some(block_bytes + 4 * USB_BLOCK_SIZE));
        let mut guard = board.lock();
        let mut queue = VecDeque::new();
        assert_eq!(guard.read_data_blocks(3, &mut queue).unwrap(), 1);

        mock.set_read_limit(None);
        assert_eq!(guard.read_data_blocks(3, &mut queue).unwrap(), 2);
        let stamps: Vec<u32> = queue.iter().map(DataBlock::first_timestamp).collect();
        assert_eq!(stamps, vec![0, 128, 256]);
        assert!(queue.iter().all(DataBlock::timestamps_contiguous));
        assert_eq!(guard.read_data_blocks(3, &mut queue).unwrap(), 0);
    }

    #[test]
    fn short_raw_transfer_returns_whole_blocks() {
        let (board, mock) = streaming_board(1);
        mock.advance(2 * SAMPLES_PER_DATA_BLOCK as u32);
        let block_bytes = data_block_size_in_bytes(1);
        mock.set_read_limit(Some(block_bytes + USB_BLOCK_SIZE));
        let mut buf = vec![0u8; 2 * block_bytes];
        let mut guard = board.lock();
        assert_eq!(guard.read_data_blocks_raw(2, &mut buf).unwrap(), block_bytes);

        mock.set_read_limit(None);
        assert_eq!(guard.read_data_blocks_raw(2, &mut buf).unwrap(), block_bytes);
        assert_eq!(DataBlock::parse(&buf[..block_bytes], 1).unwrap().first_timestamp(), 128);
    }

    #[test]
    fn flush_drops_carried_bytes() {
        let (board, mock) = streaming_board(1);
        mock.advance(SAMPLES_PER_DATA_BLOCK as u32);
        mock.set_read_limit(Some(2 * USB_BLOCK_SIZE));
        let mut guard = board.lock();
        let mut queue = VecDeque::new();
        assert_eq!(guard.read_data_blocks(1, &mut queue).unwrap(), 0);
        mock.set_read_limit(None);
        assert_eq!(guard.flush().unwrap(), data_block_size_in_bytes(1));
        assert_eq!(guard.read_data_blocks(1, &mut queue).unwrap(), 0);
    }

    #[test]
    fn raw_read_respects_buffer() {
        let (board, mock) = streaming_board(1);
        mock.advance(4 * SAMPLES_PER_DATA_BLOCK as u32);
        let block_bytes = data_block_size_in_bytes(1);
        let mut buf = vec![0u8; 2 * block_bytes + 10];
        let mut guard = board.lock();
        mock.clear_ops();
        assert_eq!(guard.read_data_blocks_raw(4, &mut buf).unwrap(), 2 * block_bytes);
        assert!(mock
            .ops()
            .contains(&TransportOp::ReadFromBlockPipeOut { ep: PipeOut::Data, len: 2 * block_bytes }));
        assert_eq!(DataBlock::parse(&buf[..block_bytes], 1).unwrap().first_timestamp(), 0);
    }

    #[test]
    fn headroom_shrinks_as_fifo_fills() {
        let (board, mock) = streaming_board(8);
        let mut guard = board.lock();
        let empty = guard.fifo_headroom_seconds().unwrap();
        mock.advance(30_000);
        let later = guard.fifo_headroom_seconds().unwrap();
        assert!(later < empty);
        assert!((empty - later - 1.0).abs() < 1e-6);
        assert!(guard.fifo_fill_fraction().unwrap() > 0.0);
        assert_eq!(fifo_capacity_in_words(), 67_108_864);
    }
}
