// SPDX-License-Identifier: AGPL-3.0-only

//! Parsed USB data blocks
//!
//! A [`DataBlock`] holds [`SAMPLES_PER_DATA_BLOCK`] consecutive frames. The
//! same little-endian byte layout is used on the wire and in recorded files,
//! so [`DataBlock::write_to`] output parses back with [`DataBlock::parse`].

use crate::error::{check_index, Result, RhsError};
use bytes::{Buf, BufMut, BytesMut};
use rhs_chip::board::{CHANNELS_PER_STREAM, MAX_NUM_DATA_STREAMS, NUM_BOARD_ADCS, NUM_BOARD_DACS};
use rhs_chip::frame::{data_block_size_in_bytes, FRAME_MAGIC, NUM_AUX_RESULTS, SAMPLES_PER_DATA_BLOCK};
use std::io::{ErrorKind, Read, Write};

fn check_stream_count(num_streams: usize) -> Result<()> {
    if num_streams > MAX_NUM_DATA_STREAMS {
        return Err(RhsError::TooManyStreams {
            requested: num_streams,
            max: MAX_NUM_DATA_STREAMS,
        });
    }
    Ok(())
}

/// One sample period across all enabled streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sample counter since the start of the run
    pub timestamp: u32,
    /// Auxiliary command results, per stream, per slot
    pub aux: Vec<[u32; NUM_AUX_RESULTS]>,
    /// Amplifier samples, per stream, per channel (offset binary)
    pub amplifier: Vec<[u16; CHANNELS_PER_STREAM]>,
    /// DC amplifier samples, per stream, per channel
    pub dc_amplifier: Vec<[u16; CHANNELS_PER_STREAM]>,
    /// Board DAC outputs
    pub dac: [u16; NUM_BOARD_DACS],
    /// Board ADC inputs
    pub adc: [u16; NUM_BOARD_ADCS],
    /// Digital inputs, one bit per line
    pub ttl_in: u16,
    /// Digital outputs, one bit per line
    pub ttl_out: u16,
}

impl Frame {
    /// All-zero frame for `num_streams` streams.
    pub fn zeroed(num_streams: usize, timestamp: u32) -> Self {
        Self {
            timestamp,
            aux: vec![[0; NUM_AUX_RESULTS]; num_streams],
            amplifier: vec![[0; CHANNELS_PER_STREAM]; num_streams],
            dc_amplifier: vec![[0; CHANNELS_PER_STREAM]; num_streams],
            dac: [0; NUM_BOARD_DACS],
            adc: [0; NUM_BOARD_ADCS],
            ttl_in: 0,
            ttl_out: 0,
        }
    }

    /// Number of streams carried by this frame.
    pub fn num_streams(&self) -> usize {
        self.amplifier.len()
    }

    fn parse(buf: &mut &[u8], num_streams: usize) -> Result<Self> {
        let magic = buf.get_u64_le();
        if magic != FRAME_MAGIC {
            return Err(RhsError::BadFrameHeader { found: magic });
        }
        let mut frame = Self::zeroed(num_streams, buf.get_u32_le());
        for aux in &mut frame.aux {
            aux[0] = buf.get_u32_le();
        }
        for ch in 0..CHANNELS_PER_STREAM {
            for s in 0..num_streams {
                frame.dc_amplifier[s][ch] = buf.get_u16_le();
                frame.amplifier[s][ch] = buf.get_u16_le();
            }
        }
        for slot in 1..NUM_AUX_RESULTS {
            for aux in &mut frame.aux {
                aux[slot] = buf.get_u32_le();
            }
        }
        for d in &mut frame.dac {
            *d = buf.get_u16_le();
        }
        for a in &mut frame.adc {
            *a = buf.get_u16_le();
        }
        frame.ttl_in = buf.get_u16_le();
        frame.ttl_out = buf.get_u16_le();
        Ok(frame)
    }

    /// Deterministic test-pattern frame.
    ///
    /// Amplifier words ramp around mid-scale, ADCs carry the channel index and
    /// TTL-in carries the low bits of the timestamp.
    ///
    /// # Errors
    ///
    /// Returns error if `num_streams` exceeds the board maximum.
    pub fn synthetic(num_streams: usize, timestamp: u32) -> Result<Self> {
        check_stream_count(num_streams)?;
        Ok(Self::pattern(num_streams, timestamp))
    }

    pub(crate) fn pattern(num_streams: usize, timestamp: u32) -> Self {
        let mut frame = Self::zeroed(num_streams, timestamp);
        for (s, amp) in frame.amplifier.iter_mut().enumerate() {
            for (ch, word) in amp.iter_mut().enumerate() {
                *word = 0x8000 + ((timestamp as usize + 3 * s + ch) % 64) as u16;
            }
        }
        for dc in &mut frame.dc_amplifier {
            dc.fill(0x0200);
        }
        for (ch, a) in frame.adc.iter_mut().enumerate() {
            *a = ch as u16;
        }
        frame.ttl_in = (timestamp & 0xffff) as u16;
        frame
    }

    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(FRAME_MAGIC);
        buf.put_u32_le(self.timestamp);
        for aux in &self.aux {
            buf.put_u32_le(aux[0]);
        }
        for ch in 0..CHANNELS_PER_STREAM {
            for s in 0..self.num_streams() {
                buf.put_u16_le(self.dc_amplifier[s][ch]);
                buf.put_u16_le(self.amplifier[s][ch]);
            }
        }
        for slot in 1..NUM_AUX_RESULTS {
            for aux in &self.aux {
                buf.put_u32_le(aux[slot]);
            }
        }
        for &d in &self.dac {
            buf.put_u16_le(d);
        }
        for &a in &self.adc {
            buf.put_u16_le(a);
        }
        buf.put_u16_le(self.ttl_in);
        buf.put_u16_le(self.ttl_out);
    }
}

/// [`SAMPLES_PER_DATA_BLOCK`] frames read from the board in one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    num_streams: usize,
    frames: Vec<Frame>,
}

impl DataBlock {
    /// Assemble a block from exactly [`SAMPLES_PER_DATA_BLOCK`] frames of `num_streams` streams.
    ///
    /// # Errors
    ///
    /// Returns error if the frame count or any frame's stream count is wrong.
    pub fn from_frames(num_streams: usize, frames: Vec<Frame>) -> Result<Self> {
        check_index("num_streams", num_streams, MAX_NUM_DATA_STREAMS + 1)?;
        if frames.len() != SAMPLES_PER_DATA_BLOCK {
            return Err(RhsError::out_of_range(
                "frames per block",
                i64::try_from(frames.len()).unwrap_or(i64::MAX),
                SAMPLES_PER_DATA_BLOCK as i64,
                SAMPLES_PER_DATA_BLOCK as i64,
            ));
        }
        if let Some(bad) = frames.iter().find(|f| {
            f.num_streams() != num_streams
                || f.aux.len() != num_streams
                || f.dc_amplifier.len() != num_streams
        }) {
            return Err(RhsError::out_of_range(
                "frame streams",
                i64::try_from(bad.num_streams()).unwrap_or(i64::MAX),
                i64::try_from(num_streams).unwrap_or(i64::MAX),
                i64::try_from(num_streams).unwrap_or(i64::MAX),
            ));
        }
        Ok(Self { num_streams, frames })
    }

    /// Deterministic test-pattern block whose timestamps start at `first_timestamp`.
    ///
    /// # Errors
    ///
    /// Returns error if `num_streams` exceeds the board maximum.
    pub fn synthetic(num_streams: usize, first_timestamp: u32) -> Result<Self> {
        check_stream_count(num_streams)?;
        let frames = (0..SAMPLES_PER_DATA_BLOCK as u32)
            .map(|i| Frame::pattern(num_streams, first_timestamp.wrapping_add(i)))
            .collect();
        Ok(Self { num_streams, frames })
    }

    /// Parse one block from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is shorter than one block or a frame header is wrong.
    pub fn parse(bytes: &[u8], num_streams: usize) -> Result<Self> {
        check_index("num_streams", num_streams, MAX_NUM_DATA_STREAMS + 1)?;
        let size = data_block_size_in_bytes(num_streams);
        if bytes.len() < size {
            return Err(RhsError::Io {
                source: std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("{} bytes for a {size}-byte data block", bytes.len()),
                ),
            });
        }
        let mut buf = &bytes[..size];
        let frames = (0..SAMPLES_PER_DATA_BLOCK)
            .map(|_| Frame::parse(&mut buf, num_streams))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { num_streams, frames })
    }

    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(data_block_size_in_bytes(self.num_streams));
        for frame in &self.frames {
            frame.encode(&mut buf);
        }
        buf
    }

    /// Write the block to a recording sink.
    ///
    /// # Errors
    ///
    /// Returns error if the sink fails.
    pub fn write_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read the next block from a recording, or `None` at a clean end of file.
    ///
    /// # Errors
    ///
    /// Returns error on a truncated block, a bad frame header or an I/O failure.
    pub fn read_from<R: Read + ?Sized>(source: &mut R, num_streams: usize) -> Result<Option<Self>> {
        let mut buf = vec![0u8; data_block_size_in_bytes(num_streams)];
        let mut filled = 0;
        while filled < buf.len() {
            match source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        Self::parse(&buf[..filled], num_streams).map(Some)
    }

    /// Streams carried by each frame.
    pub fn num_streams(&self) -> usize {
        self.num_streams
    }

    /// Frames in sample order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Timestamp of the first frame.
    pub fn first_timestamp(&self) -> u32 {
        self.frames.first().map_or(0, |f| f.timestamp)
    }

    /// Size of this block on the wire.
    pub fn size_in_bytes(&self) -> usize {
        data_block_size_in_bytes(self.num_streams)
    }

    /// True if timestamps increase by one from frame to frame.
    pub fn timestamps_contiguous(&self) -> bool {
        self.frames
            .windows(2)
            .all(|w| w[1].timestamp == w[0].timestamp.wrapping_add(1))
    }
}
