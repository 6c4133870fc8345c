// SPDX-License-Identifier: AGPL-3.0-only

//! Data stream enable map
//!
//! Streams are addressed by fixed index (two per SPI port), not by position in
//! a compacted list: disabling stream 3 leaves stream 5 at index 5.

use crate::error::{check_index, Result, RhsError};
use rhs_chip::board::{BoardPort, MAX_NUM_DATA_STREAMS};

/// Enabled flag per data stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataStreamEnableMap {
    enabled: [bool; MAX_NUM_DATA_STREAMS],
}

impl DataStreamEnableMap {
    /// Map with no streams enabled.
    pub const fn none() -> Self {
        Self {
            enabled: [false; MAX_NUM_DATA_STREAMS],
        }
    }

    /// Map with the first `count` streams enabled.
    ///
    /// # Errors
    ///
    /// Returns error if `count` exceeds the number of streams.
    pub fn first(count: usize) -> Result<Self> {
        if count > MAX_NUM_DATA_STREAMS {
            return Err(RhsError::TooManyStreams {
                requested: count,
                max: MAX_NUM_DATA_STREAMS,
            });
        }
        let mut map = Self::none();
        map.enabled[..count].fill(true);
        Ok(map)
    }

    /// Map with both streams of each listed port enabled.
    pub fn ports(ports: &[BoardPort]) -> Self {
        let mut map = Self::none();
        for port in ports {
            for s in port.streams() {
                map.enabled[s] = true;
            }
        }
        map
    }

    /// Enable or disable one stream.
    ///
    /// # Errors
    ///
    /// Returns error if `stream` is out of range.
    pub fn set(&mut self, stream: usize, enabled: bool) -> Result<()> {
        check_index("stream", stream, MAX_NUM_DATA_STREAMS)?;
        self.enabled[stream] = enabled;
        Ok(())
    }

    /// Whether `stream` is enabled (false for out-of-range indices).
    pub fn is_enabled(&self, stream: usize) -> bool {
        self.enabled.get(stream).copied().unwrap_or(false)
    }

    /// Number of enabled streams.
    pub fn num_enabled(&self) -> usize {
        self.enabled.iter().filter(|&&e| e).count()
    }

    /// Indices of enabled streams, ascending.
    pub fn enabled_streams(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_NUM_DATA_STREAMS).filter(|&s| self.enabled[s])
    }

    /// `DataStreamEn` wire-in value, bit `n` for stream `n`.
    pub fn mask(&self) -> u32 {
        self.enabled
            .iter()
            .enumerate()
            .filter(|(_, &e)| e)
            .fold(0, |m, (s, _)| m | (1 << s))
    }

    /// Decode a `DataStreamEn` value.
    pub fn from_mask(mask: u32) -> Self {
        let mut map = Self::none();
        for (s, e) in map.enabled.iter_mut().enumerate() {
            *e = mask & (1 << s) != 0;
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_matches_enabled_entries() {
        for n in 0..=MAX_NUM_DATA_STREAMS {
            let map = DataStreamEnableMap::first(n).unwrap();
            assert_eq!(map.num_enabled(), n);
            assert_eq!(map.mask().count_ones() as usize, n);
        }
        assert!(matches!(
            DataStreamEnableMap::first(9),
            Err(RhsError::TooManyStreams { requested: 9, max: 8 })
        ));
    }

    #[test]
    fn disabling_keeps_other_indices() {
        let mut map = DataStreamEnableMap::first(8).unwrap();
        map.set(3, false).unwrap();
        let streams: Vec<usize> = map.enabled_streams().collect();
        assert_eq!(streams, vec![0, 1, 2, 4, 5, 6, 7]);
        assert!(map.is_enabled(5));
        assert_eq!(map.mask(), 0xf7);
    }

    #[test]
    fn port_selection() {
        let map = DataStreamEnableMap::ports(&[BoardPort::B, BoardPort::D]);
        assert_eq!(map.mask(), 0b1100_1100);
        assert_eq!(DataStreamEnableMap::from_mask(map.mask()), map);
    }

    #[test]
    fn out_of_range_stream() {
        let mut map = DataStreamEnableMap::none();
        assert!(map.set(8, true).is_err());
        assert!(!map.is_enabled(42));
    }
}
