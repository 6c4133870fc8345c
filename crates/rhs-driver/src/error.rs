// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for board operations

use thiserror::Error;

/// Result type alias for board operations
pub type Result<T> = std::result::Result<T, RhsError>;

/// Errors that can occur while controlling the board
#[derive(Debug, Error)]
pub enum RhsError {
    /// Command list does not fit in the auxiliary command RAM
    #[error("Command list of {len} words exceeds command RAM capacity of {capacity} words")]
    CommandListTooLong {
        /// Words in the rejected list
        len: usize,
        /// RAM capacity in words
        capacity: usize,
    },

    /// More data streams requested than the board can carry
    #[error("{requested} data streams requested, board supports at most {max}")]
    TooManyStreams {
        /// Streams requested
        requested: usize,
        /// Board maximum
        max: usize,
    },

    /// Argument outside the width of its hardware field
    #[error("{what} = {value} out of range ({min}..={max})")]
    OutOfRange {
        /// Name of the argument
        what: &'static str,
        /// Rejected value
        value: i64,
        /// Smallest legal value
        min: i64,
        /// Largest legal value
        max: i64,
    },

    /// Stimulation event times that cannot be programmed
    #[error("Invalid stimulation timing: {reason}")]
    InvalidStimTiming {
        /// What is inconsistent
        reason: String,
    },

    /// No board reachable through the transport
    #[error("Board not found: {reason}")]
    BoardNotFound {
        /// Reason reported by the transport
        reason: String,
    },

    /// The FPGA is not running the Rhythm Stim bitfile
    #[error("Unexpected board ID {found} (expected {expected}); is the bitfile loaded?")]
    UnexpectedBoardId {
        /// ID read from the board
        found: u32,
        /// Required ID
        expected: u32,
    },

    /// The board is not a stimulation/recording controller
    #[error("Unexpected board mode {found} (expected {expected})")]
    UnexpectedBoardMode {
        /// Mode read from the board
        found: u32,
        /// Required mode
        expected: u32,
    },

    /// Failure reported by the USB transport
    #[error("Transport failure: {reason}")]
    Transport {
        /// Reason for failure
        reason: String,
    },

    /// Clock synthesis did not complete
    #[error("{what} not reported after {attempts} polls")]
    NotLocked {
        /// Status bit waited for
        what: &'static str,
        /// Polls performed
        attempts: u32,
    },

    /// Frame does not start with the expected magic number
    #[error("Bad frame header {found:#018x}; FIFO is out of frame alignment")]
    BadFrameHeader {
        /// Value found where the magic number should be
        found: u64,
    },

    /// I/O error on a data sink or source
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl RhsError {
    /// Create an out-of-range error
    pub fn out_of_range(
        what: &'static str,
        value: impl Into<i64>,
        min: impl Into<i64>,
        max: impl Into<i64>,
    ) -> Self {
        Self::OutOfRange {
            what,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        }
    }

    /// Create an invalid stimulation timing error
    pub fn invalid_stim_timing(reason: impl Into<String>) -> Self {
        Self::InvalidStimTiming {
            reason: reason.into(),
        }
    }

    /// Create a board not found error
    pub fn board_not_found(reason: impl Into<String>) -> Self {
        Self::BoardNotFound {
            reason: reason.into(),
        }
    }

    /// Create a transport failure
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

/// Check that `value` lies in `0..limit`, for stream, channel and similar indices
pub(crate) fn check_index(what: &'static str, value: usize, limit: usize) -> Result<()> {
    if value < limit {
        Ok(())
    } else {
        Err(RhsError::out_of_range(
            what,
            i64::try_from(value).unwrap_or(i64::MAX),
            0,
            i64::try_from(limit).unwrap_or(i64::MAX) - 1,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_check_bounds() {
        assert!(check_index("stream", 7, 8).is_ok());
        let err = check_index("stream", 8, 8).unwrap_err();
        assert!(matches!(err, RhsError::OutOfRange { what: "stream", value: 8, min: 0, max: 7 }));
    }

    #[test]
    fn messages_name_the_problem() {
        let err = RhsError::CommandListTooLong { len: 65_537, capacity: 65_536 };
        assert!(err.to_string().contains("65537"));
        let err = RhsError::BadFrameHeader { found: 0 };
        assert!(err.to_string().contains("0x0000000000000000"));
    }
}
