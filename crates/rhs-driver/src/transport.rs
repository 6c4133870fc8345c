// SPDX-License-Identifier: AGPL-3.0-only

//! Transport abstraction for the USB front-panel bridge
//!
//! The board is reached through an opaque device handle offering wire,
//! trigger and pipe endpoints. Opening the device and loading the bitfile
//! happen outside this crate; the driver only needs the narrow set of
//! operations below.
//!
//! Implementations are not required to be safe for concurrent use. The
//! [`Board`](crate::Board) owns its transport and serializes every call.

use crate::error::Result;
use rhs_chip::endpoints::{PipeIn, PipeOut, TriggerIn, WireIn, WireOut};
use std::fmt::Debug;

/// Front-panel transport - the capability the board driver is built on
///
/// Wire-in values are staged by [`set_wire_in`](Self::set_wire_in) and sent
/// together by [`update_wire_ins`](Self::update_wire_ins). Wire-out values
/// are sampled by [`update_wire_outs`](Self::update_wire_outs) and then read
/// from the local copy with [`wire_out`](Self::wire_out).
pub trait Transport: Debug + Send {
    /// Stage `value` into the bits of `ep` selected by `mask`
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the endpoint.
    fn set_wire_in(&mut self, ep: WireIn, value: u32, mask: u32) -> Result<()>;

    /// Send all staged wire-in values to the FPGA
    ///
    /// # Errors
    ///
    /// Returns error if the USB transfer fails.
    fn update_wire_ins(&mut self) -> Result<()>;

    /// Sample all wire-outs from the FPGA
    ///
    /// # Errors
    ///
    /// Returns error if the USB transfer fails.
    fn update_wire_outs(&mut self) -> Result<()>;

    /// Value of `ep` as of the last [`update_wire_outs`](Self::update_wire_outs)
    fn wire_out(&self, ep: WireOut) -> u32;

    /// Pulse one bit of a trigger-in endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the USB transfer fails.
    fn activate_trigger_in(&mut self, ep: TriggerIn, bit: u32) -> Result<()>;

    /// Write bytes to a pipe-in endpoint, returning bytes written
    ///
    /// # Errors
    ///
    /// Returns error if the USB transfer fails.
    fn write_to_pipe_in(&mut self, ep: PipeIn, data: &[u8]) -> Result<usize>;

    /// Read into `buf` from a block pipe-out, returning bytes read
    ///
    /// `buf.len()` must be a multiple of `block_size`.
    ///
    /// # Errors
    ///
    /// Returns error if the USB transfer fails.
    fn read_from_block_pipe_out(
        &mut self,
        ep: PipeOut,
        block_size: usize,
        buf: &mut [u8],
    ) -> Result<usize>;

    /// Transport type for logging
    fn kind(&self) -> TransportKind;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn set_wire_in(&mut self, ep: WireIn, value: u32, mask: u32) -> Result<()> {
        (**self).set_wire_in(ep, value, mask)
    }

    fn update_wire_ins(&mut self) -> Result<()> {
        (**self).update_wire_ins()
    }

    fn update_wire_outs(&mut self) -> Result<()> {
        (**self).update_wire_outs()
    }

    fn wire_out(&self, ep: WireOut) -> u32 {
        (**self).wire_out(ep)
    }

    fn activate_trigger_in(&mut self, ep: TriggerIn, bit: u32) -> Result<()> {
        (**self).activate_trigger_in(ep, bit)
    }

    fn write_to_pipe_in(&mut self, ep: PipeIn, data: &[u8]) -> Result<usize> {
        (**self).write_to_pipe_in(ep, data)
    }

    fn read_from_block_pipe_out(
        &mut self,
        ep: PipeOut,
        block_size: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        (**self).read_from_block_pipe_out(ep, block_size, buf)
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// USB front-panel device
    FrontPanel,

    /// In-memory simulation - no hardware required
    Mock,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrontPanel => write!(f, "USB front panel"),
            Self::Mock => write!(f, "Mock (simulated board)"),
        }
    }
}
