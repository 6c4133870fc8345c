// SPDX-License-Identifier: AGPL-3.0-only

//! Auxiliary command RAM upload
//!
//! Each slot's list is split into 16-bit halves and written through two pipes
//! after rewinding the RAM write pointer. Capacity is checked before anything
//! is sent, so an oversized list never reaches the board.

use crate::board::BoardGuard;
use crate::error::{Result, RhsError};
use crate::transport::Transport;
use rhs_chip::command::{split_half_words, AuxCmdSlot, CommandList, COMMAND_RAM_WORDS};
use rhs_chip::endpoints::{ram_addr_reset, TriggerIn, WireIn};
use tracing::debug;

fn index_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

impl<T: Transport> BoardGuard<'_, T> {
    /// Replace the command list held in one auxiliary slot's RAM.
    ///
    /// # Errors
    ///
    /// Returns [`RhsError::CommandListTooLong`] without touching the board if
    /// `words` exceeds the RAM, or a transport error.
    pub fn upload_command_list(&mut self, words: &[u32], slot: AuxCmdSlot) -> Result<()> {
        if words.len() > COMMAND_RAM_WORDS {
            return Err(RhsError::CommandListTooLong {
                len: words.len(),
                capacity: COMMAND_RAM_WORDS,
            });
        }
        let (msw, lsw) = split_half_words(words);
        let (msw_pipe, lsw_pipe) = slot.pipes();
        let t = self.transport();
        t.activate_trigger_in(TriggerIn::RamAddrReset, ram_addr_reset::COMMAND_RAM)?;
        t.write_to_pipe_in(msw_pipe, &msw)?;
        t.write_to_pipe_in(lsw_pipe, &lsw)?;
        debug!("Uploaded {} command words to {slot:?}", words.len());
        Ok(())
    }

    /// Set the loop bounds a slot's sequencer steps through.
    ///
    /// # Errors
    ///
    /// Returns error unless `loop_index <= end_index < 65536`, or on transport failure.
    pub fn select_aux_command_length(
        &mut self,
        slot: AuxCmdSlot,
        loop_index: usize,
        end_index: usize,
    ) -> Result<()> {
        if end_index >= COMMAND_RAM_WORDS {
            return Err(RhsError::out_of_range(
                "end index",
                index_i64(end_index),
                0,
                index_i64(COMMAND_RAM_WORDS - 1),
            ));
        }
        if loop_index > end_index {
            return Err(RhsError::out_of_range(
                "loop index",
                index_i64(loop_index),
                0,
                index_i64(end_index),
            ));
        }
        let bit = slot.index() as u32;
        self.write_wire(WireIn::MultiUse, loop_index as u32, 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::AuxCmdLength, bit + 4)?;
        self.write_wire(WireIn::MultiUse, end_index as u32, 0xffff_ffff)?;
        self.transport().activate_trigger_in(TriggerIn::AuxCmdLength, bit)?;
        self.state_mut().aux_lengths[slot.index()] = Some((loop_index, end_index));
        Ok(())
    }

    /// Upload a list and select its loop bounds in one step.
    ///
    /// # Errors
    ///
    /// Returns error if the list is empty or too long, or on transport failure.
    pub fn upload_and_select(&mut self, list: &CommandList, slot: AuxCmdSlot) -> Result<()> {
        if list.is_empty() {
            return Err(RhsError::out_of_range("command list length", 0, 1, index_i64(COMMAND_RAM_WORDS)));
        }
        self.upload_command_list(list.words(), slot)?;
        self.select_aux_command_length(slot, list.loop_index(), list.end_index())
    }

    /// Loop bounds last selected for a slot.
    pub fn aux_command_length(&self, slot: AuxCmdSlot) -> Option<(usize, usize)> {
        self.state().aux_lengths[slot.index()]
    }
}
