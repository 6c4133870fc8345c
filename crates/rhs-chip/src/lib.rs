// SPDX-License-Identifier: AGPL-3.0-only

//! Silicon and board model for the Rhythm Stim FPGA interface board and the
//! RHS2000 stimulation/recording chips it drives.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a pure
//! model of the board: front-panel endpoint addresses, the chip command-word
//! format, the chip register bank, the sample-rate clock table, stimulation
//! sequencer registers, and the USB data-frame layout.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`board`] | Board identity, port/stream constants, FIFO and RAM capacities |
//! | [`endpoints`] | Typed wire-in, wire-out, trigger-in and pipe endpoint map |
//! | [`rates`] | Amplifier sample rates and the DCM multiply/divide table |
//! | [`command`] | 32-bit chip command words, auxiliary slots, command lists, register bank |
//! | [`stim`] | Stimulation sequencer registers, shapes, trigger sources |
//! | [`frame`] | USB data-frame layout (magic, sizes per stream count) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod board;
pub mod command;
pub mod endpoints;
pub mod frame;
pub mod rates;
pub mod stim;
