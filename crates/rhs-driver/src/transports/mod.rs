// SPDX-License-Identifier: AGPL-3.0-only

//! Transport implementations
//!
//! - `mock` - in-memory board simulation for tests and dry runs

pub mod mock;

pub use mock::{MockTransport, TransportOp};
