//! rowflow-dataflow - Change-propagation protocol and output fan-out for
//! the rowflow incremental dataflow engine.
//!
//! # Core Concepts
//!
//! - `FlowInput`: the receiving side of the protocol; every operator
//!   implements it for each of its inputs
//! - `OutputHandle`: a weak handle to an operator output, used to attach
//!   and detach inputs and to enumerate the active rowspace
//! - `OutputManager`: the fan-out hub each operator owns per output;
//!   replays state to newly attached inputs and multicasts notifications
//! - `StateChange` / `StateChangeSet`: per-firing accumulators flushed in
//!   the fixed order removes, adds, changes
//!
//! # Threading
//!
//! A dataflow graph is single-threaded cooperative: every notification is
//! a direct call chain from the source mutation to the leaf consumers,
//! with no internal locking. Independent graphs must be serialized
//! externally.

#![no_std]

extern crate alloc;

mod output;
mod port;
mod state_change;

pub use output::{OutputHandle, OutputManager};
pub use port::{input_handle, FlowInput, InputHandle};
pub use state_change::{StateChange, StateChangeSet};
