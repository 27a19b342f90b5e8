//! Shared infrastructure for the coprocessor CPU cores.
//!
//! A coprocessor is a CPU core driven cooperatively by an external
//! scheduler: the owner credits a cycle budget, calls the run loop, and
//! interleaves device work between calls. Everything here is the plumbing
//! those cores share — the paged memory dispatch layer, the execution
//! state snapshot, history recording, breakpoints, and save-state
//! exchange.

mod breakpoints;
mod exec_state;
mod history;
mod memory;
mod savestate;

pub use breakpoints::BreakpointHandler;
pub use exec_state::ExecState;
pub use history::{HistoryEntry, HistoryRing};
pub use memory::{MemoryMap, ReadAdapter, WriteAdapter, TRACE_PAGE_OFF, TRACE_PAGE_READY};
pub use savestate::StateTransfer;
