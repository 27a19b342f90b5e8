//! 65802 coprocessor core.
//!
//! The 16-bit-bus member of the 65C816 family: native and emulation modes,
//! 8/16-bit accumulator and index widths, a relocatable direct page, and
//! bank registers that exist architecturally while the address bus stays
//! sixteen bits wide. The decode tables carry one opcode table per
//! submode (emulation × M × X, doubled for an unaligned direct page);
//! flag writes re-select the active table at the next fetch.
//!
//! Unlike the 6502 sibling, the run loop always consumes its cycle budget
//! exactly: there is no breakpoint path and no early stop. Callers that
//! need instruction stepping schedule short budgets and watch the
//! boundary flag in the execution state.

mod cpu;
mod decoder;
mod flags;
mod states;

pub use cpu::{Coproc65802, Registers};
pub use flags::{C, D, I, M, N, V, X, Z};
