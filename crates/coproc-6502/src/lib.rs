//! MOS 6502 / WDC 65C02 coprocessor core.
//!
//! A microcode-driven, decode-table interpreter: every instruction is a
//! sequence of single-byte microcode tokens in a shared heap, executed
//! against a cycle budget credited by the owning scheduler. Execution can
//! suspend mid-instruction — the microcode index persists across run
//! calls — so device timing can interleave arbitrarily short bursts.
//!
//! The NMOS configuration can carry a trace cache: hot code is linearized
//! into contiguous token blocks entered transparently at instruction
//! boundaries. The cache is invisible to emulated software, including
//! self-modifying code (writes landing on compiled pages invalidate
//! synchronously through the memory map's write path).

mod cpu;
mod decoder;
mod flags;
mod states;
mod trace;

pub use cpu::{Coproc6502, CpuKind, Registers};
pub use flags::{B, C, D, I, N, U, V, Z};
