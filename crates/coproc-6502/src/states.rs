//! Microcode state definitions.
//!
//! Every instruction decodes to a sequence of these single-byte tokens in
//! the decode heap. One token is one atomic interpreter operation, finer
//! grained than a machine instruction; tokens that touch the bus consume
//! one cycle each, register-transfer tokens are free. The trace cache
//! compiles instructions into the same token vocabulary plus the
//! argument-carrying trace tokens at the end of this list.

// === Dispatch and instrumentation ===

pub const NOP: u8 = 0x00;
/// Fetch opcode, consulting the breakpoint table first.
pub const READ_OPCODE: u8 = 0x01;
/// Fetch opcode without a breakpoint check (also the post-stop entry).
pub const READ_OPCODE_NO_BREAK: u8 = 0x02;
/// Append a history entry for the instruction just fetched.
pub const ADD_TO_HISTORY: u8 = 0x03;
/// JAM: pin PC at the instruction and absorb the remaining budget.
pub const BREAK_ON_UNSUPPORTED: u8 = 0x04;
/// Decode tables are stale (history toggle); rebuild and re-enter.
pub const REGENERATE_TABLES: u8 = 0x05;

// === Operand fetch ===

pub const READ_IMM: u8 = 0x08;
pub const READ_ADDR_L: u8 = 0x09;
pub const READ_ADDR_H: u8 = 0x0A;
/// Read address high, add X; keeps the same-page address for the carry fixup.
pub const READ_ADDR_HX: u8 = 0x0B;
pub const READ_ADDR_HY: u8 = 0x0C;
/// SHY abs,X: high byte read corrupts the stored value with Y & (high+1).
pub const READ_ADDR_HX_SHY: u8 = 0x0D;
/// SHA abs,Y: stored value becomes A & X & (high+1).
pub const READ_ADDR_HY_SHA: u8 = 0x0E;
/// SHX abs,Y: stored value becomes X & (high+1).
pub const READ_ADDR_HY_SHX: u8 = 0x0F;

// === Data and pointer cycles ===

pub const READ: u8 = 0x10;
/// Read (dummy) then add X to the zero-page address.
pub const READ_ADD_X: u8 = 0x11;
pub const READ_ADD_Y: u8 = 0x12;
/// Read from the un-carried address; skip the next token if no page cross.
pub const READ_CARRY: u8 = 0x13;
/// Read from the un-carried address unconditionally (write/RMW indexing).
pub const READ_CARRY_FORCED: u8 = 0x14;
/// Indirect high fetch with correct page increment (65C02 JMP (abs)).
pub const READ_ABS_IND_ADDR: u8 = 0x15;
/// Indirect high fetch reproducing the NMOS page-wrap defect.
pub const READ_ABS_IND_ADDR_BROKEN: u8 = 0x16;
/// High byte of a zero-page pointer, wrapped within the zero page.
pub const READ_IND_ADDR: u8 = 0x17;
pub const READ_IND_Y_ADDR: u8 = 0x18;
/// SHA (zp),Y variant of the pointer-high fetch.
pub const READ_IND_Y_ADDR_SHA: u8 = 0x19;
pub const WRITE: u8 = 0x1A;
/// Internal cycle, no bus traffic modeled.
pub const WAIT: u8 = 0x1B;

// === Register transfers (free) ===

pub const A_TO_D: u8 = 0x20;
pub const X_TO_D: u8 = 0x21;
pub const Y_TO_D: u8 = 0x22;
pub const S_TO_D: u8 = 0x23;
pub const P_TO_D: u8 = 0x24;
pub const ZERO_TO_D: u8 = 0x25;
pub const D_TO_A: u8 = 0x26;
pub const D_TO_X: u8 = 0x27;
pub const D_TO_Y: u8 = 0x28;
pub const D_TO_S: u8 = 0x29;
pub const D_TO_P: u8 = 0x2A;
pub const D_SET_SZ: u8 = 0x2B;
pub const D_SET_SV: u8 = 0x2C;
pub const ADDR_TO_PC: u8 = 0x2D;
/// Point PC at the BRK/IRQ vector so the next two fetches read it.
pub const IRQ_VEC_TO_PC: u8 = 0x2E;

// === Stack cycles ===

pub const PUSH: u8 = 0x30;
pub const PUSH_PCH: u8 = 0x31;
pub const PUSH_PCL: u8 = 0x32;
pub const PUSH_PCH_M1: u8 = 0x33;
pub const PUSH_PCL_M1: u8 = 0x34;
pub const POP: u8 = 0x35;
pub const POP_PCL: u8 = 0x36;
pub const POP_PCH: u8 = 0x37;
pub const POP_PCH_P1: u8 = 0x38;

// === ALU ===

pub const ADC: u8 = 0x40;
pub const SBC: u8 = 0x41;
pub const CMP: u8 = 0x42;
pub const CMP_X: u8 = 0x43;
pub const CMP_Y: u8 = 0x44;
pub const INC: u8 = 0x45;
pub const DEC: u8 = 0x46;
/// INX fused with its internal cycle.
pub const INC_X_WAIT: u8 = 0x47;
pub const DEC_X_WAIT: u8 = 0x48;
pub const AND: u8 = 0x49;
/// A & X into the data latch without touching flags (SAX stores).
pub const AND_SAX: u8 = 0x4A;
pub const ANC: u8 = 0x4B;
pub const XAA: u8 = 0x4C;
pub const LAS: u8 = 0x4D;
pub const SBX: u8 = 0x4E;
pub const ARR: u8 = 0x4F;
/// TAS/SHS: S = A & X (the store value was built by the address fetch).
pub const XAS: u8 = 0x50;
pub const OR: u8 = 0x51;
pub const XOR: u8 = 0x52;
pub const ASL: u8 = 0x53;
pub const LSR: u8 = 0x54;
pub const ROL: u8 = 0x55;
pub const ROR: u8 = 0x56;
pub const BIT: u8 = 0x57;

// === Flag ops ===

pub const SEI: u8 = 0x58;
pub const CLI: u8 = 0x59;
pub const SEC: u8 = 0x5A;
pub const CLC: u8 = 0x5B;
pub const SED: u8 = 0x5C;
pub const CLD: u8 = 0x5D;
pub const CLV: u8 = 0x5E;

// === Conditional branches (Jcc; taken path may skip the false read) ===

pub const JS: u8 = 0x60;
pub const JNS: u8 = 0x61;
pub const JC: u8 = 0x62;
pub const JNC: u8 = 0x63;
pub const JZ: u8 = 0x64;
pub const JNZ: u8 = 0x65;
pub const JO: u8 = 0x66;
pub const JNO: u8 = 0x67;
/// Wrong-page dummy read on a page-crossing taken branch.
pub const JCC_FALSE_READ: u8 = 0x68;

// === 65C02 ===

pub const RESET_BIT: u8 = 0x70;
pub const SET_BIT: u8 = 0x71;
/// Branch displacement for BBR/BBS (separate from the data latch).
pub const READ_REL: u8 = 0x72;
pub const J0: u8 = 0x73;
pub const J1: u8 = 0x74;
/// Unconditional relative branch (BRA).
pub const J: u8 = 0x75;
pub const WAIT_FOR_INTERRUPT: u8 = 0x76;
pub const STOP: u8 = 0x77;
pub const TRB: u8 = 0x78;
pub const TSB: u8 = 0x79;
/// 65C02 decimal ADC: corrected flags, extra cycle only in decimal mode.
pub const C02_ADC: u8 = 0x7A;
pub const C02_SBC: u8 = 0x7B;

// === Trace cache tokens ===
//
// Only ever found in the trace arena, never in the decode heap, except
// that TRACE_PC / TRACE_ADDR_TO_PC also appear in decode microprograms of
// control-transfer instructions when tracing is enabled (they are the
// entry probes).

/// Align the microcode index up to the next 64-byte line (emitted when a
/// token would straddle one).
pub const TRACE_BRIDGE: u8 = 0x80;
/// Addr -> PC, then probe for a compiled trace at the new PC.
pub const TRACE_ADDR_TO_PC: u8 = 0x81;
/// Probe for a compiled trace at the current PC.
pub const TRACE_PC: u8 = 0x82;
/// Traced instruction header: `len, addr.lo, addr.hi, data, opcode`.
/// Preloads the operand latches, advances PC over the whole instruction,
/// and consumes the opcode fetch cycle. `len` continuation stubs follow
/// so mid-instruction suspension can resume cycle-exactly.
pub const TRACE_START_INSN: u8 = 0x83;
/// TRACE_START_INSN plus a history append; carries all three instruction
/// bytes: `len, addr.lo, addr.hi, data, op0, op1, op2`.
pub const TRACE_START_INSN_HISTORY: u8 = 0x84;
/// Interrupted-instruction continuation, two prefetch cycles left.
pub const TRACE_CONT_INSN_2: u8 = 0x85;
/// Interrupted-instruction continuation, one prefetch cycle left.
pub const TRACE_CONT_INSN_1: u8 = 0x86;
/// Add X to the preloaded address, tracking the un-carried address.
pub const TRACE_ADDR_ADD_X: u8 = 0x87;
pub const TRACE_ADDR_ADD_Y: u8 = 0x88;
pub const TRACE_ADDR_HX_SHY: u8 = 0x89;
pub const TRACE_ADDR_HY_SHA: u8 = 0x8A;
pub const TRACE_ADDR_HY_SHX: u8 = 0x8B;
/// In-trace conditional branch: `xor, and, skip`. Branch if
/// `(P ^ xor) & and != 0`; otherwise resume at token start + 1 + skip
/// (the next traced instruction).
pub const TRACE_FAST_JCC: u8 = 0x8C;
/// Unconditional jump to another trace location: 4-byte little-endian
/// offset, relative to the offset field itself.
pub const TRACE_UJUMP: u8 = 0x8D;

/// Encoded length of each token, indexed by state byte. Everything is one
/// byte except the argument-carrying trace tokens; the table lets the
/// decode heap be walked for in-place retokenizing.
#[must_use]
pub const fn token_len(state: u8) -> usize {
    match state {
        TRACE_START_INSN => 6,
        TRACE_START_INSN_HISTORY => 8,
        TRACE_FAST_JCC => 4,
        TRACE_UJUMP => 5,
        _ => 1,
    }
}
