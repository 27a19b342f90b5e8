//! Microcode state definitions for the 65802.
//!
//! The 8-bit states mirror the 6502 vocabulary; the 16-bit and
//! bank/direct-page states extend it for the wide submodes. One token is
//! one atomic interpreter operation; bus-touching tokens cost one cycle.

// === Dispatch and instrumentation ===

pub const NOP: u8 = 0x00;
pub const READ_OPCODE: u8 = 0x01;
pub const ADD_TO_HISTORY: u8 = 0x02;
/// Decode tables are stale (history toggle); rebuild and re-enter.
pub const REGENERATE_TABLES: u8 = 0x03;

// === Operand fetch ===

pub const READ_IMM: u8 = 0x08;
pub const READ_IMM_L16: u8 = 0x09;
pub const READ_IMM_H16: u8 = 0x0A;
pub const READ_ADDR_L: u8 = 0x0B;
pub const READ_ADDR_H: u8 = 0x0C;
/// Absolute low byte, latching the data bank for the access.
pub const READ_816_ADDR_L: u8 = 0x0D;
/// Absolute high byte plus X (16-bit index add).
pub const READ_ADDR_HX: u8 = 0x0E;
pub const READ_ADDR_HY: u8 = 0x0F;
/// Direct page offset -> address register (bank 0).
pub const READ_ADDR_DP: u8 = 0x10;
pub const READ_ADDR_DP_X: u8 = 0x11;
pub const READ_ADDR_DP_Y: u8 = 0x12;
/// High byte of a direct-page pointer; address becomes bank B.
pub const READ_IND_ADDR_DP: u8 = 0x13;
/// As above plus Y (16-bit).
pub const READ_IND_ADDR_DP_Y: u8 = 0x14;
/// Long pointer: high byte into the 16-bit data latch.
pub const READ_IND_ADDR_DP_LONG_H: u8 = 0x15;
/// Long pointer: bank byte, then commit the latched address.
pub const READ_IND_ADDR_DP_LONG_B: u8 = 0x16;
/// Add Y (16-bit) to the address register.
pub const READ_ADDR_ADD_Y: u8 = 0x17;
/// Long absolute: bank byte.
pub const READ_ADDR_B: u8 = 0x18;
/// Long absolute indexed: bank byte, then add X with bank carry.
pub const READ_ADDR_BX: u8 = 0x19;
/// Stack-relative offset -> effective address.
pub const READ_ADDR_SO: u8 = 0x1A;
/// (sr,S),Y: high byte from the latched address, then add Y.
pub const READ_816_ADDR_ABS_HY: u8 = 0x1B;
/// Long-address fetches used by [abs] and (sr,S),Y.
pub const READ_816_LONG_L: u8 = 0x1C;
pub const READ_816_LONG_H: u8 = 0x1D;
pub const READ_816_LONG_B: u8 = 0x1E;
/// Indirect high fetch for JMP (abs)/(abs,X).
pub const READ_ABS_IND_ADDR: u8 = 0x1F;

// === Data cycles ===

/// Pointer/data read from the latched address (bank 0 accesses).
pub const READ: u8 = 0x20;
/// Data read from the latched address in the latched bank.
pub const READ_816: u8 = 0x21;
pub const READ_L16: u8 = 0x22;
pub const READ_H16: u8 = 0x23;
pub const WRITE_816: u8 = 0x25;
pub const WRITE_L16: u8 = 0x26;
pub const WRITE_H16: u8 = 0x27;
pub const WAIT: u8 = 0x28;

// === Register transfers ===

pub const A_TO_D: u8 = 0x30;
pub const X_TO_D: u8 = 0x31;
pub const Y_TO_D: u8 = 0x32;
pub const S_TO_D: u8 = 0x33;
pub const P_TO_D: u8 = 0x34;
pub const B_TO_D: u8 = 0x35;
pub const K_TO_D: u8 = 0x36;
pub const ZERO_TO_D: u8 = 0x37;
pub const D_TO_A: u8 = 0x38;
pub const D_TO_X: u8 = 0x39;
pub const D_TO_Y: u8 = 0x3A;
pub const D_TO_S: u8 = 0x3B;
/// Emulation-mode flag restore (forces M/X on).
pub const D_TO_P: u8 = 0x3C;
/// Native-mode flag restore; re-derives the submode.
pub const D_TO_P_NATIVE: u8 = 0x3D;
pub const D_TO_B: u8 = 0x3E;
pub const D_SET_SZ: u8 = 0x3F;
pub const D_SET_SV: u8 = 0x40;
pub const ZERO_TO_D16: u8 = 0x41;
pub const A_TO_D16: u8 = 0x42;
pub const X_TO_D16: u8 = 0x43;
pub const Y_TO_D16: u8 = 0x44;
pub const S_TO_D16: u8 = 0x45;
pub const DP_TO_D16: u8 = 0x46;
pub const D_TO_A16: u8 = 0x47;
pub const D_TO_X16: u8 = 0x48;
pub const D_TO_Y16: u8 = 0x49;
pub const D_TO_S16: u8 = 0x4A;
pub const D_TO_DP16: u8 = 0x4B;
pub const D_SET_SZ16: u8 = 0x4C;
pub const D_SET_SV16: u8 = 0x4D;
pub const ADDR_TO_PC: u8 = 0x4E;
/// Long transfer: PC and program bank.
pub const LONG_ADDR_TO_PC: u8 = 0x4F;

// === Stack (native wrap rules; emulation pins SH to one) ===

pub const PUSH: u8 = 0x50;
pub const PUSH_L16: u8 = 0x51;
pub const PUSH_H16: u8 = 0x52;
pub const PUSH_PBK: u8 = 0x53;
pub const PUSH_PCL: u8 = 0x54;
pub const PUSH_PCH: u8 = 0x55;
pub const PUSH_PCL_M1: u8 = 0x56;
pub const PUSH_PCH_M1: u8 = 0x57;
pub const POP: u8 = 0x58;
pub const POP_L16: u8 = 0x59;
pub const POP_H16: u8 = 0x5A;
pub const POP_PBK: u8 = 0x5B;
pub const POP_PCL: u8 = 0x5C;
pub const POP_PCH: u8 = 0x5D;
pub const POP_PCH_P1: u8 = 0x5E;

// === ALU, 8-bit ===

pub const ADC: u8 = 0x60;
pub const SBC: u8 = 0x61;
pub const CMP: u8 = 0x62;
pub const CMP_X: u8 = 0x63;
pub const CMP_Y: u8 = 0x64;
pub const INC: u8 = 0x65;
pub const DEC: u8 = 0x66;
pub const AND: u8 = 0x67;
pub const OR: u8 = 0x68;
pub const XOR: u8 = 0x69;
pub const ASL: u8 = 0x6A;
pub const LSR: u8 = 0x6B;
pub const ROL: u8 = 0x6C;
pub const ROR: u8 = 0x6D;
pub const BIT: u8 = 0x6E;
pub const TRB: u8 = 0x6F;
pub const TSB: u8 = 0x70;

// === ALU, 16-bit ===

pub const ADC16: u8 = 0x78;
pub const SBC16: u8 = 0x79;
pub const CMP16: u8 = 0x7A;
pub const CMP_X16: u8 = 0x7B;
pub const CMP_Y16: u8 = 0x7C;
pub const INC16: u8 = 0x7D;
pub const DEC16: u8 = 0x7E;
pub const AND16: u8 = 0x7F;
pub const OR16: u8 = 0x80;
pub const XOR16: u8 = 0x81;
pub const ASL16: u8 = 0x82;
pub const LSR16: u8 = 0x83;
pub const ROL16: u8 = 0x84;
pub const ROR16: u8 = 0x85;
pub const BIT16: u8 = 0x86;
pub const TRB16: u8 = 0x87;
pub const TSB16: u8 = 0x88;

// === Flag ops ===

pub const SEI: u8 = 0x90;
pub const CLI: u8 = 0x91;
pub const SEC: u8 = 0x92;
pub const CLC: u8 = 0x93;
pub const SED: u8 = 0x94;
pub const CLD: u8 = 0x95;
pub const CLV: u8 = 0x96;
pub const REP: u8 = 0x97;
pub const SEP: u8 = 0x98;
pub const XBA: u8 = 0x99;
pub const XCE: u8 = 0x9A;
/// Interrupt entry: set I, clear D.
pub const SET_I_CLEAR_D: u8 = 0x9B;

// === Branches ===

pub const JS: u8 = 0xA0;
pub const JNS: u8 = 0xA1;
pub const JC: u8 = 0xA2;
pub const JNC: u8 = 0xA3;
pub const JZ: u8 = 0xA4;
pub const JNZ: u8 = 0xA5;
pub const JO: u8 = 0xA6;
pub const JNO: u8 = 0xA7;
pub const JCC_FALSE_READ: u8 = 0xA8;
/// Unconditional relative branch (BRA).
pub const J: u8 = 0xA9;
/// 16-bit relative branch (BRL).
pub const J16: u8 = 0xAA;

// === Vectors and block moves ===

pub const NAT_COP_VEC_TO_PC: u8 = 0xB0;
pub const EMU_COP_VEC_TO_PC: u8 = 0xB1;
pub const NAT_BRK_VEC_TO_PC: u8 = 0xB2;
pub const EMU_BRK_VEC_TO_PC: u8 = 0xB3;
pub const MOVE_READ: u8 = 0xB4;
/// MVP destination write with descending pointers and repeat.
pub const MOVE_WRITE_P: u8 = 0xB5;
/// MVN destination write with ascending pointers and repeat.
pub const MOVE_WRITE_N: u8 = 0xB6;
/// PER: displacement becomes PC-relative.
pub const PER: u8 = 0xB7;

// === Stopped states ===

pub const WAIT_FOR_INTERRUPT: u8 = 0xB8;
pub const STOP: u8 = 0xB9;
