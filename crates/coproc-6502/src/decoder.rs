//! Decode table generation.
//!
//! Translates the instruction set into microcode token sequences: a flat
//! token heap plus a per-opcode offset table. Generation is a pure
//! function of the configuration (CPU kind, history instrumentation,
//! breakpoint checking, trace-cache probes) and always succeeds; a decode
//! bug here is a build defect, not a runtime error.
//!
//! The first two heap bytes are the canonical entry tokens every
//! instruction terminator redirects into: offset 0 fetches with a
//! breakpoint check, offset 1 without.

use crate::cpu::CpuKind;
use crate::states as st;

/// Immutable-after-generation decode tables: token heap and opcode
/// offset table. Cheap to rebuild, safe to share by reference.
pub struct DecoderTables {
    pub(crate) heap: Vec<u8>,
    pub(crate) insn_ptrs: [u16; 256],
}

/// Heap offset of the breakpoint-checking fetch token.
pub(crate) const ENTRY_BREAK: u32 = 0;
/// Heap offset of the plain fetch token (also the post-stop entry).
pub(crate) const ENTRY_NO_BREAK: u32 = 1;

impl DecoderTables {
    /// Build tables for one configuration.
    #[must_use]
    pub(crate) fn build(kind: CpuKind, history: bool, breakpoints: bool, tracing: bool) -> Self {
        let mut generator = Generator {
            heap: vec![st::READ_OPCODE, st::READ_OPCODE_NO_BREAK],
            insn_ptrs: [0; 256],
            kind,
            tracing,
        };

        for opcode in 0..=0xFF_u8 {
            generator.insn_ptrs[usize::from(opcode)] = generator.heap.len() as u16;

            if history {
                generator.push(st::ADD_TO_HISTORY);
            }

            match kind {
                CpuKind::Nmos6502 => {
                    if !generator.decode_documented(opcode) && !generator.decode_undocumented(opcode)
                    {
                        generator.push(st::BREAK_ON_UNSUPPORTED);
                    }
                }
                CpuKind::Wdc65C02 => {
                    if !generator.decode_c02(opcode) && !generator.decode_documented(opcode) {
                        generator.decode_c02_filler(opcode);
                    }
                }
            }

            generator.push(if breakpoints {
                st::READ_OPCODE
            } else {
                st::READ_OPCODE_NO_BREAK
            });
        }

        debug_assert!(generator.heap.len() <= usize::from(u16::MAX));

        Self {
            heap: generator.heap,
            insn_ptrs: generator.insn_ptrs,
        }
    }

    /// Poison every fetch token so the interpreter rebuilds the tables at
    /// the next instruction boundary, and disarm in-place history tokens.
    /// Used when toggling history, whose token shapes differ.
    pub(crate) fn mark_stale(&mut self) {
        let mut i = 0;
        while i < self.heap.len() {
            let state = self.heap[i];
            match state {
                st::READ_OPCODE | st::READ_OPCODE_NO_BREAK => {
                    self.heap[i] = st::REGENERATE_TABLES;
                }
                st::ADD_TO_HISTORY => self.heap[i] = st::NOP,
                _ => {}
            }
            i += st::token_len(state);
        }
    }

    /// Swap fetch tokens between checking and non-checking forms in place,
    /// so breakpoint support is a table shape, not a hot-path conditional.
    pub(crate) fn set_breakpoint_fetch(&mut self, enabled: bool) {
        let (from, to) = if enabled {
            (st::READ_OPCODE_NO_BREAK, st::READ_OPCODE)
        } else {
            (st::READ_OPCODE, st::READ_OPCODE_NO_BREAK)
        };

        // Heap offset 0/1 are the fixed entry tokens; leave them alone.
        let mut i = 2;
        while i < self.heap.len() {
            let state = self.heap[i];
            if state == from {
                self.heap[i] = to;
            }
            i += st::token_len(state);
        }
    }
}

/// Value-operand addressing modes (terminating with the data read).
#[derive(Clone, Copy)]
enum ReadMode {
    Imm,
    Zp,
    ZpX,
    ZpY,
    Abs,
    AbsX,
    AbsY,
    IndX,
    IndY,
    /// 65C02 (zp).
    Ind,
}

/// Store-operand addressing modes (terminating before the write).
#[derive(Clone, Copy)]
enum StoreMode {
    Zp,
    ZpX,
    ZpY,
    Abs,
    AbsX,
    AbsY,
    IndX,
    IndY,
    Ind,
}

/// Read-modify-write addressing modes.
#[derive(Clone, Copy)]
enum RmwMode {
    Zp,
    ZpX,
    Abs,
    AbsX,
    AbsY,
    IndX,
    IndY,
}

struct Generator {
    heap: Vec<u8>,
    insn_ptrs: [u16; 256],
    kind: CpuKind,
    tracing: bool,
}

impl Generator {
    fn push(&mut self, state: u8) {
        self.heap.push(state);
    }

    fn seq(&mut self, states: &[u8]) {
        self.heap.extend_from_slice(states);
    }

    /// Addressing + data read for value operands.
    fn read_operand(&mut self, mode: ReadMode) {
        match mode {
            ReadMode::Imm => self.push(st::READ_IMM),
            ReadMode::Zp => self.seq(&[st::READ_ADDR_L, st::READ]),
            ReadMode::ZpX => self.seq(&[st::READ_ADDR_L, st::READ_ADD_X, st::READ]),
            ReadMode::ZpY => self.seq(&[st::READ_ADDR_L, st::READ_ADD_Y, st::READ]),
            ReadMode::Abs => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ]),
            ReadMode::AbsX => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HX, st::READ_CARRY, st::READ]);
            }
            ReadMode::AbsY => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HY, st::READ_CARRY, st::READ]);
            }
            ReadMode::IndX => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADD_X,
                st::READ,
                st::READ_IND_ADDR,
                st::READ,
            ]),
            ReadMode::IndY => self.seq(&[
                st::READ_ADDR_L,
                st::READ,
                st::READ_IND_Y_ADDR,
                st::READ_CARRY,
                st::READ,
            ]),
            ReadMode::Ind => self.seq(&[st::READ_ADDR_L, st::READ, st::READ_IND_ADDR, st::READ]),
        }
    }

    /// Addressing for stores; indexed forms always pay the fixup cycle.
    fn store_operand(&mut self, mode: StoreMode, src: u8) {
        match mode {
            StoreMode::Zp => self.push(st::READ_ADDR_L),
            StoreMode::ZpX => self.seq(&[st::READ_ADDR_L, st::READ_ADD_X]),
            StoreMode::ZpY => self.seq(&[st::READ_ADDR_L, st::READ_ADD_Y]),
            StoreMode::Abs => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H]),
            StoreMode::AbsX => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HX, st::READ_CARRY_FORCED]);
            }
            StoreMode::AbsY => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HY, st::READ_CARRY_FORCED]);
            }
            StoreMode::IndX => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADD_X,
                st::READ,
                st::READ_IND_ADDR,
            ]),
            StoreMode::IndY => self.seq(&[
                st::READ_ADDR_L,
                st::READ,
                st::READ_IND_Y_ADDR,
                st::READ_CARRY_FORCED,
            ]),
            StoreMode::Ind => self.seq(&[st::READ_ADDR_L, st::READ, st::READ_IND_ADDR]),
        }
        self.seq(&[src, st::WRITE]);
    }

    /// Addressing + read for read-modify-write instructions.
    fn rmw_operand(&mut self, mode: RmwMode) {
        match mode {
            RmwMode::Zp => self.seq(&[st::READ_ADDR_L, st::READ]),
            RmwMode::ZpX => self.seq(&[st::READ_ADDR_L, st::READ_ADD_X, st::READ]),
            RmwMode::Abs => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ]),
            RmwMode::AbsX => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_HX,
                st::READ_CARRY_FORCED,
                st::READ,
            ]),
            RmwMode::AbsY => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_HY,
                st::READ_CARRY_FORCED,
                st::READ,
            ]),
            RmwMode::IndX => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADD_X,
                st::READ,
                st::READ_IND_ADDR,
                st::READ,
            ]),
            RmwMode::IndY => self.seq(&[
                st::READ_ADDR_L,
                st::READ,
                st::READ_IND_Y_ADDR,
                st::READ_CARRY_FORCED,
                st::READ,
            ]),
        }
    }

    /// RMW body: NMOS re-writes the old value during the modify cycle,
    /// the 65C02 re-reads instead.
    fn rmw(&mut self, mode: RmwMode, op: u8) {
        self.rmw_operand(mode);
        match self.kind {
            CpuKind::Nmos6502 => self.seq(&[st::WRITE, op, st::WRITE]),
            CpuKind::Wdc65C02 => self.seq(&[st::WAIT, op, st::WRITE]),
        }
    }

    /// Undocumented RMW + ALU combos: the modified value is written back,
    /// then folded into A/P by the trailing ALU tokens.
    fn rmw_combo(&mut self, mode: RmwMode, op: u8, alu: &[u8]) {
        self.rmw_operand(mode);
        self.seq(&[st::WRITE, op, st::WRITE]);
        self.seq(alu);
    }

    /// ADC tail: the 65C02 recomputes flags from the corrected result and
    /// spends an extra cycle, but only in decimal mode.
    fn adc(&mut self) {
        match self.kind {
            CpuKind::Nmos6502 => self.push(st::ADC),
            CpuKind::Wdc65C02 => self.seq(&[st::C02_ADC, st::WAIT]),
        }
    }

    fn sbc(&mut self) {
        match self.kind {
            CpuKind::Nmos6502 => self.push(st::SBC),
            CpuKind::Wdc65C02 => self.seq(&[st::C02_SBC, st::WAIT]),
        }
    }

    /// Relative branch: condition token plus the wrong-page false read,
    /// with a trace-entry probe on the far side when tracing.
    fn branch(&mut self, condition: u8) {
        self.seq(&[st::READ_IMM, condition, st::JCC_FALSE_READ]);
        if self.tracing {
            self.push(st::TRACE_PC);
        }
    }

    /// Transfer the address latch to PC, probing the trace cache when
    /// tracing is enabled.
    fn jump_tail(&mut self) {
        self.push(if self.tracing {
            st::TRACE_ADDR_TO_PC
        } else {
            st::ADDR_TO_PC
        });
    }

    /// PC landed via the stack (RTS/RTI): probe the trace cache directly.
    fn return_tail(&mut self) {
        if self.tracing {
            self.push(st::TRACE_PC);
        }
    }

    /// Documented opcodes common to both kinds (the 65C02 overrides are
    /// applied first and win).
    fn decode_documented(&mut self, opcode: u8) -> bool {
        use ReadMode as R;
        use RmwMode as M;
        use StoreMode as S;

        match opcode {
            0x00 => {
                // BRK: signature byte, push return address and flags, then
                // fetch through the vector.
                self.seq(&[
                    st::READ_IMM,
                    st::PUSH_PCH,
                    st::PUSH_PCL,
                    st::P_TO_D,
                    st::PUSH,
                    st::SEI,
                ]);
                if self.kind == CpuKind::Wdc65C02 {
                    self.push(st::CLD);
                }
                self.seq(&[st::IRQ_VEC_TO_PC, st::READ_ADDR_L, st::READ_ADDR_H]);
                self.jump_tail();
            }

            // === ORA / AND / EOR / ADC / LDA / CMP / SBC ===
            0x01 => {
                self.read_operand(R::IndX);
                self.push(st::OR);
            }
            0x05 => {
                self.read_operand(R::Zp);
                self.push(st::OR);
            }
            0x09 => {
                self.read_operand(R::Imm);
                self.push(st::OR);
            }
            0x0D => {
                self.read_operand(R::Abs);
                self.push(st::OR);
            }
            0x11 => {
                self.read_operand(R::IndY);
                self.push(st::OR);
            }
            0x15 => {
                self.read_operand(R::ZpX);
                self.push(st::OR);
            }
            0x19 => {
                self.read_operand(R::AbsY);
                self.push(st::OR);
            }
            0x1D => {
                self.read_operand(R::AbsX);
                self.push(st::OR);
            }

            0x21 => {
                self.read_operand(R::IndX);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x25 => {
                self.read_operand(R::Zp);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x29 => {
                self.read_operand(R::Imm);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x2D => {
                self.read_operand(R::Abs);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x31 => {
                self.read_operand(R::IndY);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x35 => {
                self.read_operand(R::ZpX);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x39 => {
                self.read_operand(R::AbsY);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x3D => {
                self.read_operand(R::AbsX);
                self.seq(&[st::AND, st::D_TO_A]);
            }

            0x41 => {
                self.read_operand(R::IndX);
                self.push(st::XOR);
            }
            0x45 => {
                self.read_operand(R::Zp);
                self.push(st::XOR);
            }
            0x49 => {
                self.read_operand(R::Imm);
                self.push(st::XOR);
            }
            0x4D => {
                self.read_operand(R::Abs);
                self.push(st::XOR);
            }
            0x51 => {
                self.read_operand(R::IndY);
                self.push(st::XOR);
            }
            0x55 => {
                self.read_operand(R::ZpX);
                self.push(st::XOR);
            }
            0x59 => {
                self.read_operand(R::AbsY);
                self.push(st::XOR);
            }
            0x5D => {
                self.read_operand(R::AbsX);
                self.push(st::XOR);
            }

            0x61 => {
                self.read_operand(R::IndX);
                self.adc();
            }
            0x65 => {
                self.read_operand(R::Zp);
                self.adc();
            }
            0x69 => {
                self.read_operand(R::Imm);
                self.adc();
            }
            0x6D => {
                self.read_operand(R::Abs);
                self.adc();
            }
            0x71 => {
                self.read_operand(R::IndY);
                self.adc();
            }
            0x75 => {
                self.read_operand(R::ZpX);
                self.adc();
            }
            0x79 => {
                self.read_operand(R::AbsY);
                self.adc();
            }
            0x7D => {
                self.read_operand(R::AbsX);
                self.adc();
            }

            0xA1 => {
                self.read_operand(R::IndX);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xA5 => {
                self.read_operand(R::Zp);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xA9 => {
                self.read_operand(R::Imm);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xAD => {
                self.read_operand(R::Abs);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xB1 => {
                self.read_operand(R::IndY);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xB5 => {
                self.read_operand(R::ZpX);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xB9 => {
                self.read_operand(R::AbsY);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xBD => {
                self.read_operand(R::AbsX);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }

            0xC1 => {
                self.read_operand(R::IndX);
                self.push(st::CMP);
            }
            0xC5 => {
                self.read_operand(R::Zp);
                self.push(st::CMP);
            }
            0xC9 => {
                self.read_operand(R::Imm);
                self.push(st::CMP);
            }
            0xCD => {
                self.read_operand(R::Abs);
                self.push(st::CMP);
            }
            0xD1 => {
                self.read_operand(R::IndY);
                self.push(st::CMP);
            }
            0xD5 => {
                self.read_operand(R::ZpX);
                self.push(st::CMP);
            }
            0xD9 => {
                self.read_operand(R::AbsY);
                self.push(st::CMP);
            }
            0xDD => {
                self.read_operand(R::AbsX);
                self.push(st::CMP);
            }

            0xE1 => {
                self.read_operand(R::IndX);
                self.sbc();
            }
            0xE5 => {
                self.read_operand(R::Zp);
                self.sbc();
            }
            0xE9 => {
                self.read_operand(R::Imm);
                self.sbc();
            }
            0xED => {
                self.read_operand(R::Abs);
                self.sbc();
            }
            0xF1 => {
                self.read_operand(R::IndY);
                self.sbc();
            }
            0xF5 => {
                self.read_operand(R::ZpX);
                self.sbc();
            }
            0xF9 => {
                self.read_operand(R::AbsY);
                self.sbc();
            }
            0xFD => {
                self.read_operand(R::AbsX);
                self.sbc();
            }

            // === Shifts and rotates ===
            0x06 => self.rmw(M::Zp, st::ASL),
            0x0E => self.rmw(M::Abs, st::ASL),
            0x16 => self.rmw(M::ZpX, st::ASL),
            0x1E => self.rmw(M::AbsX, st::ASL),
            0x0A => self.seq(&[st::A_TO_D, st::ASL, st::WAIT, st::D_TO_A]),

            0x26 => self.rmw(M::Zp, st::ROL),
            0x2E => self.rmw(M::Abs, st::ROL),
            0x36 => self.rmw(M::ZpX, st::ROL),
            0x3E => self.rmw(M::AbsX, st::ROL),
            0x2A => self.seq(&[st::A_TO_D, st::ROL, st::WAIT, st::D_TO_A]),

            0x46 => self.rmw(M::Zp, st::LSR),
            0x4E => self.rmw(M::Abs, st::LSR),
            0x56 => self.rmw(M::ZpX, st::LSR),
            0x5E => self.rmw(M::AbsX, st::LSR),
            0x4A => self.seq(&[st::A_TO_D, st::LSR, st::WAIT, st::D_TO_A]),

            0x66 => self.rmw(M::Zp, st::ROR),
            0x6E => self.rmw(M::Abs, st::ROR),
            0x76 => self.rmw(M::ZpX, st::ROR),
            0x7E => self.rmw(M::AbsX, st::ROR),
            0x6A => self.seq(&[st::A_TO_D, st::ROR, st::WAIT, st::D_TO_A]),

            // === INC/DEC memory (always the forced fixup when indexed) ===
            0xC6 => self.rmw(M::Zp, st::DEC),
            0xCE => self.rmw(M::Abs, st::DEC),
            0xD6 => self.rmw(M::ZpX, st::DEC),
            0xDE => self.rmw(M::AbsX, st::DEC),
            0xE6 => self.rmw(M::Zp, st::INC),
            0xEE => self.rmw(M::Abs, st::INC),
            0xF6 => self.rmw(M::ZpX, st::INC),
            0xFE => self.rmw(M::AbsX, st::INC),

            // === BIT ===
            0x24 => {
                self.read_operand(R::Zp);
                self.seq(&[st::D_SET_SV, st::BIT]);
            }
            0x2C => {
                self.read_operand(R::Abs);
                self.seq(&[st::D_SET_SV, st::BIT]);
            }

            // === Compares against index registers ===
            0xC0 => {
                self.read_operand(R::Imm);
                self.push(st::CMP_Y);
            }
            0xC4 => {
                self.read_operand(R::Zp);
                self.push(st::CMP_Y);
            }
            0xCC => {
                self.read_operand(R::Abs);
                self.push(st::CMP_Y);
            }
            0xE0 => {
                self.read_operand(R::Imm);
                self.push(st::CMP_X);
            }
            0xE4 => {
                self.read_operand(R::Zp);
                self.push(st::CMP_X);
            }
            0xEC => {
                self.read_operand(R::Abs);
                self.push(st::CMP_X);
            }

            // === LDX / LDY ===
            0xA2 => {
                self.read_operand(R::Imm);
                self.seq(&[st::D_SET_SZ, st::D_TO_X]);
            }
            0xA6 => {
                self.read_operand(R::Zp);
                self.seq(&[st::D_SET_SZ, st::D_TO_X]);
            }
            0xAE => {
                self.read_operand(R::Abs);
                self.seq(&[st::D_SET_SZ, st::D_TO_X]);
            }
            0xB6 => {
                self.read_operand(R::ZpY);
                self.seq(&[st::D_SET_SZ, st::D_TO_X]);
            }
            0xBE => {
                self.read_operand(R::AbsY);
                self.seq(&[st::D_SET_SZ, st::D_TO_X]);
            }
            0xA0 => {
                self.read_operand(R::Imm);
                self.seq(&[st::D_SET_SZ, st::D_TO_Y]);
            }
            0xA4 => {
                self.read_operand(R::Zp);
                self.seq(&[st::D_SET_SZ, st::D_TO_Y]);
            }
            0xAC => {
                self.read_operand(R::Abs);
                self.seq(&[st::D_SET_SZ, st::D_TO_Y]);
            }
            0xB4 => {
                self.read_operand(R::ZpX);
                self.seq(&[st::D_SET_SZ, st::D_TO_Y]);
            }
            0xBC => {
                self.read_operand(R::AbsX);
                self.seq(&[st::D_SET_SZ, st::D_TO_Y]);
            }

            // === Stores ===
            0x81 => self.store_operand(S::IndX, st::A_TO_D),
            0x85 => self.store_operand(S::Zp, st::A_TO_D),
            0x8D => self.store_operand(S::Abs, st::A_TO_D),
            0x91 => self.store_operand(S::IndY, st::A_TO_D),
            0x95 => self.store_operand(S::ZpX, st::A_TO_D),
            0x99 => self.store_operand(S::AbsY, st::A_TO_D),
            0x9D => self.store_operand(S::AbsX, st::A_TO_D),
            0x86 => self.store_operand(S::Zp, st::X_TO_D),
            0x8E => self.store_operand(S::Abs, st::X_TO_D),
            0x96 => self.store_operand(S::ZpY, st::X_TO_D),
            0x84 => self.store_operand(S::Zp, st::Y_TO_D),
            0x8C => self.store_operand(S::Abs, st::Y_TO_D),
            0x94 => self.store_operand(S::ZpX, st::Y_TO_D),

            // === Branches ===
            0x10 => self.branch(st::JNS),
            0x30 => self.branch(st::JS),
            0x50 => self.branch(st::JNO),
            0x70 => self.branch(st::JO),
            0x90 => self.branch(st::JNC),
            0xB0 => self.branch(st::JC),
            0xD0 => self.branch(st::JNZ),
            0xF0 => self.branch(st::JZ),

            // === Jumps and returns ===
            0x20 => {
                self.seq(&[
                    st::READ_ADDR_L,
                    st::READ_ADDR_H,
                    st::PUSH_PCH_M1,
                    st::PUSH_PCL_M1,
                    st::WAIT,
                ]);
                self.jump_tail();
            }
            0x4C => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H]);
                self.jump_tail();
            }
            0x6C => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ]);
                self.push(match self.kind {
                    CpuKind::Nmos6502 => st::READ_ABS_IND_ADDR_BROKEN,
                    CpuKind::Wdc65C02 => st::READ_ABS_IND_ADDR,
                });
                if self.kind == CpuKind::Wdc65C02 {
                    // The fix costs a cycle.
                    self.push(st::WAIT);
                }
                self.jump_tail();
            }
            0x40 => {
                self.seq(&[
                    st::WAIT,
                    st::WAIT,
                    st::POP,
                    st::D_TO_P,
                    st::POP_PCL,
                    st::POP_PCH,
                ]);
                self.return_tail();
            }
            0x60 => {
                self.seq(&[st::WAIT, st::WAIT, st::POP_PCL, st::POP_PCH_P1, st::WAIT]);
                self.return_tail();
            }

            // === Stack pushes/pulls ===
            0x08 => self.seq(&[st::WAIT, st::P_TO_D, st::PUSH]),
            0x28 => self.seq(&[st::WAIT, st::WAIT, st::POP, st::D_TO_P]),
            0x48 => self.seq(&[st::WAIT, st::A_TO_D, st::PUSH]),
            0x68 => self.seq(&[st::WAIT, st::WAIT, st::POP, st::D_SET_SZ, st::D_TO_A]),

            // === Register transfers / index arithmetic ===
            0x8A => self.seq(&[st::X_TO_D, st::D_SET_SZ, st::D_TO_A, st::WAIT]),
            0x98 => self.seq(&[st::Y_TO_D, st::D_SET_SZ, st::D_TO_A, st::WAIT]),
            0x9A => self.seq(&[st::X_TO_D, st::D_TO_S, st::WAIT]),
            0xA8 => self.seq(&[st::A_TO_D, st::D_SET_SZ, st::D_TO_Y, st::WAIT]),
            0xAA => self.seq(&[st::A_TO_D, st::D_SET_SZ, st::D_TO_X, st::WAIT]),
            0xBA => self.seq(&[st::S_TO_D, st::D_SET_SZ, st::D_TO_X, st::WAIT]),
            0x88 => self.seq(&[st::Y_TO_D, st::DEC, st::D_TO_Y, st::WAIT]),
            0xC8 => self.seq(&[st::Y_TO_D, st::INC, st::D_TO_Y, st::WAIT]),
            0xCA => self.push(st::DEC_X_WAIT),
            0xE8 => self.push(st::INC_X_WAIT),

            // === Flags ===
            0x18 => self.seq(&[st::CLC, st::WAIT]),
            0x38 => self.seq(&[st::SEC, st::WAIT]),
            0x58 => self.seq(&[st::CLI, st::WAIT]),
            0x78 => self.seq(&[st::SEI, st::WAIT]),
            0xB8 => self.seq(&[st::CLV, st::WAIT]),
            0xD8 => self.seq(&[st::CLD, st::WAIT]),
            0xF8 => self.seq(&[st::SED, st::WAIT]),

            0xEA => self.push(st::WAIT),

            _ => return false,
        }

        true
    }

    /// The NMOS undocumented set.
    fn decode_undocumented(&mut self, opcode: u8) -> bool {
        use ReadMode as R;
        use RmwMode as M;
        use StoreMode as S;

        match opcode {
            // SLO: ASL memory, OR into A.
            0x03 => self.rmw_combo(M::IndX, st::ASL, &[st::OR]),
            0x07 => self.rmw_combo(M::Zp, st::ASL, &[st::OR]),
            0x0F => self.rmw_combo(M::Abs, st::ASL, &[st::OR]),
            0x13 => self.rmw_combo(M::IndY, st::ASL, &[st::OR]),
            0x17 => self.rmw_combo(M::ZpX, st::ASL, &[st::OR]),
            0x1B => self.rmw_combo(M::AbsY, st::ASL, &[st::OR]),
            0x1F => self.rmw_combo(M::AbsX, st::ASL, &[st::OR]),

            // RLA: ROL memory, AND into A.
            0x23 => self.rmw_combo(M::IndX, st::ROL, &[st::AND, st::D_TO_A]),
            0x27 => self.rmw_combo(M::Zp, st::ROL, &[st::AND, st::D_TO_A]),
            0x2F => self.rmw_combo(M::Abs, st::ROL, &[st::AND, st::D_TO_A]),
            0x33 => self.rmw_combo(M::IndY, st::ROL, &[st::AND, st::D_TO_A]),
            0x37 => self.rmw_combo(M::ZpX, st::ROL, &[st::AND, st::D_TO_A]),
            0x3B => self.rmw_combo(M::AbsY, st::ROL, &[st::AND, st::D_TO_A]),
            0x3F => self.rmw_combo(M::AbsX, st::ROL, &[st::AND, st::D_TO_A]),

            // SRE: LSR memory, EOR into A.
            0x43 => self.rmw_combo(M::IndX, st::LSR, &[st::XOR]),
            0x47 => self.rmw_combo(M::Zp, st::LSR, &[st::XOR]),
            0x4F => self.rmw_combo(M::Abs, st::LSR, &[st::XOR]),
            0x53 => self.rmw_combo(M::IndY, st::LSR, &[st::XOR]),
            0x57 => self.rmw_combo(M::ZpX, st::LSR, &[st::XOR]),
            0x5B => self.rmw_combo(M::AbsY, st::LSR, &[st::XOR]),
            0x5F => self.rmw_combo(M::AbsX, st::LSR, &[st::XOR]),

            // RRA: ROR memory, ADC into A (carry from the rotate).
            0x63 => self.rmw_combo(M::IndX, st::ROR, &[st::ADC]),
            0x67 => self.rmw_combo(M::Zp, st::ROR, &[st::ADC]),
            0x6F => self.rmw_combo(M::Abs, st::ROR, &[st::ADC]),
            0x73 => self.rmw_combo(M::IndY, st::ROR, &[st::ADC]),
            0x77 => self.rmw_combo(M::ZpX, st::ROR, &[st::ADC]),
            0x7B => self.rmw_combo(M::AbsY, st::ROR, &[st::ADC]),
            0x7F => self.rmw_combo(M::AbsX, st::ROR, &[st::ADC]),

            // DCP: DEC memory, CMP against A.
            0xC3 => self.rmw_combo(M::IndX, st::DEC, &[st::CMP]),
            0xC7 => self.rmw_combo(M::Zp, st::DEC, &[st::CMP]),
            0xCF => self.rmw_combo(M::Abs, st::DEC, &[st::CMP]),
            0xD3 => self.rmw_combo(M::IndY, st::DEC, &[st::CMP]),
            0xD7 => self.rmw_combo(M::ZpX, st::DEC, &[st::CMP]),
            0xDB => self.rmw_combo(M::AbsY, st::DEC, &[st::CMP]),
            0xDF => self.rmw_combo(M::AbsX, st::DEC, &[st::CMP]),

            // ISB: INC memory, SBC into A.
            0xE3 => self.rmw_combo(M::IndX, st::INC, &[st::SBC]),
            0xE7 => self.rmw_combo(M::Zp, st::INC, &[st::SBC]),
            0xEF => self.rmw_combo(M::Abs, st::INC, &[st::SBC]),
            0xF3 => self.rmw_combo(M::IndY, st::INC, &[st::SBC]),
            0xF7 => self.rmw_combo(M::ZpX, st::INC, &[st::SBC]),
            0xFB => self.rmw_combo(M::AbsY, st::INC, &[st::SBC]),
            0xFF => self.rmw_combo(M::AbsX, st::INC, &[st::SBC]),

            // SAX: store A & X, no flags.
            0x83 => self.store_operand(S::IndX, st::AND_SAX),
            0x87 => self.store_operand(S::Zp, st::AND_SAX),
            0x8F => self.store_operand(S::Abs, st::AND_SAX),
            0x97 => self.store_operand(S::ZpY, st::AND_SAX),

            // LAX: load A and X together.
            0xA3 => {
                self.read_operand(R::IndX);
                self.seq(&[st::D_SET_SZ, st::D_TO_X, st::D_TO_A]);
            }
            0xA7 => {
                self.read_operand(R::Zp);
                self.seq(&[st::D_SET_SZ, st::D_TO_X, st::D_TO_A]);
            }
            0xAF => {
                self.read_operand(R::Abs);
                self.seq(&[st::D_SET_SZ, st::D_TO_X, st::D_TO_A]);
            }
            0xB3 => {
                self.read_operand(R::IndY);
                self.seq(&[st::D_SET_SZ, st::D_TO_X, st::D_TO_A]);
            }
            0xB7 => {
                self.read_operand(R::ZpY);
                self.seq(&[st::D_SET_SZ, st::D_TO_X, st::D_TO_A]);
            }
            0xBF => {
                self.read_operand(R::AbsY);
                self.seq(&[st::D_SET_SZ, st::D_TO_X, st::D_TO_A]);
            }

            // Immediate-mode oddities.
            0x0B | 0x2B => {
                self.seq(&[st::READ_IMM, st::ANC, st::D_TO_A]);
            }
            0x4B => self.seq(&[st::READ_IMM, st::AND, st::LSR, st::D_TO_A]),
            0x6B => self.seq(&[st::READ_IMM, st::ARR]),
            0x8B => self.seq(&[st::READ_IMM, st::XAA]),
            0xAB => self.seq(&[st::READ_IMM, st::AND, st::D_TO_A, st::D_TO_X]),
            0xCB => self.seq(&[st::READ_IMM, st::SBX]),
            0xEB => self.seq(&[st::READ_IMM, st::SBC]),

            // Unstable high-byte-AND stores.
            0x93 => self.seq(&[
                st::READ_ADDR_L,
                st::READ,
                st::READ_IND_Y_ADDR_SHA,
                st::WAIT,
                st::WRITE,
            ]),
            0x9B => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_HY_SHA,
                st::XAS,
                st::WAIT,
                st::WRITE,
            ]),
            0x9C => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HX_SHY, st::WAIT, st::WRITE]),
            0x9E => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HY_SHX, st::WAIT, st::WRITE]),
            0x9F => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HY_SHA, st::WAIT, st::WRITE]),

            // LAS: A, X, S = memory & S.
            0xBB => {
                self.read_operand(R::AbsY);
                self.push(st::LAS);
            }

            // Multi-byte NOPs.
            0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => self.push(st::WAIT),
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => self.push(st::READ_IMM),
            0x04 | 0x44 | 0x64 => self.seq(&[st::READ_ADDR_L, st::READ]),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADD_X, st::READ]);
            }
            0x0C => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ]),
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => {
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_HX, st::READ_CARRY, st::READ]);
            }

            // JAM: the part wedges until reset.
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2 => {
                self.push(st::BREAK_ON_UNSUPPORTED);
            }

            _ => return false,
        }

        true
    }

    /// 65C02 additions and overrides; applied before the documented set.
    fn decode_c02(&mut self, opcode: u8) -> bool {
        use ReadMode as R;
        use StoreMode as S;

        match opcode {
            // (zp) addressing for the accumulator group.
            0x12 => {
                self.read_operand(R::Ind);
                self.push(st::OR);
            }
            0x32 => {
                self.read_operand(R::Ind);
                self.seq(&[st::AND, st::D_TO_A]);
            }
            0x52 => {
                self.read_operand(R::Ind);
                self.push(st::XOR);
            }
            0x72 => {
                self.read_operand(R::Ind);
                self.adc();
            }
            0x92 => self.store_operand(S::Ind, st::A_TO_D),
            0xB2 => {
                self.read_operand(R::Ind);
                self.seq(&[st::D_SET_SZ, st::D_TO_A]);
            }
            0xD2 => {
                self.read_operand(R::Ind);
                self.push(st::CMP);
            }
            0xF2 => {
                self.read_operand(R::Ind);
                self.sbc();
            }

            // BIT additions (immediate affects only Z).
            0x89 => self.seq(&[st::READ_IMM, st::BIT]),
            0x34 => {
                self.read_operand(R::ZpX);
                self.seq(&[st::D_SET_SV, st::BIT]);
            }
            0x3C => {
                self.read_operand(R::AbsX);
                self.seq(&[st::D_SET_SV, st::BIT]);
            }

            // INC/DEC accumulator.
            0x1A => self.seq(&[st::A_TO_D, st::INC, st::WAIT, st::D_TO_A]),
            0x3A => self.seq(&[st::A_TO_D, st::DEC, st::WAIT, st::D_TO_A]),

            // STZ.
            0x64 => self.store_operand(S::Zp, st::ZERO_TO_D),
            0x74 => self.store_operand(S::ZpX, st::ZERO_TO_D),
            0x9C => self.store_operand(S::Abs, st::ZERO_TO_D),
            0x9E => self.store_operand(S::AbsX, st::ZERO_TO_D),

            // Index register pushes/pulls.
            0x5A => self.seq(&[st::WAIT, st::Y_TO_D, st::PUSH]),
            0x7A => self.seq(&[st::WAIT, st::WAIT, st::POP, st::D_SET_SZ, st::D_TO_Y]),
            0xDA => self.seq(&[st::WAIT, st::X_TO_D, st::PUSH]),
            0xFA => self.seq(&[st::WAIT, st::WAIT, st::POP, st::D_SET_SZ, st::D_TO_X]),

            // BRA.
            0x80 => self.branch(st::J),

            // TSB/TRB.
            0x04 => self.seq(&[st::READ_ADDR_L, st::READ, st::WAIT, st::TSB, st::WRITE]),
            0x0C => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_H,
                st::READ,
                st::WAIT,
                st::TSB,
                st::WRITE,
            ]),
            0x14 => self.seq(&[st::READ_ADDR_L, st::READ, st::WAIT, st::TRB, st::WRITE]),
            0x1C => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_H,
                st::READ,
                st::WAIT,
                st::TRB,
                st::WRITE,
            ]),

            // JMP (abs,X).
            0x7C => {
                self.seq(&[
                    st::READ_ADDR_L,
                    st::READ_ADDR_HX,
                    st::WAIT,
                    st::READ,
                    st::READ_ABS_IND_ADDR,
                ]);
                self.jump_tail();
            }

            // RMBn / SMBn.
            0x07 | 0x17 | 0x27 | 0x37 | 0x47 | 0x57 | 0x67 | 0x77 => {
                self.seq(&[st::READ_ADDR_L, st::READ, st::WAIT, st::RESET_BIT, st::WRITE]);
            }
            0x87 | 0x97 | 0xA7 | 0xB7 | 0xC7 | 0xD7 | 0xE7 | 0xF7 => {
                self.seq(&[st::READ_ADDR_L, st::READ, st::WAIT, st::SET_BIT, st::WRITE]);
            }

            // BBRn / BBSn.
            0x0F | 0x1F | 0x2F | 0x3F | 0x4F | 0x5F | 0x6F | 0x7F => {
                self.seq(&[
                    st::READ_ADDR_L,
                    st::READ,
                    st::READ_REL,
                    st::WAIT,
                    st::J0,
                    st::JCC_FALSE_READ,
                ]);
            }
            0x8F | 0x9F | 0xAF | 0xBF | 0xCF | 0xDF | 0xEF | 0xFF => {
                self.seq(&[
                    st::READ_ADDR_L,
                    st::READ,
                    st::READ_REL,
                    st::WAIT,
                    st::J1,
                    st::JCC_FALSE_READ,
                ]);
            }

            // WAI / STP.
            0xCB => self.seq(&[st::WAIT, st::WAIT, st::WAIT_FOR_INTERRUPT]),
            0xDB => self.seq(&[st::WAIT, st::WAIT, st::STOP]),

            _ => return false,
        }

        true
    }

    /// Remaining 65C02 slots are defined NOPs with fixed shapes.
    fn decode_c02_filler(&mut self, opcode: u8) {
        match opcode {
            // Two-byte, two-cycle.
            0x02 | 0x22 | 0x42 | 0x62 | 0x82 | 0xC2 | 0xE2 => self.push(st::READ_IMM),
            // 0x44 is a three-cycle two-byte NOP, 0x54/0xD4/0xF4 four-cycle.
            0x44 => self.seq(&[st::READ_ADDR_L, st::READ]),
            0x54 | 0xD4 | 0xF4 => self.seq(&[st::READ_ADDR_L, st::READ_ADD_X, st::READ]),
            // 0x5C is the odd eight-cycle NOP.
            0x5C => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_H,
                st::READ,
                st::WAIT,
                st::WAIT,
                st::WAIT,
                st::WAIT,
            ]),
            0xDC | 0xFC => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ]),
            // Single-byte, single-cycle: just the fetch.
            _ => {}
        }
    }
}
