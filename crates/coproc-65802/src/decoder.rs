//! Decode table generation for the 65802.
//!
//! One token heap carries ten opcode tables: five submodes (emulation,
//! then native with each M/X width pairing) doubled for the
//! unaligned-direct-page timing variant. Every flag write that can change
//! the submode re-selects the table at the next fetch; the heap itself is
//! immutable after generation.

use crate::states as st;

/// Number of decode table variants (submodes × direct-page alignment).
pub(crate) const TABLE_COUNT: usize = 10;

/// Heap offset of the canonical fetch token.
pub(crate) const ENTRY: u32 = 0;

/// Immutable-after-generation decode tables.
pub struct DecoderTables {
    pub(crate) heap: Vec<u8>,
    pub(crate) insn_ptrs: Box<[[u16; 256]; TABLE_COUNT]>,
}

impl DecoderTables {
    /// Build the full ten-table bundle. Pure function of the history
    /// flag; deterministic.
    #[must_use]
    pub(crate) fn build(history: bool) -> Self {
        let mut generator = Generator {
            heap: vec![st::READ_OPCODE],
            emu: false,
            mode16: false,
            index16: false,
            unaligned_dp: false,
        };

        let mut insn_ptrs = Box::new([[0u16; 256]; TABLE_COUNT]);

        for (table, ptrs) in insn_ptrs.iter_mut().enumerate() {
            let submode = table % 5;
            generator.emu = submode == 0;
            generator.mode16 = submode == 1 || submode == 2;
            generator.index16 = submode == 1 || submode == 3;
            generator.unaligned_dp = table >= 5;

            for opcode in 0..=0xFF_u8 {
                ptrs[usize::from(opcode)] = generator.heap.len() as u16;

                if history {
                    generator.push(st::ADD_TO_HISTORY);
                }

                generator.decode_insn(opcode);
                generator.push(st::READ_OPCODE);
            }
        }

        debug_assert!(generator.heap.len() <= usize::from(u16::MAX));

        Self {
            heap: generator.heap,
            insn_ptrs,
        }
    }

    /// Poison fetch tokens (and disarm history tokens) so the interpreter
    /// rebuilds at the next instruction boundary. Every token is one byte
    /// on this core, so the walk is a plain scan.
    pub(crate) fn mark_stale(&mut self) {
        for token in &mut self.heap {
            match *token {
                st::READ_OPCODE => *token = st::REGENERATE_TABLES,
                st::ADD_TO_HISTORY => *token = st::NOP,
                _ => {}
            }
        }
    }
}

struct Generator {
    heap: Vec<u8>,
    emu: bool,
    mode16: bool,
    index16: bool,
    unaligned_dp: bool,
}

impl Generator {
    fn push(&mut self, state: u8) {
        self.heap.push(state);
    }

    fn seq(&mut self, states: &[u8]) {
        self.heap.extend_from_slice(states);
    }

    // === Addressing helpers (cycle-for-cycle with the hardware shapes) ===

    fn addr_dp(&mut self) {
        self.push(st::READ_ADDR_DP);
        if self.unaligned_dp {
            self.push(st::WAIT);
        }
    }

    fn addr_dp_x(&mut self) {
        self.seq(&[st::READ_ADDR_DP_X, st::WAIT]);
        if self.unaligned_dp {
            self.push(st::WAIT);
        }
    }

    fn addr_dp_y(&mut self) {
        self.seq(&[st::READ_ADDR_DP_Y, st::WAIT]);
        if self.unaligned_dp {
            self.push(st::WAIT);
        }
    }

    fn addr_dp_ind(&mut self) {
        self.addr_dp();
        self.seq(&[st::READ, st::READ_IND_ADDR_DP]);
    }

    fn addr_dp_ind_x(&mut self) {
        self.addr_dp_x();
        self.seq(&[st::READ, st::READ_IND_ADDR_DP]);
    }

    fn addr_dp_ind_y(&mut self) {
        self.addr_dp();
        self.seq(&[st::READ, st::READ_IND_ADDR_DP_Y]);
    }

    fn addr_dp_long_ind(&mut self) {
        self.addr_dp();
        self.seq(&[
            st::READ,
            st::READ_IND_ADDR_DP_LONG_H,
            st::READ_IND_ADDR_DP_LONG_B,
        ]);
    }

    fn addr_dp_long_ind_y(&mut self) {
        self.addr_dp_long_ind();
        self.push(st::READ_ADDR_ADD_Y);
    }

    fn addr_abs(&mut self) {
        self.seq(&[st::READ_816_ADDR_L, st::READ_ADDR_H]);
    }

    fn addr_abs_x(&mut self) {
        self.seq(&[st::READ_816_ADDR_L, st::READ_ADDR_HX]);
    }

    fn addr_abs_y(&mut self) {
        self.seq(&[st::READ_816_ADDR_L, st::READ_ADDR_HY]);
    }

    fn addr_abs_long(&mut self) {
        self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ_ADDR_B]);
    }

    fn addr_abs_long_x(&mut self) {
        self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::READ_ADDR_BX]);
    }

    fn addr_stack_rel(&mut self) {
        self.seq(&[st::READ_ADDR_SO, st::WAIT]);
    }

    fn addr_stack_rel_ind_y(&mut self) {
        self.seq(&[
            st::READ_ADDR_SO,
            st::WAIT,
            st::READ_816_LONG_L,
            st::READ_816_ADDR_ABS_HY,
            st::WAIT,
        ]);
    }

    // === Data movement helpers ===

    /// Width-dependent data read of the addressed operand.
    fn read_data(&mut self, wide: bool) {
        if wide {
            self.seq(&[st::READ_L16, st::READ_H16]);
        } else {
            self.push(st::READ_816);
        }
    }

    /// Width-dependent immediate fetch.
    fn read_imm(&mut self, wide: bool) {
        if wide {
            self.seq(&[st::READ_IMM_L16, st::READ_IMM_H16]);
        } else {
            self.push(st::READ_IMM);
        }
    }

    /// Width-dependent store of the data latch.
    fn write_data(&mut self, wide: bool) {
        if wide {
            self.seq(&[st::WRITE_L16, st::WRITE_H16]);
        } else {
            self.push(st::WRITE_816);
        }
    }

    /// Read-modify-write tail: modify, internal cycle, write back
    /// (16-bit writes happen high byte first).
    fn rmw_tail(&mut self, op8: u8, op16: u8) {
        if self.mode16 {
            self.seq(&[
                st::READ_L16,
                st::READ_H16,
                op16,
                st::WAIT,
                st::WRITE_H16,
                st::WRITE_L16,
            ]);
        } else {
            self.seq(&[st::READ_816, op8, st::WAIT, st::WRITE_816]);
        }
    }

    /// Group-I accumulator operation tail.
    fn group1_tail(&mut self, opcode: u8) {
        match opcode & 0xE0 {
            0x00 => self.push(if self.mode16 { st::OR16 } else { st::OR }),
            0x20 => {
                if self.mode16 {
                    self.seq(&[st::AND16, st::D_TO_A16]);
                } else {
                    self.seq(&[st::AND, st::D_TO_A]);
                }
            }
            0x40 => self.push(if self.mode16 { st::XOR16 } else { st::XOR }),
            0x60 => self.push(if self.mode16 { st::ADC16 } else { st::ADC }),
            0x80 => {
                if self.mode16 {
                    self.seq(&[st::A_TO_D16, st::WRITE_L16, st::WRITE_H16]);
                } else {
                    self.seq(&[st::A_TO_D, st::WRITE_816]);
                }
            }
            0xA0 => {
                if self.mode16 {
                    self.seq(&[st::D_SET_SZ16, st::D_TO_A16]);
                } else {
                    self.seq(&[st::D_SET_SZ, st::D_TO_A]);
                }
            }
            0xC0 => self.push(if self.mode16 { st::CMP16 } else { st::CMP }),
            _ => self.push(if self.mode16 { st::SBC16 } else { st::SBC }),
        }
    }

    /// The ORA/AND/EOR/ADC/STA/LDA/CMP/SBC matrix across all fifteen
    /// addressing columns. Returns false for opcodes outside the group.
    fn decode_group1(&mut self, opcode: u8) -> bool {
        // STA #imm does not exist; 0x89 is BIT #imm.
        if opcode == 0x89 {
            return false;
        }

        let store = (opcode & 0xE0) == 0x80;

        match opcode & 0x1F {
            0x01 => self.addr_dp_ind_x(),
            0x03 => self.addr_stack_rel(),
            0x05 => self.addr_dp(),
            0x07 => self.addr_dp_long_ind(),
            0x09 => {
                self.read_imm(self.mode16);
                self.group1_tail(opcode);
                return true;
            }
            0x0D => self.addr_abs(),
            0x0F => self.addr_abs_long(),
            0x11 => self.addr_dp_ind_y(),
            0x12 => self.addr_dp_ind(),
            0x13 => self.addr_stack_rel_ind_y(),
            0x15 => self.addr_dp_x(),
            0x17 => self.addr_dp_long_ind_y(),
            0x19 => self.addr_abs_y(),
            0x1D => self.addr_abs_x(),
            0x1F => self.addr_abs_long_x(),
            _ => return false,
        }

        if !store {
            self.read_data(self.mode16);
        }

        self.group1_tail(opcode);
        true
    }

    fn branch(&mut self, condition: u8) {
        self.seq(&[st::READ_IMM, condition, st::JCC_FALSE_READ]);
    }

    fn decode_insn(&mut self, opcode: u8) {
        if self.decode_group1(opcode) {
            return;
        }

        let emu = self.emu;
        let mode16 = self.mode16;
        let index16 = self.index16;

        match opcode {
            0x00 => {
                // BRK: signature, return state, vector through the
                // mode-specific table.
                self.push(st::READ_IMM);
                if !emu {
                    self.push(st::PUSH_PBK);
                }
                self.seq(&[
                    st::PUSH_PCH,
                    st::PUSH_PCL,
                    st::P_TO_D,
                    st::PUSH,
                    st::SET_I_CLEAR_D,
                ]);
                self.push(if emu {
                    st::EMU_BRK_VEC_TO_PC
                } else {
                    st::NAT_BRK_VEC_TO_PC
                });
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::ADDR_TO_PC]);
            }

            0x02 => {
                // COP.
                self.push(st::READ_IMM);
                if !emu {
                    self.push(st::PUSH_PBK);
                }
                self.seq(&[
                    st::PUSH_PCH,
                    st::PUSH_PCL,
                    st::P_TO_D,
                    st::PUSH,
                    st::SET_I_CLEAR_D,
                ]);
                self.push(if emu {
                    st::EMU_COP_VEC_TO_PC
                } else {
                    st::NAT_COP_VEC_TO_PC
                });
                self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::ADDR_TO_PC]);
            }

            // === TSB / TRB ===
            0x04 => {
                self.addr_dp();
                self.rmw_tail(st::TSB, st::TSB16);
            }
            0x0C => {
                self.addr_abs();
                self.rmw_tail(st::TSB, st::TSB16);
            }
            0x14 => {
                self.addr_dp();
                self.rmw_tail(st::TRB, st::TRB16);
            }
            0x1C => {
                self.addr_abs();
                self.rmw_tail(st::TRB, st::TRB16);
            }

            // === ASL / ROL / LSR / ROR ===
            0x06 => {
                self.addr_dp();
                self.rmw_tail(st::ASL, st::ASL16);
            }
            0x0E => {
                self.addr_abs();
                self.rmw_tail(st::ASL, st::ASL16);
            }
            0x16 => {
                self.addr_dp_x();
                self.rmw_tail(st::ASL, st::ASL16);
            }
            0x1E => {
                self.addr_abs_x();
                self.rmw_tail(st::ASL, st::ASL16);
            }
            0x26 => {
                self.addr_dp();
                self.rmw_tail(st::ROL, st::ROL16);
            }
            0x2E => {
                self.addr_abs();
                self.rmw_tail(st::ROL, st::ROL16);
            }
            0x36 => {
                self.addr_dp_x();
                self.rmw_tail(st::ROL, st::ROL16);
            }
            0x3E => {
                self.addr_abs_x();
                self.rmw_tail(st::ROL, st::ROL16);
            }
            0x46 => {
                self.addr_dp();
                self.rmw_tail(st::LSR, st::LSR16);
            }
            0x4E => {
                self.addr_abs();
                self.rmw_tail(st::LSR, st::LSR16);
            }
            0x56 => {
                self.addr_dp_x();
                self.rmw_tail(st::LSR, st::LSR16);
            }
            0x5E => {
                self.addr_abs_x();
                self.rmw_tail(st::LSR, st::LSR16);
            }
            0x66 => {
                self.addr_dp();
                self.rmw_tail(st::ROR, st::ROR16);
            }
            0x6E => {
                self.addr_abs();
                self.rmw_tail(st::ROR, st::ROR16);
            }
            0x76 => {
                self.addr_dp_x();
                self.rmw_tail(st::ROR, st::ROR16);
            }
            0x7E => {
                self.addr_abs_x();
                self.rmw_tail(st::ROR, st::ROR16);
            }

            // === Accumulator shifts and INC/DEC A ===
            0x0A => self.acc_modify(st::ASL, st::ASL16),
            0x2A => self.acc_modify(st::ROL, st::ROL16),
            0x4A => self.acc_modify(st::LSR, st::LSR16),
            0x6A => self.acc_modify(st::ROR, st::ROR16),
            0x1A => self.acc_modify(st::INC, st::INC16),
            0x3A => self.acc_modify(st::DEC, st::DEC16),

            // === INC / DEC memory ===
            0xC6 => {
                self.addr_dp();
                self.rmw_tail(st::DEC, st::DEC16);
            }
            0xCE => {
                self.addr_abs();
                self.rmw_tail(st::DEC, st::DEC16);
            }
            0xD6 => {
                self.addr_dp_x();
                self.rmw_tail(st::DEC, st::DEC16);
            }
            0xDE => {
                self.addr_abs_x();
                self.rmw_tail(st::DEC, st::DEC16);
            }
            0xE6 => {
                self.addr_dp();
                self.rmw_tail(st::INC, st::INC16);
            }
            0xEE => {
                self.addr_abs();
                self.rmw_tail(st::INC, st::INC16);
            }
            0xF6 => {
                self.addr_dp_x();
                self.rmw_tail(st::INC, st::INC16);
            }
            0xFE => {
                self.addr_abs_x();
                self.rmw_tail(st::INC, st::INC16);
            }

            // === BIT ===
            0x24 => {
                self.addr_dp();
                self.bit_tail();
            }
            0x2C => {
                self.addr_abs();
                self.bit_tail();
            }
            0x34 => {
                self.addr_dp_x();
                self.bit_tail();
            }
            0x3C => {
                self.addr_abs_x();
                self.bit_tail();
            }
            0x89 => {
                // BIT #imm affects only Z.
                self.read_imm(mode16);
                self.push(if mode16 { st::BIT16 } else { st::BIT });
            }

            // === Flag ops ===
            0x18 => self.seq(&[st::CLC, st::WAIT]),
            0x38 => self.seq(&[st::SEC, st::WAIT]),
            0x58 => self.seq(&[st::CLI, st::WAIT]),
            0x78 => self.seq(&[st::SEI, st::WAIT]),
            0xB8 => self.seq(&[st::CLV, st::WAIT]),
            0xD8 => self.seq(&[st::CLD, st::WAIT]),
            0xF8 => self.seq(&[st::SED, st::WAIT]),
            0xC2 => self.seq(&[st::READ_IMM, st::REP]),
            0xE2 => self.seq(&[st::READ_IMM, st::SEP]),
            0xFB => self.seq(&[st::XCE, st::WAIT]),

            // === Branches ===
            0x10 => self.branch(st::JNS),
            0x30 => self.branch(st::JS),
            0x50 => self.branch(st::JNO),
            0x70 => self.branch(st::JO),
            0x90 => self.branch(st::JNC),
            0xB0 => self.branch(st::JC),
            0xD0 => self.branch(st::JNZ),
            0xF0 => self.branch(st::JZ),
            0x80 => self.branch(st::J),
            0x82 => self.seq(&[st::READ_IMM_L16, st::READ_IMM_H16, st::J16]),

            // === Jumps, calls, returns ===
            0x20 => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_H,
                st::PUSH_PCH_M1,
                st::PUSH_PCL_M1,
                st::ADDR_TO_PC,
                st::WAIT,
            ]),
            0x22 => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_H,
                st::PUSH_PBK,
                st::WAIT,
                st::READ_ADDR_B,
                st::PUSH_PCH_M1,
                st::PUSH_PCL_M1,
                st::LONG_ADDR_TO_PC,
            ]),
            0x40 => {
                self.seq(&[
                    st::WAIT,
                    st::WAIT,
                    st::POP,
                    st::D_TO_P_NATIVE,
                    st::POP_PCL,
                    st::POP_PCH,
                ]);
                if !emu {
                    self.push(st::POP_PBK);
                }
            }
            0x4C => self.seq(&[st::READ_ADDR_L, st::READ_ADDR_H, st::ADDR_TO_PC]),
            0x5C => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_H,
                st::READ_ADDR_B,
                st::LONG_ADDR_TO_PC,
            ]),
            0x60 => self.seq(&[
                st::POP_PCL,
                st::POP_PCH_P1,
                st::WAIT,
                st::WAIT,
                st::WAIT,
            ]),
            0x6B => self.seq(&[
                st::WAIT,
                st::WAIT,
                st::POP_PCL,
                st::POP_PCH_P1,
                st::POP_PBK,
            ]),
            0x6C => self.seq(&[
                st::READ_816_ADDR_L,
                st::READ_ADDR_H,
                st::READ,
                st::READ_ABS_IND_ADDR,
                st::ADDR_TO_PC,
            ]),
            0x7C => self.seq(&[
                st::READ_ADDR_L,
                st::READ_ADDR_HX,
                st::WAIT,
                st::READ,
                st::READ_ABS_IND_ADDR,
                st::ADDR_TO_PC,
            ]),
            0xDC => self.seq(&[
                st::READ_816_ADDR_L,
                st::READ_ADDR_H,
                st::READ_816_LONG_L,
                st::READ_816_LONG_H,
                st::READ_816_LONG_B,
                st::LONG_ADDR_TO_PC,
            ]),
            0xFC => self.seq(&[
                // The timing is weird on this one.
                st::READ_ADDR_L,
                st::PUSH_PCH,
                st::PUSH_PCL,
                st::READ_ADDR_HX,
                st::WAIT,
                st::READ,
                st::READ_ABS_IND_ADDR,
                st::ADDR_TO_PC,
            ]),

            // === Block moves ===
            0x44 => self.seq(&[
                st::READ_IMM,
                st::D_TO_B,
                st::READ_ADDR_B,
                st::MOVE_READ,
                st::MOVE_WRITE_P,
                st::READ_816,
                st::READ_816,
            ]),
            0x54 => self.seq(&[
                st::READ_IMM,
                st::D_TO_B,
                st::READ_ADDR_B,
                st::MOVE_READ,
                st::MOVE_WRITE_N,
                st::READ_816,
                st::READ_816,
            ]),

            // === Stack pushes/pulls ===
            0x08 => self.seq(&[st::P_TO_D, st::WAIT, st::PUSH]),
            0x28 => {
                self.push(st::POP);
                self.push(if emu { st::D_TO_P } else { st::D_TO_P_NATIVE });
                self.seq(&[st::WAIT, st::WAIT]);
            }
            0x0B => self.seq(&[st::DP_TO_D16, st::WAIT, st::PUSH_H16, st::PUSH_L16]),
            0x2B => self.seq(&[
                st::WAIT,
                st::WAIT,
                st::POP_L16,
                st::POP_H16,
                st::D_TO_DP16,
            ]),
            0x48 => self.push_reg(st::A_TO_D, st::A_TO_D16, mode16),
            0x68 => self.pull_reg(st::D_TO_A, st::D_TO_A16, mode16),
            0x5A => self.push_reg(st::Y_TO_D, st::Y_TO_D16, index16),
            0x7A => self.pull_reg(st::D_TO_Y, st::D_TO_Y16, index16),
            0xDA => self.push_reg(st::X_TO_D, st::X_TO_D16, index16),
            0xFA => self.pull_reg(st::D_TO_X, st::D_TO_X16, index16),
            0x4B => self.seq(&[st::K_TO_D, st::PUSH]),
            0x8B => self.seq(&[st::B_TO_D, st::PUSH]),
            0xAB => self.seq(&[st::POP, st::WAIT, st::WAIT, st::D_TO_B]),
            0x62 => self.seq(&[
                st::READ_IMM_L16,
                st::READ_IMM_H16,
                st::PER,
                st::WAIT,
                st::PUSH_H16,
                st::PUSH_L16,
            ]),
            0xD4 => {
                self.addr_dp();
                self.seq(&[st::READ_L16, st::READ_H16, st::PUSH_H16, st::PUSH_L16]);
            }
            0xF4 => self.seq(&[
                st::READ_IMM_L16,
                st::READ_IMM_H16,
                st::PUSH_H16,
                st::PUSH_L16,
            ]),

            // === STX / STY / STZ ===
            0x84 => {
                self.addr_dp();
                self.store_reg(st::Y_TO_D, st::Y_TO_D16, index16);
            }
            0x8C => {
                self.addr_abs();
                self.store_reg(st::Y_TO_D, st::Y_TO_D16, index16);
            }
            0x94 => {
                self.addr_dp_x();
                self.store_reg(st::Y_TO_D, st::Y_TO_D16, index16);
            }
            0x86 => {
                self.addr_dp();
                self.store_reg(st::X_TO_D, st::X_TO_D16, index16);
            }
            0x8E => {
                self.addr_abs();
                self.store_reg(st::X_TO_D, st::X_TO_D16, index16);
            }
            0x96 => {
                self.addr_dp_y();
                self.store_reg(st::X_TO_D, st::X_TO_D16, index16);
            }
            0x64 => {
                self.addr_dp();
                self.store_reg(st::ZERO_TO_D, st::ZERO_TO_D16, mode16);
            }
            0x74 => {
                self.addr_dp_x();
                self.store_reg(st::ZERO_TO_D, st::ZERO_TO_D16, mode16);
            }
            0x9C => {
                self.addr_abs();
                self.store_reg(st::ZERO_TO_D, st::ZERO_TO_D16, mode16);
            }
            0x9E => {
                self.addr_abs_x();
                if mode16 {
                    self.seq(&[st::ZERO_TO_D16, st::WAIT, st::WRITE_L16, st::WRITE_H16]);
                } else {
                    self.seq(&[st::ZERO_TO_D, st::WAIT, st::WRITE_816]);
                }
            }

            // === LDX / LDY ===
            0xA0 => {
                self.read_imm(index16);
                self.load_tail(st::D_TO_Y, st::D_TO_Y16, index16);
            }
            0xA2 => {
                self.read_imm(index16);
                self.load_tail(st::D_TO_X, st::D_TO_X16, index16);
            }
            0xA4 => {
                self.addr_dp();
                self.read_data(index16);
                self.load_tail(st::D_TO_Y, st::D_TO_Y16, index16);
            }
            0xA6 => {
                self.addr_dp();
                self.read_data(index16);
                self.load_tail(st::D_TO_X, st::D_TO_X16, index16);
            }
            0xAC => {
                self.addr_abs();
                self.read_data(index16);
                self.load_tail(st::D_TO_Y, st::D_TO_Y16, index16);
            }
            0xAE => {
                self.addr_abs();
                self.read_data(index16);
                self.load_tail(st::D_TO_X, st::D_TO_X16, index16);
            }
            0xB4 => {
                self.addr_dp_x();
                self.read_data(index16);
                self.load_tail(st::D_TO_Y, st::D_TO_Y16, index16);
            }
            0xB6 => {
                self.addr_dp_y();
                self.read_data(index16);
                self.load_tail(st::D_TO_X, st::D_TO_X16, index16);
            }
            0xBC => {
                self.addr_abs_x();
                self.read_data(index16);
                self.load_tail(st::D_TO_Y, st::D_TO_Y16, index16);
            }
            0xBE => {
                self.addr_abs_y();
                self.read_data(index16);
                self.load_tail(st::D_TO_X, st::D_TO_X16, index16);
            }

            // === CPX / CPY ===
            0xC0 => {
                self.read_imm(index16);
                self.push(if index16 { st::CMP_Y16 } else { st::CMP_Y });
            }
            0xC4 => {
                self.addr_dp();
                self.read_data(index16);
                self.push(if index16 { st::CMP_Y16 } else { st::CMP_Y });
            }
            0xCC => {
                self.addr_abs();
                self.read_data(index16);
                self.push(if index16 { st::CMP_Y16 } else { st::CMP_Y });
            }
            0xE0 => {
                self.read_imm(index16);
                self.push(if index16 { st::CMP_X16 } else { st::CMP_X });
            }
            0xE4 => {
                self.addr_dp();
                self.read_data(index16);
                self.push(if index16 { st::CMP_X16 } else { st::CMP_X });
            }
            0xEC => {
                self.addr_abs();
                self.read_data(index16);
                self.push(if index16 { st::CMP_X16 } else { st::CMP_X });
            }

            // === Register transfers and index arithmetic ===
            0x88 => self.reg_modify(st::Y_TO_D, st::DEC, st::D_TO_Y, st::Y_TO_D16, st::DEC16, st::D_TO_Y16, index16),
            0xC8 => self.reg_modify(st::Y_TO_D, st::INC, st::D_TO_Y, st::Y_TO_D16, st::INC16, st::D_TO_Y16, index16),
            0xCA => self.reg_modify(st::X_TO_D, st::DEC, st::D_TO_X, st::X_TO_D16, st::DEC16, st::D_TO_X16, index16),
            0xE8 => self.reg_modify(st::X_TO_D, st::INC, st::D_TO_X, st::X_TO_D16, st::INC16, st::D_TO_X16, index16),

            0x8A => self.transfer(st::X_TO_D, st::D_TO_A, st::X_TO_D16, st::D_TO_A16, mode16),
            0x98 => self.transfer(st::Y_TO_D, st::D_TO_A, st::Y_TO_D16, st::D_TO_A16, mode16),
            0xA8 => self.transfer(st::A_TO_D, st::D_TO_Y, st::A_TO_D16, st::D_TO_Y16, index16),
            0xAA => self.transfer(st::A_TO_D, st::D_TO_X, st::A_TO_D16, st::D_TO_X16, index16),
            0xBA => self.transfer(st::S_TO_D, st::D_TO_X, st::S_TO_D16, st::D_TO_X16, index16),
            0x9B => {
                if index16 {
                    self.seq(&[st::X_TO_D16, st::D_SET_SZ16, st::D_TO_Y16, st::WAIT]);
                } else {
                    self.seq(&[st::X_TO_D, st::D_SET_SZ, st::D_TO_Y, st::WAIT]);
                }
            }
            0xBB => {
                if index16 {
                    self.seq(&[st::Y_TO_D16, st::D_SET_SZ16, st::D_TO_X16, st::WAIT]);
                } else {
                    self.seq(&[st::Y_TO_D, st::D_SET_SZ, st::D_TO_X, st::WAIT]);
                }
            }
            0x9A => {
                // TXS: no flags; width follows the mode, not X.
                if emu {
                    self.seq(&[st::X_TO_D, st::D_TO_S, st::WAIT]);
                } else {
                    self.seq(&[st::X_TO_D16, st::D_TO_S16, st::WAIT]);
                }
            }
            0x1B => {
                // TCS: the full accumulator, no flags.
                if emu {
                    self.seq(&[st::A_TO_D, st::D_TO_S, st::WAIT]);
                } else {
                    self.seq(&[st::A_TO_D16, st::D_TO_S16, st::WAIT]);
                }
            }
            0x3B => self.seq(&[st::S_TO_D16, st::D_SET_SZ16, st::D_TO_A16, st::WAIT]),
            0x5B => self.seq(&[st::A_TO_D16, st::D_SET_SZ16, st::D_TO_DP16, st::WAIT]),
            0x7B => self.seq(&[st::DP_TO_D16, st::D_SET_SZ16, st::D_TO_A16, st::WAIT]),

            0xEB => self.seq(&[st::XBA, st::WAIT, st::WAIT]),
            0xEA => self.push(st::WAIT),
            0x42 => self.push(st::READ_IMM),

            0xCB => self.push(st::WAIT_FOR_INTERRUPT),
            0xDB => self.push(st::STOP),

            _ => unreachable!("opcode {opcode:#04X} not covered"),
        }
    }

    fn acc_modify(&mut self, op8: u8, op16: u8) {
        if self.mode16 {
            self.seq(&[st::A_TO_D16, op16, st::WAIT, st::D_TO_A16]);
        } else {
            self.seq(&[st::A_TO_D, op8, st::WAIT, st::D_TO_A]);
        }
    }

    fn bit_tail(&mut self) {
        if self.mode16 {
            self.seq(&[st::READ_L16, st::READ_H16, st::D_SET_SV16, st::BIT16]);
        } else {
            self.seq(&[st::READ_816, st::D_SET_SV, st::BIT]);
        }
    }

    fn load_tail(&mut self, to8: u8, to16: u8, wide: bool) {
        if wide {
            self.seq(&[st::D_SET_SZ16, to16]);
        } else {
            self.seq(&[st::D_SET_SZ, to8]);
        }
    }

    fn store_reg(&mut self, from8: u8, from16: u8, wide: bool) {
        if wide {
            self.seq(&[from16, st::WRITE_L16, st::WRITE_H16]);
        } else {
            self.seq(&[from8, st::WRITE_816]);
        }
    }

    fn push_reg(&mut self, from8: u8, from16: u8, wide: bool) {
        if wide {
            self.seq(&[from16, st::WAIT, st::PUSH_H16, st::PUSH_L16]);
        } else {
            self.seq(&[from8, st::WAIT, st::PUSH]);
        }
    }

    fn pull_reg(&mut self, to8: u8, to16: u8, wide: bool) {
        if wide {
            self.seq(&[
                st::POP_L16,
                st::POP_H16,
                st::D_SET_SZ16,
                to16,
                st::WAIT,
                st::WAIT,
            ]);
        } else {
            self.seq(&[st::POP, st::D_SET_SZ, to8, st::WAIT, st::WAIT]);
        }
    }

    fn reg_modify(&mut self, from8: u8, op8: u8, to8: u8, from16: u8, op16: u8, to16: u8, wide: bool) {
        if wide {
            self.seq(&[from16, op16, to16, st::WAIT]);
        } else {
            self.seq(&[from8, op8, to8, st::WAIT]);
        }
    }

    fn transfer(&mut self, from8: u8, to8: u8, from16: u8, to16: u8, wide: bool) {
        if wide {
            self.seq(&[from16, st::D_SET_SZ16, to16, st::WAIT]);
        } else {
            self.seq(&[from8, st::D_SET_SZ, to8, st::WAIT]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_tables_cover_all_opcodes() {
        let tables = DecoderTables::build(false);
        for table in tables.insn_ptrs.iter() {
            for &offset in table {
                assert!(offset >= 1);
                assert!(usize::from(offset) < tables.heap.len());
            }
        }
    }

    #[test]
    fn submodes_decode_differently() {
        let tables = DecoderTables::build(false);

        // LDA #imm: one operand byte in emulation, two in native M=0.
        let emu = usize::from(tables.insn_ptrs[0][0xA9]);
        assert_eq!(tables.heap[emu], st::READ_IMM);

        let native16 = usize::from(tables.insn_ptrs[1][0xA9]);
        assert_eq!(tables.heap[native16], st::READ_IMM_L16);
        assert_eq!(tables.heap[native16 + 1], st::READ_IMM_H16);
    }

    #[test]
    fn unaligned_direct_page_adds_a_cycle() {
        let tables = DecoderTables::build(false);

        // LDA dp in emulation mode: aligned is [dp, read], unaligned
        // carries an extra internal cycle.
        let aligned = usize::from(tables.insn_ptrs[0][0xA5]);
        assert_eq!(tables.heap[aligned], st::READ_ADDR_DP);
        assert_eq!(tables.heap[aligned + 1], st::READ_816);

        let unaligned = usize::from(tables.insn_ptrs[5][0xA5]);
        assert_eq!(tables.heap[unaligned], st::READ_ADDR_DP);
        assert_eq!(tables.heap[unaligned + 1], st::WAIT);
        assert_eq!(tables.heap[unaligned + 2], st::READ_816);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = DecoderTables::build(true);
        let b = DecoderTables::build(true);
        assert_eq!(a.heap, b.heap);
        assert_eq!(a.insn_ptrs, b.insn_ptrs);
    }

    #[test]
    fn mark_stale_poisons_fetches() {
        let mut tables = DecoderTables::build(false);
        tables.mark_stale();

        let nop = usize::from(tables.insn_ptrs[0][0xEA]);
        // NOP is [WAIT, fetch]; the fetch token is poisoned, as is the
        // canonical entry, so a parked core regenerates before its next
        // instruction.
        assert_eq!(tables.heap[nop + 1], st::REGENERATE_TABLES);
        assert_eq!(tables.heap[ENTRY as usize], st::REGENERATE_TABLES);
    }
}
