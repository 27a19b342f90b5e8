//! The 65802 coprocessor: register file, submode tracking, and run loop.
//!
//! The run loop consumes the credited cycle budget exactly — the external
//! scheduler interleaves device timing by crediting short budgets, and
//! the microcode index persists across calls so execution resumes
//! mid-instruction. There is no early-stop path on this core.

use coproc_core::{ExecState, HistoryEntry, HistoryRing, MemoryMap, StateTransfer};
use log::debug;

use crate::decoder::{DecoderTables, ENTRY, TABLE_COUNT};
use crate::flags::{C, D, I, M, N, V, X, Z};
use crate::states as st;

/// Register snapshot for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub ah: u8,
    pub x: u8,
    pub xh: u8,
    pub y: u8,
    pub yh: u8,
    pub s: u8,
    pub sh: u8,
    pub p: u8,
    pub pc: u16,
    pub dp: u16,
    pub b: u8,
    pub k: u8,
    pub emulation: bool,
}

/// One emulated 65802 core instance. Single-threaded, non-reentrant.
pub struct Coproc65802 {
    a: u8,
    ah: u8,
    x: u8,
    xh: u8,
    y: u8,
    yh: u8,
    s: u8,
    sh: u8,
    p: u8,
    pc: u16,
    dp: u16,
    b: u8,
    k: u8,
    emulation: bool,

    insn_pc: u16,
    opcode: u8,
    addr: u16,
    addr_bank: u8,
    data: u8,
    data16: u16,

    /// Index of the next microcode token.
    ip: u32,
    /// Active decode table (submode × direct-page alignment).
    table: usize,
    submode: usize,

    cycles_left: i32,
    cycles_base: u32,

    tables: DecoderTables,
    memory: MemoryMap,
    history: Option<HistoryRing>,
    history_change_pending: bool,
}

impl Default for Coproc65802 {
    fn default() -> Self {
        Self::new()
    }
}

impl Coproc65802 {
    /// Open-bus fill value seen on unmapped reads.
    pub const OPEN_BUS: u8 = 0xFF;

    #[must_use]
    pub fn new() -> Self {
        Self {
            a: 0,
            ah: 0,
            x: 0,
            xh: 0,
            y: 0,
            yh: 0,
            s: 0xFF,
            sh: 0x01,
            p: 0x30,
            pc: 0,
            dp: 0,
            b: 0,
            k: 0,
            emulation: true,
            insn_pc: 0,
            opcode: 0,
            addr: 0,
            addr_bank: 0,
            data: 0,
            data16: 0,
            ip: ENTRY,
            table: 0,
            submode: 0,
            cycles_left: 0,
            cycles_base: 0,
            tables: DecoderTables::build(false),
            memory: MemoryMap::new(Self::OPEN_BUS),
            history: None,
            history_change_pending: false,
        }
    }

    #[must_use]
    pub fn memory(&self) -> &MemoryMap {
        &self.memory
    }

    /// The memory map may only be reconfigured between run calls.
    pub fn memory_mut(&mut self) -> &mut MemoryMap {
        &mut self.memory
    }

    #[must_use]
    pub fn registers(&self) -> Registers {
        Registers {
            a: self.a,
            ah: self.ah,
            x: self.x,
            xh: self.xh,
            y: self.y,
            yh: self.yh,
            s: self.s,
            sh: self.sh,
            p: self.p,
            pc: self.pc,
            dp: self.dp,
            b: self.b,
            k: self.k,
            emulation: self.emulation,
        }
    }

    #[must_use]
    pub fn insn_pc(&self) -> u16 {
        self.insn_pc
    }

    // === Cycle accounting ===

    pub fn add_cycles(&mut self, cycles: i32) {
        self.cycles_base = self.cycles_base.wrapping_add(cycles as u32);
        self.cycles_left += cycles;
    }

    #[must_use]
    pub fn cycles_left(&self) -> i32 {
        self.cycles_left
    }

    /// Elapsed cycle counter.
    #[must_use]
    pub fn time(&self) -> u32 {
        self.cycles_base.wrapping_sub(self.cycles_left as u32)
    }

    // === Reset ===

    pub fn cold_reset(&mut self) {
        self.a = 0;
        self.ah = 0;
        self.x = 0;
        self.xh = 0;
        self.y = 0;
        self.yh = 0;
        self.s = 0xFF;
        self.sh = 0x01;
        self.p = 0x30;
        self.dp = 0;
        self.b = 0;
        self.k = 0;
        self.pc = 0;

        self.warm_reset();
    }

    /// Reload PC from the reset vector and drop back to emulation mode.
    pub fn warm_reset(&mut self) {
        let lo = self.memory.read(0xFFFC);
        let hi = self.memory.read(0xFFFD);
        self.pc = u16::from(lo) | (u16::from(hi) << 8);
        self.insn_pc = self.pc;

        self.p &= !D;
        self.p |= 0x30;
        self.emulation = true;
        self.k = 0;
        self.b = 0;
        self.dp = 0;
        self.sh = 1;
        self.xh = 0;
        self.yh = 0;
        self.submode = 0;

        self.ip = ENTRY;
        self.update_decode_table();

        if self.history_change_pending {
            self.regenerate_tables();
        }
    }

    /// Redirect execution to `addr` at a fresh instruction boundary.
    pub fn jump(&mut self, addr: u16) {
        self.pc = addr;
        self.insn_pc = addr;
        self.ip = ENTRY;
    }

    // === Execution state capture ===

    #[must_use]
    pub fn get_exec_state(&self) -> ExecState {
        let at_boundary = matches!(
            self.tables.heap[self.ip as usize],
            st::READ_OPCODE | st::REGENERATE_TABLES
        );

        ExecState {
            pc: if at_boundary { self.pc } else { self.insn_pc },
            a: self.a,
            x: self.x,
            y: self.y,
            s: self.s,
            p: self.p,
            ah: self.ah,
            xh: self.xh,
            yh: self.yh,
            sh: self.sh,
            b: self.b,
            k: self.k,
            dp: self.dp,
            emulation: self.emulation,
            at_insn_boundary: at_boundary,
        }
    }

    /// Restore register state, re-deriving the submode from the restored
    /// flags, widths, and direct page. A PC change re-enters at an
    /// instruction boundary.
    pub fn set_exec_state(&mut self, state: &ExecState) {
        if self.insn_pc != state.pc {
            self.jump(state.pc);
        }

        let mut redecode = false;

        self.a = state.a;
        self.x = state.x;
        self.y = state.y;
        self.s = state.s;

        let mut p = state.p;
        if state.emulation {
            p |= 0x30;
        }

        if self.p != p {
            if (self.p ^ p) & (M | X) != 0 {
                redecode = true;
            }
            self.p = p;
        }

        self.ah = state.ah;

        if self.p & X == 0 {
            self.xh = state.xh;
            self.yh = state.yh;
        }

        if !state.emulation {
            self.sh = state.sh;
        }

        self.b = state.b;
        self.k = state.k;

        if self.dp != state.dp {
            self.dp = state.dp;
            redecode = true;
        }

        if self.emulation != state.emulation {
            self.emulation = state.emulation;
            redecode = true;

            if self.emulation {
                self.xh = 0;
                self.yh = 0;
                self.sh = 1;
            }
        }

        if redecode {
            self.update_decode_table();
        }
    }

    /// Round-trip every visible register through a key/value transfer,
    /// then re-enter through the same submode handling as
    /// [`Self::set_exec_state`].
    pub fn exchange_state(&mut self, io: &mut dyn StateTransfer) {
        let mut state = self.get_exec_state();

        io.transfer_u16("pc", &mut state.pc);
        io.transfer_u8("a", &mut state.a);
        io.transfer_u8("ah", &mut state.ah);
        io.transfer_u8("x", &mut state.x);
        io.transfer_u8("xh", &mut state.xh);
        io.transfer_u8("y", &mut state.y);
        io.transfer_u8("yh", &mut state.yh);
        io.transfer_u8("s", &mut state.s);
        io.transfer_u8("sh", &mut state.sh);
        io.transfer_u8("p", &mut state.p);
        io.transfer_u8("b", &mut state.b);
        io.transfer_u8("k", &mut state.k);
        io.transfer_u16("dp", &mut state.dp);
        io.transfer_bool("emulation", &mut state.emulation);

        self.set_exec_state(&state);
    }

    // === History ===

    /// Attach a caller-allocated history ring. Toggling history
    /// regenerates the decode tables at the next boundary.
    pub fn attach_history(&mut self, buffer: Box<[HistoryEntry]>) {
        let was_on = self.history.is_some();
        self.history = Some(HistoryRing::new(buffer));

        if !was_on {
            self.on_history_toggled();
        }
    }

    /// Detach and return the history buffer.
    pub fn detach_history(&mut self) -> Option<Box<[HistoryEntry]>> {
        let ring = self.history.take()?;
        self.on_history_toggled();
        Some(ring.into_inner())
    }

    #[must_use]
    pub fn history(&self) -> Option<&HistoryRing> {
        self.history.as_ref()
    }

    fn on_history_toggled(&mut self) {
        self.history_change_pending = true;
        self.tables.mark_stale();
    }

    fn regenerate_tables(&mut self) {
        debug!("regenerating decode tables (history={})", self.history.is_some());
        self.history_change_pending = false;
        self.tables = DecoderTables::build(self.history.is_some());
    }

    /// Re-derive the submode and select the matching decode table. On a
    /// submode change the emulation-mode register coercions apply.
    fn update_decode_table(&mut self) {
        let submode = if self.emulation {
            0
        } else {
            1 + usize::from((self.p >> 4) & 3)
        };

        if self.submode != submode {
            self.submode = submode;

            if self.emulation {
                self.sh = 0x01;
                self.xh = 0;
                self.yh = 0;
            } else if self.p & X != 0 {
                self.xh = 0;
                self.yh = 0;
            }
        }

        self.table = submode + if self.dp & 0xFF != 0 { TABLE_COUNT / 2 } else { 0 };
    }

    // === Run loop ===

    /// Execute, consuming the credited cycle budget exactly.
    pub fn run(&mut self) {
        if self.cycles_left <= 0 {
            return;
        }

        loop {
            let state = self.tables.heap[self.ip as usize];
            self.ip += 1;

            match state {
                st::NOP => {}

                st::READ_OPCODE => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.insn_pc = self.pc;
                    self.opcode = self.memory.read(self.pc);
                    self.pc = self.pc.wrapping_add(1);
                    self.cycles_left -= 1;
                    self.ip =
                        u32::from(self.tables.insn_ptrs[self.table][usize::from(self.opcode)]);
                }

                st::ADD_TO_HISTORY => {
                    let bytes = [
                        self.opcode,
                        self.memory.debug_read(self.pc),
                        self.memory.debug_read(self.pc.wrapping_add(1)),
                    ];
                    self.append_history(bytes);
                }

                st::REGENERATE_TABLES => {
                    self.regenerate_tables();
                    self.ip = ENTRY;
                }

                // === Operand fetch ===
                st::READ_IMM => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_pc_byte();
                }
                st::READ_IMM_L16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data16 = u16::from(self.read_pc_byte());
                }
                st::READ_IMM_H16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data16 |= u16::from(self.read_pc_byte()) << 8;
                }
                st::READ_ADDR_L => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr = u16::from(self.read_pc_byte());
                }
                st::READ_816_ADDR_L => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr_bank = self.b;
                    self.addr = u16::from(self.read_pc_byte());
                }
                st::READ_ADDR_H => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr |= u16::from(self.read_pc_byte()) << 8;
                }
                st::READ_ADDR_HX => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_pc_byte();
                    self.addr = self
                        .addr
                        .wrapping_add(u16::from(hi) << 8)
                        .wrapping_add(self.x16());
                }
                st::READ_ADDR_HY => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_pc_byte();
                    self.addr = self
                        .addr
                        .wrapping_add(u16::from(hi) << 8)
                        .wrapping_add(self.y16());
                }
                st::READ_ADDR_DP => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let offset = self.read_pc_byte();
                    self.addr = self.dp.wrapping_add(u16::from(offset));
                    self.addr_bank = 0;
                }
                st::READ_ADDR_DP_X => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let offset = self.read_pc_byte();
                    self.addr = self
                        .dp
                        .wrapping_add(u16::from(offset))
                        .wrapping_add(self.x16());
                    self.addr_bank = 0;
                }
                st::READ_ADDR_DP_Y => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let offset = self.read_pc_byte();
                    self.addr = self
                        .dp
                        .wrapping_add(u16::from(offset))
                        .wrapping_add(self.y16());
                    self.addr_bank = 0;
                }
                st::READ_IND_ADDR_DP => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.addr = u16::from(self.data) | (u16::from(hi) << 8);
                    self.addr_bank = self.b;
                }
                st::READ_IND_ADDR_DP_Y => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.addr = (u16::from(self.data) | (u16::from(hi) << 8))
                        .wrapping_add(self.y16());
                    self.addr_bank = self.b;
                }
                st::READ_IND_ADDR_DP_LONG_H => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.data16 = u16::from(self.data) | (u16::from(hi) << 8);
                }
                st::READ_IND_ADDR_DP_LONG_B => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr_bank = self.read_cycle(self.addr.wrapping_add(2));
                    self.addr = self.data16;
                }
                st::READ_ADDR_ADD_Y => {
                    self.addr = self.addr.wrapping_add(self.y16());
                }
                st::READ_ADDR_B => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr_bank = self.read_pc_byte();
                }
                st::READ_ADDR_BX => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr_bank = self.read_pc_byte();
                    let ea = u32::from(self.addr) + u32::from(self.x16());
                    if ea >= 0x10000 {
                        self.addr_bank = self.addr_bank.wrapping_add(1);
                    }
                    self.addr = ea as u16;
                }
                st::READ_ADDR_SO => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let offset = self.read_pc_byte();
                    self.addr_bank = self.b;
                    self.addr = (u16::from(self.sh) << 8)
                        .wrapping_add(u16::from(self.s))
                        .wrapping_add(u16::from(offset));
                    if self.emulation {
                        self.addr = u16::from(self.addr as u8) + 0x100;
                    }
                }
                st::READ_816_ADDR_ABS_HY => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.addr = (u16::from(self.data) | (u16::from(hi) << 8))
                        .wrapping_add(self.y16());
                    self.addr_bank = self.b;
                }
                st::READ_816_LONG_L => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr);
                }
                st::READ_816_LONG_H => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.data16 = u16::from(self.data) | (u16::from(hi) << 8);
                }
                st::READ_816_LONG_B => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr_bank = self.read_cycle(self.addr.wrapping_add(2));
                    self.addr = self.data16;
                }
                st::READ_ABS_IND_ADDR => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.addr = u16::from(self.data) | (u16::from(hi) << 8);
                }

                // === Data cycles ===
                st::READ | st::READ_816 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr);
                }
                st::READ_L16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data16 = u16::from(self.read_cycle(self.addr));
                }
                st::READ_H16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.data16 |= u16::from(hi) << 8;
                }
                st::WRITE_816 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.memory.write(self.addr, self.data);
                    self.cycles_left -= 1;
                }
                st::WRITE_L16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.memory.write(self.addr, self.data16 as u8);
                    self.cycles_left -= 1;
                }
                st::WRITE_H16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.memory
                        .write(self.addr.wrapping_add(1), (self.data16 >> 8) as u8);
                    self.cycles_left -= 1;
                }
                st::WAIT => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.cycles_left -= 1;
                }

                // === Register transfers ===
                st::A_TO_D => self.data = self.a,
                st::X_TO_D => self.data = self.x,
                st::Y_TO_D => self.data = self.y,
                st::S_TO_D => self.data = self.s,
                st::P_TO_D => self.data = self.p,
                st::B_TO_D => self.data = self.b,
                st::K_TO_D => self.data = self.k,
                st::ZERO_TO_D => self.data = 0,
                st::D_TO_A => self.a = self.data,
                st::D_TO_X => self.x = self.data,
                st::D_TO_Y => self.y = self.data,
                st::D_TO_S => self.s = self.data,
                st::D_TO_P => {
                    self.p = self.data | 0x30;
                }
                st::D_TO_P_NATIVE => {
                    self.p = if self.emulation {
                        self.data | 0x30
                    } else {
                        self.data
                    };
                    self.update_decode_table();
                }
                st::D_TO_B => self.b = self.data,
                st::D_SET_SZ => {
                    let value = self.data;
                    self.set_nz(value);
                }
                st::D_SET_SV => {
                    self.p = (self.p & !(N | V)) | (self.data & 0xC0);
                }
                st::ZERO_TO_D16 => self.data16 = 0,
                st::A_TO_D16 => self.data16 = self.a16(),
                st::X_TO_D16 => self.data16 = self.x16(),
                st::Y_TO_D16 => self.data16 = self.y16(),
                st::S_TO_D16 => {
                    self.data16 = (u16::from(self.sh) << 8) | u16::from(self.s);
                }
                st::DP_TO_D16 => self.data16 = self.dp,
                st::D_TO_A16 => {
                    self.a = self.data16 as u8;
                    self.ah = (self.data16 >> 8) as u8;
                }
                st::D_TO_X16 => {
                    self.x = self.data16 as u8;
                    self.xh = (self.data16 >> 8) as u8;
                }
                st::D_TO_Y16 => {
                    self.y = self.data16 as u8;
                    self.yh = (self.data16 >> 8) as u8;
                }
                st::D_TO_S16 => {
                    debug_assert!(!self.emulation);
                    self.s = self.data16 as u8;
                    self.sh = (self.data16 >> 8) as u8;
                }
                st::D_TO_DP16 => self.dp = self.data16,
                st::D_SET_SZ16 => {
                    let value = self.data16;
                    self.set_nz16(value);
                }
                st::D_SET_SV16 => {
                    self.p = (self.p & !(N | V)) | ((self.data16 >> 8) as u8 & 0xC0);
                }
                st::ADDR_TO_PC => self.pc = self.addr,
                st::LONG_ADDR_TO_PC => {
                    self.pc = self.addr;
                    self.k = self.addr_bank;
                }

                // === Stack ===
                st::PUSH => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.data);
                }
                st::PUSH_L16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.data16 as u8);
                }
                st::PUSH_H16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle((self.data16 >> 8) as u8);
                }
                st::PUSH_PBK => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.k);
                }
                st::PUSH_PCL => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.pc as u8);
                }
                st::PUSH_PCH => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle((self.pc >> 8) as u8);
                }
                st::PUSH_PCL_M1 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.pc.wrapping_sub(1) as u8);
                }
                st::PUSH_PCH_M1 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle((self.pc.wrapping_sub(1) >> 8) as u8);
                }
                st::POP => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.pop_cycle();
                }
                st::POP_L16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data16 = u16::from(self.pop_cycle());
                }
                st::POP_H16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data16 |= u16::from(self.pop_cycle()) << 8;
                }
                st::POP_PBK => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.k = self.pop_cycle();
                }
                st::POP_PCL => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.pc = u16::from(self.pop_cycle());
                }
                st::POP_PCH => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.pc |= u16::from(self.pop_cycle()) << 8;
                }
                st::POP_PCH_P1 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.pc |= u16::from(self.pop_cycle()) << 8;
                    self.pc = self.pc.wrapping_add(1);
                }

                // === ALU, 8-bit ===
                st::ADC => self.alu_adc(),
                st::SBC => self.alu_sbc(),
                st::CMP => self.alu_cmp(self.a),
                st::CMP_X => self.alu_cmp(self.x),
                st::CMP_Y => self.alu_cmp(self.y),
                st::INC => {
                    self.data = self.data.wrapping_add(1);
                    let value = self.data;
                    self.set_nz(value);
                }
                st::DEC => {
                    self.data = self.data.wrapping_sub(1);
                    let value = self.data;
                    self.set_nz(value);
                }
                st::AND => {
                    self.data &= self.a;
                    let value = self.data;
                    self.set_nz(value);
                }
                st::OR => {
                    self.a |= self.data;
                    let value = self.a;
                    self.set_nz(value);
                }
                st::XOR => {
                    self.a ^= self.data;
                    let value = self.a;
                    self.set_nz(value);
                }
                st::ASL => {
                    self.p &= !(N | Z | C);
                    if self.data & 0x80 != 0 {
                        self.p |= C;
                    }
                    self.data <<= 1;
                    if self.data & 0x80 != 0 {
                        self.p |= N;
                    }
                    if self.data == 0 {
                        self.p |= Z;
                    }
                }
                st::LSR => {
                    self.p &= !(N | Z | C);
                    if self.data & 0x01 != 0 {
                        self.p |= C;
                    }
                    self.data >>= 1;
                    if self.data == 0 {
                        self.p |= Z;
                    }
                }
                st::ROL => {
                    let result = (u32::from(self.data) << 1) | u32::from(self.p & C);
                    self.p &= !(N | Z | C);
                    if result & 0x100 != 0 {
                        self.p |= C;
                    }
                    self.data = result as u8;
                    if self.data & 0x80 != 0 {
                        self.p |= N;
                    }
                    if self.data == 0 {
                        self.p |= Z;
                    }
                }
                st::ROR => {
                    let result = (self.data >> 1) | ((self.p & C) << 7);
                    self.p &= !(N | Z | C);
                    if self.data & 0x01 != 0 {
                        self.p |= C;
                    }
                    self.data = result;
                    if self.data & 0x80 != 0 {
                        self.p |= N;
                    }
                    if self.data == 0 {
                        self.p |= Z;
                    }
                }
                st::BIT => {
                    self.p &= !Z;
                    if self.data & self.a == 0 {
                        self.p |= Z;
                    }
                }
                st::TRB => {
                    self.p &= !Z;
                    if self.data & self.a == 0 {
                        self.p |= Z;
                    }
                    self.data &= !self.a;
                }
                st::TSB => {
                    self.p &= !Z;
                    if self.data & self.a == 0 {
                        self.p |= Z;
                    }
                    self.data |= self.a;
                }

                // === ALU, 16-bit ===
                st::ADC16 => self.alu_adc16(),
                st::SBC16 => self.alu_sbc16(),
                st::CMP16 => self.alu_cmp16(self.a16()),
                st::CMP_X16 => self.alu_cmp16(self.x16()),
                st::CMP_Y16 => self.alu_cmp16(self.y16()),
                st::INC16 => {
                    self.data16 = self.data16.wrapping_add(1);
                    let value = self.data16;
                    self.set_nz16(value);
                }
                st::DEC16 => {
                    self.data16 = self.data16.wrapping_sub(1);
                    let value = self.data16;
                    self.set_nz16(value);
                }
                st::AND16 => {
                    self.data16 &= self.a16();
                    let value = self.data16;
                    self.set_nz16(value);
                }
                st::OR16 => {
                    let result = self.a16() | self.data16;
                    self.a = result as u8;
                    self.ah = (result >> 8) as u8;
                    self.set_nz16(result);
                }
                st::XOR16 => {
                    let result = self.a16() ^ self.data16;
                    self.a = result as u8;
                    self.ah = (result >> 8) as u8;
                    self.set_nz16(result);
                }
                st::ASL16 => {
                    self.p &= !(N | Z | C);
                    if self.data16 & 0x8000 != 0 {
                        self.p |= C;
                    }
                    self.data16 <<= 1;
                    if self.data16 & 0x8000 != 0 {
                        self.p |= N;
                    }
                    if self.data16 == 0 {
                        self.p |= Z;
                    }
                }
                st::LSR16 => {
                    self.p &= !(N | Z | C);
                    if self.data16 & 0x0001 != 0 {
                        self.p |= C;
                    }
                    self.data16 >>= 1;
                    if self.data16 == 0 {
                        self.p |= Z;
                    }
                }
                st::ROL16 => {
                    let result = (u32::from(self.data16) << 1) | u32::from(self.p & C);
                    self.p &= !(N | Z | C);
                    if result & 0x1_0000 != 0 {
                        self.p |= C;
                    }
                    self.data16 = result as u16;
                    if self.data16 & 0x8000 != 0 {
                        self.p |= N;
                    }
                    if self.data16 == 0 {
                        self.p |= Z;
                    }
                }
                st::ROR16 => {
                    let result = (self.data16 >> 1) | (u16::from(self.p & C) << 15);
                    self.p &= !(N | Z | C);
                    if self.data16 & 0x0001 != 0 {
                        self.p |= C;
                    }
                    self.data16 = result;
                    if self.data16 & 0x8000 != 0 {
                        self.p |= N;
                    }
                    if self.data16 == 0 {
                        self.p |= Z;
                    }
                }
                st::BIT16 => {
                    self.p &= !Z;
                    if self.data16 & self.a16() == 0 {
                        self.p |= Z;
                    }
                }
                st::TRB16 => {
                    let acc = self.a16();
                    self.p &= !Z;
                    if self.data16 & acc == 0 {
                        self.p |= Z;
                    }
                    self.data16 &= !acc;
                }
                st::TSB16 => {
                    let acc = self.a16();
                    self.p &= !Z;
                    if self.data16 & acc == 0 {
                        self.p |= Z;
                    }
                    self.data16 |= acc;
                }

                // === Flag ops ===
                st::SEI => self.p |= I,
                st::CLI => self.p &= !I,
                st::SEC => self.p |= C,
                st::CLC => self.p &= !C,
                st::SED => self.p |= D,
                st::CLD => self.p &= !D,
                st::CLV => self.p &= !V,
                st::REP => {
                    if self.out_of_cycles() {
                        break;
                    }
                    if self.emulation {
                        // M and X are off-limits.
                        self.p &= !(self.data & 0xCF);
                    } else {
                        self.p &= !self.data;
                    }
                    self.update_decode_table();
                    self.cycles_left -= 1;
                }
                st::SEP => {
                    if self.out_of_cycles() {
                        break;
                    }
                    if self.emulation {
                        self.p |= self.data & 0xCF;
                    } else {
                        self.p |= self.data;
                    }
                    self.update_decode_table();
                    self.cycles_left -= 1;
                }
                st::XBA => {
                    let t = self.ah;
                    self.ah = self.a;
                    self.a = t;
                    self.set_nz(t);
                }
                st::XCE => {
                    let new_emulation = self.p & C != 0;
                    self.p &= !C;
                    if self.emulation {
                        self.p |= C;
                    }
                    self.p |= M | X;
                    self.emulation = new_emulation;
                    self.update_decode_table();
                }
                st::SET_I_CLEAR_D => {
                    self.p |= I;
                    self.p &= !D;
                }

                // === Branches ===
                st::JS => {
                    if self.branch_on(self.p & N != 0) {
                        break;
                    }
                }
                st::JNS => {
                    if self.branch_on(self.p & N == 0) {
                        break;
                    }
                }
                st::JC => {
                    if self.branch_on(self.p & C != 0) {
                        break;
                    }
                }
                st::JNC => {
                    if self.branch_on(self.p & C == 0) {
                        break;
                    }
                }
                st::JZ => {
                    if self.branch_on(self.p & Z != 0) {
                        break;
                    }
                }
                st::JNZ => {
                    if self.branch_on(self.p & Z == 0) {
                        break;
                    }
                }
                st::JO => {
                    if self.branch_on(self.p & V != 0) {
                        break;
                    }
                }
                st::JNO => {
                    if self.branch_on(self.p & V == 0) {
                        break;
                    }
                }
                st::J => {
                    if self.branch_on(true) {
                        break;
                    }
                }
                st::J16 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.pc = self.pc.wrapping_add(self.data16);
                    self.cycles_left -= 1;
                }
                st::JCC_FALSE_READ => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let _ = self.read_cycle(self.addr);
                }

                // === Vectors ===
                st::NAT_COP_VEC_TO_PC => {
                    self.pc = 0xFFE4;
                    self.k = 0;
                }
                st::EMU_COP_VEC_TO_PC => self.pc = 0xFFF4,
                st::NAT_BRK_VEC_TO_PC => {
                    self.pc = 0xFFE6;
                    self.k = 0;
                }
                st::EMU_BRK_VEC_TO_PC => self.pc = 0xFFFE,

                // === Block moves ===
                st::MOVE_READ => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let src = self.x16();
                    self.data = self.read_cycle(src);
                }
                st::MOVE_WRITE_P => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr = self.y16();
                    self.memory.write(self.addr, self.data);
                    self.cycles_left -= 1;

                    if !self.emulation && self.p & X == 0 {
                        if self.x == 0 {
                            self.xh = self.xh.wrapping_sub(1);
                        }
                        if self.y == 0 {
                            self.yh = self.yh.wrapping_sub(1);
                        }
                    }
                    self.x = self.x.wrapping_sub(1);
                    self.y = self.y.wrapping_sub(1);

                    self.move_repeat();
                }
                st::MOVE_WRITE_N => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.addr = self.y16();
                    self.memory.write(self.addr, self.data);
                    self.cycles_left -= 1;

                    self.x = self.x.wrapping_add(1);
                    self.y = self.y.wrapping_add(1);
                    if !self.emulation && self.p & X == 0 {
                        if self.x == 0 {
                            self.xh = self.xh.wrapping_add(1);
                        }
                        if self.y == 0 {
                            self.yh = self.yh.wrapping_add(1);
                        }
                    }

                    self.move_repeat();
                }
                st::PER => {
                    self.data16 = self.data16.wrapping_add(self.pc);
                }

                // === Stopped states ===
                st::WAIT_FOR_INTERRUPT | st::STOP => {
                    // No interrupt lines on this core: absorb the budget
                    // until reset or a state restore.
                    self.ip -= 1;
                    self.cycles_left = 0;
                    break;
                }

                _ => {
                    debug_assert!(false, "undefined microcode token {state:#04X}");
                }
            }
        }
    }

    // === Helpers ===

    fn out_of_cycles(&mut self) -> bool {
        if self.cycles_left <= 0 {
            self.ip -= 1;
            true
        } else {
            false
        }
    }

    fn a16(&self) -> u16 {
        (u16::from(self.ah) << 8) | u16::from(self.a)
    }

    fn x16(&self) -> u16 {
        (u16::from(self.xh) << 8) | u16::from(self.x)
    }

    fn y16(&self) -> u16 {
        (u16::from(self.yh) << 8) | u16::from(self.y)
    }

    fn read_pc_byte(&mut self) -> u8 {
        let byte = self.memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.cycles_left -= 1;
        byte
    }

    fn read_cycle(&mut self, addr: u16) -> u8 {
        self.cycles_left -= 1;
        self.memory.read(addr)
    }

    fn push_cycle(&mut self, value: u8) {
        let addr = (u16::from(self.sh) << 8) | u16::from(self.s);
        self.memory.write(addr, value);

        let wrapped = self.s == 0;
        self.s = self.s.wrapping_sub(1);
        if wrapped && !self.emulation {
            self.sh = self.sh.wrapping_sub(1);
        }

        self.cycles_left -= 1;
    }

    fn pop_cycle(&mut self) -> u8 {
        self.s = self.s.wrapping_add(1);
        if self.s == 0 && !self.emulation {
            self.sh = self.sh.wrapping_add(1);
        }

        self.cycles_left -= 1;
        self.memory.read((u16::from(self.sh) << 8) | u16::from(self.s))
    }

    fn set_nz(&mut self, value: u8) {
        self.p &= !(N | Z);
        if value & 0x80 != 0 {
            self.p |= N;
        }
        if value == 0 {
            self.p |= Z;
        }
    }

    fn set_nz16(&mut self, value: u16) {
        self.p &= !(N | Z);
        if value & 0x8000 != 0 {
            self.p |= N;
        }
        if value == 0 {
            self.p |= Z;
        }
    }

    fn append_history(&mut self, opcode_bytes: [u8; 3]) {
        let cycle = self.time();
        let entry = HistoryEntry {
            cycle,
            pc: self.insn_pc,
            s: self.s,
            p: self.p,
            a: self.a,
            x: self.x,
            y: self.y,
            opcode: opcode_bytes,
            ah: self.ah,
            xh: self.xh,
            yh: self.yh,
            sh: self.sh,
            b: self.b,
            k: self.k,
            dp: self.dp,
            emulation: self.emulation,
        };

        if let Some(ring) = &mut self.history {
            ring.push(entry);
        }
    }

    /// Conditional branch body; returns true when suspending on a taken
    /// branch with no cycles left for the penalty.
    fn branch_on(&mut self, taken: bool) -> bool {
        if !taken {
            self.ip += 1;
            return false;
        }

        if self.out_of_cycles() {
            return true;
        }

        let _ = self.read_cycle(self.pc);
        let page = self.pc & 0xFF00;
        self.pc = self.pc.wrapping_add((self.data as i8) as u16);
        self.addr = page | (self.pc & 0xFF);
        if self.addr == self.pc {
            self.ip += 1;
        }
        false
    }

    /// Block move repeat: the 16-bit count in A decrements per byte and
    /// the instruction re-executes until it underflows.
    fn move_repeat(&mut self) {
        let a0 = self.a;
        self.a = a0.wrapping_sub(1);
        if a0 != 0 {
            self.pc = self.pc.wrapping_sub(3);
            return;
        }

        let ah0 = self.ah;
        self.ah = ah0.wrapping_sub(1);
        if ah0 != 0 {
            self.pc = self.pc.wrapping_sub(3);
        }
    }

    // === Arithmetic ===

    fn alu_adc(&mut self) {
        if self.p & D != 0 {
            let mut low = u32::from(self.a & 0x0F) + u32::from(self.data & 0x0F)
                + u32::from(self.p & C);
            if low >= 10 {
                low += 6;
            }
            if low >= 0x20 {
                low -= 0x10;
            }

            let high = u32::from(self.a & 0xF0) + u32::from(self.data & 0xF0) + low;

            self.p &= !(C | N | Z | V);
            self.p |= (((high ^ u32::from(self.a)) & !(u32::from(self.data ^ self.a))) >> 1) as u8
                & V;

            if high & 0x80 != 0 {
                self.p |= N;
            }

            let adjusted = if high >= 0xA0 { high + 0x60 } else { high };
            if adjusted >= 0x100 {
                self.p |= C;
            }

            if self.a.wrapping_add(self.data) == 0 {
                self.p |= Z;
            }

            self.a = adjusted as u8;
        } else {
            let carry7 = u32::from(self.a & 0x7F) + u32::from(self.data & 0x7F)
                + u32::from(self.p & C);
            let result = carry7 + u32::from(self.a & 0x80) + u32::from(self.data & 0x80);

            self.p &= !(C | N | Z | V);
            if result & 0x80 != 0 {
                self.p |= N;
            }
            if result >= 0x100 {
                self.p |= C;
            }
            if result & 0xFF == 0 {
                self.p |= Z;
            }
            self.p |= (((result >> 2) ^ (carry7 >> 1)) as u8) & V;

            self.a = result as u8;
        }
    }

    fn alu_sbc(&mut self) {
        let data = self.data ^ 0xFF;
        let carry7 = u32::from(self.a & 0x7F) + u32::from(data & 0x7F) + u32::from(self.p & C);
        let result = carry7 + u32::from(self.a & 0x80) + u32::from(data & 0x80);

        if self.p & D != 0 {
            let mut low = u32::from(self.a & 0x0F) + u32::from(data & 0x0F)
                + u32::from(self.p & C);
            if low < 0x10 {
                low = low.wrapping_sub(6);
            }

            let mut high = u32::from(self.a & 0xF0) + u32::from(data & 0xF0) + (low & 0x1F);
            if high < 0x100 {
                high = high.wrapping_sub(0x60);
            }

            self.p &= !(C | N | Z | V);
            if result & 0x80 != 0 {
                self.p |= N;
            }
            if result >= 0x100 {
                self.p |= C;
            }
            if result & 0xFF == 0 {
                self.p |= Z;
            }
            self.p |= (((result >> 2) ^ (carry7 >> 1)) as u8) & V;

            self.a = high as u8;
        } else {
            self.p &= !(C | N | Z | V);
            if result & 0x80 != 0 {
                self.p |= N;
            }
            if result >= 0x100 {
                self.p |= C;
            }
            if result & 0xFF == 0 {
                self.p |= Z;
            }
            self.p |= (((result >> 2) ^ (carry7 >> 1)) as u8) & V;

            self.a = result as u8;
        }
    }

    fn alu_cmp(&mut self, reg: u8) {
        let result = u32::from(reg) + u32::from(self.data ^ 0xFF) + 1;

        self.p &= !(C | N | Z);
        if result & 0x80 != 0 {
            self.p |= N;
        }
        if result >= 0x100 {
            self.p |= C;
        }
        if result & 0xFF == 0 {
            self.p |= Z;
        }
    }

    fn alu_adc16(&mut self) {
        let acc = u32::from(self.a16());
        let data = u32::from(self.data16);

        if self.p & D != 0 {
            // Four-nibble decimal correction.
            let mut low = (acc & 0x0F) + (data & 0x0F) + u32::from(self.p & C);
            if low >= 10 {
                low += 6;
            }

            let mut mid = (acc & 0xF0) + (data & 0xF0) + low;
            if mid >= 0xA0 {
                mid += 0x60;
            }

            let mut mid_hi = (acc & 0xF00) + (data & 0xF00) + mid;
            if mid_hi >= 0xA00 {
                mid_hi += 0x600;
            }

            let mut high = (acc & 0xF000) + (data & 0xF000) + mid_hi;
            if high >= 0xA000 {
                high += 0x6000;
            }

            self.p &= !(C | N | Z | V);
            if high >= 0x10000 {
                self.p |= C;
            }
            if high & 0xFFFF == 0 {
                self.p |= Z;
            }
            if high & 0x8000 != 0 {
                self.p |= N;
            }

            self.a = high as u8;
            self.ah = (high >> 8) as u8;
        } else {
            let carry15 = (acc & 0x7FFF) + (data & 0x7FFF) + u32::from(self.p & C);
            let result = carry15 + (acc & 0x8000) + (data & 0x8000);

            self.p &= !(C | N | Z | V);
            if result & 0x8000 != 0 {
                self.p |= N;
            }
            if result >= 0x10000 {
                self.p |= C;
            }
            if result & 0xFFFF == 0 {
                self.p |= Z;
            }
            self.p |= (((result >> 10) ^ (carry15 >> 9)) as u8) & V;

            self.a = result as u8;
            self.ah = (result >> 8) as u8;
        }
    }

    fn alu_sbc16(&mut self) {
        let acc = u32::from(self.a16());
        let data = u32::from(self.data16) ^ 0xFFFF;

        if self.p & D != 0 {
            let mut low = (acc & 0x0F) + (data & 0x0F) + u32::from(self.p & C);
            if low < 0x10 {
                low = low.wrapping_sub(6);
            }

            let mut mid = (acc & 0xF0) + (data & 0xF0) + (low & 0x1F);
            if mid < 0x100 {
                mid = mid.wrapping_sub(0x60);
            }

            let mut mid_hi = (acc & 0xF00) + (data & 0xF00) + (mid & 0x1FF);
            if mid_hi < 0x1000 {
                mid_hi = mid_hi.wrapping_sub(0x600);
            }

            let mut high = (acc & 0xF000) + (data & 0xF000) + (mid_hi & 0x1FFF);
            if high < 0x10000 {
                high = high.wrapping_sub(0x6000);
            }

            self.p &= !(C | N | Z | V);
            if high & 0x8000 != 0 {
                self.p |= N;
            }
            if high >= 0x10000 {
                self.p |= C;
            }
            if high & 0xFFFF == 0 {
                self.p |= Z;
            }

            self.a = high as u8;
            self.ah = (high >> 8) as u8;
        } else {
            let carry15 = (acc & 0x7FFF) + (data & 0x7FFF) + u32::from(self.p & C);
            let result = carry15 + (acc & 0x8000) + (data & 0x8000);

            self.p &= !(C | N | Z | V);
            if result & 0x8000 != 0 {
                self.p |= N;
            }
            if result >= 0x10000 {
                self.p |= C;
            }
            if result & 0xFFFF == 0 {
                self.p |= Z;
            }
            self.p |= (((result >> 10) ^ (carry15 >> 9)) as u8) & V;

            self.a = result as u8;
            self.ah = (result >> 8) as u8;
        }
    }

    fn alu_cmp16(&mut self, reg: u16) {
        let result = u32::from(reg) + (u32::from(self.data16) ^ 0xFFFF) + 1;

        self.p &= !(C | N | Z);
        if result & 0x8000 != 0 {
            self.p |= N;
        }
        if result >= 0x10000 {
            self.p |= C;
        }
        if result & 0xFFFF == 0 {
            self.p |= Z;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_enters_emulation_mode() {
        let mut cpu = Coproc65802::new();
        cpu.memory_mut().map_ram(0x00, 16);
        cpu.memory_mut().map_ram(0xFF, 1);
        cpu.memory_mut().write(0xFFFC, 0x00);
        cpu.memory_mut().write(0xFFFD, 0x02);
        cpu.cold_reset();

        let regs = cpu.registers();
        assert!(regs.emulation);
        assert_eq!(regs.pc, 0x0200);
        assert_eq!(regs.sh, 0x01);
        assert_eq!(regs.p & 0x30, 0x30);
    }

    #[test]
    fn exec_state_round_trip_is_stable() {
        let mut cpu = Coproc65802::new();
        cpu.memory_mut().map_ram(0x00, 16);

        let state = cpu.get_exec_state();
        cpu.set_exec_state(&state);
        assert_eq!(cpu.get_exec_state(), state);
    }
}
