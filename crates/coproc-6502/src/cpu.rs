//! The 6502/65C02 coprocessor: register file, run loop, and trace
//! compilation.
//!
//! The owner credits cycles with [`Coproc6502::add_cycles`] and calls
//! [`Coproc6502::run`]; the run loop executes microcode tokens until the
//! budget is spent, persisting the microcode index so execution resumes
//! mid-instruction exactly where it paused. A breakpoint handler can stop
//! the loop early at an instruction boundary, leaving the remaining
//! budget intact.

use coproc_core::{
    BreakpointHandler, ExecState, HistoryEntry, HistoryRing, MemoryMap, StateTransfer,
    TRACE_PAGE_OFF, TRACE_PAGE_READY,
};
use log::{debug, trace};

use crate::decoder::{DecoderTables, ENTRY_BREAK, ENTRY_NO_BREAK};
use crate::flags::{B, C, D, I, N, U, V, Z};
use crate::states as st;
use crate::trace::{TraceCache, TRACE_ALIGN, TRACE_SPACE};

/// Which part is being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuKind {
    /// NMOS 6502, including the undocumented opcode set.
    Nmos6502,
    /// WDC 65C02 (fixed indirect jump, extra opcodes, clean NOPs).
    Wdc65C02,
}

/// Register snapshot for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
    pub pc: u16,
}

struct BreakpointSet {
    map: Box<[bool; 65536]>,
    handler: Box<dyn BreakpointHandler>,
}

/// One emulated CPU core instance.
///
/// Single-threaded and non-reentrant: memory adapters invoked through the
/// dispatch layer must not call back into the same instance.
pub struct Coproc6502 {
    // Register file.
    a: u8,
    x: u8,
    y: u8,
    s: u8,
    p: u8,
    pc: u16,

    // Interpreter latches.
    insn_pc: u16,
    opcode: u8,
    addr: u16,
    addr2: u16,
    data: u8,
    rel: u8,

    /// Next microcode token to execute; bit 31 selects the trace arena.
    ip: u32,

    cycles_left: i32,
    cycles_base: u32,

    kind: CpuKind,
    tables: DecoderTables,
    memory: MemoryMap,
    trace_cache: Option<TraceCache>,
    history: Option<HistoryRing>,
    history_change_pending: bool,
    breakpoints: Option<BreakpointSet>,
}

impl Coproc6502 {
    /// Open-bus fill value seen on unmapped reads.
    pub const OPEN_BUS: u8 = 0xFF;

    /// Create a core. The trace cache is only available for the NMOS
    /// part; the 65C02 configuration always runs the standalone decoder.
    #[must_use]
    pub fn new(kind: CpuKind, enable_trace_cache: bool) -> Self {
        let trace_cache = if kind == CpuKind::Nmos6502 && enable_trace_cache {
            Some(TraceCache::new())
        } else {
            None
        };

        let tables = DecoderTables::build(kind, false, false, trace_cache.is_some());

        Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0xFF,
            p: 0x30,
            pc: 0,
            insn_pc: 0,
            opcode: 0,
            addr: 0,
            addr2: 0,
            data: 0,
            rel: 0,
            ip: ENTRY_NO_BREAK,
            cycles_left: 0,
            cycles_base: 0,
            kind,
            tables,
            memory: MemoryMap::new(Self::OPEN_BUS),
            trace_cache,
            history: None,
            history_change_pending: false,
            breakpoints: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> CpuKind {
        self.kind
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
            x: self.x,
            y: self.y,
            s: self.s,
            p: self.p,
            pc: self.pc,
        }
    }

    #[must_use]
    pub fn insn_pc(&self) -> u16 {
        self.insn_pc
    }

    // === Cycle accounting ===

    /// Credit cycles for the next run call.
    pub fn add_cycles(&mut self, cycles: i32) {
        self.cycles_base = self.cycles_base.wrapping_add(cycles as u32);
        self.cycles_left += cycles;
    }

    #[must_use]
    pub fn cycles_left(&self) -> i32 {
        self.cycles_left
    }

    /// Elapsed cycle counter (monotonic across run calls).
    #[must_use]
    pub fn time(&self) -> u32 {
        self.cycles_base.wrapping_sub(self.cycles_left as u32)
    }

    // === Reset ===

    pub fn cold_reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.s = 0xFF;
        self.p = 0x30;
        self.pc = 0;

        self.warm_reset();
    }

    /// Reload PC from the reset vector; clears D, keeps the rest.
    pub fn warm_reset(&mut self) {
        let lo = self.memory.read(0xFFFC);
        let hi = self.memory.read(0xFFFD);
        self.pc = u16::from(lo) | (u16::from(hi) << 8);
        self.insn_pc = self.pc;

        self.p &= !D;
        self.p |= B | U;

        self.ip = self.entry_ip();

        if self.history_change_pending {
            self.regenerate_tables();
        }
    }

    /// Redirect execution to `addr` at a fresh instruction boundary.
    pub fn jump(&mut self, addr: u16) {
        self.pc = addr;
        self.insn_pc = addr;
        self.ip = ENTRY_NO_BREAK;
    }

    // === Execution state capture ===

    #[must_use]
    pub fn get_exec_state(&self) -> ExecState {
        let at_boundary = matches!(
            self.code_at(self.ip),
            st::READ_OPCODE
                | st::READ_OPCODE_NO_BREAK
                | st::REGENERATE_TABLES
                | st::TRACE_START_INSN
                | st::TRACE_START_INSN_HISTORY
        );

        ExecState {
            // Parked at a fetch token, PC names the next instruction;
            // mid-instruction it names the one in flight.
            pc: if at_boundary { self.pc } else { self.insn_pc },
            a: self.a,
            x: self.x,
            y: self.y,
            s: self.s,
            p: self.p,
            emulation: true,
            at_insn_boundary: at_boundary,
            ..ExecState::default()
        }
    }

    /// Restore register state. A PC change re-enters at an instruction
    /// boundary rather than resuming a stale mid-instruction microprogram.
    pub fn set_exec_state(&mut self, state: &ExecState) {
        if self.insn_pc != state.pc {
            self.jump(state.pc);
        }

        self.a = state.a;
        self.x = state.x;
        self.y = state.y;
        self.s = state.s;
        self.p = state.p | B | U;
    }

    /// Round-trip every visible register through a key/value transfer.
    /// Loaders feed pre-validated values back through the same submode and
    /// PC-discontinuity handling as [`Self::set_exec_state`].
    pub fn exchange_state(&mut self, io: &mut dyn StateTransfer) {
        let mut state = self.get_exec_state();

        io.transfer_u16("pc", &mut state.pc);
        io.transfer_u8("a", &mut state.a);
        io.transfer_u8("x", &mut state.x);
        io.transfer_u8("y", &mut state.y);
        io.transfer_u8("s", &mut state.s);
        io.transfer_u8("p", &mut state.p);

        self.set_exec_state(&state);
    }

    // === History ===

    /// Attach a caller-allocated history ring; every retired instruction
    /// appends an entry. Toggling history regenerates the decode tables
    /// (the token shapes differ) and flushes the trace cache.
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
        self.exit_trace();
        self.clear_trace_cache();
    }

    // === Breakpoints ===

    /// Install a caller-built breakpoint table and stop-request handler.
    pub fn set_breakpoints(
        &mut self,
        map: Box<[bool; 65536]>,
        handler: Box<dyn BreakpointHandler>,
    ) {
        let was_on = self.breakpoints.is_some();
        self.breakpoints = Some(BreakpointSet { map, handler });

        if !was_on {
            // Compiled traces skipped fetch checks; drop them.
            self.exit_trace();
            self.clear_trace_cache();
            self.tables.set_breakpoint_fetch(true);
        }
    }

    /// Remove breakpoint support, returning to unchecked fetches.
    pub fn clear_breakpoints(&mut self) {
        if self.breakpoints.take().is_some() {
            self.tables.set_breakpoint_fetch(false);
            if self.ip == ENTRY_BREAK {
                self.ip = ENTRY_NO_BREAK;
            }
        }
    }

    /// Edit the installed breakpoint table in place. Call
    /// [`Self::on_breakpoints_changed`] afterwards so compiled traces
    /// covering the address are invalidated.
    pub fn breakpoint_map_mut(&mut self) -> Option<&mut [bool; 65536]> {
        self.breakpoints.as_mut().map(|bps| &mut *bps.map)
    }

    /// React to breakpoint table edits. With a specific address, the
    /// trace cache survives unless that instruction was actually
    /// compiled; with `None` it is always flushed.
    pub fn on_breakpoints_changed(&mut self, pc: Option<u16>) {
        if self.breakpoints.is_none() || self.trace_cache.is_none() {
            return;
        }

        if let Some(pc) = pc {
            let seg = self.memory.trace_page((pc >> 8) as u8);
            if seg <= TRACE_PAGE_READY {
                return;
            }

            // Traces record offsets for every instruction they cover, so
            // a zero entry proves the address was never compiled.
            let compiled = self
                .trace_cache
                .as_ref()
                .is_some_and(|tc| tc.segment(seg).offsets[usize::from(pc & 0xFF)] != 0);
            if !compiled {
                return;
            }
        }

        self.exit_trace();
        self.clear_trace_cache();
    }

    // === Trace cache control ===

    /// Drop every compiled trace (e.g. after bulk memory surgery done
    /// behind the dispatch layer's back).
    pub fn invalidate_trace_cache(&mut self) {
        self.exit_trace();
        self.clear_trace_cache();
    }

    // === Run loop ===

    /// Execute until the cycle budget is exhausted or a breakpoint
    /// handler requests a stop at an instruction boundary.
    ///
    /// Tokens that don't touch the bus are free: they always run to
    /// completion, so execution only ever parks at a cycle-consuming
    /// token. Resuming re-executes that token's bus cycle first.
    pub fn run(&mut self) {
        if self.cycles_left <= 0 {
            return;
        }

        loop {
            let state = self.next_token();

            match state {
                st::NOP => {}

                st::READ_OPCODE => {
                    if self.out_of_cycles() {
                        break;
                    }

                    self.insn_pc = self.pc;

                    if let Some(bps) = &mut self.breakpoints {
                        if bps.map[usize::from(self.pc)]
                            && bps.handler.check_breakpoint(self.pc)
                        {
                            // Stop before any side effect; re-enter past
                            // the check so we don't trip it again.
                            self.ip = ENTRY_NO_BREAK;
                            return;
                        }
                    }

                    self.fetch_opcode();
                }

                st::READ_OPCODE_NO_BREAK => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.insn_pc = self.pc;
                    self.fetch_opcode();
                }

                st::ADD_TO_HISTORY => self.append_history([
                    self.opcode,
                    self.memory.debug_read(self.pc),
                    self.memory.debug_read(self.pc.wrapping_add(1)),
                ]),

                st::REGENERATE_TABLES => {
                    self.regenerate_tables();
                    self.ip = self.entry_ip();
                }

                st::BREAK_ON_UNSUPPORTED => {
                    // JAM: wedge at this instruction and absorb the budget.
                    self.pc = self.insn_pc;
                    self.ip = self.ip.wrapping_sub(1);
                    self.cycles_left = 0;
                    break;
                }

                // === Operand fetch ===
                st::READ_IMM => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_pc_byte();
                }
                st::READ_ADDR_L => {
                    if self.out_of_cycles() {
                        break;
                    }
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
                    self.addr = self.addr.wrapping_add(u16::from(hi) << 8);
                    self.addr2 =
                        (self.addr & 0xFF00) | (self.addr.wrapping_add(u16::from(self.x)) & 0xFF);
                    self.addr = self.addr.wrapping_add(u16::from(self.x));
                }
                st::READ_ADDR_HY => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_pc_byte();
                    self.addr = self.addr.wrapping_add(u16::from(hi) << 8);
                    self.addr2 =
                        (self.addr & 0xFF00) | (self.addr.wrapping_add(u16::from(self.y)) & 0xFF);
                    self.addr = self.addr.wrapping_add(u16::from(self.y));
                }
                st::READ_ADDR_HX_SHY => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_pc_byte();
                    self.data = self.y & hi.wrapping_add(1);
                    self.set_nz(self.data);
                    self.addr = self
                        .addr
                        .wrapping_add(u16::from(hi) << 8)
                        .wrapping_add(u16::from(self.x));
                }
                st::READ_ADDR_HY_SHA => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_pc_byte();
                    self.data = self.a & self.x & hi.wrapping_add(1);
                    self.addr = self
                        .addr
                        .wrapping_add(u16::from(hi) << 8)
                        .wrapping_add(u16::from(self.y));
                }
                st::READ_ADDR_HY_SHX => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_pc_byte();
                    self.data = self.x & hi.wrapping_add(1);
                    self.addr = self
                        .addr
                        .wrapping_add(u16::from(hi) << 8)
                        .wrapping_add(u16::from(self.y));
                }

                // === Data cycles ===
                st::READ => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr);
                }
                st::READ_ADD_X => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr);
                    self.addr = u16::from((self.addr as u8).wrapping_add(self.x));
                }
                st::READ_ADD_Y => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr);
                    self.addr = u16::from((self.addr as u8).wrapping_add(self.y));
                }
                st::READ_CARRY => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr2);
                    if self.addr == self.addr2 {
                        // No page crossing: the re-read cycle is skipped.
                        self.ip = self.ip.wrapping_add(1);
                    }
                }
                st::READ_CARRY_FORCED => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.read_cycle(self.addr2);
                }
                st::READ_ABS_IND_ADDR => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(self.addr.wrapping_add(1));
                    self.addr = u16::from(self.data) | (u16::from(hi) << 8);
                }
                st::READ_ABS_IND_ADDR_BROKEN => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi_addr = (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0xFF);
                    let hi = self.read_cycle(hi_addr);
                    self.addr = u16::from(self.data) | (u16::from(hi) << 8);
                }
                st::READ_IND_ADDR => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(u16::from((self.addr as u8).wrapping_add(1)));
                    self.addr = u16::from(self.data) | (u16::from(hi) << 8);
                }
                st::READ_IND_Y_ADDR => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(u16::from((self.addr as u8).wrapping_add(1)));
                    self.addr = u16::from(self.data) | (u16::from(hi) << 8);
                    self.addr2 =
                        (self.addr & 0xFF00) | (self.addr.wrapping_add(u16::from(self.y)) & 0xFF);
                    self.addr = self.addr.wrapping_add(u16::from(self.y));
                }
                st::READ_IND_Y_ADDR_SHA => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let hi = self.read_cycle(u16::from((self.addr as u8).wrapping_add(1)));
                    let base = u16::from(self.data) | (u16::from(hi) << 8);
                    self.data = self.a & self.x & hi.wrapping_add(1);
                    self.addr = base.wrapping_add(u16::from(self.y));
                }
                st::WRITE => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.memory.write(self.addr, self.data);
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
                st::ZERO_TO_D => self.data = 0,
                st::D_TO_A => self.a = self.data,
                st::D_TO_X => self.x = self.data,
                st::D_TO_Y => self.y = self.data,
                st::D_TO_S => self.s = self.data,
                st::D_TO_P => self.p = self.data | B | U,
                st::D_SET_SZ => self.set_nz(self.data),
                st::D_SET_SV => {
                    self.p = (self.p & !(N | V)) | (self.data & 0xC0);
                }
                st::ADDR_TO_PC => self.pc = self.addr,
                st::IRQ_VEC_TO_PC => self.pc = 0xFFFE,

                // === Stack ===
                st::PUSH => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.data);
                }
                st::PUSH_PCH => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle((self.pc >> 8) as u8);
                }
                st::PUSH_PCL => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.pc as u8);
                }
                st::PUSH_PCH_M1 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle((self.pc.wrapping_sub(1) >> 8) as u8);
                }
                st::PUSH_PCL_M1 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.push_cycle(self.pc.wrapping_sub(1) as u8);
                }
                st::POP => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.data = self.pop_cycle();
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

                // === ALU ===
                st::ADC => self.alu_adc(),
                st::SBC => self.alu_sbc(),
                st::CMP => self.alu_cmp(self.a),
                st::CMP_X => self.alu_cmp(self.x),
                st::CMP_Y => self.alu_cmp(self.y),
                st::INC => {
                    self.data = self.data.wrapping_add(1);
                    self.set_nz(self.data);
                }
                st::DEC => {
                    self.data = self.data.wrapping_sub(1);
                    self.set_nz(self.data);
                }
                st::INC_X_WAIT => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.x = self.x.wrapping_add(1);
                    self.set_nz(self.x);
                    self.cycles_left -= 1;
                }
                st::DEC_X_WAIT => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.x = self.x.wrapping_sub(1);
                    self.set_nz(self.x);
                    self.cycles_left -= 1;
                }
                st::AND => {
                    self.data &= self.a;
                    self.set_nz(self.data);
                }
                st::AND_SAX => self.data = self.a & self.x,
                st::ANC => {
                    self.data &= self.a;
                    self.p &= !(N | Z | C);
                    if self.data & 0x80 != 0 {
                        self.p |= N | C;
                    }
                    if self.data == 0 {
                        self.p |= Z;
                    }
                }
                st::XAA => {
                    self.a &= self.data & self.x;
                    self.set_nz(self.a);
                }
                st::LAS => {
                    self.data &= self.s;
                    self.a = self.data;
                    self.x = self.data;
                    self.s = self.data;
                    self.set_nz(self.data);
                }
                st::SBX => {
                    let t = u32::from(self.a & self.x) + u32::from(self.data ^ 0xFF) + 1;
                    self.p &= !(N | Z | C);
                    if t >= 0x100 {
                        self.p |= C;
                    }
                    self.x = t as u8;
                    if self.x & 0x80 != 0 {
                        self.p |= N;
                    }
                    if self.x == 0 {
                        self.p |= Z;
                    }
                }
                st::ARR => self.alu_arr(),
                st::XAS => self.s = self.a & self.x,
                st::OR => {
                    self.a |= self.data;
                    self.set_nz(self.a);
                }
                st::XOR => {
                    self.a ^= self.data;
                    self.set_nz(self.a);
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

                // === Flag ops ===
                st::SEI => self.p |= I,
                st::CLI => self.p &= !I,
                st::SEC => self.p |= C,
                st::CLC => self.p &= !C,
                st::SED => self.p |= D,
                st::CLD => self.p &= !D,
                st::CLV => self.p &= !V,

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
                st::JCC_FALSE_READ => {
                    if self.out_of_cycles() {
                        break;
                    }
                    let _ = self.read_cycle(self.addr);
                }

                // === 65C02 ===
                st::RESET_BIT => {
                    self.data &= !(1 << ((self.opcode >> 4) & 7));
                }
                st::SET_BIT => {
                    self.data |= 1 << ((self.opcode >> 4) & 7);
                }
                st::READ_REL => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.rel = self.read_pc_byte();
                }
                st::J0 => {
                    let bit = 1 << ((self.opcode >> 4) & 7);
                    if self.branch_rel_on(self.data & bit == 0) {
                        break;
                    }
                }
                st::J1 => {
                    let bit = 1 << ((self.opcode >> 4) & 7);
                    if self.branch_rel_on(self.data & bit != 0) {
                        break;
                    }
                }
                st::J => {
                    if self.branch_on(true) {
                        break;
                    }
                }
                st::WAIT_FOR_INTERRUPT | st::STOP => {
                    // No interrupt lines on this core: absorb the budget
                    // at the boundary until reset or a state restore.
                    self.ip = self.ip.wrapping_sub(1);
                    self.cycles_left = 0;
                    break;
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
                st::C02_ADC => self.alu_adc_c02(),
                st::C02_SBC => self.alu_sbc_c02(),

                // === Trace tokens ===
                st::TRACE_BRIDGE => {
                    let offset = self.ip & !TRACE_SPACE;
                    self.ip = TRACE_SPACE | ((offset + TRACE_ALIGN - 1) & !(TRACE_ALIGN - 1));
                }
                st::TRACE_PC => self.trace_probe(),
                st::TRACE_ADDR_TO_PC => {
                    self.pc = self.addr;
                    self.trace_probe();
                }
                st::TRACE_START_INSN | st::TRACE_START_INSN_HISTORY => {
                    if self.out_of_cycles() {
                        break;
                    }

                    if self.memory.take_invalidation_latch() {
                        // A write hit a compiled page; bail to standalone
                        // dispatch before this instruction issues.
                        self.ip = self.entry_ip();
                        self.clear_trace_cache();
                        continue;
                    }

                    let len = self.next_token();
                    let lo = self.next_token();
                    let hi = self.next_token();
                    let data = self.next_token();
                    let op0 = self.next_token();

                    self.insn_pc = self.pc;
                    self.opcode = op0;
                    self.addr = u16::from(lo) | (u16::from(hi) << 8);
                    self.data = data;
                    self.pc = self.pc.wrapping_add(1 + u16::from(len));
                    self.cycles_left -= 1;

                    if state == st::TRACE_START_INSN_HISTORY {
                        let op1 = self.next_token();
                        let op2 = self.next_token();
                        self.append_history([op0, op1, op2]);
                    }
                }
                st::TRACE_CONT_INSN_2 | st::TRACE_CONT_INSN_1 => {
                    if self.out_of_cycles() {
                        break;
                    }
                    self.cycles_left -= 1;
                }
                st::TRACE_ADDR_ADD_X => {
                    self.addr2 =
                        (self.addr & 0xFF00) | (self.addr.wrapping_add(u16::from(self.x)) & 0xFF);
                    self.addr = self.addr.wrapping_add(u16::from(self.x));
                }
                st::TRACE_ADDR_ADD_Y => {
                    self.addr2 =
                        (self.addr & 0xFF00) | (self.addr.wrapping_add(u16::from(self.y)) & 0xFF);
                    self.addr = self.addr.wrapping_add(u16::from(self.y));
                }
                st::TRACE_ADDR_HX_SHY => {
                    let hi = (self.addr >> 8) as u8;
                    self.data = self.y & hi.wrapping_add(1);
                    self.set_nz(self.data);
                    self.addr = self.addr.wrapping_add(u16::from(self.x));
                }
                st::TRACE_ADDR_HY_SHA => {
                    let hi = (self.addr >> 8) as u8;
                    self.data = self.a & self.x & hi.wrapping_add(1);
                    self.addr = self.addr.wrapping_add(u16::from(self.y));
                }
                st::TRACE_ADDR_HY_SHX => {
                    let hi = (self.addr >> 8) as u8;
                    self.data = self.x & hi.wrapping_add(1);
                    self.addr = self.addr.wrapping_add(u16::from(self.y));
                }
                st::TRACE_FAST_JCC => {
                    let token_pos = self.ip.wrapping_sub(1);
                    let xor = self.next_token();
                    let and = self.next_token();
                    let skip = self.next_token();

                    if (self.p ^ xor) & and == 0 {
                        // Not taken: resume at the next traced instruction.
                        self.ip = token_pos.wrapping_add(1 + u32::from(skip));
                    }
                }
                st::TRACE_UJUMP => {
                    let field = self.ip & !TRACE_SPACE;
                    let bytes = [
                        self.next_token(),
                        self.next_token(),
                        self.next_token(),
                        self.next_token(),
                    ];
                    let rel = i32::from_le_bytes(bytes);
                    self.ip = TRACE_SPACE | field.wrapping_add(rel as u32);
                }

                _ => {
                    debug_assert!(false, "undefined microcode token {state:#04X}");
                }
            }
        }
    }

    // === Token plumbing ===

    fn entry_ip(&self) -> u32 {
        if self.breakpoints.is_some() {
            ENTRY_BREAK
        } else {
            ENTRY_NO_BREAK
        }
    }

    fn code_at(&self, ip: u32) -> u8 {
        if ip & TRACE_SPACE == 0 {
            self.tables.heap[ip as usize]
        } else if let Some(tc) = &self.trace_cache {
            tc.code_at(ip & !TRACE_SPACE)
        } else {
            debug_assert!(false, "trace-space index without a trace cache");
            st::NOP
        }
    }

    fn next_token(&mut self) -> u8 {
        let ip = self.ip;
        self.ip = ip.wrapping_add(1);
        self.code_at(ip)
    }

    /// Budget check for cycle-consuming tokens: when spent, un-read the
    /// token so the next run resumes exactly here.
    fn out_of_cycles(&mut self) -> bool {
        if self.cycles_left <= 0 {
            self.ip = self.ip.wrapping_sub(1);
            true
        } else {
            false
        }
    }

    fn fetch_opcode(&mut self) {
        self.opcode = self.memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.cycles_left -= 1;
        self.ip = u32::from(self.tables.insn_ptrs[usize::from(self.opcode)]);
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
        self.memory.write(0x0100 | u16::from(self.s), value);
        self.s = self.s.wrapping_sub(1);
        self.cycles_left -= 1;
    }

    fn pop_cycle(&mut self) -> u8 {
        self.s = self.s.wrapping_add(1);
        self.cycles_left -= 1;
        self.memory.read(0x0100 | u16::from(self.s))
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

    fn append_history(&mut self, opcode_bytes: [u8; 3]) {
        let cycle = self.time();
        if let Some(ring) = &mut self.history {
            ring.push(HistoryEntry {
                cycle,
                pc: self.insn_pc,
                s: self.s,
                p: self.p,
                a: self.a,
                x: self.x,
                y: self.y,
                opcode: opcode_bytes,
                emulation: true,
                ..HistoryEntry::default()
            });
        }
    }

    /// Conditional branch body. Returns true if the run must suspend
    /// (taken branch with no cycles left to pay for it).
    fn branch_on(&mut self, taken: bool) -> bool {
        if !taken {
            // Skip the false-read token; no extra cycle.
            self.ip = self.ip.wrapping_add(1);
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
            // Same page: the false read is skipped too.
            self.ip = self.ip.wrapping_add(1);
        }
        false
    }

    fn branch_rel_on(&mut self, taken: bool) -> bool {
        let displacement = self.rel;
        if !taken {
            self.ip = self.ip.wrapping_add(1);
            return false;
        }

        if self.out_of_cycles() {
            return true;
        }

        let _ = self.read_cycle(self.pc);
        let page = self.pc & 0xFF00;
        self.pc = self.pc.wrapping_add((displacement as i8) as u16);
        self.addr = page | (self.pc & 0xFF);
        if self.addr == self.pc {
            self.ip = self.ip.wrapping_add(1);
        }
        false
    }

    fn regenerate_tables(&mut self) {
        self.history_change_pending = false;
        self.tables = DecoderTables::build(
            self.kind,
            self.history.is_some(),
            self.breakpoints.is_some(),
            self.trace_cache.is_some(),
        );
    }

    // === Arithmetic with the NMOS quirks ===

    fn alu_adc(&mut self) {
        if self.p & D != 0 {
            // BCD with per-nibble correction; N/V track the intermediate
            // sums exactly as the adder does.
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
            // Flags come from the binary difference; only A gets the BCD
            // correction.
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

    fn alu_arr(&mut self) {
        let carry_in = self.p & C;
        let decimal = self.p & D != 0;
        let t = self.a & self.data;
        let mut result = (t >> 1) | (carry_in << 7);

        self.p &= !(N | Z | C | V);
        if result & 0x80 != 0 {
            self.p |= N;
        }
        if result == 0 {
            self.p |= Z;
        }

        if decimal {
            self.p |= (result ^ t) & V;

            if (t & 0x0F) + (t & 0x01) > 5 {
                result = (result & 0xF0) | (result.wrapping_add(6) & 0x0F);
            }
            if u32::from(t & 0xF0) + u32::from(t & 0x10) > 0x50 {
                result = result.wrapping_add(0x60);
                self.p |= C;
            }
        } else {
            if t & 0x80 != 0 {
                self.p |= C;
            }
            self.p |= (((t >> 7) ^ (t >> 6)) & 1) << 6;
        }

        self.a = result;
    }

    fn alu_adc_c02(&mut self) {
        if self.p & D != 0 {
            let mut low = u32::from(self.a & 0x0F) + u32::from(self.data & 0x0F)
                + u32::from(self.p & C);
            if low >= 10 {
                low += 6;
            }
            if low >= 0x20 {
                low -= 0x10;
            }

            let mut high = u32::from(self.a & 0xF0) + u32::from(self.data & 0xF0) + low;

            self.p &= !(C | N | Z | V);
            self.p |= (((high ^ u32::from(self.a)) & !(u32::from(self.data ^ self.a))) >> 1) as u8
                & V;

            if high >= 0xA0 {
                high += 0x60;
            }
            if high >= 0x100 {
                self.p |= C;
            }

            let result = high as u8;
            if result == 0 {
                self.p |= Z;
            }
            if result & 0x80 != 0 {
                self.p |= N;
            }

            self.a = result;
        } else {
            self.alu_adc_binary_skip_wait();
        }
    }

    fn alu_sbc_c02(&mut self) {
        if self.p & D != 0 {
            let data = self.data ^ 0xFF;
            let carry7 = u32::from(self.a & 0x7F) + u32::from(data & 0x7F) + u32::from(self.p & C);
            let result = carry7 + u32::from(self.a & 0x80) + u32::from(data & 0x80);

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

            let corrected = high as u8;
            if corrected & 0x80 != 0 {
                self.p |= N;
            }
            if result >= 0x100 {
                self.p |= C;
            }
            if corrected == 0 {
                self.p |= Z;
            }
            self.p |= (((result >> 2) ^ (carry7 >> 1)) as u8) & V;

            self.a = corrected;
        } else {
            self.data ^= 0xFF;
            self.alu_adc_binary_skip_wait();
        }
    }

    /// Shared binary path for the 65C02 ADC/SBC: no decimal fixup, and
    /// the trailing decimal-penalty cycle is skipped.
    fn alu_adc_binary_skip_wait(&mut self) {
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
        self.ip = self.ip.wrapping_add(1);
    }

    // === Trace cache ===

    /// Probe for a resident trace at the current PC, compiling one on the
    /// spot if the page is traceable. Consumes no cycles.
    fn trace_probe(&mut self) {
        if self.trace_cache.is_none() {
            return;
        }

        if self.memory.take_invalidation_latch() {
            if self.ip & TRACE_SPACE != 0 {
                self.ip = self.entry_ip();
            }
            self.clear_trace_cache();
        }

        let page_state = self.memory.trace_page((self.pc >> 8) as u8);
        if page_state == TRACE_PAGE_OFF {
            return;
        }

        let mut offset = 0;
        if page_state > TRACE_PAGE_READY {
            offset = self
                .trace_cache
                .as_ref()
                .map_or(0, |tc| tc.segment(page_state).offsets[usize::from(self.pc & 0xFF)]);
        }

        if offset == 0 {
            offset = self.create_trace();
        }

        if offset != 0 {
            self.ip = TRACE_SPACE | (offset - 1);
        }
    }

    /// Map a suspended trace-space index back to the decode heap so the
    /// cache can be dropped. At an instruction boundary this is a plain
    /// re-entry; mid-instruction the exception data supplies the PC
    /// rollback and the resume offset into the current microprogram.
    fn exit_trace(&mut self) {
        if self.ip & TRACE_SPACE == 0 {
            return;
        }

        let Some(tc) = &self.trace_cache else {
            self.ip = self.entry_ip();
            return;
        };

        let exdata = tc.exdata_at(self.ip & !TRACE_SPACE);
        trace!(
            "exiting trace: pc={:04X} [{:04X}], opcode={:02X}, exception data={:02X}",
            self.insn_pc,
            self.pc,
            self.opcode,
            exdata
        );

        if exdata == 0xFF {
            self.ip = self.entry_ip();
        } else {
            self.pc = self.pc.wrapping_sub(u16::from(exdata >> 4));
            self.ip = u32::from(self.tables.insn_ptrs[usize::from(self.opcode)])
                + u32::from(exdata & 0x0F);
        }
    }

    fn clear_trace_cache(&mut self) {
        debug_assert!(self.ip & TRACE_SPACE == 0, "flushing while inside a trace");

        let Some(tc) = &mut self.trace_cache else {
            return;
        };

        if tc.clear() {
            debug!("flushing trace cache");
            self.memory.reset_trace_pages();
        }
    }

    /// Compile a trace starting at the current PC. Returns the entry
    /// offset plus one, or zero if nothing could be compiled. Compilation
    /// never fails destructively: stopping early always yields a valid
    /// trace.
    fn create_trace(&mut self) -> u32 {
        /// Instruction-byte-consuming states (compile reads these bytes
        /// itself and replaces their fetch cycles with stubs).
        fn reads_insn_byte(state: u8) -> bool {
            matches!(
                state,
                st::READ_OPCODE
                    | st::READ_OPCODE_NO_BREAK
                    | st::READ_IMM
                    | st::READ_ADDR_L
                    | st::READ_ADDR_H
                    | st::READ_ADDR_HX
                    | st::READ_ADDR_HY
                    | st::READ_ADDR_HX_SHY
                    | st::READ_ADDR_HY_SHA
                    | st::READ_ADDR_HY_SHX
            )
        }

        /// States that end the current instruction's compilation when
        /// fetched.
        fn ends_insn(state: u8) -> bool {
            matches!(
                state,
                st::READ_OPCODE | st::READ_OPCODE_NO_BREAK | st::REGENERATE_TABLES | st::TRACE_PC
            )
        }

        /// States a trace cannot carry; the instruction is abandoned and
        /// the trace truncated before it.
        fn untraceable(state: u8) -> bool {
            matches!(
                state,
                st::IRQ_VEC_TO_PC
                    | st::BREAK_ON_UNSUPPORTED
                    | st::WAIT_FOR_INTERRUPT
                    | st::STOP
            )
        }

        let entry_pc = self.pc;

        if let Some(bps) = &self.breakpoints {
            if bps.map[usize::from(entry_pc)] {
                return 0;
            }
        }

        // Make sure the entry page has a segment and the arena has room,
        // flushing once under pressure.
        let mut flushed = false;
        loop {
            let page_state = self.memory.trace_page((entry_pc >> 8) as u8);

            let have_segment = page_state > TRACE_PAGE_READY;
            let have_space = self
                .trace_cache
                .as_ref()
                .is_some_and(|tc| tc.free_space() >= 1536);

            if have_segment && have_space {
                break;
            }

            if !have_segment && have_space {
                if let Some(tc) = &mut self.trace_cache {
                    let id = tc.allocate_segment();
                    if id != 0 {
                        self.memory.set_trace_page((entry_pc >> 8) as u8, id);
                        continue;
                    }
                }
            }

            if flushed {
                debug_assert!(false, "trace arena still exhausted after a flush");
                return 0;
            }

            flushed = true;
            self.exit_trace();
            self.clear_trace_cache();
        }

        let base = self.trace_cache.as_ref().map_or(0, |tc| tc.write_pos());

        debug!("creating trace: pc={entry_pc:04X} -> {base:05X}");

        let history = self.history.is_some();
        let fetch_token = if self.breakpoints.is_some() {
            st::READ_OPCODE
        } else {
            st::READ_OPCODE_NO_BREAK
        };

        let mut code: Vec<u8> = Vec::new();
        let mut ex: Vec<u8> = Vec::new();
        let mut pc = entry_pc;
        let mut insns_traced = 0u32;
        let mut redirected = false;

        // Emit a bridge so `need` bytes fit inside one aligned line.
        fn bridge_for(code: &mut Vec<u8>, ex: &mut Vec<u8>, base: u32, need: u32) {
            let pos = (base + code.len() as u32) & (TRACE_ALIGN - 1);
            if pos > TRACE_ALIGN - need {
                code.push(st::TRACE_BRIDGE);
                ex.push(0xFF);
                while (base + code.len() as u32) & (TRACE_ALIGN - 1) != 0 {
                    code.push(st::NOP);
                    ex.push(0xFF);
                }
            }
        }

        'compile: loop {
            let free_space = self.trace_cache.as_ref().map_or(0, |tc| tc.free_space());
            if free_space.saturating_sub(code.len() as u32) < 64 {
                break;
            }

            let insn_page = (pc >> 8) as u8;
            let page_state = self.memory.trace_page(insn_page);

            if page_state == TRACE_PAGE_OFF {
                break;
            }

            if let Some(bps) = &self.breakpoints {
                if bps.map[usize::from(pc)] {
                    break;
                }
            }

            // The page needs a segment before its instructions can be
            // indexed.
            let seg_id = if page_state == TRACE_PAGE_READY {
                let free_space = self.trace_cache.as_ref().map_or(0, |tc| tc.free_space());
                if free_space.saturating_sub(code.len() as u32) < 1536 {
                    break;
                }
                let Some(tc) = &mut self.trace_cache else { break };
                let id = tc.allocate_segment();
                if id == 0 {
                    break;
                }
                self.memory.set_trace_page(insn_page, id);
                id
            } else {
                page_state
            };

            // Link into an existing trace once this one is long enough to
            // be worth keeping.
            let existing = self
                .trace_cache
                .as_ref()
                .map_or(0, |tc| tc.segment(seg_id).offsets[usize::from(pc & 0xFF)]);

            if existing != 0 && insns_traced >= 8 {
                bridge_for(&mut code, &mut ex, base, 5);
                code.push(st::TRACE_UJUMP);
                ex.push(0xFF);

                let field_pos = base + code.len() as u32;
                let rel = (existing - 1) as i64 - i64::from(field_pos);
                code.extend_from_slice(&(rel as i32).to_le_bytes());
                while ex.len() < code.len() {
                    ex.push(0xFF);
                }

                redirected = true;
                break;
            }

            // === Compile one instruction ===
            let insn_pc = pc;
            let rollback = code.len();

            let (hdr_state, hdr_size) = if history {
                (st::TRACE_START_INSN_HISTORY, 8)
            } else {
                (st::TRACE_START_INSN, 6)
            };

            bridge_for(&mut code, &mut ex, base, hdr_size as u32);
            let hdr_pos = code.len();
            code.resize(hdr_pos + hdr_size, 0);
            while ex.len() < code.len() {
                ex.push(0xFF);
            }
            let first_stub = code.len();

            let mut hdr_addr: u16 = 0;
            let mut hdr_data: u8 = 0;
            let mut hdr_ops = [0u8; 3];
            let mut hdr_len = 0usize;

            let mut state = st::READ_OPCODE;
            let mut micro: u32 = 0;
            let mut src0: u32 = 0;
            let mut have_program = false;
            let mut end_of_trace = false;
            let mut trace_pc_after = false;
            let mut aborted = false;

            loop {
                if reads_insn_byte(state) {
                    if self.memory.trace_page((pc >> 8) as u8) == TRACE_PAGE_OFF {
                        // Instruction crosses into an untraceable page.
                        aborted = true;
                        break;
                    }

                    let byte = self.memory.debug_read(pc);
                    pc = pc.wrapping_add(1);

                    if hdr_len > 0 {
                        code.push(st::TRACE_CONT_INSN_1);
                    }

                    debug_assert!(hdr_len < 3);
                    hdr_ops[hdr_len] = byte;
                    hdr_len += 1;

                    match state {
                        st::READ_IMM => hdr_data = byte,
                        st::READ_ADDR_L => hdr_addr = u16::from(byte),
                        st::READ_ADDR_H
                        | st::READ_ADDR_HX
                        | st::READ_ADDR_HY
                        | st::READ_ADDR_HX_SHY
                        | st::READ_ADDR_HY_SHA
                        | st::READ_ADDR_HY_SHX => {
                            hdr_addr = hdr_addr.wrapping_add(u16::from(byte) << 8);
                        }
                        _ => {}
                    }
                }

                let exdata = if have_program {
                    (micro - src0 - 1) as u8
                } else {
                    0
                };

                match state {
                    st::READ_OPCODE | st::READ_OPCODE_NO_BREAK => {
                        micro = u32::from(self.tables.insn_ptrs[usize::from(hdr_ops[0])]);
                        src0 = micro;
                        have_program = true;
                    }

                    st::READ_IMM | st::READ_ADDR_L | st::READ_ADDR_H => {}
                    st::READ_ADDR_HX => code.push(st::TRACE_ADDR_ADD_X),
                    st::READ_ADDR_HY => code.push(st::TRACE_ADDR_ADD_Y),
                    st::READ_ADDR_HX_SHY => code.push(st::TRACE_ADDR_HX_SHY),
                    st::READ_ADDR_HY_SHA => code.push(st::TRACE_ADDR_HY_SHA),
                    st::READ_ADDR_HY_SHX => code.push(st::TRACE_ADDR_HY_SHX),

                    st::JS | st::JNS | st::JC | st::JNC | st::JZ | st::JNZ | st::JO | st::JNO => {
                        debug_assert_eq!(self.tables.heap[micro as usize], st::JCC_FALSE_READ);
                        micro += 1;

                        let target = pc.wrapping_add((hdr_data as i8) as u16);
                        hdr_addr = target;

                        let (xor, and) = match state {
                            st::JS => (0x00, N),
                            st::JNS => (N, N),
                            st::JC => (0x00, C),
                            st::JNC => (C, C),
                            st::JZ => (0x00, Z),
                            st::JNZ => (Z, Z),
                            st::JO => (0x00, V),
                            _ => (V, V),
                        };

                        code.push(st::TRACE_FAST_JCC);
                        code.push(xor);
                        code.push(and);

                        // Taken-path tail: the branch penalty cycle, the
                        // crossing false read if the target is off-page,
                        // then the transfer with its trace probe.
                        let crossing = (pc ^ target) & 0xFF00 != 0;
                        code.push(if crossing { 7 } else { 6 });
                        while ex.len() < code.len() {
                            ex.push(exdata);
                        }

                        code.push(st::TRACE_CONT_INSN_1);
                        ex.push(exdata);
                        if crossing {
                            // Suspension here resumes at the standalone
                            // false read, one state past the branch op.
                            code.push(st::JCC_FALSE_READ);
                            ex.push(exdata + 1);
                        }
                        code.push(st::TRACE_ADDR_TO_PC);
                        ex.push(0xFF);
                        code.push(fetch_token);
                        ex.push(0xFF);
                    }

                    st::ADDR_TO_PC => code.push(st::TRACE_ADDR_TO_PC),

                    // History is folded into the instruction header.
                    st::ADD_TO_HISTORY => {}

                    st::POP_PCH | st::POP_PCH_P1 => {
                        code.push(state);
                        trace_pc_after = true;
                    }

                    s if untraceable(s) => {
                        aborted = true;
                        break;
                    }

                    other => code.push(other),
                }

                while ex.len() < code.len() {
                    ex.push(exdata);
                }

                if state == st::ADDR_TO_PC || state == st::TRACE_ADDR_TO_PC {
                    end_of_trace = true;
                    break;
                }

                state = self.tables.heap[micro as usize];
                micro += 1;

                if ends_insn(state) {
                    break;
                }
            }

            if aborted {
                code.truncate(rollback);
                ex.truncate(rollback);
                break 'compile;
            }

            if trace_pc_after {
                code.push(st::TRACE_PC);
                ex.push(0xFF);
                end_of_trace = true;
            }

            // Rewrite the continuation stubs with their PC rollbacks so a
            // suspension during the prefetch can resume standalone.
            match hdr_len - 1 {
                0 => {}
                1 => ex[first_stub] |= 0x10,
                2 => {
                    debug_assert_eq!(code[first_stub], st::TRACE_CONT_INSN_1);
                    code[first_stub] = st::TRACE_CONT_INSN_2;
                    ex[first_stub] |= 0x20;
                    ex[first_stub + 1] |= 0x10;
                }
                _ => debug_assert!(false, "unexpected prefetch length"),
            }

            // Populate the header.
            code[hdr_pos] = hdr_state;
            code[hdr_pos + 1] = (hdr_len - 1) as u8;
            code[hdr_pos + 2] = hdr_addr as u8;
            code[hdr_pos + 3] = (hdr_addr >> 8) as u8;
            code[hdr_pos + 4] = hdr_data;
            code[hdr_pos + 5] = hdr_ops[0];
            if hdr_state == st::TRACE_START_INSN_HISTORY {
                // The standalone path records the two bytes after the
                // opcode with debug reads, whatever the instruction
                // length; preload the same view.
                code[hdr_pos + 6] = self.memory.debug_read(insn_pc.wrapping_add(1));
                code[hdr_pos + 7] = self.memory.debug_read(insn_pc.wrapping_add(2));
            }

            // Index the instruction for entry at any boundary.
            let header_offset = base + hdr_pos as u32 + 1;
            if let Some(tc) = &mut self.trace_cache {
                tc.segment_mut(seg_id).offsets[usize::from(insn_pc & 0xFF)] = header_offset;
            }

            if end_of_trace {
                redirected = true;
                break;
            }

            insns_traced += 1;
            if insns_traced >= 64 {
                break;
            }
        }

        if code.is_empty() {
            // Nothing compiled (first instruction was untraceable);
            // standalone dispatch handles it.
            return 0;
        }

        if !redirected {
            code.push(st::TRACE_PC);
            ex.push(0xFF);
        }

        code.push(fetch_token);
        ex.push(0xFF);

        debug!("ending trace: {} bytes", code.len());

        if let Some(tc) = &mut self.trace_cache {
            tc.commit(&code, &ex);
        }

        base + 1
    }
}
