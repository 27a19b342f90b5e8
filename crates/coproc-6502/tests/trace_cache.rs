//! Trace cache properties: transparency under any run interleaving,
//! synchronous invalidation of self-modifying code, breakpoint delivery
//! inside compiled regions, and history equivalence.

use coproc_6502::{Coproc6502, CpuKind};
use coproc_core::{BreakpointHandler, HistoryEntry};

/// Reference workload: a tight loop that increments a 16-bit zero-page
/// counter 1000 times (4 outer x 250 inner), then spins.
///
/// ```text
/// $0200  A0 04     LDY #4
/// $0202  A2 FA     LDX #250
/// $0204  E6 80     INC $80
/// $0206  D0 02     BNE $020A
/// $0208  E6 81     INC $81
/// $020A  CA        DEX
/// $020B  D0 F7     BNE $0204
/// $020D  88        DEY
/// $020E  D0 F2     BNE $0202
/// $0210  4C 10 02  JMP $0210
/// ```
const COUNTER_LOOP: &[u8] = &[
    0xA0, 0x04, 0xA2, 0xFA, 0xE6, 0x80, 0xD0, 0x02, 0xE6, 0x81, 0xCA, 0xD0, 0xF7, 0x88, 0xD0,
    0xF2, 0x4C, 0x10, 0x02,
];

/// Exact cycles from reset to the first arrival at $0210:
/// setup 2 + 4*2, inner bodies 1000*(5+2), skip branch 997*3 + 3*(2+5),
/// inner branch 996*3 + 4*2, outer DEY 4*2 + branch 3*3 + 2.
const COUNTER_LOOP_CYCLES: i32 = 10 + 7000 + 3012 + 2996 + 8 + 11;

fn build(trace_cache: bool, program: &[u8]) -> Coproc6502 {
    let mut cpu = Coproc6502::new(CpuKind::Nmos6502, trace_cache);

    cpu.memory_mut().map_ram(0x00, 16);

    let mut vector_page = vec![0u8; 256];
    vector_page[0xFC] = 0x00;
    vector_page[0xFD] = 0x02;
    cpu.memory_mut().map_rom(0xFF, 1, &vector_page);

    cpu.memory_mut().write_range(0x0200, program);
    // Program pages are eligible for compilation; the zero page is not,
    // so counter stores never touch compiled pages.
    cpu.memory_mut().set_traceable(0x02, 2);
    cpu.cold_reset();
    cpu
}

fn counter(cpu: &Coproc6502) -> u32 {
    u32::from(cpu.memory().debug_read(0x0080))
        + 256 * u32::from(cpu.memory().debug_read(0x0081))
}

#[test]
fn counter_loop_golden_run_without_traces() {
    let mut cpu = build(false, COUNTER_LOOP);
    cpu.add_cycles(COUNTER_LOOP_CYCLES);
    cpu.run();

    assert_eq!(cpu.cycles_left(), 0);
    assert_eq!(counter(&cpu), 1000);
    assert_eq!(
        cpu.get_exec_state().pc,
        0x0210,
        "exactly at the spin entry after the documented cycle count"
    );
}

#[test]
fn trace_cache_is_cycle_transparent_on_the_counter_loop() {
    let mut traced = build(true, COUNTER_LOOP);
    traced.add_cycles(COUNTER_LOOP_CYCLES);
    traced.run();

    assert_eq!(traced.cycles_left(), 0);
    assert_eq!(counter(&traced), 1000);
    assert_eq!(
        traced.get_exec_state().pc,
        0x0210,
        "compiled execution lands on the same cycle"
    );

    // And the whole architectural state matches the interpreter.
    let mut plain = build(false, COUNTER_LOOP);
    plain.add_cycles(COUNTER_LOOP_CYCLES);
    plain.run();

    assert_eq!(traced.get_exec_state(), plain.get_exec_state());
    for addr in 0x0080..0x0082 {
        assert_eq!(
            traced.memory().debug_read(addr),
            plain.memory().debug_read(addr)
        );
    }
}

#[test]
fn transparency_holds_under_arbitrary_run_slicing() {
    let mut traced = build(true, COUNTER_LOOP);
    let mut plain = build(false, COUNTER_LOOP);

    // Interleave run calls with a deterministic ragged budget pattern;
    // totals stay equal between the two cores.
    let mut budget = COUNTER_LOOP_CYCLES;
    let mut slice = 1;
    while budget > 0 {
        let n = slice.min(budget);
        traced.add_cycles(n);
        traced.run();
        plain.add_cycles(n);
        plain.run();

        slice = if slice >= 13 { 1 } else { slice + 3 };
        budget -= n;
    }

    assert_eq!(traced.cycles_left(), 0);
    assert_eq!(plain.cycles_left(), 0);
    assert_eq!(counter(&traced), 1000);
    assert_eq!(traced.get_exec_state(), plain.get_exec_state());
}

#[test]
fn lockstep_states_match_at_every_boundary() {
    let mut traced = build(true, COUNTER_LOOP);
    let mut plain = build(false, COUNTER_LOOP);

    // Compare visible state after every slice for a prefix of the run.
    for step in 0..4000 {
        let n = 1 + (step % 7);
        traced.add_cycles(n);
        traced.run();
        plain.add_cycles(n);
        plain.run();

        assert_eq!(
            traced.get_exec_state(),
            plain.get_exec_state(),
            "divergence after slice {step}"
        );
    }
}

#[test]
fn self_modifying_code_invalidates_synchronously() {
    // The loop rewrites its own LDA immediate each iteration:
    //   $0200  A9 10     LDA #$10
    //   $0202  69 01     ADC #$01
    //   $0204  8D 01 02  STA $0201
    //   $0207  4C 00 02  JMP $0200
    let program = [0xA9, 0x10, 0x69, 0x01, 0x8D, 0x01, 0x02, 0x4C, 0x00, 0x02];
    let iterations = 40;
    let budget = 11 * iterations;

    let mut traced = build(true, &program);
    traced.add_cycles(budget);
    traced.run();

    let mut plain = build(false, &program);
    plain.add_cycles(budget);
    plain.run();

    assert_eq!(traced.get_exec_state(), plain.get_exec_state());
    assert_eq!(
        traced.memory().debug_read(0x0201),
        plain.memory().debug_read(0x0201)
    );
    // After k full iterations the immediate has been bumped k times.
    assert_eq!(traced.memory().debug_read(0x0201), 0x10 + iterations as u8);
}

#[test]
fn external_patch_of_compiled_code_takes_effect() {
    // LDA #$11; JMP $0200 — compiled hot, then patched from outside.
    let program = [0xA9, 0x11, 0x4C, 0x00, 0x02];
    let mut cpu = build(true, &program);

    cpu.add_cycles(50);
    cpu.run();
    assert_eq!(cpu.registers().a, 0x11);

    // External bus master rewrites the immediate through the write path.
    cpu.memory_mut().write(0x0201, 0x77);

    cpu.add_cycles(50);
    cpu.run();
    assert_eq!(cpu.registers().a, 0x77, "patched operand is observed");
}

struct StopAlways {
    hits: std::rc::Rc<std::cell::Cell<u32>>,
}

impl BreakpointHandler for StopAlways {
    fn check_breakpoint(&mut self, _pc: u16) -> bool {
        self.hits.set(self.hits.get() + 1);
        true
    }
}

#[test]
fn breakpoints_fire_inside_compiled_regions() {
    use std::cell::Cell;
    use std::rc::Rc;

    let mut cpu = build(true, COUNTER_LOOP);

    // Let the loop get hot and compiled first: 150 full iterations of the
    // 13-cycle body land exactly on the fetch of $0204.
    cpu.add_cycles(10 + 150 * 13);
    cpu.run();
    assert_eq!(cpu.cycles_left(), 0);
    assert_eq!(counter(&cpu), 150);

    // Now drop a breakpoint on the INC inside the loop body.
    let hits = Rc::new(Cell::new(0));
    let mut map = vec![false; 65536].into_boxed_slice();
    map[0x0204] = true;
    let map: Box<[bool; 65536]> = match map.try_into() {
        Ok(map) => map,
        Err(_) => unreachable!(),
    };
    cpu.set_breakpoints(map, Box::new(StopAlways { hits: Rc::clone(&hits) }));
    cpu.on_breakpoints_changed(Some(0x0204));

    let before = counter(&cpu);
    cpu.add_cycles(1000);
    cpu.run();

    assert_eq!(hits.get(), 1, "halted at the first fetch of $0204");
    assert_eq!(cpu.get_exec_state().pc, 0x0204);
    assert_eq!(
        counter(&cpu),
        before,
        "no side effects committed past the breakpoint"
    );
    assert!(cpu.cycles_left() > 0, "remaining budget preserved");
}

#[test]
fn breakpoint_edit_survives_unrelated_compiled_code() {
    // Marking an address that was never compiled must not flush traces;
    // execution continues uninterrupted until the mark is reached.
    let mut cpu = build(true, COUNTER_LOOP);
    cpu.add_cycles(500);
    cpu.run();

    let hits = std::rc::Rc::new(std::cell::Cell::new(0));
    let map: Box<[bool; 65536]> = match vec![false; 65536].into_boxed_slice().try_into() {
        Ok(map) => map,
        Err(_) => unreachable!(),
    };
    cpu.set_breakpoints(map, Box::new(StopAlways { hits: std::rc::Rc::clone(&hits) }));

    // $0210 (the spin target) hasn't been reached or compiled yet.
    if let Some(map) = cpu.breakpoint_map_mut() {
        map[0x0210] = true;
    }
    cpu.on_breakpoints_changed(Some(0x0210));

    cpu.add_cycles(COUNTER_LOOP_CYCLES);
    cpu.run();

    assert_eq!(hits.get(), 1);
    assert_eq!(cpu.get_exec_state().pc, 0x0210);
    assert_eq!(counter(&cpu), 1000, "the loop ran to completion first");
}

#[test]
fn history_matches_between_traced_and_plain_runs() {
    let capacity = 64;

    let mut traced = build(true, COUNTER_LOOP);
    traced.attach_history(vec![HistoryEntry::default(); capacity].into_boxed_slice());

    let mut plain = build(false, COUNTER_LOOP);
    plain.attach_history(vec![HistoryEntry::default(); capacity].into_boxed_slice());

    for cpu in [&mut traced, &mut plain] {
        cpu.add_cycles(3000);
        cpu.run();
    }

    let th = traced.history().map(|h| h.retired());
    let ph = plain.history().map(|h| h.retired());
    assert_eq!(th, ph, "same retirement count");

    let retired = th.unwrap_or(0);
    assert!(retired > u32::try_from(capacity).unwrap_or(0));

    for back in 0..u32::try_from(capacity).unwrap_or(0) {
        let t = traced.history().and_then(|h| h.entry(back)).copied();
        let p = plain.history().and_then(|h| h.entry(back)).copied();
        assert_eq!(t, p, "history entry {back} diverged");
    }
}

#[test]
fn history_records_the_retired_sequence_in_order() {
    // LDA #1; LDX #2; INX; JMP spin.
    let program = [0xA9, 0x01, 0xA2, 0x02, 0xE8, 0x4C, 0x07, 0x02, 0xEA];
    let mut cpu = build(false, &program);
    cpu.attach_history(vec![HistoryEntry::default(); 8].into_boxed_slice());

    // LDA(2) + LDX(2) + INX(2) + JMP(3) = 9 cycles -> 4 retirements,
    // then park at the spin NOP's fetch.
    cpu.add_cycles(9);
    cpu.run();

    let history = match cpu.history() {
        Some(h) => h,
        None => unreachable!(),
    };
    assert_eq!(history.retired(), 4);

    let pcs: Vec<u16> = (0..4)
        .filter_map(|back| history.entry(back).map(|e| e.pc))
        .collect();
    assert_eq!(pcs, vec![0x0205, 0x0204, 0x0202, 0x0200]);

    let opcodes: Vec<u8> = (0..4)
        .filter_map(|back| history.entry(back).map(|e| e.opcode[0]))
        .collect();
    assert_eq!(opcodes, vec![0x4C, 0xE8, 0xA2, 0xA9]);
}

#[test]
fn history_toggle_flushes_and_regenerates_transparently() {
    let mut traced = build(true, COUNTER_LOOP);
    let mut plain = build(false, COUNTER_LOOP);

    // Warm both up, attach history mid-flight, keep running, detach.
    for cpu in [&mut traced, &mut plain] {
        cpu.add_cycles(977);
        cpu.run();
        cpu.attach_history(vec![HistoryEntry::default(); 16].into_boxed_slice());
        cpu.add_cycles(977);
        cpu.run();
        let _ = cpu.detach_history();
        cpu.add_cycles(COUNTER_LOOP_CYCLES - 2 * 977);
        cpu.run();
    }

    assert_eq!(counter(&traced), 1000);
    assert_eq!(traced.get_exec_state(), plain.get_exec_state());
}

#[test]
fn get_set_exec_state_round_trip_with_traces() {
    let mut traced = build(true, COUNTER_LOOP);
    let mut reference = build(true, COUNTER_LOOP);

    for cpu in [&mut traced, &mut reference] {
        cpu.add_cycles(4321);
        cpu.run();
    }

    let snapshot = traced.get_exec_state();
    traced.set_exec_state(&snapshot);

    for cpu in [&mut traced, &mut reference] {
        cpu.add_cycles(COUNTER_LOOP_CYCLES - 4321);
        cpu.run();
    }

    assert_eq!(counter(&traced), counter(&reference));
    assert_eq!(
        traced.get_exec_state().pc,
        reference.get_exec_state().pc
    );
}

#[test]
fn explicit_flush_is_invisible_to_execution() {
    let mut traced = build(true, COUNTER_LOOP);
    let mut plain = build(false, COUNTER_LOOP);

    let mut spent = 0;
    while spent < COUNTER_LOOP_CYCLES {
        let n = 113.min(COUNTER_LOOP_CYCLES - spent);
        traced.add_cycles(n);
        traced.run();
        traced.invalidate_trace_cache();

        plain.add_cycles(n);
        plain.run();
        spent += n;
    }

    assert_eq!(counter(&traced), 1000);
    assert_eq!(traced.get_exec_state(), plain.get_exec_state());
}
