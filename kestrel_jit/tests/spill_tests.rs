//! Spilling and splitting under register pressure.
//!
//! # Test Categories
//!
//! 1. **Pressure** - More live values than registers
//! 2. **Spill slots** - One slot per value, reserved slots, double-word alignment
//! 3. **Memory operands** - Values required to live in memory, stack arguments

mod common;

use common::{allocate_and_compare, define_values, stack_slots, stack_writes, sum_chain};
use kestrel_jit::backend::registers::reference::{R0, R1};
use kestrel_jit::lir::{Constant, FrameMap, Kind, LirBuilder, Opcode, Operand, StackSlot};
use kestrel_jit::RegisterConfig;

// =============================================================================
// A. Pressure
// =============================================================================

#[test]
fn test_more_values_than_registers() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("pressure", &registers);
    b.new_block();
    let values = define_values(&mut b, Kind::Int, 10);
    let sum = sum_chain(&mut b, Kind::Int, &values);
    b.ret(Some(sum.into()));
    let mut lir = b.finish();

    let (result, value) = allocate_and_compare(&mut lir, &registers, &[]);
    assert_eq!(value, 55);
    assert!(result.stats.spill_slots > 0);
    assert!(result.stats.splits > 0);
    // each value owns at most one slot
    assert!(result.stats.spill_slots <= 10, "{:?}", result.stats);
}

#[test]
fn test_spilled_value_is_stored_once() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("store_once", &registers);
    b.new_block();
    let values = define_values(&mut b, Kind::Int, 12);
    let sum = sum_chain(&mut b, Kind::Int, &values);
    b.ret(Some(sum.into()));
    let mut lir = b.finish();

    allocate_and_compare(&mut lir, &registers, &[]);
    for (slot, writes) in stack_writes(&lir) {
        assert_eq!(writes, 1, "slot {slot} written {writes} times:\n{lir}");
    }
}

#[test]
fn test_value_spilled_in_successor_block() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("successor_spill", &registers);
    let v = b.variable(Kind::Int);
    let w = b.variable(Kind::Int);
    let b1 = b.new_block();
    let b2 = b.new_block();
    b.switch_to(b1);
    b.mov(Constant::int(7), v);
    b.binary(Opcode::Add, w, v, Constant::int(1));
    b.jump(b2);
    b.switch_to(b2);
    let mut values = define_values(&mut b, Kind::Int, 8);
    values.push(w);
    values.push(v);
    let sum = sum_chain(&mut b, Kind::Int, &values);
    b.ret(Some(sum.into()));
    let mut lir = b.finish();

    let (_, value) = allocate_and_compare(&mut lir, &registers, &[]);
    assert_eq!(value, 36 + 8 + 7);
    for (slot, writes) in stack_writes(&lir) {
        assert_eq!(writes, 1, "slot {slot} written {writes} times:\n{lir}");
    }
}

#[test]
fn test_two_registers() {
    let registers = RegisterConfig::reference().with_allocatable([R0, R1].into_iter().collect());
    let mut b = LirBuilder::new("two_registers", &registers);
    b.new_block();
    let values = define_values(&mut b, Kind::Int, 5);
    let product = b.variable(Kind::Int);
    b.binary(Opcode::Mul, product, values[1], values[2]);
    let sum = sum_chain(&mut b, Kind::Int, &[values[0], product, values[3], values[4], values[1]]);
    b.ret(Some(sum.into()));
    let mut lir = b.finish();

    let (result, value) = allocate_and_compare(&mut lir, &registers, &[]);
    assert_eq!(value, 1 + 6 + 4 + 5 + 2);
    assert!(result.stats.spill_slots >= 2);
}

// =============================================================================
// B. Spill slots
// =============================================================================

#[test]
fn test_spill_slots_follow_reserved_slots() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("reserved", &registers);
    b.new_block();
    let values = define_values(&mut b, Kind::Int, 10);
    let sum = sum_chain(&mut b, Kind::Int, &values);
    b.ret(Some(sum.into()));
    let mut lir = b.finish();
    lir.frame = FrameMap::new(registers.word_size()).with_reserved_slots(3);

    let (result, _) = allocate_and_compare(&mut lir, &registers, &[]);
    assert!(stack_slots(&lir).iter().all(|slot| slot.index >= 3));
    assert_eq!(lir.frame.spill_slot_count(), 3 + result.stats.spill_slots);
    assert_eq!(result.frame_size % 16, 0);
    assert!(result.frame_size >= lir.frame.spill_slot_count() * 8);
}

#[test]
fn test_long_values_take_aligned_slot_pairs_on_32_bit_words() {
    let registers = RegisterConfig::reference().with_word_size(4);
    let mut b = LirBuilder::new("long_pairs", &registers);
    b.new_block();
    let values = define_values(&mut b, Kind::Long, 10);
    let sum = sum_chain(&mut b, Kind::Long, &values);
    b.ret(Some(sum.into()));
    let mut lir = b.finish();

    let (result, value) = allocate_and_compare(&mut lir, &registers, &[]);
    assert_eq!(value, 55);
    assert!(result.stats.spill_slots >= 2);
    for slot in stack_slots(&lir) {
        assert_eq!(slot.kind, Kind::Long);
        assert_eq!(slot.index % 2, 0, "long value in odd slot {slot}");
    }
}

// =============================================================================
// C. Memory operands
// =============================================================================

#[test]
fn test_value_that_must_start_in_memory() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("start_in_memory", &registers);
    let x = b.variable(Kind::Int);
    let y = b.variable(Kind::Int);
    b.new_block();
    b.mov(Constant::int(40), x);
    b.must_start_in_memory(x);
    b.binary(Opcode::Add, y, x, Constant::int(2));
    b.ret(Some(y.into()));
    let mut lir = b.finish();

    let (result, value) = allocate_and_compare(&mut lir, &registers, &[]);
    assert_eq!(value, 42);
    assert_eq!(result.stats.spill_slots, 1);
    let def = &lir.blocks[0].instructions[1];
    assert!(matches!(def.move_result(), Some(Operand::Stack(_))), "{def}");
}

#[test]
fn test_value_that_must_stay_in_memory() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("stay_in_memory", &registers);
    let x = b.variable(Kind::Int);
    let y = b.variable(Kind::Int);
    b.new_block();
    b.mov(Constant::int(40), x);
    b.must_start_in_memory(x);
    b.must_stay_in_memory(x);
    b.mov(x, y);
    b.ret(Some(y.into()));
    let mut lir = b.finish();

    let (_, value) = allocate_and_compare(&mut lir, &registers, &[]);
    assert_eq!(value, 40);
    let copy = lir
        .instructions()
        .filter_map(|inst| inst.move_source())
        .find(|source| !source.is_constant())
        .unwrap();
    assert!(copy.is_stack(), "{copy}");
}

#[test]
fn test_stack_argument_needs_no_spill_slot() {
    let registers = RegisterConfig::reference();
    let mut b = LirBuilder::new("argument", &registers);
    let a = b.variable(Kind::Int);
    let r = b.variable(Kind::Int);
    b.new_block();
    b.mov(StackSlot::caller(0, Kind::Int), a);
    b.binary(Opcode::Add, r, a, Constant::int(1));
    b.ret(Some(r.into()));
    let mut lir = b.finish();

    let (result, value) = allocate_and_compare(&mut lir, &registers, &[41]);
    assert_eq!(value, 42);
    assert_eq!(result.stats.spill_slots, 0);
}
