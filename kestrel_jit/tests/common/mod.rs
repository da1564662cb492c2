//! Shared helpers for the allocator integration tests.
//!
//! The [`execute`] interpreter runs a function before and after allocation so the
//! tests can check that the inserted moves preserve every value.
#![allow(dead_code)]

use kestrel_jit::lir::{BlockId, Constant, Instruction, Kind, LirBuilder, LirFunction, Opcode, Operand, StackSlot, Variable};
use kestrel_jit::{AllocationResult, AllocatorConfig, RegisterAllocator, RegisterConfig};
use std::collections::HashMap;

/// Value written into caller-saved registers by a call.
pub const CLOBBERED: i64 = -0x0dea_d000;

/// Install a test logger once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Allocate with verification on and check that no variable survives.
pub fn allocate_checked(lir: &mut LirFunction, registers: &RegisterConfig) -> AllocationResult {
    init_logging();
    let allocator = RegisterAllocator::new(registers, AllocatorConfig::for_testing());
    let result = allocator
        .allocate(lir)
        .unwrap_or_else(|err| panic!("allocation of {} failed: {err}", lir.name));
    assert_fully_allocated(lir);
    result
}

fn assert_no_variable(inst: &Instruction, context: &str) {
    for operand in inst.inputs.iter().chain(inst.temps.iter()).chain(inst.outputs.iter()) {
        assert!(!operand.is_variable(), "{context}: variable left in `{inst}`");
    }
}

/// Every operand of every instruction, including exception entry code, is a location.
pub fn assert_fully_allocated(lir: &LirFunction) {
    for block in &lir.blocks {
        for inst in &block.instructions {
            assert_no_variable(inst, &block.id.to_string());
            for edge in &inst.exception_edges {
                assert!(edge.throwing_op.is_some(), "exception edge without throwing op");
                for code in edge.entry_code.iter().flatten() {
                    assert_no_variable(code, "entry code");
                }
            }
            for info in &inst.info {
                assert!(info.reference_map.is_some(), "{}: missing reference map", block.id);
                if let Some(scope) = &info.scope {
                    for value in scope.locals.iter().chain(scope.expressions.iter()) {
                        assert!(!value.is_variable(), "variable left in debug info");
                    }
                }
            }
        }
    }
}

/// Number of instructions writing each frame slot.
pub fn stack_writes(lir: &LirFunction) -> HashMap<u32, usize> {
    let mut writes = HashMap::new();
    for inst in lir.instructions() {
        for operand in &inst.outputs {
            if let Operand::Stack(slot) = operand {
                if !slot.in_caller_frame {
                    *writes.entry(slot.index).or_insert(0) += 1;
                }
            }
        }
    }
    writes
}

/// Every frame slot operand in the function.
pub fn stack_slots(lir: &LirFunction) -> Vec<StackSlot> {
    lir.instructions()
        .flat_map(|inst| inst.inputs.iter().chain(inst.outputs.iter()))
        .filter_map(Operand::as_stack)
        .collect()
}

/// Number of instructions with the opcode.
pub fn count_opcode(lir: &LirFunction, opcode: Opcode) -> usize {
    lir.instructions().filter(|inst| inst.opcode == opcode).count()
}

// =============================================================================
// Function shapes
// =============================================================================

/// Constant `value` of an integer kind.
pub fn constant(kind: Kind, value: i64) -> Constant {
    match kind {
        Kind::Long => Constant::long(value),
        _ => Constant::int(value as i32),
    }
}

/// Define `n` values `1..=n` of `kind` in the current block.
pub fn define_values(b: &mut LirBuilder<'_>, kind: Kind, n: usize) -> Vec<Variable> {
    (1..=n)
        .map(|i| {
            let v = b.variable(kind);
            b.mov(constant(kind, i as i64), v);
            v
        })
        .collect()
}

/// Add all values in order, each partial sum in a fresh variable.
pub fn sum_chain(b: &mut LirBuilder<'_>, kind: Kind, values: &[Variable]) -> Variable {
    let mut acc = values[0];
    for &v in &values[1..] {
        let t = b.variable(kind);
        b.binary(Opcode::Add, t, acc, v);
        acc = t;
    }
    acc
}

// =============================================================================
// Interpreter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Place {
    Variable(u32),
    Register(u8),
    Slot(u32, bool),
}

struct Machine<'a> {
    registers: &'a RegisterConfig,
    state: HashMap<Place, i64>,
    flag: bool,
}

impl Machine<'_> {
    fn place(operand: &Operand) -> Option<Place> {
        match operand {
            Operand::Variable(v) => Some(Place::Variable(v.index)),
            Operand::Register(r, _) => Some(Place::Register(r.number())),
            Operand::Stack(s) => Some(Place::Slot(s.index, s.in_caller_frame)),
            Operand::Constant(_) | Operand::Illegal => None,
        }
    }

    fn read(&self, operand: &Operand) -> i64 {
        if let Operand::Constant(c) = operand {
            return c.bits;
        }
        let place = Self::place(operand).unwrap_or_else(|| panic!("cannot read {operand}"));
        *self
            .state
            .get(&place)
            .unwrap_or_else(|| panic!("read of {operand} before any write"))
    }

    fn write(&mut self, operand: &Operand, value: i64) {
        let place = Self::place(operand).unwrap_or_else(|| panic!("cannot write {operand}"));
        self.state.insert(place, value);
    }

    fn clobber(&mut self) {
        for n in self.registers.caller_saved().numbers() {
            self.state.insert(Place::Register(n), CLOBBERED);
        }
    }

    fn move_like(&mut self, inst: &Instruction) {
        let value = self.read(&inst.inputs[0]);
        self.write(&inst.outputs[0], value);
    }
}

/// Run `lir` with `args` in the caller's stack slots and return the returned value.
///
/// Branches are taken when the preceding `Cmp` found its first input smaller than its
/// second. With `throw`, the first instruction with an exception edge throws.
pub fn execute(lir: &LirFunction, registers: &RegisterConfig, args: &[i64], throw: bool) -> i64 {
    let mut machine = Machine {
        registers,
        state: HashMap::new(),
        flag: false,
    };
    for (i, &arg) in args.iter().enumerate() {
        machine.state.insert(Place::Slot(i as u32, true), arg);
    }

    let mut block = BlockId(0);
    let mut index = 0;
    let mut thrown = false;
    for _ in 0..100_000 {
        let inst = &lir.block(block).instructions[index];
        index += 1;

        if throw && !thrown && !inst.exception_edges.is_empty() {
            thrown = true;
            let edge = &inst.exception_edges[0];
            if inst.has_call {
                machine.clobber();
            }
            if edge.throwing_op.is_some() {
                for code in edge.entry_code.iter().flatten() {
                    if code.opcode == Opcode::Move {
                        machine.move_like(code);
                    }
                }
            } else {
                let values: Vec<(Operand, i64)> = lir
                    .block(edge.handler)
                    .phis
                    .iter()
                    .map(|phi| (Operand::Variable(phi.result), machine.read(&phi.inputs[edge.phi_operand])))
                    .collect();
                for (result, value) in values {
                    machine.write(&result, value);
                }
            }
            block = edge.handler;
            index = 0;
            continue;
        }

        match inst.opcode {
            Opcode::Label | Opcode::Nop | Opcode::Safepoint => {}
            Opcode::Move | Opcode::Convert => machine.move_like(inst),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::And | Opcode::Or | Opcode::Xor => {
                let (l, r) = (machine.read(&inst.inputs[0]), machine.read(&inst.inputs[1]));
                let value = match inst.opcode {
                    Opcode::Add => l.wrapping_add(r),
                    Opcode::Sub => l.wrapping_sub(r),
                    Opcode::Mul => l.wrapping_mul(r),
                    Opcode::Div => l.checked_div(r).unwrap_or(0),
                    Opcode::And => l & r,
                    Opcode::Or => l | r,
                    _ => l ^ r,
                };
                machine.write(&inst.outputs[0], value);
            }
            Opcode::Cmp => {
                machine.flag = machine.read(&inst.inputs[0]) < machine.read(&inst.inputs[1]);
            }
            Opcode::Branch => {
                if machine.flag {
                    block = inst.target.expect("branch without target");
                    index = 0;
                }
            }
            Opcode::Jump => {
                block = inst.target.expect("jump without target");
                index = 0;
            }
            Opcode::Call => {
                let sum: i64 = inst.inputs.iter().map(|op| machine.read(op)).sum();
                machine.clobber();
                if let Some(result) = inst.outputs.first() {
                    machine.write(result, sum + 100);
                }
            }
            Opcode::Return => {
                return inst.inputs.first().map_or(0, |op| machine.read(op));
            }
            other => panic!("unsupported opcode {other}"),
        }
    }
    panic!("{} did not return", lir.name);
}

/// Allocate `lir` and check it computes the same result as before allocation.
pub fn allocate_and_compare(
    lir: &mut LirFunction,
    registers: &RegisterConfig,
    args: &[i64],
) -> (AllocationResult, i64) {
    let expected = execute(lir, registers, args, false);
    let result = allocate_checked(lir, registers);
    let actual = execute(lir, registers, args, false);
    assert_eq!(actual, expected, "allocated code of {} computes a different value:\n{lir}", lir.name);
    (result, actual)
}
