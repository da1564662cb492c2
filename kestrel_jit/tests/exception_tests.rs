//! Exception edges: values flowing from a throwing call into its handler.

mod common;

use common::{allocate_checked, execute};
use kestrel_jit::lir::{Constant, FrameState, Instruction, Kind, LirBuilder, LirFunction, Opcode, Operand, Phi};
use kestrel_jit::RegisterConfig;

/// `x` is live into the handler, `y` reaches it through the handler's phi.
///
/// Without `y_in_state` nothing but the phi reads `y` after its definition.
fn throwing_call(registers: &RegisterConfig, pressure: usize, y_in_state: bool) -> LirFunction {
    let mut b = LirBuilder::new("throwing_call", registers);
    let x = b.variable(Kind::Int);
    let y = b.variable(Kind::Int);
    let p = b.variable(Kind::Int);
    let normal = b.variable(Kind::Int);
    let caught = b.variable(Kind::Int);
    let entry = b.new_block();
    let after = b.new_block();
    let handler = b.new_block();

    b.switch_to(entry);
    b.mov(Constant::int(10), x);
    b.mov(Constant::int(20), y);
    let extra = common::define_values(&mut b, Kind::Int, pressure);
    let mut locals = vec![Operand::from(x)];
    if y_in_state {
        locals.push(y.into());
    }
    let call = Instruction::new(Opcode::Call).with_call().with_state(FrameState {
        locals,
        stack: Vec::new(),
        locks: 0,
    });
    b.throwing(call, handler, 0);
    b.jump(after);

    b.switch_to(after);
    let mut values = extra.clone();
    values.push(x);
    let rest = common::sum_chain(&mut b, Kind::Int, &values);
    b.binary(Opcode::Add, normal, rest, Constant::int(1000));
    b.ret(Some(normal.into()));

    b.switch_to(handler);
    b.exception_handler(
        handler,
        vec![Phi {
            result: p,
            inputs: vec![Operand::Variable(y)],
        }],
    );
    let mut values = extra;
    values.push(x);
    values.push(p);
    let rest = common::sum_chain(&mut b, Kind::Int, &values);
    b.binary(Opcode::Sub, caught, Constant::int(0), rest);
    b.ret(Some(caught.into()));
    b.finish()
}

fn check_both_paths(mut lir: LirFunction, registers: &RegisterConfig) -> LirFunction {
    let normal = execute(&lir, registers, &[], false);
    let thrown = execute(&lir, registers, &[], true);
    allocate_checked(&mut lir, registers);
    assert_eq!(execute(&lir, registers, &[], false), normal, "normal path:\n{lir}");
    assert_eq!(execute(&lir, registers, &[], true), thrown, "exception path:\n{lir}");
    lir
}

#[test]
fn test_handler_receives_live_values_and_phi() {
    let registers = RegisterConfig::reference();
    let lir = check_both_paths(throwing_call(&registers, 0, true), &registers);

    let call = lir.blocks[0]
        .instructions
        .iter()
        .find(|inst| inst.opcode == Opcode::Call)
        .unwrap();
    let edge = &call.exception_edges[0];
    assert_eq!(edge.throwing_op, call.id);
    if let Some(code) = &edge.entry_code {
        let last = code.last().unwrap();
        assert_eq!(last.opcode, Opcode::Jump);
        assert_eq!(last.target, Some(edge.handler));
        assert!(code[..code.len() - 1].iter().all(Instruction::is_move));
    }
}

#[test]
fn test_handler_under_pressure() {
    let registers = RegisterConfig::reference();
    check_both_paths(throwing_call(&registers, 6, true), &registers);
}

#[test]
fn test_values_in_handler_survive_the_call() {
    let registers = RegisterConfig::reference();
    let lir = check_both_paths(throwing_call(&registers, 2, true), &registers);
    assert_eq!(execute(&lir, &registers, &[], true), -(1 + 2 + 10 + 20));
    assert_eq!(execute(&lir, &registers, &[], false), 1 + 2 + 10 + 1000);
}

#[test]
fn test_phi_input_read_only_by_the_handler() {
    let registers = RegisterConfig::reference();
    let lir = check_both_paths(throwing_call(&registers, 0, false), &registers);
    assert_eq!(execute(&lir, &registers, &[], true), -(10 + 20));
}

#[test]
fn test_phi_input_read_only_by_the_handler_under_pressure() {
    let registers = RegisterConfig::reference();
    let lir = check_both_paths(throwing_call(&registers, 6, false), &registers);
    assert_eq!(execute(&lir, &registers, &[], true), -(21 + 10 + 20));
}
