//! Register Priority Policies
//!
//! The interval builder asks a [`RegisterPriorityPolicy`] how strongly an input
//! operand needs a register. Moves are classified by the builder itself; every other
//! input goes through the policy, which lets a target relax inputs its instruction
//! set can read straight from memory.
//!
//! # Policies
//!
//! - [`DefaultPriorityPolicy`]: every input must be in a register
//! - [`TwoAddressPriorityPolicy`]: two-address targets whose arithmetic may take its
//!   second source from memory, and whose conditional moves accept stack operands

use crate::lir::{Instruction, Kind, Opcode, Operand};
use crate::regalloc::interval::RegisterPriority;

/// Classifies the register need of instruction inputs.
pub trait RegisterPriorityPolicy: Send + Sync {
    /// Priority of `operand`, an input of `inst` that is not a move.
    fn input_priority(&self, inst: &Instruction, operand: &Operand) -> RegisterPriority {
        let _ = (inst, operand);
        RegisterPriority::MustHaveRegister
    }

    /// Policy name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Every input must be in a register.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPriorityPolicy;

impl RegisterPriorityPolicy for DefaultPriorityPolicy {
    fn name(&self) -> &'static str {
        "default"
    }
}

/// Relaxations for two-address instruction sets with memory operands.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoAddressPriorityPolicy;

impl TwoAddressPriorityPolicy {
    /// Whether `opcode` on values of `kind` may read its second source from memory.
    /// Long operands always need registers.
    fn has_memory_form(opcode: Opcode, kind: Kind) -> bool {
        if kind.is_float() {
            matches!(opcode, Opcode::Cmp | Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
        } else {
            kind != Kind::Long
                && matches!(
                    opcode,
                    Opcode::Cmp | Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor
                )
        }
    }
}

impl RegisterPriorityPolicy for TwoAddressPriorityPolicy {
    fn input_priority(&self, inst: &Instruction, operand: &Operand) -> RegisterPriority {
        if inst.opcode == Opcode::Cmove {
            return RegisterPriority::ShouldHaveRegister;
        }
        if Self::has_memory_form(inst.opcode, operand.kind()) {
            if let [first, second, ..] = inst.inputs.as_slice() {
                let result_in_register = inst
                    .outputs
                    .first()
                    .is_none_or(Operand::is_variable_or_register);
                if second == operand
                    && first != operand
                    && first.is_variable_or_register()
                    && result_in_register
                {
                    return RegisterPriority::ShouldHaveRegister;
                }
            }
        }
        RegisterPriority::MustHaveRegister
    }

    fn name(&self) -> &'static str {
        "two-address"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{Constant, Variable};

    fn var(index: u32, kind: Kind) -> Operand {
        Operand::Variable(Variable { index, kind })
    }

    #[test]
    fn test_default_requires_registers() {
        let inst = Instruction::new(Opcode::Add)
            .with_inputs([var(0, Kind::Int), var(1, Kind::Int)])
            .with_outputs([var(2, Kind::Int)]);
        assert_eq!(
            DefaultPriorityPolicy.input_priority(&inst, &var(1, Kind::Int)),
            RegisterPriority::MustHaveRegister
        );
    }

    #[test]
    fn test_two_address_relaxes_second_source() {
        let policy = TwoAddressPriorityPolicy;
        let inst = Instruction::new(Opcode::Add)
            .with_inputs([var(0, Kind::Int), var(1, Kind::Int)])
            .with_outputs([var(2, Kind::Int)]);
        assert_eq!(
            policy.input_priority(&inst, &var(1, Kind::Int)),
            RegisterPriority::ShouldHaveRegister
        );
        assert_eq!(
            policy.input_priority(&inst, &var(0, Kind::Int)),
            RegisterPriority::MustHaveRegister
        );
    }

    fn second_source(opcode: Opcode, kind: Kind) -> RegisterPriority {
        let inst = Instruction::new(opcode)
            .with_inputs([var(0, kind), var(1, kind)])
            .with_outputs([var(2, kind)]);
        TwoAddressPriorityPolicy.input_priority(&inst, &var(1, kind))
    }

    #[test]
    fn test_two_address_float_forms() {
        for opcode in [Opcode::Cmp, Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Div] {
            assert_eq!(second_source(opcode, Kind::Double), RegisterPriority::ShouldHaveRegister, "{opcode}");
            assert_eq!(second_source(opcode, Kind::Float), RegisterPriority::ShouldHaveRegister, "{opcode}");
        }
        assert_eq!(second_source(Opcode::And, Kind::Double), RegisterPriority::MustHaveRegister);
    }

    #[test]
    fn test_two_address_integer_forms() {
        for opcode in [Opcode::Cmp, Opcode::Add, Opcode::Sub, Opcode::And, Opcode::Or, Opcode::Xor] {
            assert_eq!(second_source(opcode, Kind::Int), RegisterPriority::ShouldHaveRegister, "{opcode}");
            assert_eq!(second_source(opcode, Kind::Long), RegisterPriority::MustHaveRegister, "{opcode}");
        }
        assert_eq!(second_source(Opcode::Mul, Kind::Int), RegisterPriority::MustHaveRegister);
        assert_eq!(second_source(Opcode::Div, Kind::Int), RegisterPriority::MustHaveRegister);
    }

    #[test]
    fn test_two_address_keeps_constant_and_repeated_forms() {
        let policy = TwoAddressPriorityPolicy;
        let from_constant = Instruction::new(Opcode::Sub)
            .with_inputs([Operand::Constant(Constant::int(1)), var(1, Kind::Int)])
            .with_outputs([var(2, Kind::Int)]);
        assert_eq!(
            policy.input_priority(&from_constant, &var(1, Kind::Int)),
            RegisterPriority::MustHaveRegister
        );

        let squared = Instruction::new(Opcode::Add)
            .with_inputs([var(1, Kind::Double), var(1, Kind::Double)])
            .with_outputs([var(2, Kind::Double)]);
        assert_eq!(
            policy.input_priority(&squared, &var(1, Kind::Double)),
            RegisterPriority::MustHaveRegister
        );
    }

    #[test]
    fn test_two_address_cmove() {
        let inst = Instruction::new(Opcode::Cmove)
            .with_inputs([var(0, Kind::Int), var(1, Kind::Int)])
            .with_outputs([var(2, Kind::Int)]);
        assert_eq!(
            TwoAddressPriorityPolicy.input_priority(&inst, &var(0, Kind::Int)),
            RegisterPriority::ShouldHaveRegister
        );
    }
}
