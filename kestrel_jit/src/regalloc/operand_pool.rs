//! Dense numbering of allocatable operands.
//!
//! Physical registers take numbers `0..num_registers`, variables follow. Interval
//! tables and liveness bitmaps are indexed by these numbers.

use crate::backend::registers::{Register, RegisterConfig};
use crate::lir::{Kind, Operand, Variable};

#[derive(Debug, Clone, Copy)]
struct VariableInfo {
    kind: Kind,
    must_start_in_memory: bool,
    must_stay_in_memory: bool,
}

/// Registry of the registers and variables of one function.
#[derive(Debug, Clone)]
pub struct OperandPool {
    registers: Vec<Register>,
    variables: Vec<VariableInfo>,
}

impl OperandPool {
    /// Pool for a target with no variables yet.
    pub fn new(registers: &RegisterConfig) -> Self {
        OperandPool {
            registers: registers.registers().to_vec(),
            variables: Vec::new(),
        }
    }

    /// Number of physical registers.
    #[inline]
    pub fn num_registers(&self) -> u32 {
        self.registers.len() as u32
    }

    /// Number of variables.
    #[inline]
    pub fn num_variables(&self) -> u32 {
        self.variables.len() as u32
    }

    /// Total operand numbers in use.
    #[inline]
    pub fn size(&self) -> u32 {
        self.num_registers() + self.num_variables()
    }

    /// Create a variable.
    pub fn new_variable(&mut self, kind: Kind) -> Variable {
        let index = self.variables.len() as u32;
        self.variables.push(VariableInfo {
            kind,
            must_start_in_memory: false,
            must_stay_in_memory: false,
        });
        Variable { index, kind }
    }

    /// Operand number of a variable.
    #[inline]
    pub fn variable_number(&self, var: Variable) -> u32 {
        self.num_registers() + var.index
    }

    /// Operand number of a register or variable.
    pub fn operand_number(&self, operand: &Operand) -> Option<u32> {
        match operand {
            Operand::Register(reg, _) => Some(u32::from(reg.number())),
            Operand::Variable(var) => Some(self.variable_number(*var)),
            _ => None,
        }
    }

    /// Operand for a number.
    pub fn operand_for(&self, number: u32) -> Operand {
        match self.registers.get(number as usize) {
            Some(&reg) => Operand::Register(reg, Kind::Illegal),
            None => self
                .variable_at(number)
                .map_or(Operand::Illegal, Operand::Variable),
        }
    }

    /// Variable for a number, if the number denotes one.
    pub fn variable_at(&self, number: u32) -> Option<Variable> {
        let index = number.checked_sub(self.num_registers())?;
        self.variables.get(index as usize).map(|info| Variable {
            index,
            kind: info.kind,
        })
    }

    fn info_mut(&mut self, var: Variable) -> &mut VariableInfo {
        &mut self.variables[var.index as usize]
    }

    /// Require the variable's value to be stored to its stack slot at definition.
    pub fn set_must_start_in_memory(&mut self, var: Variable) {
        self.info_mut(var).must_start_in_memory = true;
    }

    /// Require the variable to never be loaded into a register.
    pub fn set_must_stay_in_memory(&mut self, var: Variable) {
        let info = self.info_mut(var);
        info.must_start_in_memory = true;
        info.must_stay_in_memory = true;
    }

    /// Whether the variable must start in memory.
    pub fn must_start_in_memory(&self, var: Variable) -> bool {
        self.variables
            .get(var.index as usize)
            .is_some_and(|info| info.must_start_in_memory)
    }

    /// Whether the variable must stay in memory.
    pub fn must_stay_in_memory(&self, var: Variable) -> bool {
        self.variables
            .get(var.index as usize)
            .is_some_and(|info| info.must_stay_in_memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registers::reference::R3;

    #[test]
    fn test_numbering() {
        let mut pool = OperandPool::new(&RegisterConfig::reference());
        let v = pool.new_variable(Kind::Long);
        assert_eq!(pool.variable_number(v), 16);
        assert_eq!(pool.operand_number(&Operand::Register(R3, Kind::Int)), Some(3));
        assert_eq!(pool.operand_for(16), Operand::Variable(v));
        assert_eq!(pool.variable_at(3), None);
        assert_eq!(pool.size(), 17);
    }

    #[test]
    fn test_memory_flags() {
        let mut pool = OperandPool::new(&RegisterConfig::reference());
        let a = pool.new_variable(Kind::Int);
        let b = pool.new_variable(Kind::Int);
        pool.set_must_start_in_memory(a);
        pool.set_must_stay_in_memory(b);
        assert!(pool.must_start_in_memory(a) && !pool.must_stay_in_memory(a));
        assert!(pool.must_start_in_memory(b) && pool.must_stay_in_memory(b));
    }
}
