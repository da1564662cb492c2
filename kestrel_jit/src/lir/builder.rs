//! Incremental construction of [`LirFunction`]s.
//!
//! Blocks are created in linear-scan order and instructions are appended to the
//! current block. Control-flow edges are recorded as successors when jumps and
//! branches are emitted; predecessors are derived in [`LirBuilder::finish`].

use crate::backend::registers::RegisterConfig;
use crate::lir::{
    BlockId, Block, ExceptionEdge, FrameState, Instruction, Kind, LirFunction, Opcode, Operand,
    Phi, Variable,
};

/// Builder for a [`LirFunction`].
pub struct LirBuilder<'r> {
    registers: &'r RegisterConfig,
    func: LirFunction,
    current: Option<BlockId>,
}

impl<'r> LirBuilder<'r> {
    /// Start a function for a target.
    pub fn new(name: &str, registers: &'r RegisterConfig) -> Self {
        LirBuilder {
            registers,
            func: LirFunction::new(name, registers),
            current: None,
        }
    }

    /// The target.
    pub fn registers(&self) -> &'r RegisterConfig {
        self.registers
    }

    /// Allocate a new variable.
    pub fn variable(&mut self, kind: Kind) -> Variable {
        self.func.operands.new_variable(kind)
    }

    /// Append a new block and make it current.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block::new(id));
        self.current = Some(id);
        id
    }

    /// Make an existing block current.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn block_mut(&mut self) -> &mut Block {
        let id = match self.current {
            Some(id) => id,
            None => self.new_block(),
        };
        self.func.block_mut(id)
    }

    /// Append an instruction to the current block.
    pub fn push(&mut self, inst: Instruction) {
        self.block_mut().instructions.push(inst);
    }

    /// Copy `from` into `to`.
    pub fn mov(&mut self, from: impl Into<Operand>, to: impl Into<Operand>) {
        self.push(Instruction::mov(from.into(), to.into()));
    }

    /// `result = opcode(left, right)`.
    pub fn binary(
        &mut self,
        opcode: Opcode,
        result: Variable,
        left: impl Into<Operand>,
        right: impl Into<Operand>,
    ) {
        self.push(
            Instruction::new(opcode)
                .with_inputs([left.into(), right.into()])
                .with_outputs([result.into()]),
        );
    }

    /// Compare two operands.
    pub fn cmp(&mut self, left: impl Into<Operand>, right: impl Into<Operand>) {
        self.push(Instruction::new(Opcode::Cmp).with_inputs([left.into(), right.into()]));
    }

    /// Unconditional jump ending the current block.
    pub fn jump(&mut self, target: BlockId) {
        let block = self.block_mut();
        block.instructions.push(Instruction::jump(target));
        block.successors.push(target);
    }

    /// Conditional branch ending the current block.
    pub fn branch(&mut self, if_true: BlockId, if_false: BlockId) {
        let block = self.block_mut();
        block.instructions.push(Instruction {
            target: Some(if_true),
            ..Instruction::new(Opcode::Branch)
        });
        block.instructions.push(Instruction::jump(if_false));
        block.successors.extend([if_true, if_false]);
    }

    /// Return, optionally with a value.
    pub fn ret(&mut self, value: Option<Operand>) {
        self.push(Instruction::new(Opcode::Return).with_inputs(value));
    }

    /// Call with arguments; the result arrives in the return register and is moved to `result`.
    pub fn call(&mut self, args: &[Operand], result: Option<Variable>) {
        let ret = result.and_then(|v| {
            self.registers
                .return_register(v.kind.register_class())
                .map(|reg| Operand::Register(reg, v.kind))
        });
        self.push(
            Instruction::new(Opcode::Call)
                .with_inputs(args.iter().copied())
                .with_outputs(ret)
                .with_call(),
        );
        if let (Some(ret), Some(result)) = (ret, result) {
            self.mov(ret, result);
        }
    }

    /// Safepoint poll recording a frame state.
    pub fn safepoint(&mut self, state: FrameState) {
        self.push(Instruction::new(Opcode::Safepoint).with_state(state));
    }

    /// Append an instruction that may throw to `handler`.
    pub fn throwing(&mut self, mut inst: Instruction, handler: BlockId, phi_operand: usize) {
        inst.exception_edges.push(ExceptionEdge {
            handler,
            phi_operand,
            throwing_op: None,
            entry_code: None,
        });
        let block = self.block_mut();
        if !block.exception_handlers.contains(&handler) {
            block.exception_handlers.push(handler);
        }
        block.instructions.push(inst);
    }

    /// Mark a block as an exception handler entry with phis.
    pub fn exception_handler(&mut self, block: BlockId, phis: Vec<Phi>) {
        let block = self.func.block_mut(block);
        block.flags.exception_entry = true;
        block.phis = phis;
    }

    /// Declare a loop over `blocks`, with the back edge in `loop_end`. Returns the loop index.
    pub fn add_loop(&mut self, blocks: &[BlockId], loop_end: BlockId) -> u32 {
        let index = self.func.num_loops;
        self.func.num_loops += 1;
        for &b in blocks {
            let block = self.func.block_mut(b);
            block.loop_index = Some(index);
            block.loop_depth += 1;
        }
        self.func.block_mut(loop_end).flags.loop_end = true;
        index
    }

    /// Mark a block as an on-stack-replacement entry.
    pub fn osr_entry(&mut self, block: BlockId) {
        self.func.block_mut(block).flags.osr_entry = true;
    }

    /// Require `var` to be kept in its stack slot from its definition on.
    pub fn must_start_in_memory(&mut self, var: Variable) {
        self.func.operands.set_must_start_in_memory(var);
    }

    /// Require `var` to never be loaded into a register.
    pub fn must_stay_in_memory(&mut self, var: Variable) {
        self.func.operands.set_must_stay_in_memory(var);
    }

    /// Finish the function, deriving predecessor lists.
    pub fn finish(mut self) -> LirFunction {
        let edges: Vec<(BlockId, BlockId)> = self
            .func
            .blocks
            .iter()
            .flat_map(|b| b.successors.iter().map(move |&s| (b.id, s)))
            .collect();
        for (from, to) in edges {
            let preds = &mut self.func.block_mut(to).predecessors;
            if !preds.contains(&from) {
                preds.push(from);
            }
        }
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_edges() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("diamond", &registers);
        let entry = b.new_block();
        let left = b.new_block();
        let right = b.new_block();
        let join = b.new_block();
        b.switch_to(entry);
        b.branch(left, right);
        b.switch_to(left);
        b.jump(join);
        b.switch_to(right);
        b.jump(join);
        b.switch_to(join);
        b.ret(None);
        let func = b.finish();

        assert_eq!(func.block(entry).successors, vec![left, right]);
        assert_eq!(func.block(join).predecessors, vec![left, right]);
        assert_eq!(func.block(left).instructions[0].opcode, Opcode::Label);
        assert!(func.block(left).ends_with_branch());
    }

    #[test]
    fn test_call_moves_result_from_return_register() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("call", &registers);
        let v = b.variable(Kind::Int);
        b.new_block();
        b.call(&[], Some(v));
        let func = b.finish();
        let insts = &func.blocks[0].instructions;
        assert!(insts[1].has_call);
        assert_eq!(insts[2].move_result(), Some(Operand::Variable(v)));
    }
}
