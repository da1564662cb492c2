//! Liveness Analysis
//!
//! Computes per-block live sets over dense operand numbers.
//!
//! # Algorithm
//!
//! 1. For each block, compute the local gen set (read before written in the block)
//!    and kill set (written in the block). Values read by frame states count as reads.
//! 2. Iterate backwards over the blocks until a fixed point:
//!    `live_out = ∪ live_in(successors and exception handlers)` and
//!    `live_in = gen ∪ (live_out − kill)`.
//! 3. Check that nothing is live on entry to the function.
//!
//! While computing local sets the analysis also records which variables are touched
//! inside which loop; the interval builder uses that to mark uses at loop ends.

use crate::lir::{BlockId, LirFunction, Operand};
use crate::regalloc::operand_pool::OperandPool;
use kestrel_core::{BitMap, BitMap2D, CompileError, CompileResult, UndefinedOperand};
use log::{debug, trace, warn};

/// Live sets of one block.
#[derive(Debug, Clone)]
pub struct BlockLiveness {
    /// Read before any write in the block.
    pub live_gen: BitMap,
    /// Written in the block.
    pub live_kill: BitMap,
    /// Live on entry.
    pub live_in: BitMap,
    /// Live on exit.
    pub live_out: BitMap,
}

impl BlockLiveness {
    fn new(size: usize) -> Self {
        BlockLiveness {
            live_gen: BitMap::new(size),
            live_kill: BitMap::new(size),
            live_in: BitMap::new(size),
            live_out: BitMap::new(size),
        }
    }
}

/// Liveness of every block of a function.
#[derive(Debug, Clone)]
pub struct LivenessAnalysis {
    blocks: Vec<BlockLiveness>,
    interval_in_loop: BitMap2D,
    iterations: u32,
}

impl LivenessAnalysis {
    /// Run local and global liveness and verify the entry block.
    pub fn compute(lir: &LirFunction, max_iterations: u32) -> CompileResult<Self> {
        let mut analysis = Self::compute_local(lir)?;
        analysis.compute_global(lir, max_iterations)?;
        analysis.check_entry_block(lir)?;
        Ok(analysis)
    }

    fn compute_local(lir: &LirFunction) -> CompileResult<Self> {
        let pool = &lir.operands;
        let size = pool.size() as usize;
        let num_loops = lir.num_loops as usize;
        let mut interval_in_loop = BitMap2D::new(size, num_loops);
        let mut blocks = Vec::with_capacity(lir.blocks.len());

        let variable_number = |op: &Operand| -> Option<usize> {
            op.as_variable().map(|v| pool.variable_number(v) as usize)
        };

        for block in &lir.blocks {
            let mut sets = BlockLiveness::new(size);
            let loop_index = match block.loop_index {
                Some(index) if (index as usize) < num_loops => Some(index as usize),
                Some(index) => {
                    return Err(CompileError::malformed(format!(
                        "block {} is in loop {index} but the function has {num_loops} loops",
                        block.id
                    )));
                }
                None => None,
            };

            if block.flags.exception_entry {
                for phi in &block.phis {
                    sets.live_kill.set(pool.variable_number(phi.result) as usize);
                }
            }

            for inst in block.instructions.iter().skip(1) {
                for operand in &inst.inputs {
                    if let Some(n) = variable_number(operand) {
                        if !sets.live_kill.get(n) {
                            sets.live_gen.set(n);
                            trace!("  {}: setting live_gen for operand {n}", block.id);
                        }
                        if let Some(l) = loop_index {
                            interval_in_loop.set(n, l);
                        }
                    }
                }

                let state_values = inst.info.iter().flat_map(|info| info.state.values().copied());
                for value in state_values.chain(lir.handler_phi_inputs(inst)) {
                    if let Some(n) = variable_number(&value) {
                        if !sets.live_kill.get(n) {
                            sets.live_gen.set(n);
                        }
                    }
                }

                for operand in inst.temps.iter().chain(inst.outputs.iter()) {
                    if let Some(n) = variable_number(operand) {
                        sets.live_kill.set(n);
                        if let Some(l) = loop_index {
                            interval_in_loop.set(n, l);
                        }
                    }
                }
            }

            trace!(
                "local liveness of {}: gen {} kill {}",
                block.id, sets.live_gen, sets.live_kill
            );
            blocks.push(sets);
        }

        Ok(LivenessAnalysis {
            blocks,
            interval_in_loop,
            iterations: 0,
        })
    }

    fn compute_global(&mut self, lir: &LirFunction, max_iterations: u32) -> CompileResult<()> {
        let size = lir.operands.size() as usize;
        let mut scratch = BitMap::new(size);
        let mut iteration = 0u32;

        loop {
            let mut changed = false;

            for (i, block) in lir.blocks.iter().enumerate().rev() {
                let mut changed_in_block = false;

                if !block.successors.is_empty() || !block.exception_handlers.is_empty() {
                    scratch.clear_all();
                    for succ in block.successors.iter().chain(block.exception_handlers.iter()) {
                        scratch.set_union(&self.blocks[succ.index()].live_in);
                    }
                    if scratch != self.blocks[i].live_out {
                        std::mem::swap(&mut self.blocks[i].live_out, &mut scratch);
                        changed = true;
                        changed_in_block = true;
                    }
                }

                if iteration == 0 || changed_in_block {
                    let BlockLiveness {
                        live_gen,
                        live_kill,
                        live_in,
                        live_out,
                    } = &mut self.blocks[i];
                    live_in.set_from(live_out);
                    live_in.set_difference(live_kill);
                    live_in.set_union(live_gen);
                }
            }

            iteration += 1;
            if changed && iteration > max_iterations {
                warn!(
                    "{}: global liveness did not converge after {iteration} iterations",
                    lir.name
                );
                return Err(CompileError::LivenessDiverged {
                    iterations: iteration,
                });
            }
            if !changed {
                break;
            }
        }

        self.iterations = iteration;
        debug!("{}: liveness converged in {iteration} iterations", lir.name);
        Ok(())
    }

    fn check_entry_block(&self, lir: &LirFunction) -> CompileResult<()> {
        let Some(entry) = self.blocks.first() else {
            return Ok(());
        };
        if entry.live_in.is_clear() {
            return Ok(());
        }

        let operands: Vec<UndefinedOperand> = entry
            .live_in
            .iter()
            .map(|operand| UndefinedOperand {
                operand: operand as u32,
                used_in: self.blocks_where(operand, |sets| &sets.live_gen),
                defined_in: self.blocks_where(operand, |sets| &sets.live_kill),
            })
            .collect();
        for undefined in &operands {
            warn!(
                "{}: {} ({})",
                lir.name,
                undefined,
                describe(&lir.operands, undefined.operand)
            );
        }
        Err(CompileError::UndefinedOperands { operands })
    }

    fn blocks_where(&self, operand: usize, set: impl Fn(&BlockLiveness) -> &BitMap) -> Vec<u32> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, sets)| set(sets).get(operand))
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Live-in set of a block.
    #[inline]
    pub fn live_in(&self, block: BlockId) -> &BitMap {
        &self.blocks[block.index()].live_in
    }

    /// Live-out set of a block.
    #[inline]
    pub fn live_out(&self, block: BlockId) -> &BitMap {
        &self.blocks[block.index()].live_out
    }

    /// Local sets of a block.
    #[inline]
    pub fn block(&self, block: BlockId) -> &BlockLiveness {
        &self.blocks[block.index()]
    }

    /// Whether the operand is read or written inside a loop.
    #[inline]
    pub fn is_interval_in_loop(&self, operand: u32, loop_index: u32) -> bool {
        self.interval_in_loop
            .at(operand as usize, loop_index as usize)
    }

    /// Global iterations until the fixed point.
    #[inline]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

fn describe(pool: &OperandPool, number: u32) -> String {
    pool.operand_for(number).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registers::RegisterConfig;
    use crate::lir::{Constant, FrameState, Kind, LirBuilder, Opcode};

    fn number(lir: &LirFunction, op: impl Into<Operand>) -> usize {
        lir.operands.operand_number(&op.into()).unwrap() as usize
    }

    #[test]
    fn test_straight_line_local_sets() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("straight", &registers);
        let a = b.variable(Kind::Int);
        let c = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), a);
        b.binary(Opcode::Add, c, a, a);
        b.ret(Some(c.into()));
        let lir = b.finish();

        let live = LivenessAnalysis::compute(&lir, 50).unwrap();
        let sets = live.block(BlockId(0));
        assert!(sets.live_gen.is_clear());
        assert!(sets.live_kill.get(number(&lir, a)));
        assert!(sets.live_kill.get(number(&lir, c)));
        assert!(live.live_in(BlockId(0)).is_clear());
    }

    #[test]
    fn test_value_live_across_blocks() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("across", &registers);
        let a = b.variable(Kind::Int);
        let b0 = b.new_block();
        let b1 = b.new_block();
        b.switch_to(b0);
        b.mov(Constant::int(1), a);
        b.jump(b1);
        b.switch_to(b1);
        b.ret(Some(a.into()));
        let lir = b.finish();

        let live = LivenessAnalysis::compute(&lir, 50).unwrap();
        assert!(live.live_out(b0).get(number(&lir, a)));
        assert!(live.live_in(b1).get(number(&lir, a)));
        assert!(live.block(b1).live_gen.get(number(&lir, a)));
    }

    #[test]
    fn test_frame_state_values_are_reads() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("state", &registers);
        let a = b.variable(Kind::Object);
        let b0 = b.new_block();
        let b1 = b.new_block();
        b.switch_to(b0);
        b.mov(Constant::null(), a);
        b.jump(b1);
        b.switch_to(b1);
        b.safepoint(FrameState {
            locals: vec![a.into()],
            ..FrameState::default()
        });
        b.ret(None);
        let lir = b.finish();

        let live = LivenessAnalysis::compute(&lir, 50).unwrap();
        assert!(live.live_in(b1).get(number(&lir, a)));
    }

    #[test]
    fn test_loop_membership_and_fixpoint() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("loop", &registers);
        let i = b.variable(Kind::Int);
        let entry = b.new_block();
        let header = b.new_block();
        let body = b.new_block();
        let exit = b.new_block();
        b.switch_to(entry);
        b.mov(Constant::int(0), i);
        b.jump(header);
        b.switch_to(header);
        b.cmp(i, Constant::int(10));
        b.branch(body, exit);
        b.switch_to(body);
        b.binary(Opcode::Add, i, i, Constant::int(1));
        b.jump(header);
        b.switch_to(exit);
        b.ret(Some(i.into()));
        let loop_index = b.add_loop(&[header, body], body);
        let lir = b.finish();

        let live = LivenessAnalysis::compute(&lir, 50).unwrap();
        let n = number(&lir, i);
        assert!(live.live_in(header).get(n));
        assert!(live.live_out(body).get(n));
        assert!(live.is_interval_in_loop(n as u32, loop_index));
        assert!(live.iterations() >= 2);
    }

    #[test]
    fn test_use_before_definition_bails_out() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("undefined", &registers);
        let a = b.variable(Kind::Int);
        let b0 = b.new_block();
        let b1 = b.new_block();
        b.switch_to(b0);
        b.jump(b1);
        b.switch_to(b1);
        b.ret(Some(a.into()));
        let lir = b.finish();

        let err = LivenessAnalysis::compute(&lir, 50).unwrap_err();
        match err {
            CompileError::UndefinedOperands { operands } => {
                assert_eq!(operands.len(), 1);
                assert_eq!(operands[0].operand as usize, number(&lir, a));
                assert_eq!(operands[0].used_in, vec![1]);
                assert!(operands[0].defined_in.is_empty());
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_iteration_limit() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("limit", &registers);
        let i = b.variable(Kind::Int);
        let entry = b.new_block();
        let header = b.new_block();
        let body = b.new_block();
        let exit = b.new_block();
        b.switch_to(entry);
        b.mov(Constant::int(0), i);
        b.jump(header);
        b.switch_to(header);
        b.branch(body, exit);
        b.switch_to(body);
        b.binary(Opcode::Add, i, i, Constant::int(1));
        b.jump(header);
        b.switch_to(exit);
        b.ret(Some(i.into()));
        let lir = b.finish();

        // The back edge needs a second pass that the limit does not allow.
        let err = LivenessAnalysis::compute(&lir, 0).unwrap_err();
        assert!(matches!(err, CompileError::LivenessDiverged { iterations: 1 }));
    }
}
