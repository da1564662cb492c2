//! Data-Flow Resolution
//!
//! After the walk, a value may live in different locations at the two ends of a
//! control-flow edge. These passes insert the moves that reconcile them, on
//! normal edges and on the edges from throwing instructions to their exception
//! handlers.

use super::interval::ProgPoint;
use super::linear_scan::LinearScan;
use super::move_resolver::MoveResolver;
use crate::lir::{BlockId, Instruction, Location, Operand};
use kestrel_core::{BitMap, CompileError, CompileResult};
use log::{debug, trace};

impl LinearScan<'_> {
    /// Insert moves on every edge where a live value changes location.
    pub(crate) fn resolve_data_flow(&mut self) -> CompileResult<()> {
        let num_blocks = self.lir.blocks.len();
        let mut resolver = MoveResolver::new(self.registers.num_registers());
        let mut block_completed = BitMap::new(num_blocks);
        let mut already_resolved = BitMap::new(num_blocks);

        if self.config.eliminate_empty_block_moves {
            for b in 0..num_blocks {
                let block = self.lir.block(BlockId(b as u32));
                let is_empty = block.predecessors.len() == 1
                    && block.successors.len() == 1
                    && block.exception_handlers.is_empty()
                    && !block.flags.exception_entry
                    && block.instructions.len() == 2;
                if !is_empty {
                    continue;
                }
                let (pred, sux) = (block.predecessors[0], block.successors[0]);
                // never optimize two consecutive blocks
                if block_completed.get(pred.index()) || block_completed.get(sux.index()) {
                    continue;
                }
                trace!("optimizing empty block B{b} (pred {pred}, sux {sux})");
                block_completed.set(b);

                self.collect_mappings(pred, sux, &mut resolver)?;
                if resolver.has_mappings() {
                    resolver.set_insert_position(BlockId(b as u32), 0);
                    resolver.resolve_and_append_moves(self)?;
                }
            }
        }

        for b in 0..num_blocks {
            if block_completed.get(b) {
                continue;
            }
            let from = BlockId(b as u32);
            already_resolved.set_from(&block_completed);

            let successors = self.lir.block(from).successors.clone();
            for to in successors {
                // duplicate edges are resolved once
                if already_resolved.get(to.index()) {
                    continue;
                }
                already_resolved.set(to.index());

                self.collect_mappings(from, to, &mut resolver)?;
                if resolver.has_mappings() {
                    let (block, after) = self.find_insert_position(from, to)?;
                    resolver.set_insert_position(block, after);
                    resolver.resolve_and_append_moves(self)?;
                }
            }
        }

        debug!("resolved data flow: {} moves so far", self.stats.moves_inserted);
        Ok(())
    }

    fn collect_mappings(&self, from: BlockId, to: BlockId, resolver: &mut MoveResolver) -> CompileResult<()> {
        debug_assert!(!resolver.has_mappings(), "move resolver not empty");
        for number in self.liveness.live_in(to).iter() {
            let number = number as u32;
            debug_assert!(
                self.liveness.live_out(from).get(number as usize),
                "operand {number} not live at edge {from} -> {to}"
            );
            let from_interval = self.interval_at_block_end(from, number)?;
            let to_interval = self.interval_at_block_begin(to, number)?;
            if from_interval != to_interval
                && self.intervals[from_interval].location() != self.intervals[to_interval].location()
            {
                resolver.add_mapping(self, from_interval, to_interval);
            }
        }
        Ok(())
    }

    /// Where the moves of an edge go: before the source block's final jump, or at
    /// the start of the target block when the source has several successors.
    fn find_insert_position(&self, from: BlockId, to: BlockId) -> CompileResult<(BlockId, usize)> {
        let from_block = self.lir.block(from);
        if from_block.successors.len() <= 1 {
            let len = from_block.instructions.len();
            let after = if from_block.ends_with_branch() { len - 2 } else { len - 1 };
            trace!("inserting moves at end of {from}");
            return Ok((from, after));
        }

        let to_block = self.lir.block(to);
        if to_block.predecessors.iter().any(|&p| p != from) {
            return Err(CompileError::malformed(format!(
                "critical edge {from} -> {to} must be split before allocation"
            )));
        }
        trace!("inserting moves at beginning of {to}");
        Ok((to, 0))
    }

    // -------------------------------------------------------------------------
    // Exception handlers
    // -------------------------------------------------------------------------

    /// Resolve handler entries and the edges from throwing instructions.
    pub(crate) fn resolve_exception_handlers(&mut self) -> CompileResult<()> {
        let mut resolver = MoveResolver::new(self.registers.num_registers());

        for b in 0..self.lir.blocks.len() {
            let block = BlockId(b as u32);
            if self.lir.block(block).flags.exception_entry {
                self.resolve_exception_entry(block, &mut resolver)?;
            }
        }

        let mut edges = Vec::new();
        for block in &self.lir.blocks {
            for (j, inst) in block.instructions.iter().enumerate().skip(1) {
                if let Some(op_id) = inst.id {
                    for e in 0..inst.exception_edges.len() {
                        edges.push((block.id, j, e, op_id));
                    }
                }
            }
        }

        for (block, j, e, op_id) in edges {
            let entry_code = self.resolve_exception_edge(block, j, e, op_id, &mut resolver)?;
            let edge = &mut self.lir.block_mut(block).instructions[j].exception_edges[e];
            edge.throwing_op = Some(op_id);
            edge.entry_code = entry_code;
        }
        Ok(())
    }

    /// Give values that are always in memory a stack-resident first position at a
    /// handler entry, so edges into the handler can leave them in memory.
    fn resolve_exception_entry(&mut self, block: BlockId, resolver: &mut MoveResolver) -> CompileResult<()> {
        debug_assert!(!resolver.has_mappings(), "move resolver not empty");

        let mut numbers: Vec<u32> = self.liveness.live_in(block).iter().map(|n| n as u32).collect();
        for phi in &self.lir.block(block).phis {
            numbers.push(self.lir.operands.variable_number(phi.result));
        }

        for number in numbers {
            if self.intervals.get(number).is_none() {
                // a phi that is never used has no interval
                continue;
            }
            let mut id = self.interval_at_block_begin(block, number)?;
            let Some(location) = self.intervals[id].location() else {
                continue;
            };
            if !location.is_register() || !self.intervals.always_in_memory(id) {
                continue;
            }

            let from_op_id = self.numbering.first_id(block);
            let to_op_id = from_op_id + 1;
            if self.intervals[id].from() != from_op_id {
                id = self.intervals.split(id, from_op_id, &mut self.lir.operands)?;
                self.intervals[id].assign_location(location);
            }

            let mut spilled = id;
            if self.intervals[id].to() != to_op_id {
                spilled = self.intervals.split_from_start(id, to_op_id, &mut self.lir.operands)?;
                resolver.add_mapping(self, spilled, id);
            }
            self.assign_spill_slot(spilled);
            trace!("exception entry {block}: {} starts in memory", self.intervals[spilled]);
        }

        if resolver.has_mappings() {
            resolver.set_insert_position(block, 0);
            resolver.resolve_and_append_moves(self)?;
        }
        Ok(())
    }

    /// Moves that carry live values from a throwing instruction into its handler.
    fn resolve_exception_edge(
        &mut self,
        block: BlockId,
        index: usize,
        edge_index: usize,
        throwing_op: ProgPoint,
        resolver: &mut MoveResolver,
    ) -> CompileResult<Option<Vec<Instruction>>> {
        let edge = &self.lir.block(block).instructions[index].exception_edges[edge_index];
        let (handler, phi_operand) = (edge.handler, edge.phi_operand);
        trace!("resolving exception handler {handler}: throwing op {throwing_op}");

        let live_in: Vec<u32> = self.liveness.live_in(handler).iter().map(|n| n as u32).collect();
        for number in live_in {
            if self.intervals.get(number).is_none() {
                continue;
            }
            let to = self.interval_at_block_begin(handler, number)?;
            let from = self.interval_at_op_id(number, throwing_op)?;
            if from == to {
                continue;
            }
            // a value whose slot is always correct is read from memory by the handler
            let slot_is_target = self.intervals.always_in_memory(from)
                && self.intervals.spill_slot(from).map(Location::Stack) == self.intervals[to].location();
            if !slot_is_target {
                resolver.add_mapping(self, from, to);
            }
        }

        let phis: Vec<(u32, Operand)> = self
            .lir
            .block(handler)
            .phis
            .iter()
            .filter_map(|phi| {
                let input = phi.inputs.get(phi_operand).copied()?;
                Some((self.lir.operands.variable_number(phi.result), input))
            })
            .collect();
        for (number, input) in phis {
            if self.intervals.get(number).is_none() {
                continue;
            }
            let to = self.interval_at_block_begin(handler, number)?;
            resolver.set_multiple_reads_allowed();
            match input {
                Operand::Constant(_) => resolver.add_constant_mapping(self, input, to),
                Operand::Variable(_) => {
                    let input_number = self
                        .lir
                        .operands
                        .operand_number(&input)
                        .ok_or_else(|| CompileError::malformed(format!("phi input {input} has no number")))?;
                    let from = self.interval_at_op_id(input_number, throwing_op)?;
                    if from != to {
                        resolver.add_mapping(self, from, to);
                    }
                }
                other => {
                    return Err(CompileError::malformed(format!(
                        "unsupported phi input {other} for handler {handler}"
                    )));
                }
            }
        }

        if !resolver.has_mappings() {
            return Ok(None);
        }
        let mut code = resolver.resolve_mappings(self)?;
        code.push(Instruction::jump(handler));
        Ok(Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::super::linear_scan::Numbering;
    use super::super::liveness::LivenessAnalysis;
    use super::super::{AllocatorConfig, DefaultPriorityPolicy};
    use super::*;
    use crate::backend::registers::RegisterConfig;
    use crate::lir::{Constant, Kind, LirBuilder, LirFunction, Opcode};

    /// b0 branches to b1 and b2; b1 falls through to b2.
    fn diamond(registers: &RegisterConfig) -> (LirFunction, [BlockId; 3]) {
        let mut b = LirBuilder::new("diamond", registers);
        let x = b.variable(Kind::Int);
        let b0 = b.new_block();
        let b1 = b.new_block();
        let b2 = b.new_block();
        b.switch_to(b0);
        b.mov(Constant::int(1), x);
        b.cmp(x, Constant::int(0));
        b.branch(b2, b1);
        b.switch_to(b1);
        b.binary(Opcode::Add, x, x, Constant::int(1));
        b.jump(b2);
        b.switch_to(b2);
        b.ret(Some(x.into()));
        (b.finish(), [b0, b1, b2])
    }

    #[test]
    fn test_insert_position_before_jump() {
        let registers = RegisterConfig::reference();
        let config = AllocatorConfig::for_testing();
        let (mut lir, [_, b1, b2]) = diamond(&registers);
        let numbering = Numbering::number(&mut lir).unwrap();
        let liveness = LivenessAnalysis::compute(&lir, config.max_liveness_iterations).unwrap();
        let len = lir.block(b1).instructions.len();
        let ls = LinearScan::new(&mut lir, &registers, &config, &DefaultPriorityPolicy, numbering, liveness);

        assert_eq!(ls.find_insert_position(b1, b2).unwrap(), (b1, len - 2));
    }

    #[test]
    fn test_critical_edge_is_malformed() {
        let registers = RegisterConfig::reference();
        let config = AllocatorConfig::for_testing();
        let (mut lir, [b0, b1, b2]) = diamond(&registers);
        let numbering = Numbering::number(&mut lir).unwrap();
        let liveness = LivenessAnalysis::compute(&lir, config.max_liveness_iterations).unwrap();
        let ls = LinearScan::new(&mut lir, &registers, &config, &DefaultPriorityPolicy, numbering, liveness);

        // b2 has two predecessors, so moves for b0 -> b2 have nowhere to go
        let err = ls.find_insert_position(b0, b2).unwrap_err();
        assert!(!err.is_bailout());
        // b1 has a single predecessor: moves go after its label
        assert_eq!(ls.find_insert_position(b0, b1).unwrap(), (b1, 0));
    }
}
