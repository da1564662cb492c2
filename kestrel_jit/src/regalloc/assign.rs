//! Spill Move Elimination and Location Assignment
//!
//! The last two phases rewrite the LIR:
//!
//! 1. Lineages in the `StoreAtDefinition` state get one store right after their
//!    definition; resolver moves into their (always correct) stack slot are dropped.
//! 2. Every variable operand is replaced by the location of the split child that
//!    covers the instruction. Instructions with debug info get a reference map of
//!    the live `Object` values and, when requested, the final operands of their
//!    frame state.

use super::interval::{ProgPoint, SpillState};
use super::linear_scan::LinearScan;
use super::move_resolver::InsertionBuffer;
use crate::lir::{
    BlockId, DebugInfo, Instruction, Kind, Location, Operand, OperandMode, ReferenceMap, ScopeDebugInfo, Variable,
};
use kestrel_core::{CompileError, CompileResult};
use log::{debug, trace};

impl LinearScan<'_> {
    // =========================================================================
    // Spill move elimination
    // =========================================================================

    /// Store values once at their definition and drop redundant stack moves.
    pub(crate) fn eliminate_spill_moves(&mut self) -> CompileResult<()> {
        let mut store_at_definition: Vec<(ProgPoint, u32)> = self
            .intervals
            .iter()
            .filter(|i| i.is_variable() && i.is_split_parent())
            .filter(|i| self.intervals.spill_state(i.operand_number()) == SpillState::StoreAtDefinition)
            .filter_map(|i| {
                let number = i.operand_number();
                self.intervals.spill_definition_pos(number).map(|pos| (pos, number))
            })
            .collect();
        store_at_definition.sort();
        let mut pending = store_at_definition.into_iter().peekable();

        for b in 0..self.lir.blocks.len() {
            let block = BlockId(b as u32);
            let mut buffer = InsertionBuffer::default();
            let mut removed = Vec::new();

            let instructions = &self.lir.block(block).instructions;
            for (j, inst) in instructions.iter().enumerate().skip(1) {
                let Some(op_id) = inst.id else {
                    // inserted move: the target slot may already hold the value
                    let target = inst
                        .move_result()
                        .and_then(|r| self.lir.operands.operand_number(&r))
                        .and_then(|n| self.intervals.get(n).map(|_| n));
                    if let Some(target) = target {
                        let on_stack = !self.intervals[target].location().is_some_and(|l| l.is_register());
                        if on_stack && self.intervals.always_in_memory(target) {
                            trace!("eliminating move {inst}");
                            removed.push(j);
                        }
                    }
                    continue;
                };

                while let Some((_, number)) = pending.next_if(|&(pos, _)| pos == op_id) {
                    let interval = &self.intervals[number];
                    let (Some(Location::Register(reg)), Some(slot)) =
                        (interval.location(), self.intervals.spill_slot(number))
                    else {
                        continue;
                    };
                    let kind = interval.kind();
                    trace!("storing {interval} to {slot} after definition at {op_id}");
                    buffer.push(j, Instruction::mov(Operand::Register(reg, kind), Operand::Stack(slot)));
                    self.stats.spill_stores += 1;
                }
            }

            if !removed.is_empty() || !buffer.is_empty() {
                self.stats.spill_moves_eliminated += removed.len() as u32;
                let instructions = &mut self.lir.block_mut(block).instructions;
                buffer.apply_filtered(instructions, |j| !removed.contains(&j));
            }
        }

        if let Some((pos, number)) = pending.next() {
            return Err(CompileError::invalid_allocation(format!(
                "definition of {} at {pos} not found",
                self.intervals[number]
            )));
        }
        debug!(
            "spill moves: {} stores at definition, {} moves eliminated",
            self.stats.spill_stores, self.stats.spill_moves_eliminated
        );
        Ok(())
    }

    // =========================================================================
    // Location assignment
    // =========================================================================

    /// Replace all variables by their locations.
    pub(crate) fn assign_locations(&mut self) -> CompileResult<()> {
        let references: Vec<u32> = self
            .intervals
            .iter()
            .filter(|i| i.is_variable() && i.kind() == Kind::Object && !is_resolver_temp(i.from(), i.to()))
            .map(|i| i.operand_number())
            .collect();

        for b in 0..self.lir.blocks.len() {
            let block = BlockId(b as u32);
            let mut instructions = std::mem::take(&mut self.lir.block_mut(block).instructions);
            let result = self.assign_block(block, &mut instructions, &references);
            self.lir.block_mut(block).instructions = instructions;
            result?;
        }
        Ok(())
    }

    fn assign_block(
        &self,
        block: BlockId,
        instructions: &mut Vec<Instruction>,
        references: &[u32],
    ) -> CompileResult<()> {
        for inst in instructions.iter_mut() {
            self.color_instruction(inst)?;

            for edge in &mut inst.exception_edges {
                if let Some(code) = &mut edge.entry_code {
                    for entry in code.iter_mut() {
                        self.color_instruction(entry)?;
                    }
                }
            }

            if let Some(op_id) = inst.id {
                let patch_point = inst.patch_point;
                let has_call = inst.has_call;
                for info in &mut inst.info {
                    let reference_map = self.compute_reference_map(op_id, patch_point, references);
                    debug_assert!(
                        !has_call
                            || reference_map
                                .registers
                                .intersection(self.registers.caller_saved())
                                .is_empty(),
                        "reference in a caller-saved register at a call"
                    );
                    info.reference_map = Some(reference_map);
                    if self.config.compute_debug_info {
                        info.scope = Some(self.compute_scope(block, op_id, info)?);
                    }
                }
            }
        }

        let before = instructions.len();
        instructions.retain(|inst| !(inst.is_move() && inst.move_source() == inst.move_result()));
        let removed = before - instructions.len();
        if removed > 0 {
            trace!("{block}: removed {removed} useless moves");
        }
        Ok(())
    }

    fn color_instruction(&self, inst: &mut Instruction) -> CompileResult<()> {
        let op_id = inst.id;
        for mode in OperandMode::ALL {
            for operand in inst.operands_mut(mode) {
                if let Operand::Variable(var) = *operand {
                    *operand = self.color_operand(var, op_id, mode)?;
                }
            }
        }
        Ok(())
    }

    /// Location of `var` at `op_id`; inserted instructions (no id) use the interval as is.
    fn color_operand(&self, var: Variable, op_id: Option<ProgPoint>, mode: OperandMode) -> CompileResult<Operand> {
        let number = self.lir.operands.variable_number(var);
        let interval = match op_id {
            Some(op_id) => self.split_child_at_op_id(number, op_id, mode)?,
            None => {
                if self.intervals.get(number).is_none() {
                    return Err(CompileError::MissingSplitChild {
                        operand: number,
                        position: ProgPoint::MAX.raw(),
                    });
                }
                number
            }
        };
        let location = self.intervals[interval].location().ok_or_else(|| {
            CompileError::invalid_allocation(format!("{} has no location", self.intervals[interval]))
        })?;
        Ok(location.to_operand(var.kind))
    }

    /// Locations of the references live across the instruction at `op_id`.
    fn compute_reference_map(&self, op_id: ProgPoint, patch_point: bool, references: &[u32]) -> ReferenceMap {
        let mut map = ReferenceMap::default();
        for &id in references {
            let interval = &self.intervals[id];
            let live = interval
                .ranges()
                .any(|r| r.from < op_id && (op_id < r.to || (patch_point && op_id == r.to)));
            if !live {
                continue;
            }

            match interval.location() {
                Some(Location::Register(reg)) => map.set_register(reg),
                Some(Location::Stack(slot)) => map.set_stack_offset(self.lir.frame.stack_offset(slot)),
                None => continue,
            }

            // the slot is valid too once the value was stored at its definition
            let stored = self.intervals.always_in_memory(id)
                && self.intervals.spill_definition_pos(id).is_some_and(|def| op_id > def);
            if let (true, Some(slot)) = (stored, self.intervals.spill_slot(id)) {
                if interval.location() != Some(Location::Stack(slot)) {
                    map.set_stack_offset(self.lir.frame.stack_offset(slot));
                }
            }
        }
        map
    }

    /// Final operands of a frame state at `op_id`.
    fn compute_scope(&self, block: BlockId, op_id: ProgPoint, info: &DebugInfo) -> CompileResult<ScopeDebugInfo> {
        let live_out = self.liveness.live_out(block);
        let lir_block = self.lir.block(block);
        // moves for a successor go before the final jump, so use the successor's view
        let successor_first = match lir_block.successors.as_slice() {
            [sux] if op_id == self.numbering.last_id(block) && lir_block.ends_with_branch() => {
                Some(self.numbering.first_id(*sux))
            }
            _ => None,
        };

        let color = |value: &Operand| -> CompileResult<Operand> {
            let Operand::Variable(var) = *value else {
                return Ok(*value);
            };
            let number = self.lir.operands.variable_number(var);
            let at = match successor_first {
                Some(first) if live_out.get(number as usize) => first,
                _ => op_id,
            };
            self.color_operand(var, Some(at), OperandMode::Input)
        };

        let state = &info.state;
        Ok(ScopeDebugInfo {
            locals: state.locals.iter().map(color).collect::<CompileResult<_>>()?,
            expressions: state.stack.iter().map(color).collect::<CompileResult<_>>()?,
            monitors: (0..state.locks).map(|i| self.lir.frame.monitor_offset(i)).collect(),
        })
    }
}

/// Intervals the move resolver creates to break cycles carry a placeholder range.
pub(crate) fn is_resolver_temp(from: ProgPoint, to: ProgPoint) -> bool {
    from == ProgPoint::from_raw(1) && to == ProgPoint::from_raw(2)
}

#[cfg(test)]
mod tests {
    use super::super::linear_scan::{Numbering, run};
    use super::super::liveness::LivenessAnalysis;
    use super::super::walker::LinearScanWalker;
    use super::super::{AllocatorConfig, DefaultPriorityPolicy};
    use super::*;
    use crate::backend::registers::RegisterConfig;
    use crate::lir::{Constant, FrameState, LirBuilder};

    #[test]
    fn test_resolver_temp_range() {
        assert!(is_resolver_temp(ProgPoint::from_raw(1), ProgPoint::from_raw(2)));
        assert!(!is_resolver_temp(ProgPoint::from_raw(0), ProgPoint::from_raw(2)));
    }

    #[test]
    fn test_reference_in_safepoint_map() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("refmap", &registers);
        let obj = b.variable(Kind::Object);
        let n = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::null(), obj);
        b.mov(Constant::int(3), n);
        b.safepoint(FrameState {
            locals: vec![obj.into(), n.into()],
            stack: vec![Constant::int(7).into()],
            locks: 1,
        });
        b.ret(Some(obj.into()));
        let mut lir = b.finish();

        let config = AllocatorConfig {
            compute_debug_info: true,
            ..AllocatorConfig::for_testing()
        };
        run(&mut lir, &registers, &config, &DefaultPriorityPolicy).unwrap();

        let safepoint = lir.blocks[0]
            .instructions
            .iter()
            .find(|i| i.has_info())
            .unwrap();
        let info = &safepoint.info[0];
        let map = info.reference_map.as_ref().unwrap();
        let scope = info.scope.as_ref().unwrap();

        // obj lives in a register across the safepoint, n is not a reference
        let Operand::Register(reg, Kind::Object) = scope.locals[0] else {
            panic!("object local not in a register: {}", scope.locals[0]);
        };
        assert!(map.has_register(reg));
        assert_eq!(map.registers.count(), 1);
        assert!(map.stack_offsets.is_empty());
        assert!(matches!(scope.locals[1], Operand::Register(_, Kind::Int)));
        assert_eq!(scope.expressions, vec![Operand::Constant(Constant::int(7))]);
        assert_eq!(scope.monitors, vec![lir.frame.monitor_offset(0)]);
    }

    #[test]
    fn test_assign_twice_is_noop() {
        let registers = RegisterConfig::reference();
        let config = AllocatorConfig::for_testing();
        let mut b = LirBuilder::new("twice", &registers);
        let x = b.variable(Kind::Int);
        let y = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), x);
        b.mov(x, y);
        b.ret(Some(y.into()));
        let mut lir = b.finish();

        let numbering = Numbering::number(&mut lir).unwrap();
        let liveness = LivenessAnalysis::compute(&lir, config.max_liveness_iterations).unwrap();
        let mut ls = LinearScan::new(&mut lir, &registers, &config, &DefaultPriorityPolicy, numbering, liveness);
        ls.build_intervals().unwrap();
        LinearScanWalker::new(&mut ls).walk().unwrap();
        ls.resolve_data_flow().unwrap();
        ls.finalize_frame();
        ls.eliminate_spill_moves().unwrap();
        ls.assign_locations().unwrap();
        let first = ls.lir.to_string();

        ls.assign_locations().unwrap();
        assert_eq!(first, ls.lir.to_string());
        for inst in ls.lir.instructions() {
            for mode in OperandMode::ALL {
                assert!(inst.operands(mode).iter().all(|op| !op.is_variable()));
            }
        }
    }
}
