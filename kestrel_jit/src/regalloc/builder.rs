//! Interval construction.
//!
//! Blocks and their instructions are visited in reverse, so every range is added
//! in front of the ranges already recorded and use positions arrive in descending
//! order. A value live at the end of a block first gets a range over the whole
//! block; its definition then shortens that range to start at the definition.

use super::interval::{ProgPoint, RegisterPriority, SpillState};
use super::linear_scan::LinearScan;
use crate::backend::registers::Register;
use crate::lir::{BlockId, Instruction, Kind, Location, Opcode, Operand, StackSlot};
use kestrel_core::{CompileError, CompileResult};
use log::{debug, trace};
use smallvec::SmallVec;

/// Everything interval building needs from one instruction, copied out of the LIR.
struct InstructionOperands {
    id: ProgPoint,
    has_call: bool,
    outputs: SmallVec<[(Operand, RegisterPriority); 2]>,
    temps: SmallVec<[Operand; 2]>,
    inputs: SmallVec<[(Operand, RegisterPriority); 4]>,
    /// Frame state values and the inputs of handler phis, read by the instruction.
    state_values: SmallVec<[Operand; 8]>,
    /// Source slot of a move from the stack into a variable.
    stack_argument: Option<Operand>,
    /// Source and result of a move-like instruction.
    hint: Option<(Operand, Operand)>,
}

impl LinearScan<'_> {
    /// Build intervals, use positions and register hints for every operand.
    pub(crate) fn build_intervals(&mut self) -> CompileResult<()> {
        let caller_saved: SmallVec<[Register; 16]> = self.registers.caller_saved_allocatable().collect();

        for b in (0..self.lir.blocks.len()).rev() {
            let block = BlockId(b as u32);
            let block_from = self.numbering.first_id(block);
            let block_to = self.numbering.last_id(block);
            let (loop_end, loop_index) = {
                let block = self.lir.block(block);
                (block.flags.loop_end, block.loop_index)
            };

            let live_out: Vec<u32> = self.liveness.live_out(block).iter().map(|n| n as u32).collect();
            for number in live_out {
                let operand = self.lir.operands.operand_for(number);
                self.add_use(operand, block_from, block_to + 2, RegisterPriority::None, Kind::Illegal)?;

                // a use at the loop end lets splitting move spill and reload out of the loop
                if let (true, Some(loop_index)) = (loop_end, loop_index) {
                    if self.liveness.is_interval_in_loop(number, loop_index) {
                        self.intervals[number].add_use_pos(block_to + 1, RegisterPriority::LiveAtLoopEnd);
                    }
                }
            }

            let len = self.lir.block(block).instructions.len();
            for j in (1..len).rev() {
                let ops = self.instruction_operands(block, j)?;
                let op_id = ops.id;

                if ops.has_call {
                    for &reg in &caller_saved {
                        self.add_temp(Operand::Register(reg, Kind::Illegal), op_id, RegisterPriority::None, Kind::Illegal)?;
                    }
                    trace!("  {op_id}: caller-saved registers destroyed");
                }

                for &(operand, priority) in &ops.outputs {
                    self.add_def(operand, op_id, priority)?;
                }
                for &operand in &ops.temps {
                    self.add_temp(operand, op_id, RegisterPriority::MustHaveRegister, operand.kind())?;
                }
                for &(operand, priority) in &ops.inputs {
                    self.add_use(operand, block_from, op_id, priority, operand.kind())?;
                }

                // frame state values and handler phi inputs must survive the instruction
                for &value in &ops.state_values {
                    self.add_use(value, block_from, op_id + 1, RegisterPriority::None, Kind::Illegal)?;
                }

                if let Some(slot) = ops.stack_argument {
                    self.handle_method_argument(slot, &ops)?;
                }
                if let Some((from, to)) = ops.hint {
                    self.add_register_hint(from, to);
                }
            }
        }

        // Give every fixed interval a range at the start so it is walked at all.
        for interval in self.intervals.iter_mut() {
            if interval.is_fixed() {
                interval.add_range(ProgPoint::ZERO, ProgPoint::from_raw(1));
            }
        }
        debug!(
            "{}: built {} intervals",
            self.lir.name,
            self.intervals.iter().count()
        );
        Ok(())
    }

    fn instruction_operands(&self, block: BlockId, index: usize) -> CompileResult<InstructionOperands> {
        let inst = &self.lir.block(block).instructions[index];
        let id = inst.id.ok_or_else(|| {
            CompileError::malformed(format!("instruction {index} of {block} has no id"))
        })?;
        let osr_entry = self.lir.block(block).flags.osr_entry;

        let outputs = inst
            .outputs
            .iter()
            .filter(|op| op.is_variable_or_register())
            .map(|&op| (op, self.output_priority(inst, &op, osr_entry)))
            .collect();
        let temps = inst
            .temps
            .iter()
            .copied()
            .filter(Operand::is_variable_or_register)
            .collect();
        let inputs = inst
            .inputs
            .iter()
            .filter(|op| op.is_variable_or_register())
            .map(|&op| (op, self.input_priority(inst, &op, osr_entry)))
            .collect();
        let state_values = inst
            .info
            .iter()
            .flat_map(|info| info.state.values())
            .copied()
            .chain(self.lir.handler_phi_inputs(inst))
            .filter(Operand::is_variable_or_register)
            .collect();

        let stack_argument = match (inst.move_source(), inst.move_result()) {
            (Some(Operand::Stack(slot)), Some(result)) if result.is_variable() => Some(Operand::Stack(slot)),
            _ => None,
        };
        let hint = match inst.opcode {
            Opcode::Move | Opcode::Convert | Opcode::Cmove => {
                match (inst.inputs.first(), inst.outputs.first()) {
                    (Some(&from), Some(&to))
                        if from.is_variable_or_register() && to.is_variable_or_register() =>
                    {
                        Some((from, to))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        Ok(InstructionOperands {
            id,
            has_call: inst.has_call,
            outputs,
            temps,
            inputs,
            state_values,
            stack_argument,
            hint,
        })
    }

    // -------------------------------------------------------------------------
    // Register priorities
    // -------------------------------------------------------------------------

    fn result_must_start_in_memory(&self, operand: &Operand) -> bool {
        operand
            .as_variable()
            .is_some_and(|v| self.lir.operands.must_start_in_memory(v))
    }

    fn output_priority(&self, inst: &Instruction, operand: &Operand, osr_entry: bool) -> RegisterPriority {
        if let (Some(source), Some(result)) = (inst.move_source(), inst.move_result()) {
            if self.result_must_start_in_memory(&result) {
                // result is stored to the stack slot right away
                return RegisterPriority::None;
            }
            if source.is_stack() {
                // method argument: the value already lives in the caller's frame
                return RegisterPriority::None;
            }
            if source.is_variable_or_register() && result.is_variable_or_register() && osr_entry {
                return RegisterPriority::ShouldHaveRegister;
            }
        }
        if self.result_must_start_in_memory(operand) {
            return RegisterPriority::None;
        }
        RegisterPriority::MustHaveRegister
    }

    fn input_priority(&self, inst: &Instruction, operand: &Operand, osr_entry: bool) -> RegisterPriority {
        if let (Some(source), Some(result)) = (inst.move_source(), inst.move_result()) {
            if self.result_must_start_in_memory(&result) {
                // the move stores straight into the slot and needs its source in a register
                return RegisterPriority::MustHaveRegister;
            }
            if source.is_variable_or_register() && result.is_variable_or_register() {
                return if osr_entry {
                    RegisterPriority::MustHaveRegister
                } else {
                    RegisterPriority::ShouldHaveRegister
                };
            }
        }
        self.policy.input_priority(inst, operand)
    }

    // -------------------------------------------------------------------------
    // Ranges and uses
    // -------------------------------------------------------------------------

    fn is_processed(&self, operand: &Operand) -> bool {
        match operand {
            Operand::Register(reg, _) => self.registers.is_allocatable(*reg),
            Operand::Variable(_) => true,
            _ => false,
        }
    }

    fn operand_number(&self, operand: &Operand) -> CompileResult<u32> {
        self.lir
            .operands
            .operand_number(operand)
            .ok_or_else(|| CompileError::malformed(format!("operand {operand} has no number")))
    }

    fn add_use(
        &mut self,
        operand: Operand,
        from: ProgPoint,
        to: ProgPoint,
        priority: RegisterPriority,
        kind: Kind,
    ) -> CompileResult<()> {
        if !self.is_processed(&operand) {
            return Ok(());
        }
        let number = self.operand_number(&operand)?;
        trace!("  use {operand} from {from} to {to} ({priority:?})");
        let interval = self.intervals.get_or_create(operand, number);
        interval.set_kind(kind);
        interval.add_range(from, to);
        interval.add_use_pos(to, priority);
        Ok(())
    }

    fn add_temp(
        &mut self,
        operand: Operand,
        temp_pos: ProgPoint,
        priority: RegisterPriority,
        kind: Kind,
    ) -> CompileResult<()> {
        if !self.is_processed(&operand) {
            return Ok(());
        }
        let number = self.operand_number(&operand)?;
        let interval = self.intervals.get_or_create(operand, number);
        interval.set_kind(kind);
        interval.add_range(temp_pos, temp_pos + 1);
        interval.add_use_pos(temp_pos, priority);
        Ok(())
    }

    fn add_def(&mut self, operand: Operand, def_pos: ProgPoint, priority: RegisterPriority) -> CompileResult<()> {
        if !self.is_processed(&operand) {
            return Ok(());
        }
        let number = self.operand_number(&operand)?;
        trace!("  def {operand} at {def_pos} ({priority:?})");

        let interval = self.intervals.get_or_create(operand, number);
        interval.set_kind(operand.kind());
        match interval.first() {
            Some(first) if first.from <= def_pos => {
                // the range was created by a use or a live-out; cut it at the definition
                interval.set_first_from(def_pos);
            }
            _ => {
                // no use follows: the value is dead, keep a minimal range so it gets a location
                interval.add_range(def_pos, def_pos + 1);
                self.stats.dead_definitions += 1;
                debug!("{}: dead value {operand} defined at {def_pos}", self.lir.name);
            }
        }
        let interval = &mut self.intervals[number];
        interval.add_use_pos(def_pos, priority);

        if operand.is_variable() {
            self.change_spill_definition_pos(number, def_pos)?;
            if priority == RegisterPriority::None
                && self.intervals.spill_state(number) <= SpillState::StartInMemory
            {
                // the value is written to memory right away
                self.intervals.set_spill_state(number, SpillState::StartInMemory);
            }
        }
        Ok(())
    }

    /// A move from a stack slot defines its result in that slot.
    fn handle_method_argument(&mut self, slot: Operand, ops: &InstructionOperands) -> CompileResult<()> {
        let (Some(slot), Some(&(result, _))) = (slot.as_stack(), ops.outputs.first()) else {
            return Ok(());
        };
        let number = self.operand_number(&result)?;
        let slot = StackSlot {
            kind: result.kind(),
            ..slot
        };
        self.intervals.set_spill_slot(number, slot);
        self.intervals[number].assign_location(Location::Stack(slot));
        trace!("  argument {result} lives in {slot}");
        Ok(())
    }

    fn add_register_hint(&mut self, from: Operand, to: Operand) {
        if !self.is_processed(&from) || !self.is_processed(&to) {
            return;
        }
        let (Some(from_number), Some(to_number)) = (
            self.lir.operands.operand_number(&from),
            self.lir.operands.operand_number(&to),
        ) else {
            return;
        };
        if self.intervals.get(from_number).is_none() {
            return;
        }
        if let Some(to_interval) = self.intervals.get_mut(to_number) {
            to_interval.set_location_hint(from_number);
            trace!("  hint from {from} to {to}");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::registers::RegisterConfig;
    use crate::backend::registers::reference::{R0, R4};
    use crate::lir::{Constant, Kind, LirBuilder, LirFunction, Opcode, Operand, StackSlot};
    use crate::regalloc::constraint::DefaultPriorityPolicy;
    use crate::regalloc::interval::{ProgPoint, RegisterPriority, SpillState};
    use crate::regalloc::linear_scan::{LinearScan, Numbering};
    use crate::regalloc::liveness::LivenessAnalysis;
    use crate::regalloc::AllocatorConfig;

    fn p(raw: u32) -> ProgPoint {
        ProgPoint::from_raw(raw)
    }

    fn with_intervals(lir: &mut LirFunction, registers: &RegisterConfig, check: impl FnOnce(&LinearScan<'_>)) {
        let config = AllocatorConfig::default();
        let numbering = Numbering::number(lir).unwrap();
        let liveness = LivenessAnalysis::compute(lir, 50).unwrap();
        let mut ls = LinearScan::new(lir, registers, &config, &DefaultPriorityPolicy, numbering, liveness);
        ls.build_intervals().unwrap();
        check(&ls);
    }

    #[test]
    fn test_def_shortens_live_range() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("def", &registers);
        let a = b.variable(Kind::Int);
        let c = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), a); // 2
        b.binary(Opcode::Add, c, a, Constant::int(2)); // 4
        b.ret(Some(c.into())); // 6
        let mut lir = b.finish();
        let na = lir.operands.variable_number(a);
        let nc = lir.operands.variable_number(c);

        with_intervals(&mut lir, &registers, |ls| {
            let ia = &ls.intervals[na];
            assert_eq!((ia.from(), ia.to()), (p(2), p(4)));
            assert_eq!(ia.first_usage(RegisterPriority::MustHaveRegister), p(2));
            assert_eq!(ls.intervals.spill_state(na), SpillState::NoSpillStore);
            assert_eq!(ls.intervals.spill_definition_pos(na), Some(p(2)));
            let ic = &ls.intervals[nc];
            assert_eq!((ic.from(), ic.to()), (p(4), p(6)));
        });
    }

    #[test]
    fn test_dead_value_gets_minimal_range() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("dead", &registers);
        let a = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), a);
        b.ret(None);
        let mut lir = b.finish();
        let na = lir.operands.variable_number(a);

        with_intervals(&mut lir, &registers, |ls| {
            let ia = &ls.intervals[na];
            assert_eq!((ia.from(), ia.to()), (p(2), p(3)));
            assert_eq!(ls.stats.dead_definitions, 1);
        });
    }

    #[test]
    fn test_call_blocks_caller_saved_registers() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("call", &registers);
        let a = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), a); // 2
        b.call(&[], None); // 4
        b.ret(Some(a.into())); // 6
        let mut lir = b.finish();

        with_intervals(&mut lir, &registers, |ls| {
            let r0 = &ls.intervals[u32::from(R0.number())];
            assert!(r0.covers(p(4), crate::lir::OperandMode::Output));
            assert_eq!(r0.from(), p(0));
            assert!(ls.intervals.get(u32::from(R4.number())).is_none());
        });
    }

    #[test]
    fn test_move_hint_and_priorities() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("hint", &registers);
        let a = b.variable(Kind::Int);
        let c = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), a); // 2
        b.mov(a, c); // 4
        b.binary(Opcode::Add, c, c, a); // 6
        b.ret(Some(c.into())); // 8
        let mut lir = b.finish();
        let na = lir.operands.variable_number(a);
        let nc = lir.operands.variable_number(c);

        with_intervals(&mut lir, &registers, |ls| {
            assert_eq!(ls.intervals[nc].location_hint(), Some(na));
            // the move only prefers a register for its source
            assert_eq!(
                ls.intervals[na].next_usage(RegisterPriority::ShouldHaveRegister, p(3)),
                p(4)
            );
            assert_eq!(
                ls.intervals[na].next_usage(RegisterPriority::MustHaveRegister, p(3)),
                p(6)
            );
            // the move right before the two-address add is not a second definition
            assert_eq!(ls.intervals.spill_state(nc), SpillState::NoSpillStore);
            assert_eq!(ls.intervals.spill_definition_pos(nc), Some(p(6)));
        });
    }

    #[test]
    fn test_method_argument_lives_in_caller_slot() {
        let registers = RegisterConfig::reference();
        let mut b = LirBuilder::new("argument", &registers);
        let a = b.variable(Kind::Int);
        b.new_block();
        b.mov(StackSlot::caller(0, Kind::Int), a);
        b.ret(Some(a.into()));
        let mut lir = b.finish();
        let na = lir.operands.variable_number(a);

        with_intervals(&mut lir, &registers, |ls| {
            let slot = StackSlot::caller(0, Kind::Int);
            assert_eq!(ls.intervals.spill_slot(na), Some(slot));
            assert_eq!(ls.intervals[na].location(), Some(crate::lir::Location::Stack(slot)));
            assert_eq!(ls.intervals.spill_state(na), SpillState::StartInMemory);
            assert!(!Operand::Stack(slot).is_variable());
        });
    }
}
