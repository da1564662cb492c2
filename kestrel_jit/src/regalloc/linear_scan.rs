//! Linear Scan Register Allocator
//!
//! Allocation context and phase driver for the interval-splitting linear scan
//! allocator.
//!
//! # Algorithm Overview
//!
//! 1. Number instructions: ids `0, 2, 4, ...` in linear block order
//! 2. Compute block liveness
//! 3. Build intervals backwards over the blocks, with use positions and hints
//! 4. Walk intervals by start position, assigning registers and splitting or
//!    spilling when registers run out
//! 5. Resolve data flow: insert moves on edges where a value's location differs
//! 6. Resolve exception handlers: handler entry spills and per-edge entry code
//! 7. Fix the frame size and optionally verify the intervals
//! 8. Drop redundant spill moves and store once at the definition where possible
//! 9. Replace every variable with its location, computing reference maps and
//!    debug info, and drop moves that became no-ops
//!
//! Any failure bails out the whole allocation.
//!
//! # References
//!
//! - Wimmer & Mössenböck, "Optimized Interval Splitting in a Linear Scan
//!   Register Allocator" (2005)
//! - Poletto & Sarkar, "Linear Scan Register Allocation" (1999)

use super::constraint::RegisterPriorityPolicy;
use super::interval::{IntervalTable, ProgPoint};
use super::liveness::LivenessAnalysis;
use super::spill::SpillSlotAllocator;
use super::walker::LinearScanWalker;
use super::{AllocatorConfig, AllocatorStats};
use crate::backend::registers::RegisterConfig;
use crate::lir::{BlockId, LirFunction, Opcode, OperandMode};
use kestrel_core::{CompileError, CompileResult};
use log::{debug, trace};

// =============================================================================
// Numbering
// =============================================================================

/// Instruction ids and the blocks they belong to.
#[derive(Debug, Default)]
pub(crate) struct Numbering {
    op_blocks: Vec<BlockId>,
    op_calls: Vec<bool>,
    block_first: Vec<ProgPoint>,
    block_last: Vec<ProgPoint>,
}

impl Numbering {
    /// Assign ids `0, 2, 4, ...` to every instruction.
    pub(crate) fn number(lir: &mut LirFunction) -> CompileResult<Self> {
        let mut numbering = Numbering::default();
        let mut index = 0u32;

        for (position, block) in lir.blocks.iter_mut().enumerate() {
            if block.id.index() != position {
                return Err(CompileError::malformed(format!(
                    "block {} is stored at index {position}",
                    block.id
                )));
            }
            match block.instructions.first() {
                Some(label) if label.opcode == Opcode::Label => {}
                _ => {
                    return Err(CompileError::malformed(format!(
                        "block {} does not start with a label",
                        block.id
                    )));
                }
            }

            numbering.block_first.push(ProgPoint::instruction(index));
            for inst in &mut block.instructions {
                inst.id = Some(ProgPoint::instruction(index));
                numbering.op_blocks.push(block.id);
                numbering.op_calls.push(inst.has_call);
                index += 1;
            }
            numbering.block_last.push(ProgPoint::instruction(index - 1));
        }

        Ok(numbering)
    }

    /// Id of the last instruction.
    #[inline]
    pub(crate) fn max_op_id(&self) -> ProgPoint {
        ProgPoint::instruction(self.op_blocks.len().saturating_sub(1) as u32)
    }

    /// Block containing a position; positions past the end map to the last block.
    #[inline]
    pub(crate) fn block_for_id(&self, pos: ProgPoint) -> BlockId {
        let index = pos.index().min(self.op_blocks.len().saturating_sub(1));
        self.op_blocks[index]
    }

    /// Whether `pos` is the first id of a block.
    #[inline]
    pub(crate) fn is_block_begin(&self, pos: ProgPoint) -> bool {
        pos == ProgPoint::ZERO || self.block_for_id(pos) != self.block_for_id(pos - 1)
    }

    /// Whether the instruction at `pos` destroys caller-saved registers.
    #[inline]
    pub(crate) fn has_call(&self, pos: ProgPoint) -> bool {
        self.op_calls.get(pos.index()).copied().unwrap_or(false)
    }

    /// Id of a block's label.
    #[inline]
    pub(crate) fn first_id(&self, block: BlockId) -> ProgPoint {
        self.block_first[block.index()]
    }

    /// Id of a block's last instruction.
    #[inline]
    pub(crate) fn last_id(&self, block: BlockId) -> ProgPoint {
        self.block_last[block.index()]
    }
}

// =============================================================================
// Allocation Context
// =============================================================================

/// State shared by all allocation phases of one function.
pub(crate) struct LinearScan<'a> {
    pub(crate) lir: &'a mut LirFunction,
    pub(crate) registers: &'a RegisterConfig,
    pub(crate) config: &'a AllocatorConfig,
    pub(crate) policy: &'a dyn RegisterPriorityPolicy,
    pub(crate) numbering: Numbering,
    pub(crate) liveness: LivenessAnalysis,
    pub(crate) intervals: IntervalTable,
    pub(crate) spill_slots: SpillSlotAllocator,
    pub(crate) stats: AllocatorStats,
}

impl<'a> LinearScan<'a> {
    pub(crate) fn new(
        lir: &'a mut LirFunction,
        registers: &'a RegisterConfig,
        config: &'a AllocatorConfig,
        policy: &'a dyn RegisterPriorityPolicy,
        numbering: Numbering,
        liveness: LivenessAnalysis,
    ) -> Self {
        let intervals = IntervalTable::new(lir.operands.size());
        let spill_slots = SpillSlotAllocator::new(lir.frame.initial_spill_slot(), registers.word_size());
        let stats = AllocatorStats {
            liveness_iterations: liveness.iterations(),
            ..AllocatorStats::default()
        };
        LinearScan {
            lir,
            registers,
            config,
            policy,
            numbering,
            liveness,
            intervals,
            spill_slots,
            stats,
        }
    }

    /// Split child of `operand` covering `op_id`.
    pub(crate) fn split_child_at_op_id(
        &self,
        operand: u32,
        op_id: ProgPoint,
        mode: OperandMode,
    ) -> CompileResult<u32> {
        if self.intervals.get(operand).is_none() {
            return Err(CompileError::MissingSplitChild {
                operand,
                position: op_id.raw(),
            });
        }
        self.intervals
            .split_child_at(operand, op_id, mode)
            .ok_or(CompileError::MissingSplitChild {
                operand: self.intervals.parent_of(operand),
                position: op_id.raw(),
            })
    }

    /// Split child of `operand` live at the end of `block`.
    pub(crate) fn interval_at_block_end(&self, block: BlockId, operand: u32) -> CompileResult<u32> {
        self.split_child_at_op_id(operand, self.numbering.last_id(block) + 1, OperandMode::Output)
    }

    /// Split child of `operand` live at the start of `block`.
    pub(crate) fn interval_at_block_begin(&self, block: BlockId, operand: u32) -> CompileResult<u32> {
        self.split_child_at_op_id(operand, self.numbering.first_id(block), OperandMode::Output)
    }

    /// Split child of `operand` read by the instruction at `op_id`.
    pub(crate) fn interval_at_op_id(&self, operand: u32, op_id: ProgPoint) -> CompileResult<u32> {
        self.split_child_at_op_id(operand, op_id, OperandMode::Input)
    }

    /// Loop depth of the block containing `pos`.
    pub(crate) fn loop_depth_at(&self, pos: ProgPoint) -> u32 {
        self.lir.block(self.numbering.block_for_id(pos)).loop_depth
    }

    /// Fix the frame size now that no more spill slots will be allocated.
    pub(crate) fn finalize_frame(&mut self) {
        let total = self.spill_slots.total_slots();
        self.lir.frame.finalize_frame(total);
        self.stats.spill_slots = total - self.lir.frame.initial_spill_slot();
    }

    fn log_intervals(&self, phase: &str) {
        if log::log_enabled!(log::Level::Trace) {
            trace!("intervals {phase}:");
            for interval in self.intervals.iter() {
                trace!("  {interval}");
            }
        }
    }

    fn finish_stats(mut self) -> AllocatorStats {
        self.stats.intervals = self.intervals.iter().count() as u32;
        self.stats.splits = self.intervals.split_count();
        self.stats
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Run every allocation phase over `lir`.
pub(crate) fn run(
    lir: &mut LirFunction,
    registers: &RegisterConfig,
    config: &AllocatorConfig,
    policy: &dyn RegisterPriorityPolicy,
) -> CompileResult<AllocatorStats> {
    if lir.operands.num_registers() != registers.num_registers() {
        return Err(CompileError::malformed(format!(
            "function {} was built for {} registers, target {} has {}",
            lir.name,
            lir.operands.num_registers(),
            registers.name(),
            registers.num_registers()
        )));
    }

    debug!(
        "allocating {} ({} blocks, {} instructions) with {} policy",
        lir.name,
        lir.blocks.len(),
        lir.instruction_count(),
        policy.name()
    );

    let numbering = Numbering::number(lir)?;
    let liveness = LivenessAnalysis::compute(lir, config.max_liveness_iterations)?;
    let mut ls = LinearScan::new(lir, registers, config, policy, numbering, liveness);

    ls.build_intervals()?;
    ls.log_intervals("before register allocation");

    LinearScanWalker::new(&mut ls).walk()?;
    ls.log_intervals("after register allocation");

    ls.resolve_data_flow()?;
    if ls.lir.has_exception_handlers() {
        ls.resolve_exception_handlers()?;
    }

    ls.finalize_frame();
    if config.verify_intervals {
        ls.verify_intervals()?;
    }

    ls.eliminate_spill_moves()?;
    ls.assign_locations()?;

    if log::log_enabled!(log::Level::Trace) {
        trace!("after location assignment:\n{}", ls.lir);
    }
    Ok(ls.finish_stats())
}
