//! Interval Walker
//!
//! Visits intervals in order of their start position and assigns each one a
//! register or a stack slot.
//!
//! # Lists
//!
//! - *unhandled*: not reached yet. Fixed intervals are kept apart from variable
//!   intervals so that a fixed interval is activated before any variable starting
//!   at the same position.
//! - *active*: covers the current position and holds its register.
//! - *inactive*: has a lifetime hole at the current position but starts again later.
//!
//! # Allocation
//!
//! `alloc_free_register` looks for a register that is free at least until the
//! position after the interval's start, preferring the register of the hinted
//! interval. When the register is only free for part of the interval, the
//! remainder is split off and re-queued.
//!
//! `alloc_locked_register` runs when no register is free. It picks the register
//! whose next use by another interval is furthest away. If that use is closer than
//! the current interval's first use, the current interval is spilled. Otherwise the
//! intervals using the register are split and spilled.

use super::interval::{IntervalState, ProgPoint, RegisterPriority};
use super::linear_scan::LinearScan;
use super::move_resolver::MoveResolver;
use crate::backend::registers::Register;
use crate::lir::{BlockId, Location};
use kestrel_core::{CompileError, CompileResult};
use log::trace;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

// =============================================================================
// Unhandled Queue
// =============================================================================

/// A variable interval waiting to be allocated, ordered by start then first use.
#[derive(Debug, Clone, Copy)]
struct Unhandled {
    from: ProgPoint,
    first_use: ProgPoint,
    seq: u64,
    id: u32,
}

impl PartialEq for Unhandled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Unhandled {}

impl PartialOrd for Unhandled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Unhandled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (earliest start first)
        (other.from, other.first_use, other.seq).cmp(&(self.from, self.first_use, self.seq))
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Allocates registers for all intervals of a [`LinearScan`].
pub(crate) struct LinearScanWalker<'s, 'a> {
    ls: &'s mut LinearScan<'a>,
    /// Sorted by descending start so `pop` yields the next one.
    unhandled_fixed: Vec<u32>,
    unhandled_any: BinaryHeap<Unhandled>,
    seq: u64,
    active_fixed: Vec<u32>,
    active_any: Vec<u32>,
    inactive_fixed: Vec<u32>,
    inactive_any: Vec<u32>,
    current_position: ProgPoint,
    /// Per register number: next position where another interval uses the register.
    use_pos: Vec<ProgPoint>,
    /// Per register number: position where a fixed interval needs the register.
    block_pos: Vec<ProgPoint>,
    /// Per register number: intervals to split and spill if the register is taken.
    spill_intervals: Vec<Vec<u32>>,
    /// Candidate registers for the interval being allocated.
    available: Vec<Register>,
    move_resolver: MoveResolver,
}

impl<'s, 'a> LinearScanWalker<'s, 'a> {
    pub(crate) fn new(ls: &'s mut LinearScan<'a>) -> Self {
        let num_registers = ls.registers.num_registers();
        let mut unhandled_fixed = Vec::new();
        let mut unhandled_any = BinaryHeap::new();
        let mut seq = 0;

        for interval in ls.intervals.iter() {
            if interval.is_empty() {
                continue;
            }
            if interval.is_fixed() {
                unhandled_fixed.push(interval.operand_number());
            } else {
                unhandled_any.push(Unhandled {
                    from: interval.from(),
                    first_use: interval.first_usage(RegisterPriority::None),
                    seq,
                    id: interval.operand_number(),
                });
                seq += 1;
            }
        }
        unhandled_fixed.sort_by_key(|&id| std::cmp::Reverse((ls.intervals[id].from(), id)));

        LinearScanWalker {
            unhandled_fixed,
            unhandled_any,
            seq,
            active_fixed: Vec::new(),
            active_any: Vec::new(),
            inactive_fixed: Vec::new(),
            inactive_any: Vec::new(),
            current_position: ProgPoint::ZERO,
            use_pos: vec![ProgPoint::MAX; num_registers as usize],
            block_pos: vec![ProgPoint::MAX; num_registers as usize],
            spill_intervals: vec![Vec::new(); num_registers as usize],
            available: Vec::new(),
            move_resolver: MoveResolver::new(num_registers),
            ls,
        }
    }

    /// Allocate every interval, then insert the moves between split children.
    pub(crate) fn walk(mut self) -> CompileResult<()> {
        while let Some(id) = self.next_interval() {
            let from = self.ls.intervals[id].from();
            self.walk_to(from);
            self.current_position = from;

            self.ls.intervals[id].state = IntervalState::Active;
            if self.activate_current(id)? {
                if self.ls.intervals[id].is_fixed() {
                    self.active_fixed.push(id);
                } else {
                    self.active_any.push(id);
                }
            } else {
                self.ls.intervals[id].state = IntervalState::Handled;
            }
        }
        self.move_resolver.resolve_and_append_moves(self.ls)
    }

    fn next_interval(&mut self) -> Option<u32> {
        let fixed_from = self.unhandled_fixed.last().map(|&id| self.ls.intervals[id].from());
        let any_from = self.unhandled_any.peek().map(|u| u.from);
        match (fixed_from, any_from) {
            (Some(f), Some(a)) if f <= a => self.unhandled_fixed.pop(),
            (Some(_), None) => self.unhandled_fixed.pop(),
            (_, Some(_)) => self.unhandled_any.pop().map(|u| u.id),
            (None, None) => None,
        }
    }

    fn append_unhandled(&mut self, id: u32) {
        let interval = &self.ls.intervals[id];
        debug_assert!(!interval.is_fixed(), "split of a fixed interval");
        self.unhandled_any.push(Unhandled {
            from: interval.from(),
            first_use: interval.first_usage(RegisterPriority::None),
            seq: self.seq,
            id,
        });
        self.seq += 1;
        self.ls.intervals[id].state = IntervalState::Unhandled;
    }

    /// Move intervals between the active, inactive and handled states for `pos`.
    fn walk_to(&mut self, pos: ProgPoint) {
        let intervals = &mut self.ls.intervals;
        for (active, inactive) in [
            (&mut self.active_fixed, &mut self.inactive_fixed),
            (&mut self.active_any, &mut self.inactive_any),
        ] {
            let mut still_active = Vec::with_capacity(active.len());
            for id in active.drain(..) {
                let interval = &mut intervals[id];
                while !interval.current_at_end() && interval.current_to() <= pos {
                    interval.next_range();
                }
                if interval.current_at_end() {
                    interval.state = IntervalState::Handled;
                } else if interval.current_from() > pos {
                    interval.state = IntervalState::Inactive;
                    inactive.push(id);
                } else {
                    still_active.push(id);
                }
            }

            let mut still_inactive = Vec::with_capacity(inactive.len());
            for id in inactive.drain(..) {
                let interval = &mut intervals[id];
                while !interval.current_at_end() && interval.current_to() <= pos {
                    interval.next_range();
                }
                if interval.current_at_end() {
                    interval.state = IntervalState::Handled;
                } else if interval.current_from() <= pos {
                    interval.state = IntervalState::Active;
                    still_active.push(id);
                } else {
                    still_inactive.push(id);
                }
            }
            *active = still_active;
            *inactive = still_inactive;
        }
    }

    fn remove_from_lists(&mut self, id: u32) {
        self.active_any.retain(|&i| i != id);
        self.inactive_any.retain(|&i| i != id);
    }

    // -------------------------------------------------------------------------
    // Activation
    // -------------------------------------------------------------------------

    /// Allocate the interval starting at the current position. Returns whether it
    /// holds a register and belongs on the active list.
    fn activate_current(&mut self, id: u32) -> CompileResult<bool> {
        trace!("activating {}", self.ls.intervals[id]);
        let interval = &self.ls.intervals[id];
        if interval.is_fixed() {
            return Ok(true);
        }

        let mut result = true;
        let variable = interval.operand().as_variable();
        let must_start_in_memory = variable.is_some_and(|v| self.ls.lir.operands.must_start_in_memory(v));

        if interval.location().is_some_and(|l| l.is_stack()) {
            // incoming stack argument: reload before its first register use
            self.split_stack_interval(id)?;
            result = false;
        } else if must_start_in_memory {
            debug_assert!(interval.location().is_none(), "register already assigned");
            let must_stay = variable.is_some_and(|v| self.ls.lir.operands.must_stay_in_memory(v));
            self.ls.assign_spill_slot(id);
            if !must_stay {
                self.split_stack_interval(id)?;
            }
            result = false;
        } else if interval.location().is_none() {
            if self.no_allocation_possible(id) || !self.alloc_free_register(id)? {
                self.alloc_locked_register(id)?;
            }
            if !self.ls.intervals[id].location().is_some_and(|l| l.is_register()) {
                result = false;
            }
        }

        if self.ls.intervals[id].insert_move_when_activated() {
            let from = self.ls.intervals[id].from();
            let previous = self.ls.intervals.current_split_child(id).ok_or_else(|| {
                CompileError::bailout(format!("no previous split child for {}", self.ls.intervals[id]))
            })?;
            debug_assert_ne!(previous, id, "move between the same interval");
            self.insert_move(from, previous, id)?;
        }
        self.ls.intervals.make_current_split_child(id);
        Ok(result)
    }

    /// Whether the interval starts right before a call that clobbers every register.
    fn no_allocation_possible(&self, id: u32) -> bool {
        if !self.ls.registers.all_allocatable_caller_saved() {
            return false;
        }
        let interval = &self.ls.intervals[id];
        let pos = interval.from();
        !pos.is_even()
            && pos < self.ls.numbering.max_op_id()
            && self.ls.numbering.has_call(pos + 1)
            && interval.to() > pos + 1
    }

    fn init_available(&mut self, id: u32) {
        let class = self.ls.intervals[id].kind().register_class();
        self.available = self.ls.registers.allocatable_registers(class);
    }

    fn init_use_lists(&mut self, only_process_use_pos: bool) {
        for reg in &self.available {
            let n = usize::from(reg.number());
            self.use_pos[n] = ProgPoint::MAX;
            if !only_process_use_pos {
                self.block_pos[n] = ProgPoint::MAX;
                self.spill_intervals[n].clear();
            }
        }
    }

    fn register_index(&self, id: u32) -> Option<usize> {
        self.ls.intervals[id].register().map(|r| usize::from(r.number()))
    }

    fn exclude_from_use(&mut self, id: u32) {
        if let Some(n) = self.register_index(id) {
            self.use_pos[n] = ProgPoint::ZERO;
        }
    }

    fn set_use_pos(&mut self, id: u32, pos: Option<ProgPoint>, only_process_use_pos: bool) {
        let (Some(pos), Some(n)) = (pos, self.register_index(id)) else {
            return;
        };
        if self.use_pos[n] > pos {
            self.use_pos[n] = pos;
        }
        if !only_process_use_pos {
            self.spill_intervals[n].push(id);
        }
    }

    fn set_block_pos(&mut self, id: u32, pos: Option<ProgPoint>) {
        let (Some(pos), Some(n)) = (pos, self.register_index(id)) else {
            return;
        };
        if self.block_pos[n] > pos {
            self.block_pos[n] = pos;
        }
        if self.use_pos[n] > pos {
            self.use_pos[n] = pos;
        }
    }

    // -------------------------------------------------------------------------
    // Free register allocation
    // -------------------------------------------------------------------------

    fn alloc_free_register(&mut self, id: u32) -> CompileResult<bool> {
        self.init_available(id);
        self.init_use_lists(true);

        for i in 0..self.active_fixed.len() {
            self.exclude_from_use(self.active_fixed[i]);
        }
        for i in 0..self.active_any.len() {
            self.exclude_from_use(self.active_any[i]);
        }
        let interval_to = self.ls.intervals[id].to();
        for i in 0..self.inactive_fixed.len() {
            let fixed = self.inactive_fixed[i];
            let other = &self.ls.intervals[fixed];
            let pos = if interval_to <= other.current_from() {
                Some(other.current_from())
            } else {
                other.current_intersects_at(&self.ls.intervals[id])
            };
            self.set_use_pos(fixed, pos, true);
        }
        for i in 0..self.inactive_any.len() {
            let inactive = self.inactive_any[i];
            let pos = self.ls.intervals[inactive].current_intersects_at(&self.ls.intervals[id]);
            self.set_use_pos(inactive, pos, true);
        }

        let hint = self
            .ls
            .intervals
            .location_hint(id, true)
            .and_then(|h| self.ls.intervals[h].register());

        let reg_needed_until = self.ls.intervals[id].from() + 1;
        let mut min_full: Option<Register> = None;
        let mut max_partial: Option<Register> = None;

        for &reg in &self.available {
            let pos = self.use_pos[usize::from(reg.number())];
            if pos >= interval_to {
                // free for the whole interval; best fit wins
                let better = match min_full {
                    None => true,
                    Some(best) => {
                        Some(reg) == hint
                            || (pos < self.use_pos[usize::from(best.number())] && Some(best) != hint)
                    }
                };
                if better {
                    min_full = Some(reg);
                }
            } else if pos > reg_needed_until {
                let better = match max_partial {
                    None => true,
                    Some(best) => {
                        Some(reg) == hint
                            || (pos > self.use_pos[usize::from(best.number())] && Some(best) != hint)
                    }
                };
                if better {
                    max_partial = Some(reg);
                }
            }
        }

        let (reg, need_split) = match (min_full, max_partial) {
            (Some(reg), _) => (reg, false),
            (None, Some(reg)) => (reg, true),
            (None, None) => return Ok(false),
        };
        let split_pos = self.use_pos[usize::from(reg.number())];
        trace!("  free register {reg} until {split_pos}");
        self.ls.intervals[id].assign_location(Location::Register(reg));
        if need_split {
            self.split_when_partial_register_available(id, split_pos)?;
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Locked register allocation
    // -------------------------------------------------------------------------

    fn alloc_locked_register(&mut self, id: u32) -> CompileResult<()> {
        self.init_available(id);
        self.init_use_lists(false);

        for i in 0..self.active_fixed.len() {
            self.exclude_from_use(self.active_fixed[i]);
        }
        let interval_to = self.ls.intervals[id].to();
        for i in 0..self.inactive_fixed.len() {
            let fixed = self.inactive_fixed[i];
            let other = &self.ls.intervals[fixed];
            if interval_to > other.current_from() {
                let pos = other.current_intersects_at(&self.ls.intervals[id]);
                self.set_block_pos(fixed, pos);
            }
        }
        let position = self.current_position;
        for i in 0..self.active_any.len() {
            let active = self.active_any[i];
            let other = &self.ls.intervals[active];
            let pos = other.next_usage(RegisterPriority::LiveAtLoopEnd, position).min(other.to());
            self.set_use_pos(active, Some(pos), false);
        }
        for i in 0..self.inactive_any.len() {
            let inactive = self.inactive_any[i];
            let other = &self.ls.intervals[inactive];
            if other.current_intersects_at(&self.ls.intervals[id]).is_some() {
                let pos = other.next_usage(RegisterPriority::LiveAtLoopEnd, position).min(other.to());
                self.set_use_pos(inactive, Some(pos), false);
            }
        }

        let interval = &self.ls.intervals[id];
        let first_usage = interval.first_usage(RegisterPriority::MustHaveRegister);
        let first_should_have = interval.first_usage(RegisterPriority::ShouldHaveRegister);
        let from = interval.from();
        let reg_needed_until = first_usage.min(from + 1);
        let ignore = interval.register();

        let mut chosen: Option<Register> = None;
        for &reg in &self.available {
            if Some(reg) == ignore {
                continue;
            }
            let pos = self.use_pos[usize::from(reg.number())];
            if pos > reg_needed_until && chosen.is_none_or(|c| pos > self.use_pos[usize::from(c.number())]) {
                chosen = Some(reg);
            }
        }

        let reg_use_pos = chosen.map_or(ProgPoint::ZERO, |r| self.use_pos[usize::from(r.number())]);
        let reg = match chosen {
            Some(reg) if reg_use_pos > first_should_have => reg,
            _ => {
                // every register is needed before the interval's first use: spill it
                if first_usage <= from + 1 {
                    self.ls.assign_spill_slot(id);
                    return Err(CompileError::NoRegisterAvailable {
                        operand: self.ls.intervals.parent_of(id),
                        position: from.raw(),
                    });
                }
                trace!("  spilling current {}", self.ls.intervals[id]);
                return self.split_and_spill_interval(id);
            }
        };

        let block_pos = self.block_pos[usize::from(reg.number())];
        let need_split = block_pos <= interval_to;
        trace!("  locked register {reg}, blocked at {block_pos}");
        self.ls.intervals[id].assign_location(Location::Register(reg));
        if need_split {
            self.split_when_partial_register_available(id, block_pos)?;
        }

        let evicted = std::mem::take(&mut self.spill_intervals[usize::from(reg.number())]);
        for other in evicted {
            self.remove_from_lists(other);
            self.split_and_spill_interval(other)?;
            self.ls.intervals[other].state = IntervalState::Handled;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Splitting
    // -------------------------------------------------------------------------

    fn split_when_partial_register_available(&mut self, id: u32, available_until: ProgPoint) -> CompileResult<()> {
        let interval = &self.ls.intervals[id];
        let min_split_pos = interval
            .previous_usage(RegisterPriority::ShouldHaveRegister, available_until)
            .max(interval.from() + 1);
        self.split_before_usage(id, min_split_pos, available_until)
    }

    /// Split an interval living in its stack slot before its first register use.
    fn split_stack_interval(&mut self, id: u32) -> CompileResult<()> {
        let interval = &self.ls.intervals[id];
        let min_split_pos = self.current_position + 1;
        let max_split_pos = interval
            .first_usage(RegisterPriority::ShouldHaveRegister)
            .min(interval.to())
            .max(min_split_pos);
        self.split_before_usage(id, min_split_pos, max_split_pos)
    }

    /// Split `id` between the two positions and queue the second part.
    fn split_before_usage(&mut self, id: u32, min_split_pos: ProgPoint, max_split_pos: ProgPoint) -> CompileResult<()> {
        debug_assert!(self.ls.intervals[id].from() < min_split_pos, "split at interval start");
        debug_assert!(min_split_pos <= max_split_pos, "invalid split bounds");

        let mut split_pos = self.find_optimal_split_pos(id, min_split_pos, max_split_pos, true);
        let interval = &self.ls.intervals[id];
        if split_pos == interval.to()
            && interval.next_usage(RegisterPriority::MustHaveRegister, min_split_pos) == ProgPoint::MAX
        {
            // the split would be at the very end: nothing to split
            return Ok(());
        }

        let is_block_begin = self.ls.numbering.is_block_begin(split_pos);
        let move_necessary = !is_block_begin && !interval.has_hole_between(split_pos - 1, split_pos);
        if !is_block_begin {
            split_pos = split_pos.odd_before();
        }

        let child = self.ls.intervals.split(id, split_pos, &mut self.ls.lir.operands)?;
        self.ls.intervals[child].set_insert_move_when_activated(move_necessary);
        trace!("  split {} at {split_pos}, new {}", self.ls.intervals[id], self.ls.intervals[child]);
        self.append_unhandled(child);
        Ok(())
    }

    fn find_optimal_split_pos(
        &self,
        id: u32,
        min_split_pos: ProgPoint,
        max_split_pos: ProgPoint,
        loop_optimization: bool,
    ) -> ProgPoint {
        if min_split_pos == max_split_pos {
            return min_split_pos;
        }
        let numbering = &self.ls.numbering;
        let min_block = numbering.block_for_id(min_split_pos - 1);
        let max_block = numbering.block_for_id(max_split_pos - 1);
        if min_block == max_block {
            return max_split_pos;
        }

        let interval = &self.ls.intervals[id];
        if interval.has_hole_between(max_split_pos - 1, max_split_pos) && !numbering.is_block_begin(max_split_pos) {
            // a hole before the register use: reloading earlier gains nothing
            return max_split_pos;
        }

        if loop_optimization {
            let loop_end_pos = interval.next_usage_exact(
                RegisterPriority::LiveAtLoopEnd,
                numbering.last_id(min_block) + 2,
            );
            if loop_end_pos < max_split_pos {
                // split before the loop so the reload is not repeated inside it
                let loop_block = numbering.block_for_id(loop_end_pos);
                let loop_block_end = numbering.last_id(loop_block) + 2;
                let pos = self.optimal_block_boundary(min_block, loop_block, loop_block_end);
                if pos != loop_block_end {
                    return pos;
                }
            }
        }
        self.optimal_block_boundary(min_block, max_block, max_split_pos)
    }

    /// Block boundary at the lowest loop depth between two blocks.
    fn optimal_block_boundary(&self, min_block: BlockId, max_block: BlockId, max_split_pos: ProgPoint) -> ProgPoint {
        let numbering = &self.ls.numbering;
        let mut split_pos = numbering.last_id(max_block) + 2;
        if split_pos > max_split_pos {
            split_pos = numbering.first_id(max_block);
        }
        let mut min_loop_depth = self.ls.lir.block(max_block).loop_depth;
        for b in (min_block.0..max_block.0).rev() {
            let block = BlockId(b);
            let depth = self.ls.lir.block(block).loop_depth;
            if depth < min_loop_depth {
                min_loop_depth = depth;
                split_pos = numbering.last_id(block) + 2;
            }
        }
        split_pos
    }

    fn split_and_spill_interval(&mut self, id: u32) -> CompileResult<()> {
        let position = self.current_position;
        match self.ls.intervals[id].state {
            IntervalState::Inactive => {
                // a later part may still get a register; no slot needed yet
                self.split_before_usage(id, position + 1, position + 1)
            }
            IntervalState::Active => {
                let interval = &self.ls.intervals[id];
                let min_split_pos = position + 1;
                let max_split_pos = interval
                    .next_usage(RegisterPriority::MustHaveRegister, min_split_pos)
                    .min(interval.to())
                    .max(min_split_pos);
                self.split_before_usage(id, min_split_pos, max_split_pos)?;
                self.split_for_spilling(id)
            }
            state => Err(CompileError::bailout(format!(
                "cannot spill {} in state {state:?}",
                self.ls.intervals[id]
            ))),
        }
    }

    /// Spill the part of `id` after its last register use before the current position.
    fn split_for_spilling(&mut self, id: u32) -> CompileResult<()> {
        let max_split_pos = self.current_position;
        let interval = &self.ls.intervals[id];
        let min_split_pos = (interval.previous_usage(RegisterPriority::ShouldHaveRegister, max_split_pos) + 1)
            .max(interval.from())
            .min(max_split_pos);

        if min_split_pos == interval.from() {
            // never used before the current position: spill everything
            self.ls.assign_spill_slot(id);
            self.ls.change_spill_state(id, min_split_pos)?;

            // earlier siblings with no use only add moves through a register
            let mut cursor = id;
            while self.ls.intervals[cursor].is_split_child() {
                let from = self.ls.intervals[cursor].from();
                let Some(previous) = self.ls.intervals.split_child_before(cursor, from) else {
                    break;
                };
                if !self.ls.intervals[previous].location().is_some_and(|l| l.is_register()) {
                    cursor = previous;
                    continue;
                }
                if self.ls.intervals[previous].first_usage(RegisterPriority::ShouldHaveRegister) != ProgPoint::MAX {
                    break;
                }
                trace!("  kicking unused {} to memory", self.ls.intervals[previous]);
                self.ls.assign_spill_slot(previous);
                cursor = previous;
            }
            return Ok(());
        }

        let mut split_pos = self.find_optimal_split_pos(id, min_split_pos, max_split_pos, false);
        let is_block_begin = self.ls.numbering.is_block_begin(split_pos);
        if !is_block_begin {
            split_pos = split_pos.odd_before();
        }

        let spilled = self.ls.intervals.split(id, split_pos, &mut self.ls.lir.operands)?;
        self.ls.assign_spill_slot(spilled);
        self.ls.change_spill_state(spilled, split_pos)?;
        trace!("  spilled part {}", self.ls.intervals[spilled]);

        if !is_block_begin {
            self.insert_move(split_pos, id, spilled)?;
        }
        self.ls.intervals.make_current_split_child(spilled);
        Ok(())
    }

    /// Queue a move from `from` to `to` before the instruction at `pos`.
    fn insert_move(&mut self, pos: ProgPoint, from: u32, to: u32) -> CompileResult<()> {
        let op_id = pos.round_up_to_even();
        let block = self.ls.numbering.block_for_id(op_id);
        let first_id = self.ls.numbering.first_id(block);

        let instructions = &self.ls.lir.block(block).instructions;
        let mut index = (op_id.raw() - first_id.raw()) as usize / 2;
        while index < instructions.len() && instructions[index].id != Some(op_id) {
            index += 1;
        }
        if index == 0 || index >= instructions.len() {
            return Err(CompileError::bailout(format!(
                "cannot insert move at {op_id} in block {block}"
            )));
        }

        self.move_resolver.move_insert_position(self.ls, block, index - 1)?;
        self.move_resolver.add_mapping(self.ls, from, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registers::RegisterConfig;
    use crate::lir::{Constant, Kind, LirBuilder, LirFunction, Opcode};
    use crate::regalloc::constraint::DefaultPriorityPolicy;
    use crate::regalloc::linear_scan::Numbering;
    use crate::regalloc::liveness::LivenessAnalysis;
    use crate::regalloc::AllocatorConfig;

    fn p(raw: u32) -> ProgPoint {
        ProgPoint::from_raw(raw)
    }

    /// `x` is read at 4, dead until it is defined again at 6, read again at 8.
    fn redefined_after_hole(registers: &RegisterConfig) -> (LirFunction, u32) {
        let mut b = LirBuilder::new("redefine", registers);
        let x = b.variable(Kind::Int);
        let y = b.variable(Kind::Int);
        let z = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), x); // 2
        b.binary(Opcode::Add, y, x, Constant::int(1)); // 4
        b.mov(Constant::int(5), x); // 6
        b.binary(Opcode::Add, z, x, y); // 8
        b.ret(Some(z.into())); // 10
        let lir = b.finish();
        let nx = lir.operands.variable_number(x);
        (lir, nx)
    }

    /// Split `id` before `[min, max]` and return whether its new child reloads from the parent.
    fn split_needs_move(lir: &mut LirFunction, registers: &RegisterConfig, id: u32, min: u32, max: u32) -> bool {
        let config = AllocatorConfig::default();
        let numbering = Numbering::number(lir).unwrap();
        let liveness = LivenessAnalysis::compute(lir, 50).unwrap();
        let mut ls = LinearScan::new(lir, registers, &config, &DefaultPriorityPolicy, numbering, liveness);
        ls.build_intervals().unwrap();
        let mut walker = LinearScanWalker::new(&mut ls);
        walker.split_before_usage(id, p(min), p(max)).unwrap();
        let children = walker.ls.intervals[id].split_children().to_vec();
        assert_eq!(children.len(), 2, "{id} was not split");
        walker.ls.intervals[children[1]].insert_move_when_activated()
    }

    #[test]
    fn test_split_at_redefinition_needs_no_move() {
        let registers = RegisterConfig::reference();
        let (mut lir, x) = redefined_after_hole(&registers);
        assert!(!split_needs_move(&mut lir, &registers, x, 5, 6));
    }

    #[test]
    fn test_split_inside_live_range_needs_move() {
        let registers = RegisterConfig::reference();
        let (mut lir, x) = redefined_after_hole(&registers);
        assert!(split_needs_move(&mut lir, &registers, x, 3, 4));
    }

    #[test]
    fn test_unhandled_order() {
        let mut heap = BinaryHeap::new();
        let item = |from, first_use, seq, id| Unhandled {
            from: ProgPoint::from_raw(from),
            first_use: ProgPoint::from_raw(first_use),
            seq,
            id,
        };
        heap.push(item(8, 10, 0, 1));
        heap.push(item(4, 12, 1, 2));
        heap.push(item(4, 6, 2, 3));
        heap.push(item(4, 6, 3, 4));

        let order: Vec<u32> = std::iter::from_fn(|| heap.pop().map(|u| u.id)).collect();
        assert_eq!(order, vec![3, 4, 2, 1]);
    }
}
