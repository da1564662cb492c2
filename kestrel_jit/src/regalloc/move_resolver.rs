//! Parallel Move Resolution
//!
//! Collects a set of mappings `from -> to` between intervals (or from constants to
//! intervals) that must all take effect at one program point, and orders them into
//! a sequence of moves that never overwrites a register before it has been read.
//!
//! A move into a register is safe once no pending move still reads that register.
//! When every pending move is blocked the mappings form a cycle; it is broken by
//! copying one source register to the source lineage's spill slot and reading it
//! from there instead.
//!
//! Moves are buffered per block and inserted *after* a given instruction index. The
//! buffer is flushed when the insertion block changes.

use super::interval::ProgPoint;
use super::linear_scan::LinearScan;
use crate::lir::{BlockId, Instruction, Location, Operand};
use kestrel_core::{CompileError, CompileResult};
use log::trace;

// =============================================================================
// Insertion Buffer
// =============================================================================

/// Instructions waiting to be inserted into one instruction list.
#[derive(Debug, Default)]
pub(crate) struct InsertionBuffer {
    pending: Vec<(usize, Instruction)>,
}

impl InsertionBuffer {
    /// Queue `inst` to be inserted after index `after`.
    pub(crate) fn push(&mut self, after: usize, inst: Instruction) {
        self.pending.push((after, inst));
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Insert everything queued into `instructions`.
    pub(crate) fn apply(&mut self, instructions: &mut Vec<Instruction>) {
        self.apply_filtered(instructions, |_| true);
    }

    /// Insert everything queued, dropping original instructions `keep` rejects.
    pub(crate) fn apply_filtered(&mut self, instructions: &mut Vec<Instruction>, keep: impl Fn(usize) -> bool) {
        let mut pending = std::mem::take(&mut self.pending);
        // stable: moves queued at one index keep their order
        pending.sort_by_key(|(after, _)| *after);
        let mut pending = pending.into_iter().peekable();

        let original = std::mem::take(instructions);
        instructions.reserve(original.len() + pending.len());
        for (index, inst) in original.into_iter().enumerate() {
            if keep(index) {
                instructions.push(inst);
            }
            while let Some((_, inserted)) = pending.next_if(|(after, _)| *after == index) {
                instructions.push(inserted);
            }
        }
        instructions.extend(pending.map(|(_, inst)| inst));
    }
}

// =============================================================================
// Move Resolver
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveSource {
    Interval(u32),
    Constant(Operand),
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    from: MoveSource,
    to: u32,
}

/// Orders parallel moves and inserts them into the LIR.
#[derive(Debug)]
pub(crate) struct MoveResolver {
    insert_block: Option<BlockId>,
    insert_index: usize,
    buffer: InsertionBuffer,
    mappings: Vec<Mapping>,
    register_blocked: Vec<u32>,
    multiple_reads_allowed: bool,
}

impl MoveResolver {
    pub(crate) fn new(num_registers: u32) -> Self {
        MoveResolver {
            insert_block: None,
            insert_index: 0,
            buffer: InsertionBuffer::default(),
            mappings: Vec::new(),
            register_blocked: vec![0; num_registers as usize],
            multiple_reads_allowed: false,
        }
    }

    #[inline]
    pub(crate) fn has_mappings(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// Allow one source to feed several targets until the next resolution.
    pub(crate) fn set_multiple_reads_allowed(&mut self) {
        self.multiple_reads_allowed = true;
    }

    pub(crate) fn add_mapping(&mut self, ls: &LinearScan<'_>, from: u32, to: u32) {
        trace!("  add move mapping from {} to {}", ls.intervals[from], ls.intervals[to]);
        debug_assert_ne!(from, to, "mapping an interval to itself");
        debug_assert_eq!(
            ls.intervals[from].kind(),
            ls.intervals[to].kind(),
            "move between different kinds"
        );
        self.mappings.push(Mapping {
            from: MoveSource::Interval(from),
            to,
        });
    }

    pub(crate) fn add_constant_mapping(&mut self, ls: &LinearScan<'_>, constant: Operand, to: u32) {
        trace!("  add move mapping from {constant} to {}", ls.intervals[to]);
        self.mappings.push(Mapping {
            from: MoveSource::Constant(constant),
            to,
        });
    }

    /// Start collecting moves for a new position. The previous position must be flushed.
    pub(crate) fn set_insert_position(&mut self, block: BlockId, after: usize) {
        debug_assert!(self.insert_block.is_none(), "insert position already set");
        debug_assert!(self.buffer.is_empty(), "insertion buffer not flushed");
        self.insert_block = Some(block);
        self.insert_index = after;
    }

    /// Move the insert position, resolving moves pending for the old one.
    pub(crate) fn move_insert_position(
        &mut self,
        ls: &mut LinearScan<'_>,
        block: BlockId,
        after: usize,
    ) -> CompileResult<()> {
        if let Some(current) = self.insert_block {
            if current != block || self.insert_index != after {
                self.resolve_into_buffer(ls)?;
            }
            if current != block {
                self.append_insertion_buffer(ls);
            }
        }
        self.insert_block = Some(block);
        self.insert_index = after;
        Ok(())
    }

    /// Resolve pending mappings and insert all buffered moves into the LIR.
    pub(crate) fn resolve_and_append_moves(&mut self, ls: &mut LinearScan<'_>) -> CompileResult<()> {
        self.resolve_into_buffer(ls)?;
        self.append_insertion_buffer(ls);
        self.insert_block = None;
        Ok(())
    }

    fn resolve_into_buffer(&mut self, ls: &mut LinearScan<'_>) -> CompileResult<()> {
        if !self.has_mappings() {
            return Ok(());
        }
        let after = self.insert_index;
        for mv in self.resolve_mappings(ls)? {
            self.buffer.push(after, mv);
        }
        Ok(())
    }

    fn append_insertion_buffer(&mut self, ls: &mut LinearScan<'_>) {
        if let Some(block) = self.insert_block {
            if !self.buffer.is_empty() {
                self.buffer.apply(&mut ls.lir.block_mut(block).instructions);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    fn register_of(ls: &LinearScan<'_>, source: MoveSource) -> Option<usize> {
        match source {
            MoveSource::Interval(id) => ls.intervals[id].register().map(|r| usize::from(r.number())),
            MoveSource::Constant(_) => None,
        }
    }

    fn block_registers(&mut self, ls: &LinearScan<'_>, source: MoveSource) {
        if let Some(reg) = Self::register_of(ls, source) {
            debug_assert!(
                self.multiple_reads_allowed || self.register_blocked[reg] == 0,
                "register already used as move source"
            );
            self.register_blocked[reg] += 1;
        }
    }

    fn unblock_registers(&mut self, ls: &LinearScan<'_>, source: MoveSource) {
        if let Some(reg) = Self::register_of(ls, source) {
            debug_assert!(self.register_blocked[reg] > 0, "register not blocked");
            self.register_blocked[reg] -= 1;
        }
    }

    /// Whether writing the target cannot clobber a source still to be read.
    fn save_to_process(&self, ls: &LinearScan<'_>, mapping: Mapping) -> bool {
        let Some(to) = ls.intervals[mapping.to].register() else {
            return true;
        };
        let blocked = self.register_blocked[usize::from(to.number())];
        let reads_itself = Self::register_of(ls, mapping.from) == Some(usize::from(to.number()));
        !(blocked > 1 || (blocked == 1 && !reads_itself))
    }

    fn make_move(ls: &LinearScan<'_>, mapping: Mapping) -> Instruction {
        let to = ls.intervals[mapping.to].operand();
        let from = match mapping.from {
            MoveSource::Interval(id) => ls.intervals[id].operand(),
            MoveSource::Constant(constant) => constant,
        };
        trace!("  move {from} -> {to}");
        Instruction::mov(from, to)
    }

    /// Order the pending mappings into moves, breaking cycles through memory.
    pub(crate) fn resolve_mappings(&mut self, ls: &mut LinearScan<'_>) -> CompileResult<Vec<Instruction>> {
        self.verify_before_resolve(ls)?;
        let mut moves = Vec::with_capacity(self.mappings.len());

        for i in 0..self.mappings.len() {
            let source = self.mappings[i].from;
            self.block_registers(ls, source);
        }

        while !self.mappings.is_empty() {
            let mut processed = false;
            let mut spill_candidate = None;

            for i in (0..self.mappings.len()).rev() {
                let mapping = self.mappings[i];
                if self.save_to_process(ls, mapping) {
                    moves.push(Self::make_move(ls, mapping));
                    self.unblock_registers(ls, mapping.from);
                    self.mappings.remove(i);
                    processed = true;
                } else if Self::register_of(ls, mapping.from).is_some() {
                    spill_candidate = Some(i);
                }
            }

            if !processed {
                let index = spill_candidate.ok_or_else(|| {
                    CompileError::bailout("no interval in register for spilling found")
                })?;
                moves.push(self.break_cycle(ls, index)?);
            }
        }

        self.multiple_reads_allowed = false;
        ls.stats.moves_inserted += moves.len() as u32;
        Ok(moves)
    }

    /// Copy the source of mapping `index` to its spill slot and read it from there.
    fn break_cycle(&mut self, ls: &mut LinearScan<'_>, index: usize) -> CompileResult<Instruction> {
        let MoveSource::Interval(from) = self.mappings[index].from else {
            return Err(CompileError::bailout("cycle through a constant move"));
        };
        let kind = ls.intervals[from].kind();
        let slot = match ls.intervals.spill_slot(from) {
            Some(slot) => slot,
            None => {
                let slot = ls.spill_slots.alloc(kind);
                ls.intervals.set_spill_slot(from, slot);
                slot
            }
        };

        let spill = ls.intervals.create_derived(kind, &mut ls.lir.operands);
        let interval = &mut ls.intervals[spill];
        // placeholder range; such intervals are ignored by verification
        interval.add_range(ProgPoint::from_raw(1), ProgPoint::from_raw(2));
        interval.assign_location(Location::Stack(slot));
        trace!("  breaking cycle: {} spilled to {slot}", ls.intervals[from]);

        let mv = Instruction::mov(ls.intervals[from].operand(), ls.intervals[spill].operand());
        self.unblock_registers(ls, MoveSource::Interval(from));
        self.mappings[index].from = MoveSource::Interval(spill);
        Ok(mv)
    }

    /// Two mappings writing one location are an allocation error.
    fn verify_before_resolve(&self, ls: &LinearScan<'_>) -> CompileResult<()> {
        for (i, a) in self.mappings.iter().enumerate() {
            for b in &self.mappings[i + 1..] {
                if !self.multiple_reads_allowed {
                    debug_assert!(
                        a.from != b.from || matches!(a.from, MoveSource::Constant(_)),
                        "interval read by two moves"
                    );
                }
                let (la, lb) = (ls.intervals[a.to].location(), ls.intervals[b.to].location());
                if a.to == b.to || la.is_some() && la == lb {
                    return Err(CompileError::invalid_allocation(format!(
                        "{} and {} are both written by one parallel move",
                        ls.intervals[a.to], ls.intervals[b.to]
                    )));
                }
            }
        }
        Ok(())
    }
}
