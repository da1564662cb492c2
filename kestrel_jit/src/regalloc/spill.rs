//! Spill Slots and Spill State
//!
//! Spill slots are frame slot indices handed out after the frame's reserved
//! slots. Each split lineage owns at most one canonical slot; every spilled part of
//! the lineage uses it.
//!
//! On 32-bit targets `Long` and `Double` values take two slots, aligned to an even
//! index. The hole the alignment leaves is filled by the next single-slot value.
//!
//! The spill state machine on the split parent decides where stores happen:
//!
//! ```text
//! NoDefinitionFound --def--> NoSpillStore --spill--> OneSpillStore --spill--> StoreAtDefinition
//!                                 |                                                ^
//!                                 +--spill inside a deeper loop than the def-------+
//! ```
//!
//! A second definition moves the state to `NoOptimization`; a definition that does
//! not want a register moves it to `StartInMemory`.

use super::interval::{ProgPoint, SpillState};
use super::linear_scan::LinearScan;
use crate::backend::registers::spill_slots;
use crate::lir::{Kind, Location, StackSlot};
use kestrel_core::{CompileError, CompileResult};
use log::trace;

// =============================================================================
// Spill Slot Allocator
// =============================================================================

/// Hands out frame slot indices for spilled values.
#[derive(Debug, Clone)]
pub struct SpillSlotAllocator {
    /// Next free slot index.
    max_spills: u32,
    /// Single slot left behind by double-slot alignment.
    unused_slot: Option<u32>,
    word_size: u32,
}

impl SpillSlotAllocator {
    /// Allocator starting at `initial_slot`.
    pub const fn new(initial_slot: u32, word_size: u32) -> Self {
        SpillSlotAllocator {
            max_spills: initial_slot,
            unused_slot: None,
            word_size,
        }
    }

    /// Allocate a slot for a value of `kind`.
    pub fn alloc(&mut self, kind: Kind) -> StackSlot {
        let index = if spill_slots(kind, self.word_size) == 2 {
            if self.max_spills % 2 == 1 {
                debug_assert!(self.unused_slot.is_none(), "wasting a spill slot");
                self.unused_slot = Some(self.max_spills);
                self.max_spills += 1;
            }
            let index = self.max_spills;
            self.max_spills += 2;
            index
        } else if let Some(unused) = self.unused_slot.take() {
            unused
        } else {
            let index = self.max_spills;
            self.max_spills += 1;
            index
        };
        StackSlot::new(index, kind)
    }

    /// Slots in use, including the reserved ones before the first spill slot.
    #[inline]
    pub fn total_slots(&self) -> u32 {
        self.max_spills
    }
}

// =============================================================================
// Spill Bookkeeping
// =============================================================================

impl LinearScan<'_> {
    /// Give `id` its lineage's canonical spill slot, allocating one on first use.
    pub(crate) fn assign_spill_slot(&mut self, id: u32) {
        let slot = match self.intervals.spill_slot(id) {
            Some(slot) => slot,
            None => {
                let slot = self.spill_slots.alloc(self.intervals[id].kind());
                self.intervals.set_spill_slot(id, slot);
                slot
            }
        };
        trace!("assigning spill slot {slot} to {}", self.intervals[id]);
        self.intervals[id].assign_location(Location::Stack(slot));
    }

    /// Record a definition of the lineage of `id` at `def_pos`.
    pub(crate) fn change_spill_definition_pos(&mut self, id: u32, def_pos: ProgPoint) -> CompileResult<()> {
        match self.intervals.spill_state(id) {
            SpillState::NoDefinitionFound => {
                self.intervals.set_spill_definition_pos(id, def_pos);
                self.intervals.set_spill_state(id, SpillState::NoSpillStore);
            }
            SpillState::NoSpillStore => {
                let previous = self.intervals.spill_definition_pos(id).unwrap_or(ProgPoint::MAX);
                if def_pos < previous - 2 {
                    // second definition found, so no spill optimization possible
                    self.intervals.set_spill_state(id, SpillState::NoOptimization);
                }
            }
            SpillState::NoOptimization => {}
            state => {
                return Err(CompileError::bailout(format!(
                    "definition of {} at {def_pos} in spill state {state:?}",
                    self.intervals[id]
                )));
            }
        }
        Ok(())
    }

    /// Record that the lineage of `id` is spilled at `spill_pos`.
    pub(crate) fn change_spill_state(&mut self, id: u32, spill_pos: ProgPoint) -> CompileResult<()> {
        match self.intervals.spill_state(id) {
            SpillState::NoSpillStore => {
                let def_pos = self.intervals.spill_definition_pos(id).ok_or_else(|| {
                    CompileError::bailout(format!("spill of {} without definition", self.intervals[id]))
                })?;
                let def_depth = self.loop_depth_at(def_pos);
                let spill_depth = self.loop_depth_at(spill_pos);
                if def_depth < spill_depth {
                    // the store at the spill would sit in a loop; store at the definition instead
                    self.intervals.set_spill_state(id, SpillState::StoreAtDefinition);
                } else {
                    self.intervals.set_spill_state(id, SpillState::OneSpillStore);
                }
            }
            SpillState::OneSpillStore => {
                self.intervals.set_spill_state(id, SpillState::StoreAtDefinition);
            }
            SpillState::NoDefinitionFound
            | SpillState::StoreAtDefinition
            | SpillState::StartInMemory
            | SpillState::NoOptimization => {}
        }
        trace!(
            "spill state of {} is now {:?}",
            self.intervals[id],
            self.intervals.spill_state(id)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_start_after_reserved() {
        let mut alloc = SpillSlotAllocator::new(2, 8);
        assert_eq!(alloc.alloc(Kind::Int).index, 2);
        assert_eq!(alloc.alloc(Kind::Double).index, 3);
        assert_eq!(alloc.total_slots(), 4);
    }

    #[test]
    fn test_double_slot_alignment_hole_is_reused() {
        let mut alloc = SpillSlotAllocator::new(0, 4);
        assert_eq!(alloc.alloc(Kind::Int).index, 0);
        // index 1 is skipped for alignment
        assert_eq!(alloc.alloc(Kind::Long).index, 2);
        assert_eq!(alloc.alloc(Kind::Int).index, 1);
        assert_eq!(alloc.alloc(Kind::Int).index, 4);
        assert_eq!(alloc.total_slots(), 5);
    }
}
