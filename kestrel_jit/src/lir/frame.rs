//! Stack frame layout.
//!
//! ```text
//! high addresses
//!   +----------------------+
//!   | incoming arguments   |  caller frame, StackSlot::caller(i)
//!   +----------------------+
//!   | return address       |
//!   +----------------------+ <- frame_size
//!   | padding              |
//!   | monitor slots        |  two words each
//!   | spill slots          |  reserved slots first, then allocator spills
//!   +----------------------+ <- sp (offset 0)
//! low addresses
//! ```

use crate::lir::StackSlot;

/// Frame layout of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMap {
    word_size: u32,
    reserved_slots: u32,
    monitors: u32,
    spill_slots: Option<u32>,
}

/// Stack alignment in bytes.
const FRAME_ALIGNMENT: u32 = 16;

impl FrameMap {
    /// Empty frame for a target word size.
    pub fn new(word_size: u32) -> Self {
        FrameMap {
            word_size,
            reserved_slots: 0,
            monitors: 0,
            spill_slots: None,
        }
    }

    /// Reserve slots ahead of the allocator's spill slots.
    #[must_use]
    pub fn with_reserved_slots(mut self, slots: u32) -> Self {
        self.reserved_slots = slots;
        self
    }

    /// Reserve monitor slots.
    #[must_use]
    pub fn with_monitors(mut self, monitors: u32) -> Self {
        self.monitors = monitors;
        self
    }

    /// First slot index the allocator may use.
    #[inline]
    pub fn initial_spill_slot(&self) -> u32 {
        self.reserved_slots
    }

    /// Fix the total slot count (reserved plus spilled). Called once by the allocator.
    pub fn finalize_frame(&mut self, total_slots: u32) {
        debug_assert!(self.spill_slots.is_none(), "frame already finalized");
        self.spill_slots = Some(total_slots.max(self.reserved_slots));
    }

    /// Whether the slot count is fixed.
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.spill_slots.is_some()
    }

    /// Total number of spill slots, including reserved slots.
    #[inline]
    pub fn spill_slot_count(&self) -> u32 {
        self.spill_slots.unwrap_or(self.reserved_slots)
    }

    /// Frame size in bytes, excluding the return address.
    pub fn frame_size(&self) -> u32 {
        let words = self.spill_slot_count() + 2 * self.monitors;
        (words * self.word_size).next_multiple_of(FRAME_ALIGNMENT)
    }

    /// Offset from the stack pointer of a slot.
    pub fn stack_offset(&self, slot: StackSlot) -> i32 {
        let offset = if slot.in_caller_frame {
            self.frame_size() + self.word_size + slot.index * self.word_size
        } else {
            slot.index * self.word_size
        };
        offset as i32
    }

    /// Offset from the stack pointer of a monitor's lock slot.
    pub fn monitor_offset(&self, index: u32) -> i32 {
        ((self.spill_slot_count() + 2 * index) * self.word_size) as i32
    }
}
