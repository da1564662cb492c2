//! Live Interval Representation
//!
//! An [`Interval`] records where one operand (a variable or a fixed physical register)
//! is live, as a sorted list of half-open ranges, together with the positions at which
//! the operand is used and how badly each use wants a register.
//!
//! Splitting an interval produces a *split child* with its own operand number. The
//! original interval is the *split parent* of all its children; spill bookkeeping
//! (spill slot, spill state, spill definition position) lives on the parent only and
//! is reached through the [`IntervalTable`].
//!
//! # Key Concepts
//!
//! - **Program Point**: position of an instruction boundary; even positions are
//!   instruction ids, odd positions lie between instructions
//! - **Range**: half-open span `[from, to)` where the operand is live
//! - **Use Position**: a position plus a [`RegisterPriority`]

use crate::lir::{Kind, Location, Operand, OperandMode, StackSlot};
use crate::regalloc::operand_pool::OperandPool;
use kestrel_core::{CompileError, CompileResult};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Add, Index, IndexMut, Sub};

// =============================================================================
// Program Point
// =============================================================================

/// A position in the numbered instruction stream.
///
/// Instruction `n` in linear order has id `2n`; odd positions sit between two
/// instructions and are where split children start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgPoint(u32);

impl ProgPoint {
    /// The first position.
    pub const ZERO: ProgPoint = ProgPoint(0);

    /// Greater than every real position; "no such position".
    pub const MAX: ProgPoint = ProgPoint(u32::MAX);

    /// Create from a raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        ProgPoint(raw)
    }

    /// Id of the instruction with the given linear index.
    #[inline]
    pub const fn instruction(index: u32) -> Self {
        ProgPoint(index * 2)
    }

    /// Get the raw value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Linear index of the instruction at or just before this point.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 >> 1) as usize
    }

    /// Check if this is an instruction id.
    #[inline]
    pub const fn is_even(self) -> bool {
        self.0 & 1 == 0
    }

    /// The odd position just before this one (`(p - 1) | 1`).
    #[inline]
    pub const fn odd_before(self) -> Self {
        ProgPoint((self.0 - 1) | 1)
    }

    /// Round up to the next instruction id.
    #[inline]
    pub const fn round_up_to_even(self) -> Self {
        ProgPoint((self.0 + 1) & !1)
    }
}

impl Add<u32> for ProgPoint {
    type Output = ProgPoint;

    #[inline]
    fn add(self, rhs: u32) -> ProgPoint {
        ProgPoint(self.0.saturating_add(rhs))
    }
}

impl Sub<u32> for ProgPoint {
    type Output = ProgPoint;

    #[inline]
    fn sub(self, rhs: u32) -> ProgPoint {
        ProgPoint(self.0.saturating_sub(rhs))
    }
}

impl fmt::Display for ProgPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ProgPoint::MAX {
            f.write_str("max")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// =============================================================================
// Range
// =============================================================================

/// A half-open live range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Start (inclusive).
    pub from: ProgPoint,
    /// End (exclusive).
    pub to: ProgPoint,
}

impl Range {
    /// Create a range.
    #[inline]
    pub const fn new(from: ProgPoint, to: ProgPoint) -> Self {
        Range { from, to }
    }

    /// Whether `pos` lies in the range.
    #[inline]
    pub fn contains(&self, pos: ProgPoint) -> bool {
        self.from <= pos && pos < self.to
    }

    /// Whether two ranges share a position.
    #[inline]
    pub fn overlaps(&self, other: &Range) -> bool {
        self.from < other.to && other.from < self.to
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// First position where two range lists overlap, starting at the given indices.
fn intersect_from(a: &VecDeque<Range>, mut i: usize, b: &VecDeque<Range>, mut j: usize) -> Option<ProgPoint> {
    while let (Some(r1), Some(r2)) = (a.get(i), b.get(j)) {
        if r1.from < r2.from {
            if r1.to <= r2.from {
                i += 1;
            } else {
                return Some(r2.from);
            }
        } else if r2.from < r1.from {
            if r2.to <= r1.from {
                j += 1;
            } else {
                return Some(r1.from);
            }
        } else if r1.from == r1.to {
            i += 1;
        } else if r2.from == r2.to {
            j += 1;
        } else {
            return Some(r1.from);
        }
    }
    None
}

// =============================================================================
// Use Positions
// =============================================================================

/// How strongly a use wants its operand in a register. Ordered weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterPriority {
    /// No preference; the use may read memory.
    None,
    /// Live at the end of a loop; splitting here avoids a reload in the loop.
    LiveAtLoopEnd,
    /// A register is preferred.
    ShouldHaveRegister,
    /// The use requires a register.
    MustHaveRegister,
}

impl RegisterPriority {
    const fn short(self) -> char {
        match self {
            RegisterPriority::None => 'N',
            RegisterPriority::LiveAtLoopEnd => 'L',
            RegisterPriority::ShouldHaveRegister => 'S',
            RegisterPriority::MustHaveRegister => 'M',
        }
    }
}

/// A use of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsePosition {
    /// Where the operand is used.
    pub pos: ProgPoint,
    /// How strongly it wants a register.
    pub priority: RegisterPriority,
}

// =============================================================================
// States
// =============================================================================

/// Spill bookkeeping of a split parent. Ordered as the states progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpillState {
    /// No definition seen yet.
    NoDefinitionFound,
    /// One definition and no spilling yet.
    NoSpillStore,
    /// One split child was spilled; a store is needed at that spill.
    OneSpillStore,
    /// Store once right after the definition and drop all other spill moves.
    StoreAtDefinition,
    /// The value lives in its stack slot from its definition on.
    StartInMemory,
    /// Multiple definitions; no optimization possible.
    NoOptimization,
}

/// Where an interval sits in the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalState {
    /// Not reached yet.
    Unhandled,
    /// Live at the walker position.
    Active,
    /// In a lifetime hole at the walker position.
    Inactive,
    /// Ended before the walker position.
    Handled,
}

// =============================================================================
// Interval
// =============================================================================

/// Live interval of one operand.
#[derive(Debug, Clone)]
pub struct Interval {
    operand: Operand,
    operand_number: u32,
    kind: Kind,
    /// Ascending, disjoint.
    ranges: VecDeque<Range>,
    /// Descending by position.
    uses: Vec<UsePosition>,
    /// Walker cursor into `ranges`; `ranges.len()` means exhausted.
    current: usize,
    location: Option<Location>,
    location_hint: Option<u32>,
    split_parent: Option<u32>,
    split_children: Vec<u32>,
    current_split_child: Option<u32>,
    insert_move_when_activated: bool,
    spill_slot: Option<StackSlot>,
    spill_state: SpillState,
    spill_definition_pos: Option<ProgPoint>,
    pub(crate) state: IntervalState,
}

impl Interval {
    /// Empty interval for an operand.
    pub fn new(operand: Operand, operand_number: u32) -> Self {
        Interval {
            operand,
            operand_number,
            kind: operand.kind(),
            ranges: VecDeque::new(),
            uses: Vec::new(),
            current: 0,
            location: operand.as_location(),
            location_hint: None,
            split_parent: None,
            split_children: Vec::new(),
            current_split_child: None,
            insert_move_when_activated: false,
            spill_slot: None,
            spill_state: SpillState::NoDefinitionFound,
            spill_definition_pos: None,
            state: IntervalState::Unhandled,
        }
    }

    /// The operand this interval describes.
    #[inline]
    pub fn operand(&self) -> Operand {
        self.operand
    }

    /// Operand number; also the interval's key in the table.
    #[inline]
    pub fn operand_number(&self) -> u32 {
        self.operand_number
    }

    /// Value kind.
    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: Kind) {
        if kind.is_legal() {
            self.kind = kind;
        }
    }

    /// Whether this is the interval of a physical register.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.operand.is_register()
    }

    /// Whether this is the interval of a variable.
    #[inline]
    pub fn is_variable(&self) -> bool {
        self.operand.is_variable()
    }

    /// Assigned location.
    #[inline]
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Assigned register, if the location is one.
    #[inline]
    pub fn register(&self) -> Option<crate::backend::registers::Register> {
        self.location.and_then(|l| l.register())
    }

    pub(crate) fn assign_location(&mut self, location: Location) {
        self.location = Some(location);
    }

    /// Ranges in ascending order.
    pub fn ranges(&self) -> impl ExactSizeIterator<Item = &Range> + '_ {
        self.ranges.iter()
    }

    /// First range.
    #[inline]
    pub fn first(&self) -> Option<Range> {
        self.ranges.front().copied()
    }

    /// Start of the first range, or [`ProgPoint::MAX`] when empty.
    #[inline]
    pub fn from(&self) -> ProgPoint {
        self.ranges.front().map_or(ProgPoint::MAX, |r| r.from)
    }

    /// End of the last range, or [`ProgPoint::MAX`] when empty.
    #[inline]
    pub fn to(&self) -> ProgPoint {
        self.ranges.back().map_or(ProgPoint::MAX, |r| r.to)
    }

    /// Whether the interval has no ranges.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Use positions, highest position first.
    #[inline]
    pub fn uses(&self) -> &[UsePosition] {
        &self.uses
    }

    /// Whether this interval is a split parent.
    #[inline]
    pub fn is_split_parent(&self) -> bool {
        self.split_parent.is_none()
    }

    /// Whether this interval is a split child.
    #[inline]
    pub fn is_split_child(&self) -> bool {
        self.split_parent.is_some()
    }

    /// Operand number of the split parent.
    #[inline]
    pub fn split_parent(&self) -> u32 {
        self.split_parent.unwrap_or(self.operand_number)
    }

    /// Split children in creation order; the parent lists itself first once split.
    #[inline]
    pub fn split_children(&self) -> &[u32] {
        &self.split_children
    }

    /// Preferred interval to share a register with.
    #[inline]
    pub fn location_hint(&self) -> Option<u32> {
        self.location_hint
    }

    pub(crate) fn set_location_hint(&mut self, hint: u32) {
        self.location_hint = Some(hint);
    }

    /// Whether activation must insert a move from the previous split child.
    #[inline]
    pub fn insert_move_when_activated(&self) -> bool {
        self.insert_move_when_activated
    }

    pub(crate) fn set_insert_move_when_activated(&mut self, value: bool) {
        self.insert_move_when_activated = value;
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Add `[from, to)`, merging with the first range when they touch.
    ///
    /// Ranges are added from the end of the function backwards, so `to` never
    /// exceeds the end of the second range.
    pub fn add_range(&mut self, from: ProgPoint, to: ProgPoint) {
        debug_assert!(from < to, "invalid range [{from}, {to})");
        match self.ranges.front_mut() {
            Some(first) if first.from <= to => {
                first.from = first.from.min(from);
                first.to = first.to.max(to);
            }
            _ => self.ranges.push_front(Range::new(from, to)),
        }
    }

    /// Move the start of the first range to a definition position.
    pub(crate) fn set_first_from(&mut self, from: ProgPoint) {
        if let Some(first) = self.ranges.front_mut() {
            first.from = from;
        }
    }

    /// Record a use. Only variables track uses and `None` priorities are dropped.
    pub fn add_use_pos(&mut self, pos: ProgPoint, priority: RegisterPriority) {
        if priority == RegisterPriority::None || !self.is_variable() {
            return;
        }
        match self.uses.last_mut() {
            Some(last) if last.pos <= pos => {
                debug_assert_eq!(last.pos, pos, "use positions must be added in descending order");
                if last.priority < priority {
                    last.priority = priority;
                }
            }
            _ => self.uses.push(UsePosition { pos, priority }),
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Whether the interval covers `pos`.
    ///
    /// Outputs are written at the instruction, so a range ending at `pos` does not
    /// cover an output there; for inputs and temps the end position is included.
    pub fn covers(&self, pos: ProgPoint, mode: OperandMode) -> bool {
        let Some(range) = self.ranges.iter().find(|r| r.to >= pos) else {
            return false;
        };
        if mode == OperandMode::Output {
            range.from <= pos && pos < range.to
        } else {
            range.from <= pos && pos <= range.to
        }
    }

    /// First position covered by both intervals.
    pub fn intersects_at(&self, other: &Interval) -> Option<ProgPoint> {
        intersect_from(&self.ranges, 0, &other.ranges, 0)
    }

    /// Whether the intervals share a position.
    pub fn intersects(&self, other: &Interval) -> bool {
        self.intersects_at(other).is_some()
    }

    /// Whether the interval is dead between `hole_from` and `hole_to`, so no
    /// value needs to flow across that gap.
    pub fn has_hole_between(&self, hole_from: ProgPoint, hole_to: ProgPoint) -> bool {
        debug_assert!(hole_from < hole_to, "invalid hole [{hole_from}, {hole_to}]");
        for range in &self.ranges {
            if hole_from < range.from {
                return true;
            }
            if hole_to <= range.to || hole_from <= range.to {
                return false;
            }
        }
        false
    }

    fn ascending_uses(&self) -> impl Iterator<Item = &UsePosition> + '_ {
        self.uses.iter().rev()
    }

    /// First use at or after `from` with at least `min` priority.
    pub fn next_usage(&self, min: RegisterPriority, from: ProgPoint) -> ProgPoint {
        self.ascending_uses()
            .find(|u| u.pos >= from && u.priority >= min)
            .map_or(ProgPoint::MAX, |u| u.pos)
    }

    /// First use at or after `from` with exactly `exact` priority.
    pub fn next_usage_exact(&self, exact: RegisterPriority, from: ProgPoint) -> ProgPoint {
        self.ascending_uses()
            .find(|u| u.pos >= from && u.priority == exact)
            .map_or(ProgPoint::MAX, |u| u.pos)
    }

    /// Last use at or before `from` with at least `min` priority, or position zero.
    pub fn previous_usage(&self, min: RegisterPriority, from: ProgPoint) -> ProgPoint {
        self.ascending_uses()
            .take_while(|u| u.pos <= from)
            .filter(|u| u.priority >= min)
            .last()
            .map_or(ProgPoint::ZERO, |u| u.pos)
    }

    /// First use with at least `min` priority.
    pub fn first_usage(&self, min: RegisterPriority) -> ProgPoint {
        self.next_usage(min, ProgPoint::ZERO)
    }

    // -------------------------------------------------------------------------
    // Walker cursor
    // -------------------------------------------------------------------------

    /// Start of the range under the cursor.
    #[inline]
    pub(crate) fn current_from(&self) -> ProgPoint {
        self.ranges.get(self.current).map_or(ProgPoint::MAX, |r| r.from)
    }

    /// End of the range under the cursor.
    #[inline]
    pub(crate) fn current_to(&self) -> ProgPoint {
        self.ranges.get(self.current).map_or(ProgPoint::MAX, |r| r.to)
    }

    #[inline]
    pub(crate) fn current_at_end(&self) -> bool {
        self.current >= self.ranges.len()
    }

    #[inline]
    pub(crate) fn next_range(&mut self) {
        self.current += 1;
    }

    /// First overlap of the two intervals from their cursors on.
    pub(crate) fn current_intersects_at(&self, other: &Interval) -> Option<ProgPoint> {
        intersect_from(&self.ranges, self.current, &other.ranges, other.current)
    }

    // -------------------------------------------------------------------------
    // Splitting
    // -------------------------------------------------------------------------

    /// Detach ranges and uses at or after `split_pos`.
    fn split_off(&mut self, split_pos: ProgPoint) -> Option<(VecDeque<Range>, Vec<UsePosition>)> {
        let idx = self.ranges.iter().position(|r| r.to > split_pos)?;
        if idx == 0 && self.ranges[0].from >= split_pos {
            return None;
        }
        let mut tail = self.ranges.split_off(idx);
        if tail[0].from < split_pos {
            self.ranges.push_back(Range::new(tail[0].from, split_pos));
            tail[0].from = split_pos;
        }
        let moved = self.uses.iter().take_while(|u| u.pos >= split_pos).count();
        let tail_uses = self.uses.drain(..moved).collect();
        Some((tail, tail_uses))
    }

    /// Detach the part of the first range before `split_pos`.
    fn split_from_start_off(&mut self, split_pos: ProgPoint) -> Option<Range> {
        let first = self.first()?;
        if !(first.from < split_pos && split_pos <= first.to) {
            return None;
        }
        if split_pos == first.to {
            self.ranges.pop_front();
        } else {
            self.set_first_from(split_pos);
        }
        Some(Range::new(first.from, split_pos))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operand)?;
        if self.is_split_child() {
            write!(f, " (of {})", self.split_parent())?;
        }
        match self.location {
            Some(loc) => write!(f, " @{loc}")?,
            None => write!(f, " @-")?,
        }
        for range in &self.ranges {
            write!(f, " {range}")?;
        }
        if !self.uses.is_empty() {
            write!(f, " uses:")?;
            for u in self.ascending_uses() {
                write!(f, " {}{}", u.pos, u.priority.short())?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Interval Table
// =============================================================================

/// All intervals of a function, keyed by operand number.
#[derive(Debug, Default)]
pub struct IntervalTable {
    intervals: Vec<Option<Interval>>,
    first_derived: Option<u32>,
    splits: u32,
}

impl IntervalTable {
    /// Table with room for `size` operand numbers.
    pub fn new(size: u32) -> Self {
        IntervalTable {
            intervals: (0..size).map(|_| None).collect(),
            first_derived: None,
            splits: 0,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> u32 {
        self.intervals.len() as u32
    }

    /// Whether the table has no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Interval for an operand number.
    #[inline]
    pub fn get(&self, number: u32) -> Option<&Interval> {
        self.intervals.get(number as usize).and_then(Option::as_ref)
    }

    /// Mutable interval for an operand number.
    #[inline]
    pub fn get_mut(&mut self, number: u32) -> Option<&mut Interval> {
        self.intervals.get_mut(number as usize).and_then(Option::as_mut)
    }

    /// Existing intervals in operand-number order.
    pub fn iter(&self) -> impl Iterator<Item = &Interval> + '_ {
        self.intervals.iter().flatten()
    }

    /// Mutable existing intervals in operand-number order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Interval> + '_ {
        self.intervals.iter_mut().flatten()
    }

    /// Raw slots, including empty ones.
    pub(crate) fn slots(&self) -> impl Iterator<Item = (u32, Option<&Interval>)> + '_ {
        self.intervals
            .iter()
            .enumerate()
            .map(|(i, slot)| (i as u32, slot.as_ref()))
    }

    /// Operand number of the first interval created during allocation.
    #[inline]
    pub fn first_derived(&self) -> Option<u32> {
        self.first_derived
    }

    /// Number of splits performed.
    #[inline]
    pub fn split_count(&self) -> u32 {
        self.splits
    }

    /// Interval for an operand, created on first request.
    pub fn get_or_create(&mut self, operand: Operand, number: u32) -> &mut Interval {
        let idx = number as usize;
        if idx >= self.intervals.len() {
            self.intervals.resize_with(idx + 1, || None);
        }
        self.intervals[idx].get_or_insert_with(|| Interval::new(operand, number))
    }

    /// Create an interval for a fresh variable of `kind`.
    pub fn create_derived(&mut self, kind: Kind, pool: &mut OperandPool) -> u32 {
        let var = pool.new_variable(kind);
        let number = pool.variable_number(var);
        self.first_derived.get_or_insert(number);
        self.get_or_create(Operand::Variable(var), number);
        number
    }

    // -------------------------------------------------------------------------
    // Split lineage
    // -------------------------------------------------------------------------

    /// Split parent of an interval.
    #[inline]
    pub fn parent_of(&self, id: u32) -> u32 {
        self[id].split_parent()
    }

    /// Spill slot of the interval's split parent.
    pub fn spill_slot(&self, id: u32) -> Option<StackSlot> {
        self[self.parent_of(id)].spill_slot
    }

    pub(crate) fn set_spill_slot(&mut self, id: u32, slot: StackSlot) {
        let parent = self.parent_of(id);
        self[parent].spill_slot = Some(slot);
    }

    /// Spill state of the interval's split parent.
    pub fn spill_state(&self, id: u32) -> SpillState {
        self[self.parent_of(id)].spill_state
    }

    pub(crate) fn set_spill_state(&mut self, id: u32, state: SpillState) {
        let parent = self.parent_of(id);
        self[parent].spill_state = state;
    }

    /// Spill definition position of the interval's split parent.
    pub fn spill_definition_pos(&self, id: u32) -> Option<ProgPoint> {
        self[self.parent_of(id)].spill_definition_pos
    }

    pub(crate) fn set_spill_definition_pos(&mut self, id: u32, pos: ProgPoint) {
        let parent = self.parent_of(id);
        self[parent].spill_definition_pos = Some(pos);
    }

    /// Whether the lineage's value is always available in its spill slot.
    pub fn always_in_memory(&self, id: u32) -> bool {
        matches!(
            self.spill_state(id),
            SpillState::StoreAtDefinition | SpillState::StartInMemory
        )
    }

    /// The split child most recently activated in the lineage.
    pub(crate) fn current_split_child(&self, id: u32) -> Option<u32> {
        self[self.parent_of(id)].current_split_child
    }

    pub(crate) fn make_current_split_child(&mut self, id: u32) {
        let parent = self.parent_of(id);
        self[parent].current_split_child = Some(id);
    }

    /// Hinted interval, optionally resolved to a split child that holds a register.
    pub fn location_hint(&self, id: u32, search_split_child: bool) -> Option<u32> {
        let hint = self[id].location_hint?;
        if !search_split_child {
            return Some(hint);
        }
        let hinted = &self[hint];
        if hinted.location.is_some_and(|l| l.is_register()) {
            return Some(hint);
        }
        hinted
            .split_children
            .iter()
            .copied()
            .find(|&child| self[child].location.is_some_and(|l| l.is_register()))
    }

    /// The split child of `id`'s lineage covering `pos` in `mode`.
    pub fn split_child_at(&self, id: u32, pos: ProgPoint, mode: OperandMode) -> Option<u32> {
        let parent = &self[self.parent_of(id)];
        let end_offset = if mode == OperandMode::Output { 0 } else { 1 };
        let covers = |child: u32| {
            let interval = &self[child];
            interval.from() <= pos && pos < interval.to() + end_offset
        };
        if parent.split_children.is_empty() {
            return covers(parent.operand_number).then_some(parent.operand_number);
        }
        parent.split_children.iter().copied().find(|&child| covers(child))
    }

    /// The split child of `id`'s lineage that ends last at or before `pos`.
    pub fn split_child_before(&self, id: u32, pos: ProgPoint) -> Option<u32> {
        let parent = &self[self.parent_of(id)];
        parent
            .split_children
            .iter()
            .copied()
            .filter(|&child| self[child].to() <= pos)
            .max_by_key(|&child| self[child].to())
    }

    fn new_split_child(&mut self, id: u32, pool: &mut OperandPool) -> u32 {
        let parent = self.parent_of(id);
        let kind = self[id].kind;
        let child = self.create_derived(kind, pool);
        {
            let interval = &mut self[child];
            interval.kind = kind;
            interval.split_parent = Some(parent);
            interval.location_hint = Some(parent);
        }
        let parent = &mut self[parent];
        if parent.split_children.is_empty() {
            parent.split_children.push(parent.operand_number);
        }
        parent.split_children.push(child);
        self.splits += 1;
        child
    }

    /// Split `id` at `split_pos`; the new child owns everything from `split_pos` on.
    pub fn split(&mut self, id: u32, split_pos: ProgPoint, pool: &mut OperandPool) -> CompileResult<u32> {
        let (ranges, uses) = self[id].split_off(split_pos).ok_or_else(|| {
            CompileError::bailout(format!("cannot split interval {} at {split_pos}", self[id]))
        })?;
        let child = self.new_split_child(id, pool);
        let interval = &mut self[child];
        interval.ranges = ranges;
        interval.uses = uses;
        interval.current = 0;
        Ok(child)
    }

    /// Split `id` at `split_pos`; the new child owns the part of the first range before it.
    pub fn split_from_start(
        &mut self,
        id: u32,
        split_pos: ProgPoint,
        pool: &mut OperandPool,
    ) -> CompileResult<u32> {
        let head = self[id].split_from_start_off(split_pos).ok_or_else(|| {
            CompileError::bailout(format!(
                "cannot split interval {} from start at {split_pos}",
                self[id]
            ))
        })?;
        let child = self.new_split_child(id, pool);
        self[child].add_range(head.from, head.to);
        Ok(child)
    }
}

impl Index<u32> for IntervalTable {
    type Output = Interval;

    fn index(&self, number: u32) -> &Interval {
        match self.get(number) {
            Some(interval) => interval,
            None => panic!("no interval for operand {number}"),
        }
    }
}

impl IndexMut<u32> for IntervalTable {
    fn index_mut(&mut self, number: u32) -> &mut Interval {
        match self.get_mut(number) {
            Some(interval) => interval,
            None => panic!("no interval for operand {number}"),
        }
    }
}
