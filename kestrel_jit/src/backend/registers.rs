//! Physical registers and the register-allocation description.
//!
//! Registers are numbered densely from zero across all register files so that the
//! allocator can index per-register tables (and the low range of its operand numbers)
//! directly by [`Register::number`]. Within a file a register also has an
//! architectural encoding, used only for display.
//!
//! [`RegisterConfig`] describes one target: which registers exist, which of them the
//! allocator may hand out, which are clobbered by calls, and the machine word size.

use crate::lir::Kind;
use std::fmt;

// =============================================================================
// Register
// =============================================================================

/// The register file a register belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterClass {
    /// Integer and pointer registers.
    Cpu,
    /// Floating-point registers.
    Fpu,
}

/// A physical machine register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register {
    number: u8,
    encoding: u8,
    class: RegisterClass,
}

impl Register {
    /// Create a register with a global number and an encoding within its file.
    #[inline]
    pub const fn new(number: u8, encoding: u8, class: RegisterClass) -> Self {
        Register {
            number,
            encoding,
            class,
        }
    }

    /// Dense number across all register files.
    #[inline(always)]
    pub const fn number(self) -> u8 {
        self.number
    }

    /// Encoding within the register file.
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self.encoding
    }

    /// Register file.
    #[inline(always)]
    pub const fn class(self) -> RegisterClass {
        self.class
    }

    /// Whether this is an integer register.
    #[inline]
    pub const fn is_cpu(self) -> bool {
        matches!(self.class, RegisterClass::Cpu)
    }

    /// Whether this is a floating-point register.
    #[inline]
    pub const fn is_fpu(self) -> bool {
        matches!(self.class, RegisterClass::Fpu)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            RegisterClass::Cpu => write!(f, "r{}", self.encoding),
            RegisterClass::Fpu => write!(f, "f{}", self.encoding),
        }
    }
}

// =============================================================================
// Register Set
// =============================================================================

/// A set of registers, as a bitmask over register numbers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterSet(u64);

impl RegisterSet {
    /// Empty register set.
    pub const EMPTY: RegisterSet = RegisterSet(0);

    /// Create a set containing a single register.
    #[inline(always)]
    pub const fn singleton(reg: Register) -> Self {
        RegisterSet(1 << reg.number)
    }

    /// Create from a raw bitmask.
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        RegisterSet(bits)
    }

    /// Get the raw bitmask.
    #[inline(always)]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Check if the set contains a register.
    #[inline(always)]
    pub const fn contains(self, reg: Register) -> bool {
        (self.0 & (1 << reg.number)) != 0
    }

    /// Add a register to the set.
    #[inline(always)]
    pub const fn insert(self, reg: Register) -> Self {
        RegisterSet(self.0 | (1 << reg.number))
    }

    /// Remove a register from the set.
    #[inline(always)]
    pub const fn remove(self, reg: Register) -> Self {
        RegisterSet(self.0 & !(1 << reg.number))
    }

    /// Union of two sets.
    #[inline(always)]
    pub const fn union(self, other: RegisterSet) -> Self {
        RegisterSet(self.0 | other.0)
    }

    /// Intersection of two sets.
    #[inline(always)]
    pub const fn intersection(self, other: RegisterSet) -> Self {
        RegisterSet(self.0 & other.0)
    }

    /// Difference (self - other).
    #[inline(always)]
    pub const fn difference(self, other: RegisterSet) -> Self {
        RegisterSet(self.0 & !other.0)
    }

    /// Check if the set is empty.
    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of registers in the set.
    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate the register numbers in the set, lowest first.
    pub fn numbers(self) -> impl Iterator<Item = u8> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let n = bits.trailing_zeros();
            bits &= bits - 1;
            Some(n as u8)
        })
    }
}

impl FromIterator<Register> for RegisterSet {
    fn from_iter<I: IntoIterator<Item = Register>>(iter: I) -> Self {
        iter.into_iter().fold(RegisterSet::EMPTY, RegisterSet::insert)
    }
}

impl fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.numbers()).finish()
    }
}

// =============================================================================
// Reference Target
// =============================================================================

/// Registers of the reference architecture returned by [`RegisterConfig::reference`].
pub mod reference {
    use super::{Register, RegisterClass};

    pub const R0: Register = Register::new(0, 0, RegisterClass::Cpu);
    pub const R1: Register = Register::new(1, 1, RegisterClass::Cpu);
    pub const R2: Register = Register::new(2, 2, RegisterClass::Cpu);
    pub const R3: Register = Register::new(3, 3, RegisterClass::Cpu);
    pub const R4: Register = Register::new(4, 4, RegisterClass::Cpu);
    pub const R5: Register = Register::new(5, 5, RegisterClass::Cpu);
    pub const R6: Register = Register::new(6, 6, RegisterClass::Cpu);
    /// Frame pointer; never allocated.
    pub const R7: Register = Register::new(7, 7, RegisterClass::Cpu);

    pub const F0: Register = Register::new(8, 0, RegisterClass::Fpu);
    pub const F1: Register = Register::new(9, 1, RegisterClass::Fpu);
    pub const F2: Register = Register::new(10, 2, RegisterClass::Fpu);
    pub const F3: Register = Register::new(11, 3, RegisterClass::Fpu);
    pub const F4: Register = Register::new(12, 4, RegisterClass::Fpu);
    pub const F5: Register = Register::new(13, 5, RegisterClass::Fpu);
    pub const F6: Register = Register::new(14, 6, RegisterClass::Fpu);
    pub const F7: Register = Register::new(15, 7, RegisterClass::Fpu);

    /// All registers in number order.
    pub const ALL: [Register; 16] = [
        R0, R1, R2, R3, R4, R5, R6, R7, F0, F1, F2, F3, F4, F5, F6, F7,
    ];
}

// =============================================================================
// Register Config
// =============================================================================

/// The register-allocation description of a target.
#[derive(Debug, Clone)]
pub struct RegisterConfig {
    name: &'static str,
    registers: Vec<Register>,
    allocatable: RegisterSet,
    caller_saved: RegisterSet,
    word_size: u32,
}

impl RegisterConfig {
    /// Create a target description.
    ///
    /// `registers` must be ordered by [`Register::number`], starting at zero, and
    /// contain at most 64 entries.
    pub fn new(
        name: &'static str,
        registers: Vec<Register>,
        allocatable: RegisterSet,
        caller_saved: RegisterSet,
        word_size: u32,
    ) -> Self {
        debug_assert!(registers.len() <= 64, "register sets hold at most 64 registers");
        debug_assert!(
            registers
                .iter()
                .enumerate()
                .all(|(i, r)| usize::from(r.number()) == i),
            "registers must be numbered densely"
        );
        RegisterConfig {
            name,
            registers,
            allocatable,
            caller_saved,
            word_size,
        }
    }

    /// The reference architecture: eight integer and eight floating-point registers.
    ///
    /// `r7` is the frame pointer and is not allocatable. `r0`-`r3` and every
    /// floating-point register are clobbered by calls; `r4`-`r6` are callee-saved.
    pub fn reference() -> Self {
        use reference::*;
        let all: RegisterSet = ALL.into_iter().collect();
        let caller_saved: RegisterSet = [R0, R1, R2, R3, F0, F1, F2, F3, F4, F5, F6, F7]
            .into_iter()
            .collect();
        RegisterConfig::new("reference", ALL.to_vec(), all.remove(R7), caller_saved, 8)
    }

    /// Restrict the allocatable registers.
    #[must_use]
    pub fn with_allocatable(mut self, allocatable: RegisterSet) -> Self {
        self.allocatable = allocatable;
        self
    }

    /// Replace the caller-saved set.
    #[must_use]
    pub fn with_caller_saved(mut self, caller_saved: RegisterSet) -> Self {
        self.caller_saved = caller_saved;
        self
    }

    /// Change the word size in bytes.
    #[must_use]
    pub fn with_word_size(mut self, word_size: u32) -> Self {
        self.word_size = word_size;
        self
    }

    /// Target name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Machine word size in bytes.
    pub fn word_size(&self) -> u32 {
        self.word_size
    }

    /// Number of physical registers (allocatable or not).
    pub fn num_registers(&self) -> u32 {
        self.registers.len() as u32
    }

    /// All physical registers in number order.
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Look up a register by number.
    pub fn register(&self, number: u32) -> Option<Register> {
        self.registers.get(number as usize).copied()
    }

    /// The allocatable set.
    pub fn allocatable(&self) -> RegisterSet {
        self.allocatable
    }

    /// The caller-saved set.
    pub fn caller_saved(&self) -> RegisterSet {
        self.caller_saved
    }

    /// Whether the allocator may assign `reg`.
    pub fn is_allocatable(&self, reg: Register) -> bool {
        self.allocatable.contains(reg)
    }

    /// Whether calls clobber `reg`.
    pub fn is_caller_saved(&self, reg: Register) -> bool {
        self.caller_saved.contains(reg)
    }

    /// Allocatable registers of one class, lowest number first.
    pub fn allocatable_registers(&self, class: RegisterClass) -> Vec<Register> {
        self.registers
            .iter()
            .copied()
            .filter(|r| r.class() == class && self.is_allocatable(*r))
            .collect()
    }

    /// Allocatable registers that calls clobber.
    pub fn caller_saved_allocatable(&self) -> impl Iterator<Item = Register> + '_ {
        self.registers
            .iter()
            .copied()
            .filter(|r| self.is_allocatable(*r) && self.is_caller_saved(*r))
    }

    /// Whether every allocatable register is clobbered by calls.
    pub fn all_allocatable_caller_saved(&self) -> bool {
        self.allocatable.difference(self.caller_saved).is_empty()
    }

    /// Register holding call results of the given class.
    pub fn return_register(&self, class: RegisterClass) -> Option<Register> {
        self.caller_saved_allocatable().find(|r| r.class() == class)
    }

    /// Number of stack slots a value of `kind` occupies.
    pub fn spill_slots(&self, kind: Kind) -> u32 {
        spill_slots(kind, self.word_size)
    }
}

/// Stack slots for a value of `kind` on a target with `word_size`-byte words.
pub(crate) fn spill_slots(kind: Kind, word_size: u32) -> u32 {
    if kind.is_double_word() && word_size < 8 {
        2
    } else {
        1
    }
}
