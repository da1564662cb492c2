//! Register Allocation Module
//!
//! Linear scan register allocation with interval splitting for Kestrel LIR.
//!
//! # Architecture
//!
//! The allocator consists of several components:
//!
//! - `operand_pool.rs`: Dense numbering of registers and variables
//! - `liveness.rs`: Block-level live-in/live-out sets
//! - `interval.rs`: Live intervals, use positions and split lineages
//! - `builder.rs`: Interval construction from the LIR
//! - `walker.rs`: The linear scan proper: register selection, splitting, spilling
//! - `move_resolver.rs`: Ordering of parallel moves
//! - `resolve.rs`: Moves on control-flow and exception edges
//! - `spill.rs`: Spill slots and the store-at-definition state machine
//! - `assign.rs`: Spill store placement, location rewriting, reference maps
//! - `verify.rs`: Consistency checks of the allocation result
//! - `constraint.rs`: Target-specific register priority of inputs
//! - `metrics.rs`: Process-wide counters
//!
//! # Usage
//!
//! ```ignore
//! let allocator = RegisterAllocator::new(&registers, AllocatorConfig::default());
//! let result = allocator.allocate(&mut lir)?;
//! ```

pub mod constraint;
pub mod interval;
pub mod liveness;
pub mod metrics;
pub mod operand_pool;
pub mod spill;

pub(crate) mod assign;
pub(crate) mod builder;
pub(crate) mod linear_scan;
pub(crate) mod move_resolver;
pub(crate) mod resolve;
pub(crate) mod verify;
pub(crate) mod walker;


use crate::backend::registers::RegisterConfig;
use crate::lir::LirFunction;
use kestrel_core::CompileResult;
use log::debug;
use std::time::Instant;

// Re-export key types
pub use constraint::{DefaultPriorityPolicy, RegisterPriorityPolicy, TwoAddressPriorityPolicy};
pub use interval::{Interval, IntervalTable, ProgPoint, Range, RegisterPriority, SpillState};
pub use liveness::LivenessAnalysis;
pub use metrics::{GLOBAL_METRICS, MetricsSnapshot};
pub use operand_pool::OperandPool;
pub use spill::SpillSlotAllocator;

// =============================================================================
// Configuration
// =============================================================================

/// Allocator configuration.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Iteration limit of the global liveness fixpoint.
    pub max_liveness_iterations: u32,
    /// Check intervals for overlaps before rewriting the LIR.
    pub verify_intervals: bool,
    /// Fill in `ScopeDebugInfo` for instructions with debug info.
    pub compute_debug_info: bool,
    /// Resolve through empty blocks directly between their neighbours.
    pub eliminate_empty_block_moves: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            max_liveness_iterations: 50,
            verify_intervals: cfg!(debug_assertions),
            compute_debug_info: true,
            eliminate_empty_block_moves: true,
        }
    }
}

impl AllocatorConfig {
    /// Configuration for tests: verification always on.
    pub fn for_testing() -> Self {
        AllocatorConfig {
            verify_intervals: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// Allocation Statistics
// =============================================================================

/// Statistics from register allocation.
#[derive(Debug, Clone, Default)]
pub struct AllocatorStats {
    /// Number of intervals, including split children.
    pub intervals: u32,
    /// Number of splits performed.
    pub splits: u32,
    /// Spill slots allocated beyond the frame's reserved slots.
    pub spill_slots: u32,
    /// Moves inserted by the move resolver.
    pub moves_inserted: u32,
    /// Resolver moves removed because the stack slot was already correct.
    pub spill_moves_eliminated: u32,
    /// Stores inserted right after a definition.
    pub spill_stores: u32,
    /// Definitions whose value is never used.
    pub dead_definitions: u32,
    /// Iterations of the global liveness fixpoint.
    pub liveness_iterations: u32,
    /// Time spent in microseconds.
    pub time_us: u64,
}

/// Outcome of a successful allocation.
#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// Allocation statistics.
    pub stats: AllocatorStats,
    /// Final frame size in bytes.
    pub frame_size: u32,
}

// =============================================================================
// Register Allocator
// =============================================================================

/// Linear scan register allocator for one target.
pub struct RegisterAllocator<'r> {
    registers: &'r RegisterConfig,
    config: AllocatorConfig,
    policy: Box<dyn RegisterPriorityPolicy>,
}

impl<'r> RegisterAllocator<'r> {
    /// Allocator with the default priority policy.
    pub fn new(registers: &'r RegisterConfig, config: AllocatorConfig) -> Self {
        RegisterAllocator {
            registers,
            config,
            policy: Box::new(DefaultPriorityPolicy),
        }
    }

    /// Replace the input priority policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn RegisterPriorityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The configuration.
    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate registers for `lir`, rewriting every variable to its location.
    ///
    /// On error the function is left partially rewritten and must be discarded.
    pub fn allocate(&self, lir: &mut LirFunction) -> CompileResult<AllocationResult> {
        let start = Instant::now();
        match linear_scan::run(lir, self.registers, &self.config, self.policy.as_ref()) {
            Ok(mut stats) => {
                stats.time_us = start.elapsed().as_micros() as u64;
                metrics::GLOBAL_METRICS.record_compilation(&stats);
                debug!(
                    "{}: {} intervals, {} splits, {} spill slots, {} moves in {}us",
                    lir.name, stats.intervals, stats.splits, stats.spill_slots, stats.moves_inserted, stats.time_us
                );
                Ok(AllocationResult {
                    stats,
                    frame_size: lir.frame.frame_size(),
                })
            }
            Err(err) => {
                metrics::GLOBAL_METRICS.record_bailout();
                debug!("{}: allocation failed: {err}", lir.name);
                Err(err)
            }
        }
    }
}

/// Allocate with the default configuration and policy.
pub fn allocate(lir: &mut LirFunction, registers: &RegisterConfig) -> CompileResult<AllocationResult> {
    RegisterAllocator::new(registers, AllocatorConfig::default()).allocate(lir)
}

// =============================================================================
// Tests
// =============================================================================
