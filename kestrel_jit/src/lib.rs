//! Register allocation backend for the Kestrel JIT.
//!
//! Linear scan allocation over a low-level IR with:
//! - Interval splitting and spilling at optimal positions
//! - Move resolution across control-flow and exception edges
//! - Spill store elimination for values defined once
//! - Reference maps and frame-state locations for safepoints
#![deny(unsafe_op_in_unsafe_fn)]
pub mod backend;
pub mod lir;
pub mod regalloc;

pub use backend::{Register, RegisterClass, RegisterConfig, RegisterSet};
pub use lir::{LirBuilder, LirFunction};
pub use regalloc::{AllocationResult, AllocatorConfig, AllocatorStats, RegisterAllocator, allocate};
