//! Process-wide allocator counters.
//!
//! Every call to [`RegisterAllocator::allocate`](super::RegisterAllocator::allocate)
//! adds to [`GLOBAL_METRICS`]. Counters are updated with relaxed atomics, so a
//! snapshot taken while other threads allocate may mix counts of different calls.

use super::AllocatorStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all allocations in the process.
pub static GLOBAL_METRICS: AllocatorMetrics = AllocatorMetrics::new();

/// Lock-free allocation counters.
#[derive(Debug)]
pub struct AllocatorMetrics {
    compilations: AtomicU64,
    bailouts: AtomicU64,
    spill_slots: AtomicU64,
    splits: AtomicU64,
    moves: AtomicU64,
}

/// Plain copy of [`AllocatorMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Successful allocations.
    pub compilations: u64,
    /// Allocations that failed.
    pub bailouts: u64,
    /// Spill slots allocated.
    pub spill_slots: u64,
    /// Interval splits.
    pub splits: u64,
    /// Moves inserted by the allocator.
    pub moves: u64,
}

impl AllocatorMetrics {
    /// Zeroed counters.
    pub const fn new() -> Self {
        Self {
            compilations: AtomicU64::new(0),
            bailouts: AtomicU64::new(0),
            spill_slots: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            moves: AtomicU64::new(0),
        }
    }

    /// Count a successful allocation.
    #[inline]
    pub fn record_compilation(&self, stats: &AllocatorStats) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
        self.spill_slots.fetch_add(u64::from(stats.spill_slots), Ordering::Relaxed);
        self.splits.fetch_add(u64::from(stats.splits), Ordering::Relaxed);
        self.moves.fetch_add(u64::from(stats.moves_inserted), Ordering::Relaxed);
    }

    /// Count a failed allocation.
    #[inline]
    pub fn record_bailout(&self) {
        self.bailouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            compilations: self.compilations.load(Ordering::Relaxed),
            bailouts: self.bailouts.load(Ordering::Relaxed),
            spill_slots: self.spill_slots.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
        }
    }
}

impl Default for AllocatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
