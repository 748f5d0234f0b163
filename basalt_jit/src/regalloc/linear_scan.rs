//! Linear Scan Register Allocator
//!
//! # Algorithm Overview
//!
//! 1. Sort ranges by start position
//! 2. Maintain an active set of register-holding ranges, ordered by end
//! 3. At each range start, expire active ranges that ended, then take the
//!    lowest free register
//! 4. If no register is free, spill the new range
//!
//! The incoming range is the one spilled; active ranges keep their
//! registers until they expire.
//!
//! # References
//!
//! - Poletto & Sarkar, "Linear Scan Register Allocation" (1999)

use super::{AllocatorConfig, AllocatorStats, LiveRange, RegisterAllocation, ValueId};
use crate::backend::x64::registers::{Gpr, GprSet};
use std::collections::BinaryHeap;

// =============================================================================
// Active Range
// =============================================================================

/// A range in the active set, ordered by end position.
#[derive(Debug, Clone, Copy)]
struct ActiveRange {
    value: ValueId,
    end: u32,
    reg: Gpr,
}

impl PartialEq for ActiveRange {
    fn eq(&self, other: &Self) -> bool {
        self.end == other.end
    }
}

impl Eq for ActiveRange {}

impl PartialOrd for ActiveRange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActiveRange {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse order for min-heap (earliest end first)
        other.end.cmp(&self.end)
    }
}

// =============================================================================
// Allocator
// =============================================================================

/// Linear scan register allocator over GPRs.
pub struct LinearScanAllocator {
    allocation: RegisterAllocation,
    active: BinaryHeap<ActiveRange>,
    free_gprs: GprSet,
    stats: AllocatorStats,
}

impl LinearScanAllocator {
    /// Create a new allocator.
    pub fn new(config: AllocatorConfig) -> Self {
        LinearScanAllocator {
            allocation: RegisterAllocation::new(),
            active: BinaryHeap::new(),
            free_gprs: config.available_gprs,
            stats: AllocatorStats::default(),
        }
    }

    /// Allocate registers for a set of ranges.
    pub fn allocate(mut self, mut ranges: Vec<LiveRange>) -> (RegisterAllocation, AllocatorStats) {
        self.stats.num_values = ranges.len();

        // Sort ranges by start position
        ranges.sort_by_key(|r| r.start);

        for range in &ranges {
            self.expire_old_ranges(range.start);

            if !self.try_allocate(range) {
                self.allocation.spill(range.value);
                self.stats.num_spilled += 1;
            }
        }

        (self.allocation, self.stats)
    }

    /// Return registers of ranges that end at or before `pos`.
    fn expire_old_ranges(&mut self, pos: u32) {
        while let Some(active) = self.active.peek() {
            if active.end > pos {
                break;
            }
            if let Some(expired) = self.active.pop() {
                self.free_gprs = self.free_gprs.insert(expired.reg);
            }
        }
    }

    fn try_allocate(&mut self, range: &LiveRange) -> bool {
        let Some(gpr) = self.free_gprs.first() else {
            return false;
        };
        self.free_gprs = self.free_gprs.remove(gpr);
        self.allocation.assign(range.value, gpr);
        self.active.push(ActiveRange {
            value: range.value,
            end: range.effective_end(),
            reg: gpr,
        });

        self.stats.num_allocated += 1;
        self.stats.max_pressure = self.stats.max_pressure.max(self.active.len());
        true
    }
}

impl std::fmt::Debug for LinearScanAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearScanAllocator")
            .field("active", &self.active.iter().map(|a| a.value).collect::<Vec<_>>())
            .field("free_gprs", &self.free_gprs)
            .field("stats", &self.stats)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u32, end: u32) -> LiveRange {
        LiveRange::new(ValueId::new(start), start, end)
    }

    #[test]
    fn test_empty() {
        let (alloc, stats) = LinearScanAllocator::new(AllocatorConfig::default()).allocate(vec![]);
        assert!(alloc.is_empty());
        assert_eq!(stats, AllocatorStats::default());
    }

    #[test]
    fn test_non_overlapping_reuse_lowest_register() {
        let ranges = vec![r(0, 1), r(1, 2), r(2, 3)];
        let (alloc, _) = LinearScanAllocator::new(AllocatorConfig::default()).allocate(ranges);
        assert_eq!(alloc.register_at(0), Some(Gpr::Rax));
        assert_eq!(alloc.register_at(1), Some(Gpr::Rax));
        assert_eq!(alloc.register_at(2), Some(Gpr::Rax));
    }

    #[test]
    fn test_allocation_order_skips_frame_registers() {
        // Six mutually overlapping ranges.
        let ranges: Vec<_> = (0..6).map(|i| r(i, 10)).collect();
        let (alloc, _) = LinearScanAllocator::new(AllocatorConfig::default()).allocate(ranges);
        let regs: Vec<_> = (0..6).map(|i| alloc.register_at(i).unwrap()).collect();
        assert_eq!(
            regs,
            vec![Gpr::Rax, Gpr::Rcx, Gpr::Rdx, Gpr::Rbx, Gpr::Rsi, Gpr::Rdi]
        );
    }

    #[test]
    fn test_excess_values_are_spilled() {
        let ranges: Vec<_> = (0..20).map(|i| r(i, 100)).collect();
        let (alloc, stats) = LinearScanAllocator::new(AllocatorConfig::default()).allocate(ranges);
        assert_eq!(alloc.num_assigned(), 14);
        assert_eq!(alloc.num_spilled(), 6);
        assert_eq!(alloc.len(), 20);
        assert_eq!(stats.max_pressure, 14);
        for i in 14..20 {
            assert!(alloc.is_spilled(ValueId::new(i)));
        }
    }

    #[test]
    fn test_expired_register_is_reused_after_spill() {
        let config = AllocatorConfig::for_testing();
        let ranges = vec![r(0, 1), r(1, 5), r(2, 5), r(3, 5), r(4, 6)];
        let (alloc, stats) = LinearScanAllocator::new(config).allocate(ranges);
        // r(0,1) expires at 1, so three registers cover v1..v3; v4 spills.
        assert_eq!(alloc.register_at(0), Some(Gpr::Rax));
        assert_eq!(alloc.register_at(1), Some(Gpr::Rax));
        assert_eq!(alloc.register_at(2), Some(Gpr::Rcx));
        assert_eq!(alloc.register_at(3), Some(Gpr::Rdx));
        assert!(alloc.is_spilled(ValueId::new(4)));
        assert_eq!(stats.num_spilled, 1);
    }
}
