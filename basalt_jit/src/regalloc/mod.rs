//! Register Allocation
//!
//! Maps the values a bytecode program defines onto x64 general-purpose
//! registers using linear scan over position-granular live ranges.
//!
//! # Pipeline
//!
//! ```text
//! BytecodeProgram ──► liveness ──► Vec<LiveRange> ──► linear_scan ──► RegisterAllocation
//! ```
//!
//! # Value Identity
//!
//! A value is named by the position of the instruction that defines it
//! ([`ValueId`]). Ranges are closed intervals of positions; for overlap
//! purposes a range occupies `[start, max(end, start + 1))`, so a value
//! whose last use is the instruction defining another value may share a
//! register with it.
//!
//! Spilling only costs speed: the generator materializes spilled values
//! through its default register.

pub mod linear_scan;
pub mod liveness;

pub use linear_scan::LinearScanAllocator;
pub use liveness::Liveness;

use crate::backend::x64::registers::{Gpr, GprSet};
use basalt_core::BytecodeProgram;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

// =============================================================================
// Value Identity
// =============================================================================

/// A program-defined value, identified by its defining position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    /// Create from a defining position.
    #[inline]
    pub const fn new(position: u32) -> Self {
        ValueId(position)
    }

    /// The defining position.
    #[inline(always)]
    pub const fn position(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// Live Ranges
// =============================================================================

/// Closed range of program positions over which a value is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    /// The value.
    pub value: ValueId,
    /// Defining position.
    pub start: u32,
    /// Last using position (or `start` if unused).
    pub end: u32,
}

impl LiveRange {
    /// Create a range.
    #[inline]
    pub fn new(value: ValueId, start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        LiveRange { value, start, end }
    }

    /// Exclusive end used for interference.
    #[inline]
    pub fn effective_end(&self) -> u32 {
        self.end.max(self.start.saturating_add(1))
    }

    /// Check whether two ranges need distinct registers.
    #[inline]
    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start < other.effective_end() && other.start < self.effective_end()
    }
}

// =============================================================================
// Allocation Result
// =============================================================================

/// Result of one allocation pass: value → register, plus spilled values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterAllocation {
    assignments: FxHashMap<ValueId, Gpr>,
    spilled: FxHashSet<ValueId>,
}

impl RegisterAllocation {
    /// Create an empty allocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a register to a value.
    #[inline]
    pub fn assign(&mut self, value: ValueId, reg: Gpr) {
        self.spilled.remove(&value);
        self.assignments.insert(value, reg);
    }

    /// Mark a value as spilled.
    #[inline]
    pub fn spill(&mut self, value: ValueId) {
        self.assignments.remove(&value);
        self.spilled.insert(value);
    }

    /// Register assigned to a value, if any.
    #[inline]
    pub fn get(&self, value: ValueId) -> Option<Gpr> {
        self.assignments.get(&value).copied()
    }

    /// Register assigned to the value defined at `position`, if any.
    #[inline]
    pub fn register_at(&self, position: u32) -> Option<Gpr> {
        self.get(ValueId::new(position))
    }

    /// Check if a value was spilled.
    #[inline]
    pub fn is_spilled(&self, value: ValueId) -> bool {
        self.spilled.contains(&value)
    }

    /// All register assignments.
    pub fn assignments(&self) -> impl Iterator<Item = (ValueId, Gpr)> + '_ {
        self.assignments.iter().map(|(&v, &r)| (v, r))
    }

    /// All spilled values.
    pub fn spilled(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.spilled.iter().copied()
    }

    /// Number of values held in registers.
    #[inline]
    pub fn num_assigned(&self) -> usize {
        self.assignments.len()
    }

    /// Number of spilled values.
    #[inline]
    pub fn num_spilled(&self) -> usize {
        self.spilled.len()
    }

    /// Total number of values accounted for.
    #[inline]
    pub fn len(&self) -> usize {
        self.assignments.len() + self.spilled.len()
    }

    /// Check if the allocation covers no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers used by at least one value.
    pub fn used_registers(&self) -> GprSet {
        self.assignments.values().copied().collect()
    }
}

// =============================================================================
// Configuration & Statistics
// =============================================================================

/// Configuration for the register allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Registers available for allocation, taken lowest encoding first.
    pub available_gprs: GprSet,
}

impl AllocatorConfig {
    /// Restrict allocation to a given register set.
    pub fn with_registers(mut self, gprs: GprSet) -> Self {
        // The frame registers are never handed out.
        self.available_gprs = gprs.remove(Gpr::Rsp).remove(Gpr::Rbp);
        self
    }

    /// Small register file to make spilling easy to trigger.
    pub fn for_testing() -> Self {
        Self::default().with_registers(
            GprSet::EMPTY
                .insert(Gpr::Rax)
                .insert(Gpr::Rcx)
                .insert(Gpr::Rdx),
        )
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            available_gprs: GprSet::ALLOCATABLE,
        }
    }
}

/// Allocation statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Number of values considered.
    pub num_values: usize,
    /// Number of values assigned to registers.
    pub num_allocated: usize,
    /// Number of values spilled.
    pub num_spilled: usize,
    /// Peak number of simultaneously live register values.
    pub max_pressure: usize,
    /// Time spent in microseconds.
    pub time_us: u64,
}

// =============================================================================
// Entry Points
// =============================================================================

/// Allocate registers for a program with the default configuration.
pub fn allocate(program: &BytecodeProgram) -> RegisterAllocation {
    allocate_with(program, AllocatorConfig::default()).0
}

/// Allocate registers for a program, also returning statistics.
pub fn allocate_with(
    program: &BytecodeProgram,
    config: AllocatorConfig,
) -> (RegisterAllocation, AllocatorStats) {
    let started = std::time::Instant::now();
    let ranges = Liveness::analyze(program).into_ranges();
    let (allocation, mut stats) = LinearScanAllocator::new(config).allocate(ranges);
    stats.time_us = started.elapsed().as_micros() as u64;
    (allocation, stats)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{Opcode, ProgramBuilder};

    #[test]
    fn test_overlap_is_half_open() {
        let a = LiveRange::new(ValueId::new(0), 0, 2);
        let b = LiveRange::new(ValueId::new(2), 2, 3);
        let c = LiveRange::new(ValueId::new(1), 1, 2);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));

        // Unused values still occupy their defining position.
        let d = LiveRange::new(ValueId::new(1), 1, 1);
        assert!(a.overlaps(&d));
        assert!(!d.overlaps(&b));
    }

    #[test]
    fn test_empty_program_yields_empty_allocation() {
        let program = ProgramBuilder::new().build();
        let (alloc, stats) = allocate_with(&program, AllocatorConfig::default());
        assert!(alloc.is_empty());
        assert_eq!(stats.num_values, 0);
    }

    #[test]
    fn test_allocate_simple_add() {
        let program = ProgramBuilder::new()
            .load_int(1)
            .load_int(2)
            .op(Opcode::Add)
            .op(Opcode::Return)
            .build();
        let alloc = allocate(&program);
        assert_eq!(alloc.register_at(0), Some(Gpr::Rax));
        assert_eq!(alloc.register_at(1), Some(Gpr::Rcx));
        // Both operands die at the add, so the sum reuses the lowest register.
        assert_eq!(alloc.register_at(2), Some(Gpr::Rax));
        assert_eq!(alloc.num_spilled(), 0);
    }

    #[test]
    fn test_assign_and_spill_are_exclusive() {
        let mut alloc = RegisterAllocation::new();
        let v = ValueId::new(4);
        alloc.assign(v, Gpr::Rbx);
        alloc.spill(v);
        assert_eq!(alloc.get(v), None);
        assert!(alloc.is_spilled(v));
        assert_eq!(alloc.len(), 1);
    }

    #[test]
    fn test_config_never_hands_out_frame_registers() {
        let config = AllocatorConfig::default().with_registers(GprSet::ALL);
        assert!(!config.available_gprs.contains(Gpr::Rsp));
        assert!(!config.available_gprs.contains(Gpr::Rbp));
        assert_eq!(AllocatorConfig::for_testing().available_gprs.count(), 3);
    }
}
