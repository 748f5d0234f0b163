//! Liveness Analysis
//!
//! Computes one [`LiveRange`] per program-defined value by simulating the
//! operand stack over the instruction stream.
//!
//! # Algorithm
//!
//! 1. Walk instructions in position order
//! 2. Pop the operands each opcode consumes; each pop is a use at the
//!    current position
//! 3. Push one new value per result; its range starts here
//!
//! `Dup` uses its source, pushes it back, and defines a copy on top, so
//! the source stays live until the copy's sibling is consumed.
//!
//! Control flow is ignored: ranges follow program order only, which is
//! enough for a baseline tier. Underflow in malformed programs is counted
//! and otherwise skipped.

use super::{LiveRange, ValueId};
use basalt_core::{BytecodeProgram, Opcode};
use rustc_hash::FxHashMap;

/// Liveness analysis result.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    /// Ranges in definition order (ascending start).
    ranges: Vec<LiveRange>,
    /// Position of each value's range in `ranges`.
    index: FxHashMap<ValueId, usize>,
    /// Pops that found the simulated stack empty.
    underflows: usize,
    /// Deepest simulated stack.
    max_depth: usize,
}

impl Liveness {
    /// Run liveness analysis on a program.
    pub fn analyze(program: &BytecodeProgram) -> Self {
        let mut live = Liveness::default();
        let mut stack: Vec<ValueId> = Vec::new();

        for (pos, instr) in program.instructions().iter().enumerate() {
            let pos = pos as u32;
            let opcode = instr.opcode();

            if opcode == Opcode::Dup {
                if let Some(src) = stack.pop() {
                    live.record_use(src, pos);
                    stack.push(src);
                } else {
                    live.underflows += 1;
                }
                stack.push(live.define(pos));
            } else {
                let effect = opcode.stack_effect();
                for _ in 0..effect.pops {
                    match stack.pop() {
                        Some(value) => live.record_use(value, pos),
                        None => live.underflows += 1,
                    }
                }
                for _ in 0..effect.pushes {
                    stack.push(live.define(pos));
                }
            }

            live.max_depth = live.max_depth.max(stack.len());
        }

        live
    }

    fn define(&mut self, pos: u32) -> ValueId {
        let value = ValueId::new(pos);
        self.index.insert(value, self.ranges.len());
        self.ranges.push(LiveRange::new(value, pos, pos));
        value
    }

    fn record_use(&mut self, value: ValueId, pos: u32) {
        if let Some(&idx) = self.index.get(&value) {
            let range = &mut self.ranges[idx];
            range.end = range.end.max(pos);
        }
    }

    /// Ranges in definition order.
    #[inline]
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    /// Take the ranges.
    #[inline]
    pub fn into_ranges(self) -> Vec<LiveRange> {
        self.ranges
    }

    /// Range of a specific value.
    pub fn range(&self, value: ValueId) -> Option<&LiveRange> {
        self.index.get(&value).map(|&idx| &self.ranges[idx])
    }

    /// Number of values defined.
    #[inline]
    pub fn num_values(&self) -> usize {
        self.ranges.len()
    }

    /// Number of pops that found the stack empty.
    #[inline]
    pub fn underflows(&self) -> usize {
        self.underflows
    }

    /// Deepest operand stack observed.
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}
