//! Baseline compiler orchestrator.
//!
//! Decides tier-up eligibility and runs the two compile passes:
//!
//! ```text
//! BytecodeProgram ──► regalloc ──► codegen ──► CompiledCode
//! ```
//!
//! Compilation is synchronous and deterministic: the same program and
//! configuration always produce byte-identical code.

use crate::codegen::{unlowered_positions, CodeGenerator, CompiledCode, DEFAULT_FRAME_SIZE};
use crate::error::{JitError, JitResult};
use crate::regalloc::{self, AllocatorConfig};
use basalt_core::{BytecodeProgram, FunctionId, ProfilingData};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Calls before a function becomes eligible for baseline compilation.
pub const TIER_UP_THRESHOLD: u64 = 1_000;

/// Default code size budget in bytes (10 MiB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 10 * 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`BaselineCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Call count at which `should_compile` turns true.
    pub tier_up_threshold: u64,
    /// Stack frame reserved by the prologue.
    pub frame_size: u32,
    /// Reject programs containing opcodes without a lowering.
    pub strict_coverage: bool,
    /// Largest code a single function may produce.
    pub max_code_size: usize,
    /// Register allocator settings.
    pub allocator: AllocatorConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            tier_up_threshold: TIER_UP_THRESHOLD,
            frame_size: DEFAULT_FRAME_SIZE,
            strict_coverage: false,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            allocator: AllocatorConfig::default(),
        }
    }
}

impl CompilerConfig {
    /// Configuration for testing: tiny threshold, strict coverage.
    pub fn for_testing() -> Self {
        Self {
            tier_up_threshold: 2,
            strict_coverage: true,
            ..Self::default()
        }
    }

    /// Set the tier-up threshold.
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.tier_up_threshold = threshold;
        self
    }

    /// Set the frame size.
    pub fn with_frame_size(mut self, frame_size: u32) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Enable or disable strict coverage.
    pub fn with_strict_coverage(mut self, strict: bool) -> Self {
        self.strict_coverage = strict;
        self
    }

    /// Set the per-function code size limit.
    pub fn with_max_code_size(mut self, limit: usize) -> Self {
        self.max_code_size = limit;
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for one compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilationStats {
    /// Time spent in register allocation (microseconds).
    pub allocation_us: u64,
    /// Time spent in code generation (microseconds).
    pub codegen_us: u64,
    /// Number of bytecode instructions compiled.
    pub instructions: u32,
    /// Number of values the allocator saw.
    pub values: u32,
    /// Number of values spilled.
    pub spilled: u32,
    /// Peak register pressure.
    pub max_pressure: u32,
    /// Instructions that fell back to a `nop`.
    pub unlowered: u32,
    /// Final code size in bytes.
    pub code_size: u32,
}

impl CompilationStats {
    /// Total compile time in microseconds.
    #[inline]
    pub fn total_us(&self) -> u64 {
        self.allocation_us + self.codegen_us
    }
}

// =============================================================================
// Baseline Compiler
// =============================================================================

/// The baseline compiler.
#[derive(Debug, Clone, Default)]
pub struct BaselineCompiler {
    config: CompilerConfig,
}

impl BaselineCompiler {
    /// Create a compiler with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compiler with a specific configuration.
    pub fn with_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Check whether a function has been called often enough to compile.
    #[inline]
    pub fn should_compile(&self, _id: FunctionId, call_count: u64) -> bool {
        call_count >= self.config.tier_up_threshold
    }

    /// Compile a program to baseline machine code.
    pub fn compile_function(
        &self,
        program: &BytecodeProgram,
        profile: Option<&ProfilingData>,
    ) -> JitResult<CompiledCode> {
        self.compile_with_stats(program, profile).map(|(code, _)| code)
    }

    /// Compile a program and report per-phase statistics.
    pub fn compile_with_stats(
        &self,
        program: &BytecodeProgram,
        profile: Option<&ProfilingData>,
    ) -> JitResult<(CompiledCode, CompilationStats)> {
        debug!(
            target: "basalt::jit::compiler",
            function = program.name(),
            instructions = program.len(),
            "baseline compile start"
        );
        if let Some(profile) = profile {
            trace!(
                target: "basalt::jit::compiler",
                function = program.name(),
                calls = profile.call_count(),
                hottest_back_edge = ?profile.hottest_back_edge(),
                "profile"
            );
        }

        if self.config.strict_coverage {
            let ops = unlowered_positions(program);
            if !ops.is_empty() {
                return Err(JitError::Unsupported { ops });
            }
        }

        let mut stats = CompilationStats {
            instructions: program.len() as u32,
            ..CompilationStats::default()
        };

        // Phase 1: register allocation
        let (allocation, alloc_stats) = regalloc::allocate_with(program, self.config.allocator);
        stats.allocation_us = alloc_stats.time_us;
        stats.values = alloc_stats.num_values as u32;
        stats.spilled = alloc_stats.num_spilled as u32;
        stats.max_pressure = alloc_stats.max_pressure as u32;

        // Phase 2: code generation
        let started = Instant::now();
        let code = CodeGenerator::new(self.config.frame_size).generate(program, &allocation)?;
        stats.codegen_us = started.elapsed().as_micros() as u64;
        stats.code_size = code.size() as u32;
        stats.unlowered = code.unlowered().len() as u32;

        if code.size() > self.config.max_code_size {
            return Err(JitError::CodeTooLarge {
                size: code.size(),
                limit: self.config.max_code_size,
            });
        }

        if let Some(first) = code.unlowered().first() {
            warn!(
                target: "basalt::jit::compiler",
                function = program.name(),
                count = code.unlowered().len(),
                first_opcode = %first.opcode,
                first_position = first.position,
                "instructions compiled to nop placeholders"
            );
        }

        debug!(
            target: "basalt::jit::compiler",
            function = program.name(),
            bytes = code.size(),
            spilled = stats.spilled,
            time_us = stats.total_us(),
            "baseline compile finished"
        );

        Ok((code, stats))
    }
}

// =============================================================================
// Tests
// =============================================================================
