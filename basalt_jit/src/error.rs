//! Error types for the baseline JIT.
//!
//! Errors fall into three groups:
//! - Encoding errors (operands the target cannot represent)
//! - OSR errors (lookups that do not map onto compiled code)
//! - Compilation policy errors (coverage and size limits)
//!
//! Allocation degeneracy and unlowered opcodes are *not* errors; see
//! [`crate::codegen::CompiledCode::unlowered`].

use basalt_core::Opcode;
use thiserror::Error;

/// Result type used throughout the JIT.
pub type JitResult<T> = Result<T, JitError>;

/// Instruction encoding failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Immediate does not fit the signed 32-bit field.
    #[error("immediate {value} does not fit in a signed 32-bit field")]
    ImmediateOutOfRange {
        /// The rejected value.
        value: i64,
    },
}

/// On-stack replacement failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsrError {
    /// No compiled offset is known for the bytecode offset.
    #[error("bytecode offset {bc_offset} has no compiled counterpart")]
    UnmappedOffset {
        /// Requested bytecode offset.
        bc_offset: u32,
    },

    /// An explicit compiled offset points outside the code buffer.
    #[error("compiled offset {compiled_offset} is outside code of {code_size} bytes")]
    CompiledOffsetOutOfRange {
        /// Requested compiled offset.
        compiled_offset: u32,
        /// Size of the owning code buffer.
        code_size: usize,
    },

    /// The entry was created before its manager was last cleared.
    #[error("OSR entry at bytecode offset {bc_offset} is stale (generation {entry_generation}, current {current_generation})")]
    StaleEntry {
        /// Bytecode offset of the entry.
        bc_offset: u32,
        /// Generation recorded in the entry.
        entry_generation: u64,
        /// Current manager generation.
        current_generation: u64,
    },

    /// The manager's code was evicted or replaced.
    #[error("OSR manager for bytecode offset {bc_offset} was retired")]
    Retired {
        /// Requested bytecode offset.
        bc_offset: u32,
    },

    /// The entry was created by a different manager.
    #[error("OSR entry at bytecode offset {bc_offset} belongs to another manager")]
    ForeignEntry {
        /// Bytecode offset of the entry.
        bc_offset: u32,
    },
}

/// An instruction the code generator has no lowering for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloweredOp {
    /// Program position.
    pub position: u32,
    /// Opcode at that position.
    pub opcode: Opcode,
}

/// Top-level JIT error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    /// Instruction encoding failed.
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// OSR request could not be satisfied.
    #[error("OSR error: {0}")]
    Osr(#[from] OsrError),

    /// Strict coverage rejected a program with unlowered opcodes.
    #[error("{}", describe_unsupported(.ops))]
    Unsupported {
        /// Every offending instruction.
        ops: Vec<UnloweredOp>,
    },

    /// Generated code exceeds the configured per-function limit.
    #[error("generated {size} bytes, limit is {limit}")]
    CodeTooLarge {
        /// Generated size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

fn describe_unsupported(ops: &[UnloweredOp]) -> String {
    match ops.first() {
        Some(first) => format!(
            "{} instruction(s) have no baseline lowering (first: {} at {})",
            ops.len(),
            first.opcode,
            first.position
        ),
        None => "program has no baseline lowering".to_string(),
    }
}
