//! Baseline JIT compiler for Basalt.
//!
//! Translates linear stack bytecode straight into x86-64 machine code:
//! - Direct x64 instruction encoding (System V AMD64)
//! - Linear-scan register allocation over stack-derived live ranges
//! - Single-pass code generation with a fixed frame layout
//! - On-stack replacement at loop back-edges
//! - LRU code caching and background compilation
#![deny(unsafe_op_in_unsafe_fn)]
pub mod backend;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod osr;
pub mod regalloc;
pub mod runtime;

pub use codegen::CompiledCode;
pub use compiler::{BaselineCompiler, CompilationStats, CompilerConfig, TIER_UP_THRESHOLD};
pub use error::{EncodeError, JitError, JitResult, OsrError};
pub use osr::{OsrEntry, OsrManager, OsrRegistry, OsrTransfer};
pub use runtime::{CodeCache, JitRuntime, JitStats, RuntimeConfig};
