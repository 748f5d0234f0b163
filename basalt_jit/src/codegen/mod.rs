//! Baseline code generation.
//!
//! - `generator`: walks the program once and emits prologue, body and
//!   epilogue through the x64 emitter
//! - `compiled`: the immutable [`CompiledCode`] artifact and its side tables

pub mod compiled;
pub mod generator;

pub use compiled::{CompiledCode, DeoptMetadata, IcKind, IcSite};
pub use generator::{
    has_lowering, max_code_size, unlowered_positions, CodeGenerator, DEFAULT_FRAME_SIZE,
    EPILOGUE_SIZE, PROLOGUE_SIZE,
};
