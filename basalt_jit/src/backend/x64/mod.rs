//! x64 backend modules.
//!
//! - `registers`: GPR definitions and the System V calling convention
//! - `encoder`: Low-level instruction encoding
//! - `emitter`: Code buffer with offset tracking

pub mod emitter;
pub mod encoder;
pub mod registers;

// Re-export commonly used types
pub use emitter::Emitter;
pub use encoder::{AluOp, EncodedInst, Operand};
pub use registers::{CallingConvention, Gpr, GprSet};
