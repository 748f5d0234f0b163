//! # Basalt Core
//!
//! Types shared between the Basalt interpreter and the baseline JIT.
//!
//! The JIT never owns any of these; it consumes them through the
//! contracts defined here:
//!
//! - **Bytecode**: the linear, stack-based instruction stream and its
//!   constant pool
//! - **Interpreter State**: value stack and locals captured at OSR points
//! - **Profiling**: advisory call and back-edge counts
//! - **Function Identity**: explicit, caller-owned identity allocation

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytecode;
pub mod function_id;
pub mod profile;
pub mod value;

pub use bytecode::{BytecodeProgram, Constant, Instruction, Opcode, ProgramBuilder, StackEffect};
pub use function_id::{FunctionId, FunctionIdAllocator};
pub use profile::ProfilingData;
pub use value::{InterpreterState, Value};

/// Basalt runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
