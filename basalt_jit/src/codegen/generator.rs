//! Bytecode → x64 code generator.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────────────────┐
//! │   Return Address     │  [rbp + 8]
//! ├──────────────────────┤
//! │   Saved RBP          │  [rbp]      ← rbp
//! ├──────────────────────┤
//! │   Slot 0             │  [rbp - 8]
//! │   Slot 1             │  [rbp - 16]
//! │   ...                │
//! └──────────────────────┘  [rbp - frame_size] ← rsp
//! ```
//!
//! The prologue always emits `sub rsp, frame_size`, so the body starts at
//! a fixed offset regardless of frame size.
//!
//! Arithmetic works on the fixed pair `rax`/`rcx`. The allocation only
//! picks the destination of constant loads.

use super::compiled::CompiledCode;
use crate::backend::x64::emitter::Emitter;
use crate::backend::x64::encoder::{IMUL_LEN, RI_LEN, RR_LEN};
use crate::backend::x64::registers::Gpr;
use crate::error::{EncodeError, UnloweredOp};
use crate::regalloc::RegisterAllocation;
use basalt_core::{BytecodeProgram, Opcode};
use tracing::trace;

/// Default stack frame size in bytes.
pub const DEFAULT_FRAME_SIZE: u32 = 64;

/// Bytes of `push rbp; mov rbp, rsp; sub rsp, imm32`.
pub const PROLOGUE_SIZE: usize = 1 + RR_LEN + RI_LEN;

/// Bytes of `mov rsp, rbp; pop rbp; ret`.
pub const EPILOGUE_SIZE: usize = RR_LEN + 1 + 1;

/// Register arithmetic reads its left operand from and writes to.
pub const ACC: Gpr = Gpr::Rax;

/// Register holding the right operand of arithmetic.
pub const SCRATCH: Gpr = Gpr::Rcx;

/// Check if an opcode has a real baseline lowering.
#[inline]
pub const fn has_lowering(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Nop | Opcode::LoadConst | Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Return
    )
}

/// Every instruction of `program` the generator would replace with a `nop`.
pub fn unlowered_positions(program: &BytecodeProgram) -> Vec<UnloweredOp> {
    program
        .instructions()
        .iter()
        .enumerate()
        .filter(|(_, instr)| !has_lowering(instr.opcode()))
        .map(|(pos, instr)| UnloweredOp {
            position: pos as u32,
            opcode: instr.opcode(),
        })
        .collect()
}

/// Upper bound on the code size for `program`.
pub fn max_code_size(program: &BytecodeProgram) -> usize {
    let body: usize = program
        .instructions()
        .iter()
        .map(|instr| match instr.opcode() {
            Opcode::LoadConst => RI_LEN,
            Opcode::Add | Opcode::Sub => RR_LEN,
            Opcode::Mul => IMUL_LEN,
            Opcode::Return => 0,
            _ => 1,
        })
        .sum();
    PROLOGUE_SIZE + body + EPILOGUE_SIZE
}

// =============================================================================
// Code Generator
// =============================================================================

/// Baseline code generator.
///
/// Output is a pure function of the program, the allocation and the frame
/// size.
#[derive(Debug, Clone, Copy)]
pub struct CodeGenerator {
    frame_size: u32,
}

impl CodeGenerator {
    /// Create a generator with the given frame size.
    pub fn new(frame_size: u32) -> Self {
        CodeGenerator { frame_size }
    }

    /// Frame size in bytes.
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Generate code for `program`.
    pub fn generate(
        &self,
        program: &BytecodeProgram,
        allocation: &RegisterAllocation,
    ) -> Result<CompiledCode, EncodeError> {
        let mut em = Emitter::with_capacity(max_code_size(program));
        let mut bc_to_native = Vec::with_capacity(program.len());
        let mut unlowered = Vec::new();

        self.emit_prologue(&mut em)?;

        for (pos, instr) in program.instructions().iter().enumerate() {
            let pos = pos as u32;
            bc_to_native.push(em.offset());

            match instr.opcode() {
                Opcode::LoadConst => {
                    let dst = allocation.register_at(pos).unwrap_or(ACC);
                    let imm = match program.constant(instr.arg()).and_then(|c| c.as_integer()) {
                        Some(value) => value,
                        None => {
                            trace!(
                                target: "basalt::jit::codegen",
                                position = pos,
                                index = instr.arg(),
                                "non-numeric constant, loading placeholder"
                            );
                            0
                        }
                    };
                    em.mov(dst, imm)?;
                }
                Opcode::Add => em.add(ACC, SCRATCH)?,
                Opcode::Sub => em.sub(ACC, SCRATCH)?,
                Opcode::Mul => em.imul(ACC, SCRATCH),
                Opcode::Return => {}
                Opcode::Nop => em.nop(),
                opcode => {
                    unlowered.push(UnloweredOp {
                        position: pos,
                        opcode,
                    });
                    em.nop();
                }
            }
        }

        self.emit_epilogue(&mut em)?;

        Ok(CompiledCode::new(
            em.finish(),
            bc_to_native,
            self.frame_size,
            unlowered,
        ))
    }

    /// `push rbp; mov rbp, rsp; sub rsp, frame_size`.
    fn emit_prologue(&self, em: &mut Emitter) -> Result<(), EncodeError> {
        em.push(Gpr::FP);
        em.mov(Gpr::FP, Gpr::SP)?;
        em.sub(Gpr::SP, self.frame_size as i64)?;
        Ok(())
    }

    /// `mov rsp, rbp; pop rbp; ret`.
    fn emit_epilogue(&self, em: &mut Emitter) -> Result<(), EncodeError> {
        em.mov(Gpr::SP, Gpr::FP)?;
        em.pop(Gpr::FP);
        em.ret();
        Ok(())
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE)
    }
}

// =============================================================================
// Tests
// =============================================================================
