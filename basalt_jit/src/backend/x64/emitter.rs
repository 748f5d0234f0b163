//! x64 code emitter.
//!
//! A thin assembler front-end over [`encoder`](super::encoder): it owns the
//! growing code buffer and tracks the current offset so callers can record
//! positions (for offset tables) while emitting.

use super::encoder::{self, EncodedInst, Operand};
use super::registers::Gpr;
use crate::error::EncodeError;

/// Growable x64 code buffer.
#[derive(Debug, Default, Clone)]
pub struct Emitter {
    code: Vec<u8>,
}

impl Emitter {
    /// Create a new emitter.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create with specified capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Emitter {
            code: Vec::with_capacity(cap),
        }
    }

    /// Current code offset.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Emitted bytes so far.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    /// Append an encoded instruction.
    #[inline]
    pub fn emit(&mut self, inst: EncodedInst) {
        self.code.extend_from_slice(inst.as_bytes());
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    /// `mov dst, src`.
    pub fn mov(&mut self, dst: Gpr, src: impl Into<Operand>) -> Result<(), EncodeError> {
        self.emit(encoder::encode_mov(dst, src)?);
        Ok(())
    }

    /// `add dst, src`.
    pub fn add(&mut self, dst: Gpr, src: impl Into<Operand>) -> Result<(), EncodeError> {
        self.emit(encoder::encode_add(dst, src)?);
        Ok(())
    }

    /// `sub dst, src`.
    pub fn sub(&mut self, dst: Gpr, src: impl Into<Operand>) -> Result<(), EncodeError> {
        self.emit(encoder::encode_sub(dst, src)?);
        Ok(())
    }

    /// `imul dst, src`.
    pub fn imul(&mut self, dst: Gpr, src: Gpr) {
        self.emit(encoder::encode_imul(dst, src));
    }

    /// `call rel32` to an absolute target offset within this buffer.
    pub fn call_offset(&mut self, target: u32) -> Result<(), EncodeError> {
        let next = self.offset() as i64 + encoder::CALL_LEN as i64;
        self.emit(encoder::encode_call(target as i64 - next)?);
        Ok(())
    }

    /// `push reg`.
    pub fn push(&mut self, reg: Gpr) {
        self.emit(encoder::encode_push(reg));
    }

    /// `pop reg`.
    pub fn pop(&mut self, reg: Gpr) {
        self.emit(encoder::encode_pop(reg));
    }

    /// `ret`.
    pub fn ret(&mut self) {
        self.emit(encoder::encode_ret());
    }

    /// `nop`.
    pub fn nop(&mut self) {
        self.emit(encoder::encode_nop());
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Finish and take the code buffer.
    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}
