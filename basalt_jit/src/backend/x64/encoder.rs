//! x64 instruction encoder.
//!
//! Low-level, stateless encoding of the instruction subset the baseline
//! tier emits. Every function is a pure function of its operands.
//!
//! # Encoding Reference
//!
//! | Instruction        | Bytes                          | Length |
//! |--------------------|--------------------------------|--------|
//! | `mov r64, r64`     | `REX.W 89 /r`                  | 3      |
//! | `mov r64, imm32`   | `REX.W C7 /0 id`               | 7      |
//! | `add r64, r64`     | `REX.W 01 /r`                  | 3      |
//! | `add r64, imm32`   | `REX.W 81 /0 id`               | 7      |
//! | `sub r64, r64`     | `REX.W 29 /r`                  | 3      |
//! | `sub r64, imm32`   | `REX.W 81 /5 id`               | 7      |
//! | `imul r64, r64`    | `REX.W 0F AF /r`               | 4      |
//! | `call rel32`       | `E8 cd`                        | 5      |
//! | `ret`              | `C3`                           | 1      |
//! | `push r64`         | `[41] 50+r`                    | 1-2    |
//! | `pop r64`          | `[41] 58+r`                    | 1-2    |
//! | `nop`              | `90`                           | 1      |
//!
//! Immediates are sign-extended 32-bit fields. Values outside that range
//! are rejected with [`EncodeError::ImmediateOutOfRange`] rather than
//! truncated.

use super::registers::Gpr;
use crate::error::EncodeError;

// =============================================================================
// Opcode Bytes
// =============================================================================

/// REX prefix with W=1 (64-bit operand size).
pub const REX_W: u8 = 0x48;
/// REX prefix with only B=1, used for `push`/`pop` of R8-R15.
pub const REX_B: u8 = 0x41;

const OP_MOV_RM_R: u8 = 0x89;
const OP_MOV_RM_IMM32: u8 = 0xC7;
const OP_ALU_RM_IMM32: u8 = 0x81;
const OP_TWO_BYTE: u8 = 0x0F;
const OP_IMUL_R_RM: u8 = 0xAF;
const OP_CALL_REL32: u8 = 0xE8;
const OP_PUSH_R: u8 = 0x50;
const OP_POP_R: u8 = 0x58;

/// `ret` opcode.
pub const RET_OPCODE: u8 = 0xC3;
/// `nop` opcode.
pub const NOP_OPCODE: u8 = 0x90;

/// Length of a register-to-register `mov`/`add`/`sub`.
pub const RR_LEN: usize = 3;
/// Length of a register-immediate `mov`/`add`/`sub`.
pub const RI_LEN: usize = 7;
/// Length of `imul r64, r64`.
pub const IMUL_LEN: usize = 4;
/// Length of `call rel32`.
pub const CALL_LEN: usize = 5;

// =============================================================================
// Encoded Instruction
// =============================================================================

/// Maximum length of an x64 instruction.
pub const MAX_INST_LEN: usize = 15;

/// An encoded instruction: up to 15 bytes, stored inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncodedInst {
    bytes: [u8; MAX_INST_LEN],
    len: u8,
}

impl EncodedInst {
    /// Create from a byte slice.
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_INST_LEN);
        let mut inst = EncodedInst {
            bytes: [0; MAX_INST_LEN],
            len: bytes.len() as u8,
        };
        inst.bytes[..bytes.len()].copy_from_slice(bytes);
        inst
    }

    /// The encoded bytes.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Encoded length.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if no bytes were encoded.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for EncodedInst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedInst[")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// Operands
// =============================================================================

/// Source operand for `mov`, `add` and `sub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A register.
    Reg(Gpr),
    /// A signed immediate; must fit in 32 bits when encoded.
    Imm(i64),
}

impl From<Gpr> for Operand {
    #[inline]
    fn from(reg: Gpr) -> Self {
        Operand::Reg(reg)
    }
}

impl From<i64> for Operand {
    #[inline]
    fn from(imm: i64) -> Self {
        Operand::Imm(imm)
    }
}

impl From<i32> for Operand {
    #[inline]
    fn from(imm: i32) -> Self {
        Operand::Imm(imm as i64)
    }
}

/// Two-operand ALU operation sharing the `81 /digit` immediate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
}

impl AluOp {
    /// Opcode of the `r/m64, r64` form.
    #[inline(always)]
    pub const fn rr_opcode(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Sub => 0x29,
        }
    }

    /// ModRM.reg sub-field (`/digit`) of the `81 /digit id` form.
    #[inline(always)]
    pub const fn imm_digit(self) -> u8 {
        match self {
            AluOp::Add => 0,
            AluOp::Sub => 5,
        }
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

/// REX.W prefix with R and B extension bits for the ModRM operands.
#[inline(always)]
const fn rex_w(reg: Gpr, rm: Gpr) -> u8 {
    REX_W | ((reg.is_extended() as u8) << 2) | (rm.is_extended() as u8)
}

/// Register-direct ModRM byte (mod = 11).
#[inline(always)]
const fn modrm_direct(reg: u8, rm: Gpr) -> u8 {
    0b1100_0000 | ((reg & 0b111) << 3) | rm.low_bits()
}

/// Check that `value` fits a sign-extended 32-bit field.
#[inline]
pub fn imm32(value: i64) -> Result<i32, EncodeError> {
    i32::try_from(value).map_err(|_| EncodeError::ImmediateOutOfRange { value })
}

#[inline]
fn with_imm32(head: [u8; 3], imm: i32) -> EncodedInst {
    let imm = imm.to_le_bytes();
    EncodedInst::from_slice(&[head[0], head[1], head[2], imm[0], imm[1], imm[2], imm[3]])
}

// =============================================================================
// Data Movement
// =============================================================================

/// MOV dst, src (register or immediate).
#[inline]
pub fn encode_mov(dst: Gpr, src: impl Into<Operand>) -> Result<EncodedInst, EncodeError> {
    match src.into() {
        Operand::Reg(src) => Ok(encode_mov_rr(dst, src)),
        Operand::Imm(imm) => encode_mov_ri(dst, imm),
    }
}

/// MOV r64, r64.
#[inline]
pub fn encode_mov_rr(dst: Gpr, src: Gpr) -> EncodedInst {
    EncodedInst::from_slice(&[
        rex_w(src, dst),
        OP_MOV_RM_R,
        modrm_direct(src.encoding(), dst),
    ])
}

/// MOV r64, imm32 (sign-extended).
#[inline]
pub fn encode_mov_ri(dst: Gpr, imm: i64) -> Result<EncodedInst, EncodeError> {
    let imm = imm32(imm)?;
    Ok(with_imm32(
        [
            REX_W | dst.is_extended() as u8,
            OP_MOV_RM_IMM32,
            modrm_direct(0, dst),
        ],
        imm,
    ))
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Two-operand ALU operation (`dst = dst op src`).
#[inline]
pub fn encode_alu(op: AluOp, dst: Gpr, src: impl Into<Operand>) -> Result<EncodedInst, EncodeError> {
    match src.into() {
        Operand::Reg(src) => Ok(EncodedInst::from_slice(&[
            rex_w(src, dst),
            op.rr_opcode(),
            modrm_direct(src.encoding(), dst),
        ])),
        Operand::Imm(imm) => {
            let imm = imm32(imm)?;
            Ok(with_imm32(
                [
                    REX_W | dst.is_extended() as u8,
                    OP_ALU_RM_IMM32,
                    modrm_direct(op.imm_digit(), dst),
                ],
                imm,
            ))
        }
    }
}

/// ADD dst, src.
#[inline]
pub fn encode_add(dst: Gpr, src: impl Into<Operand>) -> Result<EncodedInst, EncodeError> {
    encode_alu(AluOp::Add, dst, src)
}

/// SUB dst, src.
#[inline]
pub fn encode_sub(dst: Gpr, src: impl Into<Operand>) -> Result<EncodedInst, EncodeError> {
    encode_alu(AluOp::Sub, dst, src)
}

/// IMUL r64, r64 (signed, `dst = dst * src`).
#[inline]
pub fn encode_imul(dst: Gpr, src: Gpr) -> EncodedInst {
    EncodedInst::from_slice(&[
        rex_w(dst, src),
        OP_TWO_BYTE,
        OP_IMUL_R_RM,
        modrm_direct(dst.encoding(), src),
    ])
}

// =============================================================================
// Control Flow
// =============================================================================

/// CALL rel32, relative to the end of this instruction.
#[inline]
pub fn encode_call(rel: i64) -> Result<EncodedInst, EncodeError> {
    let rel = imm32(rel)?.to_le_bytes();
    Ok(EncodedInst::from_slice(&[
        OP_CALL_REL32,
        rel[0],
        rel[1],
        rel[2],
        rel[3],
    ]))
}

/// RET.
#[inline]
pub fn encode_ret() -> EncodedInst {
    EncodedInst::from_slice(&[RET_OPCODE])
}

// =============================================================================
// Stack
// =============================================================================

/// PUSH r64.
#[inline]
pub fn encode_push(reg: Gpr) -> EncodedInst {
    encode_plus_r(OP_PUSH_R, reg)
}

/// POP r64.
#[inline]
pub fn encode_pop(reg: Gpr) -> EncodedInst {
    encode_plus_r(OP_POP_R, reg)
}

/// `opcode+r` form; R8-R15 need REX.B and only contribute their low bits.
#[inline]
fn encode_plus_r(opcode: u8, reg: Gpr) -> EncodedInst {
    if reg.is_extended() {
        EncodedInst::from_slice(&[REX_B, opcode + reg.low_bits()])
    } else {
        EncodedInst::from_slice(&[opcode + reg.encoding()])
    }
}

// =============================================================================
// Misc
// =============================================================================

/// NOP.
#[inline]
pub fn encode_nop() -> EncodedInst {
    EncodedInst::from_slice(&[NOP_OPCODE])
}

// =============================================================================
// Tests
// =============================================================================
