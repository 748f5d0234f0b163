//! x64 general-purpose register definitions and the System V AMD64
//! integer calling convention.
//!
//! # Encoding
//! - Every register is `#[repr(u8)]` with its hardware number (0-15)
//! - The low three bits go into ModRM/opcode fields; bit 3 selects the
//!   REX extension (R, X or B)
//! - [`GprSet`] is a 16-bit bitfield for O(1) membership and
//!   lowest-free-register queries

use std::fmt;

// =============================================================================
// General-Purpose Registers
// =============================================================================

/// x64 general-purpose register with its hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    // Stack pointer (reserved)
    Rsp = 4,
    // Frame pointer (reserved)
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// All 16 registers in encoding order.
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    /// Stack pointer.
    pub const SP: Gpr = Gpr::Rsp;

    /// Frame pointer.
    pub const FP: Gpr = Gpr::Rbp;

    /// Get the hardware encoding (0-15).
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Low three bits, as placed in ModRM and `+r` opcode fields.
    #[inline(always)]
    pub const fn low_bits(self) -> u8 {
        (self as u8) & 0b111
    }

    /// Check if encoding this register needs a REX extension bit (R8-R15).
    #[inline(always)]
    pub const fn is_extended(self) -> bool {
        (self as u8) >= 8
    }

    /// Check if this register is reserved for the stack or frame pointer.
    #[inline(always)]
    pub const fn is_reserved(self) -> bool {
        matches!(self, Gpr::Rsp | Gpr::Rbp)
    }

    /// Convert from an encoding value if valid.
    #[inline]
    pub const fn from_encoding(enc: u8) -> Option<Gpr> {
        if enc < 16 {
            Some(Self::ALL[enc as usize])
        } else {
            None
        }
    }

    /// Assembly name.
    pub const fn name(self) -> &'static str {
        match self {
            Gpr::Rax => "rax",
            Gpr::Rcx => "rcx",
            Gpr::Rdx => "rdx",
            Gpr::Rbx => "rbx",
            Gpr::Rsp => "rsp",
            Gpr::Rbp => "rbp",
            Gpr::Rsi => "rsi",
            Gpr::Rdi => "rdi",
            Gpr::R8 => "r8",
            Gpr::R9 => "r9",
            Gpr::R10 => "r10",
            Gpr::R11 => "r11",
            Gpr::R12 => "r12",
            Gpr::R13 => "r13",
            Gpr::R14 => "r14",
            Gpr::R15 => "r15",
        }
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Register Set
// =============================================================================

/// A set of GPRs as a 16-bit bitfield.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GprSet(u16);

impl GprSet {
    /// Empty register set.
    pub const EMPTY: GprSet = GprSet(0);

    /// All 16 registers.
    pub const ALL: GprSet = GprSet(0xFFFF);

    /// Every register except RSP and RBP, the baseline allocatable set.
    pub const ALLOCATABLE: GprSet = GprSet(0xFFFF & !(1 << 4) & !(1 << 5));

    /// Create a set containing a single register.
    #[inline(always)]
    pub const fn singleton(reg: Gpr) -> Self {
        GprSet(1 << reg.encoding())
    }

    /// Create from a raw bitmask.
    #[inline(always)]
    pub const fn from_bits(bits: u16) -> Self {
        GprSet(bits)
    }

    /// Get the raw bitmask.
    #[inline(always)]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Check if the set contains a register.
    #[inline(always)]
    pub const fn contains(self, reg: Gpr) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    /// Add a register to the set.
    #[inline(always)]
    pub const fn insert(self, reg: Gpr) -> Self {
        GprSet(self.0 | (1 << reg.encoding()))
    }

    /// Remove a register from the set.
    #[inline(always)]
    pub const fn remove(self, reg: Gpr) -> Self {
        GprSet(self.0 & !(1 << reg.encoding()))
    }

    /// Difference (self - other).
    #[inline(always)]
    pub const fn difference(self, other: GprSet) -> Self {
        GprSet(self.0 & !other.0)
    }

    /// Check if the set is empty.
    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Count the registers in the set.
    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// The register with the lowest encoding, if any.
    #[inline]
    pub const fn first(self) -> Option<Gpr> {
        if self.0 == 0 {
            None
        } else {
            Gpr::from_encoding(self.0.trailing_zeros() as u8)
        }
    }

    /// Iterate over registers in ascending encoding order.
    pub fn iter(self) -> impl Iterator<Item = Gpr> {
        Gpr::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl fmt::Debug for GprSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Gpr> for GprSet {
    fn from_iter<I: IntoIterator<Item = Gpr>>(iter: I) -> Self {
        iter.into_iter().fold(GprSet::EMPTY, GprSet::insert)
    }
}

// =============================================================================
// Calling Convention
// =============================================================================

/// System V AMD64 integer calling convention.
#[derive(Debug, Clone, Copy)]
pub struct CallingConvention;

impl CallingConvention {
    /// Integer argument registers, in order.
    pub const ARGS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];

    /// Integer return register.
    pub const RET: Gpr = Gpr::Rax;

    /// Registers a callee may clobber.
    pub const CALLER_SAVED: GprSet = GprSet(
        (1 << 0) | (1 << 1) | (1 << 2) | (1 << 6) | (1 << 7) | (1 << 8) | (1 << 9) | (1 << 10)
            | (1 << 11),
    );

    /// Registers a callee must preserve.
    pub const CALLEE_SAVED: GprSet =
        GprSet((1 << 3) | (1 << 4) | (1 << 5) | (1 << 12) | (1 << 13) | (1 << 14) | (1 << 15));

    /// Stack alignment at call sites, in bytes.
    pub const STACK_ALIGN: u32 = 16;

    /// Register carrying the `index`-th integer argument, if it is passed in a register.
    #[inline]
    pub fn arg(index: usize) -> Option<Gpr> {
        Self::ARGS.get(index).copied()
    }
}

// =============================================================================
// Tests
// =============================================================================
