//! The compiled code artifact.
//!
//! [`CompiledCode`] is immutable once built and shared behind `Arc` by the
//! code cache, OSR entries and callers. It owns plain bytes; mapping them
//! executable belongs to the embedder.

use crate::error::UnloweredOp;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Side Tables
// =============================================================================

/// Kind of inline-cache site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcKind {
    /// Call target cache.
    Call,
    /// Attribute load.
    LoadAttr,
    /// Attribute store.
    StoreAttr,
    /// Binary operation type feedback.
    BinaryOp,
}

/// An inline-cache site within generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcSite {
    /// Offset of the patchable instruction.
    pub offset: u32,
    /// What the site caches.
    pub kind: IcKind,
}

/// Opaque deoptimization metadata.
///
/// The baseline tier never produces any; higher tiers attach their own
/// encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct DeoptMetadata(Arc<[u8]>);

impl DeoptMetadata {
    /// Wrap encoded metadata.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        DeoptMetadata(bytes.into())
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DeoptMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeoptMetadata({} bytes)", self.0.len())
    }
}

// =============================================================================
// Compiled Code
// =============================================================================

/// Machine code for one function plus the tables that describe it.
#[derive(Clone, PartialEq, Eq)]
pub struct CompiledCode {
    code: Box<[u8]>,
    entry_point: u32,
    size: usize,
    deopt: Option<DeoptMetadata>,
    ic_sites: Box<[IcSite]>,
    /// Native offset of each bytecode position.
    bc_to_native: Box<[u32]>,
    frame_size: u32,
    unlowered: Box<[UnloweredOp]>,
}

impl CompiledCode {
    /// Package generated bytes. The entry point is offset 0.
    pub fn new(
        code: Vec<u8>,
        bc_to_native: Vec<u32>,
        frame_size: u32,
        unlowered: Vec<UnloweredOp>,
    ) -> Self {
        let code = code.into_boxed_slice();
        CompiledCode {
            size: code.len(),
            code,
            entry_point: 0,
            deopt: None,
            ic_sites: Box::new([]),
            bc_to_native: bc_to_native.into_boxed_slice(),
            frame_size,
            unlowered: unlowered.into_boxed_slice(),
        }
    }

    /// Code bytes.
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Entry point offset into [`code`](Self::code).
    #[inline]
    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// Size in bytes; always `code().len()`.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Deoptimization metadata. Always `None` for baseline code.
    #[inline]
    pub fn deopt(&self) -> Option<&DeoptMetadata> {
        self.deopt.as_ref()
    }

    /// Inline-cache sites. Always empty for baseline code.
    #[inline]
    pub fn ic_sites(&self) -> &[IcSite] {
        &self.ic_sites
    }

    /// Native offset where bytecode position `bc_offset` begins.
    #[inline]
    pub fn native_offset(&self, bc_offset: u32) -> Option<u32> {
        self.bc_to_native.get(bc_offset as usize).copied()
    }

    /// The full bytecode → native offset table.
    #[inline]
    pub fn offset_table(&self) -> &[u32] {
        &self.bc_to_native
    }

    /// Bytes reserved below the frame pointer.
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Instructions that fell back to a `nop` placeholder.
    #[inline]
    pub fn unlowered(&self) -> &[UnloweredOp] {
        &self.unlowered
    }

    /// Check if every instruction got a real lowering.
    #[inline]
    pub fn is_fully_lowered(&self) -> bool {
        self.unlowered.is_empty()
    }

    /// Check if `offset` lies inside the code buffer.
    #[inline]
    pub fn contains_offset(&self, offset: u32) -> bool {
        (offset as usize) < self.size
    }
}

impl fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCode")
            .field("size", &self.size)
            .field("entry_point", &self.entry_point)
            .field("frame_size", &self.frame_size)
            .field("instructions", &self.bc_to_native.len())
            .field("unlowered", &self.unlowered.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::Opcode;

    #[test]
    fn test_size_matches_code() {
        let code = CompiledCode::new(vec![0x90, 0xC3], vec![0], 64, Vec::new());
        assert_eq!(code.size(), code.code().len());
        assert_eq!(code.entry_point(), 0);
        assert!(code.deopt().is_none());
        assert!(code.ic_sites().is_empty());
        assert!(code.is_fully_lowered());
        assert!(code.contains_offset(1));
        assert!(!code.contains_offset(2));
    }

    #[test]
    fn test_offset_table_lookup() {
        let code = CompiledCode::new(vec![0; 20], vec![11, 18, 18], 64, Vec::new());
        assert_eq!(code.native_offset(1), Some(18));
        assert_eq!(code.native_offset(3), None);
    }

    #[test]
    fn test_unlowered_reported() {
        let ops = vec![UnloweredOp {
            position: 2,
            opcode: Opcode::Div,
        }];
        let code = CompiledCode::new(vec![0x90], vec![0, 0, 0], 64, ops.clone());
        assert_eq!(code.unlowered(), ops.as_slice());
        assert!(!code.is_fully_lowered());
    }
}
