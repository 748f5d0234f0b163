//! On-Stack Replacement
//!
//! Lets a function that is already running in the interpreter continue in
//! compiled code at a loop back-edge.
//!
//! # Flow
//!
//! ```text
//! interpreter hot loop
//!        │ bc_offset, InterpreterState
//!        ▼
//! OsrManager::create_osr_entry ──► Arc<OsrEntry>   (deep-copied state)
//!        │
//!        ▼
//! OsrManager::perform_osr ──► OsrTransfer          (slot plan + resume offset)
//! ```
//!
//! # Frame Slots
//!
//! Captured values are materialized below the frame pointer, locals first:
//!
//! ```text
//! [rbp - 8]            local 0
//! [rbp - 8 * L]        local L-1
//! [rbp - 8 * (L + 1)]  stack 0 (bottom)
//! ...
//! ```
//!
//! Entries are immutable once created. Clearing a manager bumps its
//! generation; entries from an older generation are rejected by
//! `perform_osr`. A retired manager (its code left the cache) accepts no
//! new entries.

mod registry;

pub use registry::OsrRegistry;

use crate::codegen::CompiledCode;
use crate::error::OsrError;
use basalt_core::{InterpreterState, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Size of one frame slot in bytes.
pub const SLOT_SIZE: i64 = 8;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// OSR Entry
// =============================================================================

/// A captured transition point into compiled code.
#[derive(Debug, Clone, PartialEq)]
pub struct OsrEntry {
    bc_offset: u32,
    compiled_offset: u32,
    state: InterpreterState,
    generation: u64,
    manager: u64,
}

impl OsrEntry {
    /// Bytecode offset the interpreter was at.
    #[inline]
    pub fn bc_offset(&self) -> u32 {
        self.bc_offset
    }

    /// Offset into the compiled code to resume at.
    #[inline]
    pub fn compiled_offset(&self) -> u32 {
        self.compiled_offset
    }

    /// The captured interpreter state.
    #[inline]
    pub fn state(&self) -> &InterpreterState {
        &self.state
    }

    /// Manager generation the entry was created in.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// =============================================================================
// Transfer Plan
// =============================================================================

/// Where a captured value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    /// Local variable slot.
    Local(u32),
    /// Operand stack slot, bottom first.
    Stack(u32),
}

/// One value to store into the compiled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSlot {
    /// Origin in the interpreter frame.
    pub source: SlotSource,
    /// Displacement from `rbp` (always negative).
    pub rbp_offset: i64,
    /// The value.
    pub value: Value,
}

/// Everything needed to continue execution in compiled code.
#[derive(Debug, Clone, PartialEq)]
pub struct OsrTransfer {
    /// Bytecode offset being replaced.
    pub bc_offset: u32,
    /// Offset from the start of the code buffer to jump to.
    pub resume_offset: u32,
    /// Values to materialize, locals first then stack bottom-up.
    pub slots: Vec<FrameSlot>,
}

impl OsrTransfer {
    /// Bytes of frame the slots occupy.
    #[inline]
    pub fn frame_bytes(&self) -> u64 {
        self.slots.len() as u64 * SLOT_SIZE as u64
    }

    /// Check if the slots fit in a frame of `frame_size` bytes.
    #[inline]
    pub fn fits_in_frame(&self, frame_size: u32) -> bool {
        self.frame_bytes() <= frame_size as u64
    }

    /// Values restored into locals.
    pub fn locals(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots
            .iter()
            .filter(|s| matches!(s.source, SlotSource::Local(_)))
    }

    /// Values restored onto the operand stack.
    pub fn stack(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots
            .iter()
            .filter(|s| matches!(s.source, SlotSource::Stack(_)))
    }
}

/// Displacement of the `index`-th frame slot.
#[inline]
pub fn slot_offset(index: usize) -> i64 {
    -(SLOT_SIZE * (index as i64 + 1))
}

// =============================================================================
// OSR Manager
// =============================================================================

/// OSR entries for one compiled function.
#[derive(Debug)]
pub struct OsrManager {
    id: u64,
    code: Arc<CompiledCode>,
    entries: RwLock<FxHashMap<u32, Arc<OsrEntry>>>,
    generation: AtomicU64,
    /// Set under the `entries` write lock.
    retired: AtomicBool,
}

impl OsrManager {
    /// Create a manager for a compiled function.
    pub fn new(code: Arc<CompiledCode>) -> Self {
        OsrManager {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            code,
            entries: RwLock::new(FxHashMap::default()),
            generation: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// The compiled code entries resume into.
    #[inline]
    pub fn code(&self) -> &Arc<CompiledCode> {
        &self.code
    }

    /// Current generation.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Check if the manager was retired.
    #[inline]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Create an entry at `bc_offset`, resuming where the compiled code for
    /// that instruction begins.
    pub fn create_osr_entry(
        &self,
        bc_offset: u32,
        state: &InterpreterState,
    ) -> Result<Arc<OsrEntry>, OsrError> {
        let compiled_offset = self
            .code
            .native_offset(bc_offset)
            .ok_or(OsrError::UnmappedOffset { bc_offset })?;
        self.create_osr_entry_at(bc_offset, compiled_offset, state)
    }

    /// Create an entry at `bc_offset` with an explicit compiled offset.
    ///
    /// Replaces any existing entry for the same bytecode offset.
    pub fn create_osr_entry_at(
        &self,
        bc_offset: u32,
        compiled_offset: u32,
        state: &InterpreterState,
    ) -> Result<Arc<OsrEntry>, OsrError> {
        if !self.code.contains_offset(compiled_offset) {
            return Err(OsrError::CompiledOffsetOutOfRange {
                compiled_offset,
                code_size: self.code.size(),
            });
        }

        let mut entries = self.entries.write();
        if self.is_retired() {
            return Err(OsrError::Retired { bc_offset });
        }
        let entry = Arc::new(OsrEntry {
            bc_offset,
            compiled_offset,
            state: state.clone(),
            generation: self.generation(),
            manager: self.id,
        });
        entries.insert(bc_offset, Arc::clone(&entry));

        trace!(
            target: "basalt::jit::osr",
            bc_offset,
            compiled_offset,
            values = state.value_count(),
            "OSR entry created"
        );
        Ok(entry)
    }

    /// Entry at `bc_offset`, if one exists.
    pub fn get_entry(&self, bc_offset: u32) -> Option<Arc<OsrEntry>> {
        self.entries.read().get(&bc_offset).cloned()
    }

    /// Number of live entries.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop every entry and invalidate any still held by callers.
    pub fn clear_entries(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Clear entries and refuse new ones.
    ///
    /// Called once the compiled code is no longer installed.
    pub fn retire(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.retired.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Build the transfer plan for an entry.
    ///
    /// Reads only; the entry and the manager are unchanged.
    pub fn perform_osr(&self, entry: &OsrEntry) -> Result<OsrTransfer, OsrError> {
        if entry.manager != self.id {
            return Err(OsrError::ForeignEntry {
                bc_offset: entry.bc_offset,
            });
        }
        let current = self.generation();
        if entry.generation != current {
            return Err(OsrError::StaleEntry {
                bc_offset: entry.bc_offset,
                entry_generation: entry.generation,
                current_generation: current,
            });
        }

        let state = &entry.state;
        let locals = state
            .locals
            .iter()
            .enumerate()
            .map(|(i, v)| (SlotSource::Local(i as u32), v));
        let stack = state
            .stack
            .iter()
            .enumerate()
            .map(|(i, v)| (SlotSource::Stack(i as u32), v));

        let slots: Vec<FrameSlot> = locals
            .chain(stack)
            .enumerate()
            .map(|(slot, (source, value))| FrameSlot {
                source,
                rbp_offset: slot_offset(slot),
                value: value.clone(),
            })
            .collect();

        let transfer = OsrTransfer {
            bc_offset: entry.bc_offset,
            resume_offset: self.code.entry_point() + entry.compiled_offset,
            slots,
        };

        trace!(
            target: "basalt::jit::osr",
            bc_offset = entry.bc_offset,
            resume_offset = transfer.resume_offset,
            slots = transfer.slots.len(),
            "OSR transfer"
        );
        Ok(transfer)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::BaselineCompiler;
    use basalt_core::{Opcode, ProgramBuilder};

    fn manager() -> OsrManager {
        let program = ProgramBuilder::new()
            .load_int(1)
            .load_int(2)
            .op(Opcode::Add)
            .op(Opcode::Return)
            .build();
        let code = BaselineCompiler::new().compile_function(&program, None).unwrap();
        OsrManager::new(Arc::new(code))
    }

    fn state() -> InterpreterState {
        InterpreterState::new(
            vec![Value::Int(7), Value::List(vec![Value::Int(1)])],
            vec![Value::Str("x".into()), Value::Bool(true)],
        )
    }

    #[test]
    fn test_create_uses_offset_table() {
        let mgr = manager();
        let entry = mgr.create_osr_entry(1, &state()).unwrap();
        assert_eq!(entry.bc_offset(), 1);
        assert_eq!(entry.compiled_offset(), 18);
        assert_eq!(mgr.get_entry(1).unwrap(), entry);
        assert_eq!(mgr.entry_count(), 1);
    }

    #[test]
    fn test_state_is_deep_copied() {
        let mgr = manager();
        let mut original = state();
        let entry = mgr.create_osr_entry(0, &original).unwrap();

        original.stack.push(Value::Int(99));
        if let Value::List(items) = &mut original.stack[1] {
            items.push(Value::Int(2));
        }
        original.locals[0] = Value::None;

        assert_eq!(entry.state(), &state());
    }

    #[test]
    fn test_recreate_replaces() {
        let mgr = manager();
        mgr.create_osr_entry(2, &state()).unwrap();
        let newer = mgr
            .create_osr_entry(2, &InterpreterState::default())
            .unwrap();
        assert_eq!(mgr.entry_count(), 1);
        assert_eq!(mgr.get_entry(2).unwrap(), newer);
    }

    #[test]
    fn test_unmapped_and_out_of_range() {
        let mgr = manager();
        assert_eq!(
            mgr.create_osr_entry(40, &state()),
            Err(OsrError::UnmappedOffset { bc_offset: 40 })
        );
        assert_eq!(
            mgr.create_osr_entry_at(0, 33, &state()),
            Err(OsrError::CompiledOffsetOutOfRange {
                compiled_offset: 33,
                code_size: 33
            })
        );
        assert!(mgr.create_osr_entry_at(0, 32, &state()).is_ok());
    }

    #[test]
    fn test_perform_osr_layout() {
        let mgr = manager();
        let entry = mgr.create_osr_entry(2, &state()).unwrap();
        let transfer = mgr.perform_osr(&entry).unwrap();

        assert_eq!(transfer.resume_offset, 25);
        assert_eq!(transfer.slots.len(), 4);
        assert_eq!(transfer.slots[0].source, SlotSource::Local(0));
        assert_eq!(transfer.slots[0].rbp_offset, -8);
        assert_eq!(transfer.slots[1].rbp_offset, -16);
        assert_eq!(transfer.slots[2].source, SlotSource::Stack(0));
        assert_eq!(transfer.slots[2].value, Value::Int(7));
        assert_eq!(transfer.slots[3].rbp_offset, -32);
        assert_eq!(transfer.locals().count(), 2);
        assert_eq!(transfer.stack().count(), 2);
        assert!(transfer.fits_in_frame(64));
        assert!(!transfer.fits_in_frame(16));

        // Performing does not consume or alter the entry.
        assert_eq!(mgr.perform_osr(&entry).unwrap(), transfer);
        assert_eq!(mgr.get_entry(2).unwrap(), entry);
    }

    #[test]
    fn test_clear_invalidates_held_entries() {
        let mgr = manager();
        let entry = mgr.create_osr_entry(0, &state()).unwrap();
        mgr.clear_entries();

        assert!(mgr.get_entry(0).is_none());
        assert_eq!(mgr.generation(), 1);
        assert_eq!(
            mgr.perform_osr(&entry),
            Err(OsrError::StaleEntry {
                bc_offset: 0,
                entry_generation: 0,
                current_generation: 1
            })
        );

        let fresh = mgr.create_osr_entry(0, &state()).unwrap();
        assert!(mgr.perform_osr(&fresh).is_ok());
    }

    #[test]
    fn test_retired_manager_refuses_entries() {
        let mgr = manager();
        let held = mgr.create_osr_entry(1, &state()).unwrap();
        mgr.retire();

        assert!(mgr.is_retired());
        assert_eq!(mgr.entry_count(), 0);
        assert_eq!(
            mgr.create_osr_entry(1, &state()),
            Err(OsrError::Retired { bc_offset: 1 })
        );
        assert!(matches!(
            mgr.perform_osr(&held),
            Err(OsrError::StaleEntry { .. })
        ));
    }

    #[test]
    fn test_entry_from_other_manager_is_rejected() {
        // Same code, same generation: only ownership differs.
        let a = manager();
        let b = OsrManager::new(Arc::clone(a.code()));
        let entry = b.create_osr_entry(2, &state()).unwrap();
        assert_eq!(a.generation(), entry.generation());

        assert_eq!(
            a.perform_osr(&entry),
            Err(OsrError::ForeignEntry { bc_offset: 2 })
        );
        assert!(b.perform_osr(&entry).is_ok());
    }
}
