//! Per-function OSR manager lookup.

use super::OsrManager;
use crate::codegen::CompiledCode;
use basalt_core::FunctionId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Maps each function to the OSR manager for its current compiled code.
#[derive(Debug, Default)]
pub struct OsrRegistry {
    managers: RwLock<FxHashMap<FunctionId, Arc<OsrManager>>>,
}

impl OsrRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager for `id` running `code`.
    ///
    /// A new manager is registered only if `is_current` still holds under
    /// the write lock, so an invalidation that races with registration
    /// either runs first (nothing is registered) or retires the new
    /// manager after it. A manager for different code (the function was
    /// recompiled) is retired and replaced.
    pub fn manager_for(
        &self,
        id: FunctionId,
        code: &Arc<CompiledCode>,
        is_current: impl FnOnce() -> bool,
    ) -> Option<Arc<OsrManager>> {
        if let Some(mgr) = self.managers.read().get(&id) {
            if Arc::ptr_eq(mgr.code(), code) {
                return Some(Arc::clone(mgr));
            }
        }

        let mut managers = self.managers.write();
        // Re-check: another thread may have installed it meanwhile.
        if let Some(mgr) = managers.get(&id) {
            if Arc::ptr_eq(mgr.code(), code) {
                return Some(Arc::clone(mgr));
            }
        }
        if !is_current() {
            return None;
        }
        let mgr = Arc::new(OsrManager::new(Arc::clone(code)));
        if let Some(old) = managers.insert(id, Arc::clone(&mgr)) {
            old.retire();
        }
        Some(mgr)
    }

    /// Registered manager for `id`, if any.
    pub fn get(&self, id: FunctionId) -> Option<Arc<OsrManager>> {
        self.managers.read().get(&id).cloned()
    }

    /// Drop and retire the manager for `id`.
    ///
    /// Returns `true` if a manager was registered.
    pub fn invalidate(&self, id: FunctionId) -> bool {
        match self.managers.write().remove(&id) {
            Some(mgr) => {
                mgr.retire();
                true
            }
            None => false,
        }
    }

    /// Invalidate every manager.
    pub fn clear(&self) {
        let mut managers = self.managers.write();
        for mgr in managers.values() {
            mgr.retire();
        }
        managers.clear();
    }

    /// Number of registered managers.
    pub fn len(&self) -> usize {
        self.managers.read().len()
    }

    /// Check if no managers are registered.
    pub fn is_empty(&self) -> bool {
        self.managers.read().is_empty()
    }
}
