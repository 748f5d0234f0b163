//! Function identity.
//!
//! The JIT keys compiled code and OSR entries by [`FunctionId`]. Identities
//! are issued by a [`FunctionIdAllocator`] owned by whoever creates
//! functions (normally the interpreter's loader) and passed down explicitly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, stable identity of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    /// Create from a raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        FunctionId(raw)
    }

    /// Create from a pointer-sized handle (e.g. the address of a code object).
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        FunctionId(ptr as usize as u64)
    }

    /// Get the raw value.
    #[inline(always)]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Issues unique [`FunctionId`]s.
///
/// Thread-safe; share it behind an `Arc` when several loaders create
/// functions.
#[derive(Debug)]
pub struct FunctionIdAllocator {
    next: AtomicU64,
}

impl FunctionIdAllocator {
    /// Create an allocator whose first identity is `start`.
    pub const fn starting_at(start: u64) -> Self {
        FunctionIdAllocator {
            next: AtomicU64::new(start),
        }
    }

    /// Create an allocator starting at 1.
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Issue the next identity.
    #[inline]
    pub fn allocate(&self) -> FunctionId {
        FunctionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The identity the next call to `allocate` will return.
    pub fn peek_next(&self) -> FunctionId {
        FunctionId(self.next.load(Ordering::Relaxed))
    }
}

impl Default for FunctionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequential_ids() {
        let alloc = FunctionIdAllocator::new();
        assert_eq!(alloc.allocate(), FunctionId::new(1));
        assert_eq!(alloc.allocate(), FunctionId::new(2));
        assert_eq!(alloc.peek_next(), FunctionId::new(3));
    }

    #[test]
    fn test_independent_allocators() {
        let a = FunctionIdAllocator::starting_at(100);
        let b = FunctionIdAllocator::starting_at(100);
        assert_eq!(a.allocate(), b.allocate());
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let alloc = Arc::new(FunctionIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || (0..250).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<FunctionId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display() {
        assert_eq!(FunctionId::new(42).to_string(), "fn#42");
    }
}
