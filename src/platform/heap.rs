//! Heap accounting for the constrained platform
//!
//! The binary installs a [`Cap`] as its global allocator and hands a `&'static` reference to
//! the constrained transport. Free memory is only known once a heap limit has been configured;
//! without one the report falls back to the "Unknown" sentinel.

use std::alloc::GlobalAlloc;

use cap::Cap;

/// Source of heap counters.
pub trait HeapCounters {
    /// Bytes still available, `None` if the platform cannot tell.
    fn mem_free(&self) -> Option<u64>;
    /// Bytes currently handed out.
    fn mem_alloc(&self) -> u64;
}

impl<A: GlobalAlloc> HeapCounters for Cap<A> {
    fn mem_free(&self) -> Option<u64> {
        match self.limit() {
            usize::MAX => None,
            _ => Some(self.remaining() as u64),
        }
    }

    fn mem_alloc(&self) -> u64 {
        self.allocated() as u64
    }
}

impl<H: HeapCounters + ?Sized> HeapCounters for &H {
    fn mem_free(&self) -> Option<u64> {
        (**self).mem_free()
    }

    fn mem_alloc(&self) -> u64 {
        (**self).mem_alloc()
    }
}
