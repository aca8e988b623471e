//! A handle to one physical page frame.
use crate::param::PGSIZE;

/// A page-aligned, `PGSIZE`-byte frame handed out by [`crate::kalloc`].
///
/// Carries no `Drop` impl: a `Page` obtained from `alloc` must be explicitly
/// returned via `free`. Dropping one without freeing it leaks the frame
/// instead of silently corrupting the allocator.
pub struct Page {
    ptr: *mut u8,
}

// SAFETY: a `Page` is an owning handle to a disjoint memory range; the
// allocator never hands the same frame to two callers concurrently.
unsafe impl Send for Page {}

impl Page {
    /// # Safety
    /// `ptr` must be page-aligned, point to a `PGSIZE`-byte range that nothing
    /// else currently owns, and must have come from the allocator's arena.
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        debug_assert_eq!(ptr as usize % PGSIZE, 0, "Page::from_raw: misaligned frame");
        Self { ptr }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `self.ptr` owns an exclusive `PGSIZE`-byte range by the
        // invariant of `from_raw`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, PGSIZE) }
    }

    /// Consumes the handle and returns the raw frame pointer. The caller
    /// takes over ownership and must eventually pass it back to `free`.
    pub fn into_raw(self) -> *mut u8 {
        self.ptr
    }
}
