//! Per-CPU work-stealing physical page allocator.
//!
//! Each logical CPU keeps its own freelist of pages, linked intrusively
//! through the first bytes of each free frame (no separate metadata table).
//! `alloc` only ever takes the lock on a second CPU's list when its own is
//! empty, and steals exactly one frame before giving up — it never drains
//! another CPU's entire list in one call: one `struct run`-style freelist
//! per CPU, each guarded by its own spinlock, with `alloc` falling through
//! to the other CPUs' lists on a local miss.
use std::ptr;
use std::sync::OnceLock;

use array_macro::array;
use corelib::Spinlock;

use crate::cpu::with_preemption_disabled;
use crate::error::AllocError;
use crate::page::Page;
use crate::param::{NCPU, PGSIZE};

/// Byte pattern written into a page when it is freed, so a dangling read of
/// a freed frame doesn't quietly look like valid data.
const FREE_JUNK: u8 = 0x01;
/// Byte pattern written into a page handed out by `alloc`, so uninitialized
/// reads of a freshly allocated frame are obviously garbage rather than
/// leftover zero bytes.
const ALLOC_JUNK: u8 = 0x05;

struct Run {
    next: *mut Run,
}

/// One CPU's freelist, plus a running count so `free_memory` doesn't have to
/// walk the list under lock.
struct Kmem {
    head: *mut Run,
    count: usize,
}

// SAFETY: a `Kmem` is only ever reached through a `Spinlock`, and the frames
// on its list are plain memory, not thread-confined data.
unsafe impl Send for Kmem {}

impl Kmem {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            count: 0,
        }
    }

    fn push(&mut self, frame: *mut u8) {
        let run = frame.cast::<Run>();
        // SAFETY: `frame` is page-aligned and at least `size_of::<Run>()`
        // bytes, since `PGSIZE` is far larger than one pointer.
        unsafe {
            (*run).next = self.head;
        }
        self.head = run;
        self.count += 1;
    }

    fn pop(&mut self) -> Option<*mut u8> {
        if self.head.is_null() {
            return None;
        }
        let run = self.head;
        // SAFETY: `run` was linked in by a previous `push` of a live frame.
        self.head = unsafe { (*run).next };
        self.count -= 1;
        Some(run.cast::<u8>())
    }
}

pub struct PageAllocator {
    free: [Spinlock<Kmem>; NCPU],
}

impl PageAllocator {
    fn empty() -> Self {
        Self {
            free: array![_ => Spinlock::new("kmem", Kmem::new()); NCPU],
        }
    }

    /// Pops a frame from CPU `home`'s own list, falling back to stealing
    /// exactly one frame from another CPU's list on a local miss.
    fn alloc_on(&self, home: usize) -> Option<*mut u8> {
        if let Some(frame) = self.free[home].lock().pop() {
            return Some(frame);
        }
        (0..NCPU)
            .filter(|&donor| donor != home)
            .find_map(|donor| self.free[donor].lock().pop())
    }

    fn free_on(&self, home: usize, frame: *mut u8) {
        self.free[home].lock().push(frame);
    }

    /// Builds an independent, non-singleton allocator with every list empty,
    /// for tests that need deterministic control over which logical CPU a
    /// frame starts out on instead of going through `cpuid()`'s round-robin
    /// thread assignment.
    #[cfg(test)]
    fn new_isolated() -> Self {
        Self::empty()
    }
}

static ALLOCATOR: OnceLock<PageAllocator> = OnceLock::new();

fn allocator() -> &'static PageAllocator {
    ALLOCATOR.get().expect("kalloc::init was never called")
}

/// Seeds the allocator from a caller-owned, page-aligned-or-better memory
/// range, and returns the number of pages carved out of it.
///
/// Every frame in `arena` is freed through the ordinary `free` path while
/// running on the calling thread's logical CPU — mirroring `kinit`, which
/// calls `kfree` on every page in `[end, PHYSTOP)` while running on the boot
/// hart, so the whole range initially lands on one CPU's list and the rest
/// only acquire frames by stealing.
///
/// # Panics
/// Panics if called more than once, or if `arena` is smaller than one page.
pub fn init(arena: &'static mut [u8]) -> usize {
    ALLOCATOR
        .set(PageAllocator::empty())
        .unwrap_or_else(|_| panic!("kalloc::init called more than once"));

    let base = arena.as_mut_ptr();
    let aligned = base.align_offset(PGSIZE);
    assert!(
        aligned != usize::MAX && aligned + PGSIZE <= arena.len(),
        "kalloc::init: arena too small to hold even one page-aligned frame"
    );

    let last_start = arena.len() - PGSIZE;
    let mut pages = 0usize;
    for offset in num_iter::range_step(aligned, last_start + 1, PGSIZE) {
        // SAFETY: `offset..offset + PGSIZE` lies within `arena`, is
        // page-aligned, and no other frame overlaps it.
        let frame = unsafe { base.add(offset) };
        free(unsafe { Page::from_raw(frame) });
        pages += 1;
    }
    pages
}

/// Allocates one page-aligned, junk-filled frame, or [`AllocError::OutOfMemory`]
/// if every CPU's freelist is empty.
pub fn alloc() -> Result<Page, AllocError> {
    let frame = with_preemption_disabled(|home| allocator().alloc_on(home));

    let frame = frame.ok_or(AllocError::OutOfMemory)?;
    // SAFETY: just unlinked from a freelist that only ever holds whole,
    // unshared frames.
    unsafe { ptr::write_bytes(frame, ALLOC_JUNK, PGSIZE) };
    Ok(unsafe { Page::from_raw(frame) })
}

/// Returns `page` to the calling thread's current logical CPU's freelist —
/// not necessarily the CPU it was allocated from. Biasing reuse toward the
/// freeing CPU trades perfect cache affinity for simplicity, the same
/// trade-off the per-CPU design as a whole makes.
pub fn free(page: Page) {
    let frame = page.into_raw();
    // SAFETY: `frame` is a whole frame about to be handed back to the
    // allocator; the caller gave up any reference to it by consuming `page`.
    unsafe { ptr::write_bytes(frame, FREE_JUNK, PGSIZE) };
    with_preemption_disabled(|home| {
        allocator().free_on(home, frame);
    });
}

/// Total free bytes across every CPU's list. Purely diagnostic: concurrent
/// `alloc`/`free` calls may race with the read of any individual bucket, so
/// the result is a snapshot with no cross-bucket atomicity guarantee.
pub fn free_memory() -> usize {
    allocator()
        .free
        .iter()
        .map(|list| list.lock().count * PGSIZE)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn fresh_arena(pages: usize) -> &'static mut [u8] {
        let bytes = Box::leak(vec![0u8; pages * PGSIZE + PGSIZE].into_boxed_slice());
        bytes
    }

    /// Page-aligned frame pointers carved out of `arena`, for tests that
    /// need to seed a specific CPU's list directly instead of going through
    /// `init`/`cpuid()`.
    fn aligned_frames(arena: &'static mut [u8], count: usize) -> Vec<*mut u8> {
        let base = arena.as_mut_ptr();
        let aligned = base.align_offset(PGSIZE);
        assert!(aligned != usize::MAX && aligned + count * PGSIZE <= arena.len());
        (0..count)
            // SAFETY: each offset lands in a disjoint, page-aligned
            // `PGSIZE` window inside `arena`.
            .map(|i| unsafe { base.add(aligned + i * PGSIZE) })
            .collect()
    }

    // `ALLOCATOR` is a process-wide `OnceLock`, so these tests serialize and
    // each gets its own freshly re-initialized allocator by relying on the
    // fact that `init` panics if called twice — instead we expose no reset,
    // so each test process run exercises `init` exactly once across the
    // whole binary. These three tests therefore share one allocator seeded
    // with a generous page count, and only make relative assertions.
    fn ensure_init() -> usize {
        static PAGES: OnceLock<usize> = OnceLock::new();
        *PAGES.get_or_init(|| {
            let arena = fresh_arena(4096);
            init(arena)
        })
    }

    #[test]
    fn alloc_then_free_does_not_lose_pages() {
        let _guard = TEST_LOCK.lock().unwrap();
        ensure_init();
        let before = free_memory();
        let page = alloc().expect("arena should have room");
        assert_eq!(free_memory(), before - PGSIZE);
        free(page);
        assert_eq!(free_memory(), before);
    }

    #[test]
    fn allocated_page_is_junk_filled() {
        let _guard = TEST_LOCK.lock().unwrap();
        ensure_init();
        let mut page = alloc().expect("arena should have room");
        assert!(page.as_mut_slice().iter().all(|&b| b == ALLOC_JUNK));
        free(page);
    }

    #[test]
    fn concurrent_alloc_and_free_preserve_total() {
        let _guard = TEST_LOCK.lock().unwrap();
        ensure_init();
        let before = free_memory();
        let start = Arc::new(Barrier::new(8));
        let churned = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let start = Arc::clone(&start);
                let churned = Arc::clone(&churned);
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..50 {
                        let page = alloc().expect("arena should have room");
                        free(page);
                        churned.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(churned.load(Ordering::Relaxed), 400);
        assert_eq!(free_memory(), before);
    }

    /// Property 10 / scenario S4: with every frame freed on CPU 0 and CPU
    /// 1's own list empty, `alloc_on(1)` must still succeed by stealing from
    /// CPU 0 — and must steal exactly one frame, leaving the rest behind.
    #[test]
    fn cpu_with_empty_list_steals_one_frame_from_another_cpu() {
        let allocator = PageAllocator::new_isolated();
        let arena = fresh_arena(4);
        let frames = aligned_frames(arena, 4);
        for &frame in &frames {
            allocator.free_on(0, frame);
        }

        let stolen = allocator.alloc_on(1).expect("CPU 1 should steal a frame from CPU 0's list");
        assert!(frames.contains(&stolen), "stolen frame must come from CPU 0's seeded frames");
        assert_eq!(allocator.free[0].lock().count, 3, "exactly one frame should have left CPU 0's list");
        assert_eq!(allocator.free[1].lock().count, 0, "the stolen frame must not land on CPU 1's own list");

        // CPU 1 has nowhere of its own to put it back, so return it to CPU 0
        // (mirroring `free`'s "push to the current CPU" policy) and confirm
        // CPU 0 can still drain every frame it started with.
        allocator.free_on(1, stolen);
        for _ in 0..4 {
            assert!(allocator.alloc_on(0).is_some());
        }
        assert!(allocator.alloc_on(0).is_none(), "both lists should now be empty");
    }
}
