//! The two scheduler-provided facts the core needs: "which CPU am I", and
//! "what time is it".
//!
//! A bare-metal kernel reads a per-hart thread pointer for `cpuid()` and
//! increments a global `ticks` counter from the timer interrupt handler.
//! Neither a hart nor a timer interrupt exists in a hosted process, so each
//! OS thread registers for a logical CPU slot the first time it calls
//! [`cpuid`], round-robined across [`NCPU`](crate::param::NCPU), and
//! [`ticks`] is a free-running atomic counter advanced explicitly by
//! buffer-cache releases instead of a timer.
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use corelib::push_off;

use crate::param::NCPU;

thread_local! {
    static CPU_SLOT: Cell<Option<usize>> = Cell::new(None);
}

static NEXT_CPU_SLOT: AtomicUsize = AtomicUsize::new(0);

/// Returns the logical CPU index of the calling thread.
///
/// Valid only with preemption disabled: callers are expected to have
/// already called [`push_off`](corelib::push_off), since migrating to a
/// different logical CPU mid-use would invalidate any per-CPU state derived
/// from the id.
pub fn cpuid() -> usize {
    CPU_SLOT.with(|slot| {
        if let Some(id) = slot.get() {
            return id;
        }
        let id = NEXT_CPU_SLOT.fetch_add(1, Ordering::Relaxed) % NCPU;
        slot.set(Some(id));
        id
    })
}

/// Runs `f` with preemption disabled, passing it the calling thread's
/// logical CPU id, then re-enables preemption before returning `f`'s result.
pub fn with_preemption_disabled<R>(f: impl FnOnce(usize) -> R) -> R {
    push_off();
    let id = cpuid();
    let result = f(id);
    corelib::pop_off();
    result
}

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Monotonically nondecreasing tick counter used to stamp buffer release
/// times for LRU tie-breaking.
pub fn ticks() -> u64 {
    TICKS.fetch_add(1, Ordering::Relaxed)
}
