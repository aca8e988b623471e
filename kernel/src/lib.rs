//! Storage-correctness core of a small teaching kernel: a per-CPU
//! work-stealing page allocator, a sharded work-stealing LRU block buffer
//! cache, and a group-commit write-ahead log layered over it.
//!
//! The three subsystems are independent leaves up through `bio`, which
//! depends on `kalloc` for nothing at all (it owns its buffers statically)
//! and `log`, which depends on `bio` for every block it touches. A caller
//! wires them together by calling [`boot`] once, then driving file-system
//! mutations through `begin_op`/`log_write`/`end_op` instead of `bio`'s
//! `write` directly.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bio;
pub mod buf;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod kalloc;
pub mod log;
pub mod page;
pub mod param;

pub use bio::{Bcache, Buf};
pub use disk::{BlockDevice, MemDisk};
pub use error::AllocError;
pub use log::Log;
pub use page::Page;

/// Everything [`boot`] wires up: the buffer cache and the log built on top
/// of it. The page allocator is independent of both and is reached through
/// [`kalloc`] directly once [`boot`] has seeded its arena.
pub struct System {
    pub bc: &'static Bcache,
    pub log: &'static Log,
}

/// Brings up the page allocator, buffer cache, and log against `disk`, and
/// runs log recovery before returning. Mirrors the boot-time call order a
/// real kernel follows: `kinit` (page allocator), `binit` (buffer cache),
/// then `initlog` (log, which recovers before any caller can begin a
/// transaction).
///
/// `page_arena` seeds [`kalloc`]; `log_start`/`log_size` are the superblock
/// fields the log would otherwise read.
///
/// # Panics
/// Panics if called more than once (each of its three steps is itself
/// idempotency-checked and panics on a second call).
pub fn boot(page_arena: &'static mut [u8], disk: &'static dyn BlockDevice, dev: u32, log_start: u32, log_size: u32) -> System {
    kalloc::init(page_arena);
    let bc = bio::init(disk);
    let log = log::init(bc, dev, log_start, log_size);
    System { bc, log }
}
