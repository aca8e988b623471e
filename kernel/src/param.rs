//! Compile-time sizing constants.
//!
//! This crate only carries the constants the page allocator, buffer cache,
//! and log actually read; sizes for a process table, open-file table, or
//! path lengths live outside this crate's scope.

/// Maximum number of CPUs; bounds the page allocator's per-CPU freelist
/// array and the set of logical CPU slots a thread can register for.
pub const NCPU: usize = 8;

/// Block size in bytes.
pub const BSIZE: usize = 1024;

/// Page frame size in bytes.
pub const PGSIZE: usize = 4096;

/// Max # of blocks any single FS transaction writes.
pub const MAXOPBLOCKS: usize = 10;

/// Max data blocks in the on-disk log.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// Number of buffers in the cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets in the buffer cache. Kept prime so `blockno %
/// NBUCKET` spreads sequential block numbers evenly across buckets.
pub const NBUCKET: usize = 13;
