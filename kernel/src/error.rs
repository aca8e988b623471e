//! The error taxonomy this crate surfaces to callers.
//!
//! Programming errors (misuse by a caller) and buffer-cache exhaustion are
//! fatal by design and surface as `panic!`/`assert!`, not as `Result` —
//! laundering a caller bug through a `Result` would let a kernel caller
//! `match` its way past a broken invariant. The one operation that can fail
//! as a matter of course is [`crate::kalloc::alloc`] running out of
//! physical pages, so that is the only place this crate defines an error
//! type, using `thiserror` to derive its `Display` impl.
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("page allocator: no free frames on any CPU")]
    OutOfMemory,
}
