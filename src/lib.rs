//! First-fit heap allocator for freestanding runtimes.
//!
//! Manages one caller-supplied contiguous arena with intrusive block
//! headers: first-fit search, block splitting, bidirectional coalescing
//! of immediate neighbors, and magic-based corruption and double-free
//! detection. The [`Heap`] context object is the whole API; wrap it in
//! [`LockedHeap`] to back Rust's global allocator.
//!
//! The crate is `no_std`; tests run hosted. The arena region and its
//! bounds come from whatever memory map the boot layer provides, and
//! damage reports go to a pluggable [`DiagnosticSink`] (by default the
//! `log` facade under the `heap` target).

#![cfg_attr(not(test), no_std)]

pub mod allocator;
pub mod diag;
pub mod error;
pub mod memory;

pub use allocator::LockedHeap;
pub use diag::{DiagnosticSink, LogSink, Severity};
pub use error::HeapError;
pub use memory::{Heap, HeapStats, ALIGNMENT, HEADER_SIZE};
