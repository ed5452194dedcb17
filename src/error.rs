//! Heap error taxonomy.
//!
//! Every fallible heap operation returns one of these variants to its
//! immediate caller. None of them aborts the process; `CorruptedBlock`
//! is the only variant after which the affected block's neighborhood
//! can no longer be trusted.

use thiserror::Error;

/// Errors reported by the heap manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The arena region or the request itself is unusable: region
    /// smaller than one header, misaligned base, oversized region, or
    /// a zero-byte allocation request.
    #[error("invalid heap configuration or request")]
    InvalidConfiguration,

    /// The heap has not been initialized via `init()`.
    #[error("heap is not initialized")]
    NotInitialized,

    /// No free block is large enough for the request.
    #[error("out of heap memory")]
    OutOfMemory,

    /// A size computation overflowed `usize`.
    #[error("allocation size overflow")]
    Overflow,

    /// The pointer does not belong to the heap region.
    #[error("pointer outside the heap region")]
    InvalidPointer,

    /// The block header magic does not match; the header (and possibly
    /// its neighbors) has been overwritten.
    #[error("corrupted block header")]
    CorruptedBlock,

    /// The block is already free.
    #[error("block freed twice")]
    DoubleFree,
}
