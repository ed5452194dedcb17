//! Heap manager.
//!
//! Design summary:
//! - One contiguous arena claimed once via [`Heap::init`], seeded with a
//!   single free block spanning the region.
//! - Intrusive block headers in a doubly linked, address-ordered chain
//!   (see `block.rs`).
//! - First-fit allocation with block splitting; frees coalesce with the
//!   immediate neighbor on each side.
//! - A magic sentinel per header detects corruption and double frees.
//!
//! Notes:
//! - Block `size` counts payload bytes; statistics count header +
//!   payload so `total_allocated + total_free == total_heap` always
//!   holds.
//! - Payload pointer is always `header + HEADER_SIZE`.
//! - Single execution context only: no internal locking, not reentrant.
//!   Wrap in [`crate::allocator::LockedHeap`] when a shared instance is
//!   needed.

use core::mem::align_of;
use core::ptr::NonNull;

use crate::diag::{DiagnosticSink, LogSink, Severity};
use crate::error::HeapError;
use crate::memory::block::{BlockDirectory, BlockRef, HEADER_SIZE};

/// Payload alignment: every returned pointer is aligned to the
/// platform's natural word boundary and request sizes are rounded up
/// to a multiple of it.
pub const ALIGNMENT: usize = align_of::<usize>();

/// Minimum usable tail size that is still worth splitting off; a
/// smaller remainder is handed to the caller as slack instead of
/// becoming an unusable sliver.
const MIN_SPLIT_SIZE: usize = 16;

/// Point-in-time heap counters. Internally consistent: allocated and
/// free bytes (headers included) always sum to `total_heap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Size of the managed arena in bytes.
    pub total_heap: usize,
    /// Bytes bound in allocated blocks, headers included.
    pub total_allocated: usize,
    /// Bytes bound in free blocks, headers included.
    pub total_free: usize,
    /// Number of currently allocated blocks.
    pub allocation_count: usize,
}

impl HeapStats {
    /// Allocated share of the arena in whole percent.
    pub fn usage_percent(&self) -> usize {
        if self.total_heap == 0 {
            0
        } else {
            self.total_allocated * 100 / self.total_heap
        }
    }
}

/// Bounds of the claimed arena.
#[derive(Clone, Copy)]
struct Arena {
    base: usize,
    size: usize,
}

/// A first-fit heap over one caller-supplied memory region.
///
/// The heap is an explicit context object: independent instances manage
/// independent arenas, there is no hidden global. It is not safe for
/// concurrent or reentrant use; callers serialize access (see
/// [`crate::allocator::LockedHeap`] for a locked wrapper).
pub struct Heap<S: DiagnosticSink = LogSink> {
    arena: Option<Arena>,
    total_allocated: usize,
    total_free: usize,
    allocation_count: usize,
    sink: S,
}

impl Heap<LogSink> {
    /// Creates an uninitialized heap reporting through the `log` facade.
    pub const fn new() -> Self {
        Self::with_sink(LogSink)
    }
}

impl Default for Heap<LogSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DiagnosticSink> Heap<S> {
    /// Creates an uninitialized heap reporting through `sink`.
    pub const fn with_sink(sink: S) -> Self {
        Self {
            arena: None,
            total_allocated: 0,
            total_free: 0,
            allocation_count: 0,
            sink,
        }
    }

    /// Claims `size` bytes at `base` and seeds them with a single free
    /// block. Idempotent: a second call on an initialized heap is a
    /// no-op.
    ///
    /// Fails with [`HeapError::InvalidConfiguration`] if the region
    /// cannot hold one header, `base` is not word-aligned, or `size`
    /// does not fit the offset encoding (`u32`).
    ///
    /// The region must be writable and unused for anything else for the
    /// lifetime of the heap; it originates from whatever memory map the
    /// boot layer provides.
    pub fn init(&mut self, base: usize, size: usize) -> Result<(), HeapError> {
        if self.arena.is_some() {
            return Ok(());
        }
        if size < HEADER_SIZE || size >= u32::MAX as usize {
            return Err(HeapError::InvalidConfiguration);
        }
        if base == 0 || base % ALIGNMENT != 0 {
            return Err(HeapError::InvalidConfiguration);
        }

        let mut dir = BlockDirectory::new(base, size);
        dir.init_arena();

        self.arena = Some(Arena { base, size });
        self.total_allocated = 0;
        self.total_free = size;
        self.allocation_count = 0;

        log::debug!(target: "heap", "init base={:#x} size={}", base, size);
        Ok(())
    }

    /// Returns whether `init` has completed.
    pub fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    /// Current counters. Reports zeros before `init`.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total_heap: self.arena.map_or(0, |a| a.size),
            total_allocated: self.total_allocated,
            total_free: self.total_free,
            allocation_count: self.allocation_count,
        }
    }

    fn directory(&self) -> Result<BlockDirectory, HeapError> {
        let arena = self.arena.ok_or(HeapError::NotInitialized)?;
        Ok(BlockDirectory::new(arena.base, arena.size))
    }

    /// Allocates `size` bytes and returns the payload pointer.
    ///
    /// The size is rounded up to a multiple of [`ALIGNMENT`]; zero-byte
    /// requests are rejected with [`HeapError::InvalidConfiguration`].
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let mut dir = self.directory()?;
        if size == 0 {
            return Err(HeapError::InvalidConfiguration);
        }
        let rounded = align_up(size).ok_or(HeapError::Overflow)?;

        let Some(block) = self.find_first_fit(&dir, rounded) else {
            self.sink.report(
                Severity::Warning,
                format_args!("out of memory: no free block for {} bytes", rounded),
            );
            return Err(HeapError::OutOfMemory);
        };

        // Split off the tail unless the leftover would be an unusable
        // sliver; in that case the whole block, slack included, goes to
        // the caller.
        let excess = dir.block_size(block) - rounded;
        if excess > HEADER_SIZE + MIN_SPLIT_SIZE {
            dir.split(block, rounded);
        }
        dir.set_free(block, false);

        let granted = HEADER_SIZE + dir.block_size(block);
        self.total_allocated += granted;
        self.total_free -= granted;
        self.allocation_count += 1;

        let ptr = dir.payload_ptr(block);
        log::trace!(
            target: "heap",
            "alloc ptr={:#x} requested={} block={}",
            ptr.as_ptr() as usize,
            size,
            dir.block_size(block)
        );
        Ok(ptr)
    }

    /// Allocates a zero-filled region for `count` elements of
    /// `element_size` bytes each.
    pub fn calloc(&mut self, count: usize, element_size: usize) -> Result<NonNull<u8>, HeapError> {
        let total = count
            .checked_mul(element_size)
            .ok_or(HeapError::Overflow)?;
        let ptr = self.allocate(total)?;

        let mut dir = self.directory()?;
        // The block cannot fail to resolve: `ptr` was just handed out.
        if let Some(block) = dir.block_from_payload(ptr.as_ptr() as usize) {
            let len = dir.block_size(block);
            dir.zero_payload(block, len);
        }
        Ok(ptr)
    }

    /// Releases a previously allocated pointer. A null pointer is a
    /// no-op.
    ///
    /// Rejections leave the heap untouched and are reported through the
    /// diagnostic sink: [`HeapError::InvalidPointer`] for addresses
    /// outside the arena, [`HeapError::CorruptedBlock`] for a damaged
    /// header (after which the block's neighbors can no longer be
    /// trusted), [`HeapError::DoubleFree`] for a block already free.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), HeapError> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut dir = self.directory()?;
        let block = self.resolve_payload(&dir, ptr as usize)?;

        let released = HEADER_SIZE + dir.block_size(block);
        dir.set_free(block, true);
        self.total_allocated -= released;
        self.total_free += released;
        self.allocation_count -= 1;

        // At most one merge per side: the no-adjacent-free invariant
        // guarantees no longer runs of free blocks can exist.
        if let Some(next) = dir.next_of(block) {
            if dir.is_free(next) {
                dir.merge_with_next(block);
            }
        }
        if let Some(prev) = dir.prev_of(block) {
            if dir.is_free(prev) {
                dir.merge_with_next(prev);
            }
        }

        log::trace!(target: "heap", "free ptr={:#x} block={}", ptr as usize, released - HEADER_SIZE);
        Ok(())
    }

    /// Resizes an allocation.
    ///
    /// - Null `ptr` behaves as [`Heap::allocate`].
    /// - `new_size == 0` behaves as [`Heap::free`] and returns `None`.
    /// - A shrink is served in place: the same pointer comes back, and
    ///   the shed tail becomes a free block when large enough to hold
    ///   one.
    /// - A grow moves the data to a fresh block and frees the old one.
    ///   On [`HeapError::OutOfMemory`] the original block is left
    ///   intact.
    pub fn reallocate(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        if ptr.is_null() {
            return self.allocate(new_size).map(Some);
        }
        if new_size == 0 {
            self.free(ptr)?;
            return Ok(None);
        }

        let mut dir = self.directory()?;
        let block = self.resolve_payload(&dir, ptr as usize)?;
        let old_size = dir.block_size(block);
        let rounded = align_up(new_size).ok_or(HeapError::Overflow)?;

        if rounded <= old_size {
            let excess = old_size - rounded;
            if excess > HEADER_SIZE + MIN_SPLIT_SIZE {
                let tail = dir.split(block, rounded);
                self.total_allocated -= excess;
                self.total_free += excess;
                // The block after the shrunk one may already be free.
                if let Some(after) = dir.next_of(tail) {
                    if dir.is_free(after) {
                        dir.merge_with_next(tail);
                    }
                }
            }
            log::trace!(
                target: "heap",
                "realloc in place ptr={:#x} old={} new={}",
                ptr as usize,
                old_size,
                dir.block_size(block)
            );
            return Ok(Some(dir.payload_ptr(block)));
        }

        let new_ptr = self.allocate(new_size)?;
        let mut dir = self.directory()?;
        if let Some(new_block) = dir.block_from_payload(new_ptr.as_ptr() as usize) {
            dir.copy_payload(block, new_block, old_size);
        }
        self.free(ptr)?;
        log::trace!(
            target: "heap",
            "realloc moved ptr={:#x} -> {:#x} old={} new={}",
            ptr as usize,
            new_ptr.as_ptr() as usize,
            old_size,
            rounded
        );
        Ok(Some(new_ptr))
    }

    /// Walks the whole chain and verifies its structural invariants:
    /// chain blocks tile the arena exactly, every magic is intact, no
    /// two neighbors are both free, and the counters match the chain.
    ///
    /// Returns [`HeapError::CorruptedBlock`] on the first violation.
    pub fn check_consistency(&self) -> Result<(), HeapError> {
        let arena = self.arena.ok_or(HeapError::NotInitialized)?;
        let dir = BlockDirectory::new(arena.base, arena.size);

        let mut covered = 0usize;
        let mut allocated = 0usize;
        let mut free = 0usize;
        let mut in_use_count = 0usize;
        let mut prev: Option<BlockRef> = None;
        let mut prev_free = false;
        let mut cursor = Some(dir.first());

        while let Some(block) = cursor {
            if !dir.magic_ok(block) {
                return Err(HeapError::CorruptedBlock);
            }
            if block.offset() != covered {
                return Err(HeapError::CorruptedBlock);
            }
            if dir.prev_of(block) != prev {
                return Err(HeapError::CorruptedBlock);
            }

            let span = HEADER_SIZE + dir.block_size(block);
            covered += span;
            if covered > arena.size {
                return Err(HeapError::CorruptedBlock);
            }

            if dir.is_free(block) {
                if prev_free {
                    return Err(HeapError::CorruptedBlock);
                }
                free += span;
                prev_free = true;
            } else {
                allocated += span;
                in_use_count += 1;
                prev_free = false;
            }

            prev = Some(block);
            cursor = dir.next_of(block);
        }

        let consistent = covered == arena.size
            && allocated == self.total_allocated
            && free == self.total_free
            && in_use_count == self.allocation_count;
        if consistent {
            Ok(())
        } else {
            Err(HeapError::CorruptedBlock)
        }
    }

    /// First-fit scan in address order.
    fn find_first_fit(&self, dir: &BlockDirectory, size: usize) -> Option<BlockRef> {
        let mut cursor = Some(dir.first());
        while let Some(block) = cursor {
            if dir.is_free(block) && dir.block_size(block) >= size {
                return Some(block);
            }
            cursor = dir.next_of(block);
        }
        None
    }

    /// Validates a payload address and returns its allocated block.
    fn resolve_payload(
        &mut self,
        dir: &BlockDirectory,
        addr: usize,
    ) -> Result<BlockRef, HeapError> {
        let Some(block) = dir.block_from_payload(addr) else {
            self.sink.report(
                Severity::Warning,
                format_args!("invalid pointer {:#x}: outside the heap region", addr),
            );
            return Err(HeapError::InvalidPointer);
        };
        if !dir.magic_ok(block) {
            self.sink.report(
                Severity::Error,
                format_args!("corrupted block header at {:#x}", addr - HEADER_SIZE),
            );
            return Err(HeapError::CorruptedBlock);
        }
        if dir.is_free(block) {
            self.sink.report(
                Severity::Warning,
                format_args!("double free of {:#x}", addr),
            );
            return Err(HeapError::DoubleFree);
        }
        Ok(block)
    }
}

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
#[inline]
fn align_up(size: usize) -> Option<usize> {
    let mask = ALIGNMENT - 1;
    size.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt;

    /// Sink that records every report so tests can assert on them.
    #[derive(Default)]
    struct RecordingSink {
        reports: Vec<(Severity, String)>,
    }

    impl DiagnosticSink for RecordingSink {
        fn report(&mut self, severity: Severity, message: fmt::Arguments<'_>) {
            self.reports.push((severity, message.to_string()));
        }
    }

    /// Backing store for a test arena; kept alive alongside the heap.
    fn arena_buffer(size: usize) -> (Box<[u64]>, usize) {
        let mut buf = vec![0u64; size / 8].into_boxed_slice();
        let base = buf.as_mut_ptr() as usize;
        (buf, base)
    }

    fn heap_of(size: usize) -> (Box<[u64]>, Heap) {
        let (buf, base) = arena_buffer(size);
        let mut heap = Heap::new();
        heap.init(base, size).unwrap();
        (buf, heap)
    }

    #[test]
    fn init_rejects_undersized_region() {
        let (_buf, base) = arena_buffer(64);
        let mut heap = Heap::new();
        assert_eq!(
            heap.init(base, HEADER_SIZE - 1),
            Err(HeapError::InvalidConfiguration)
        );
        assert!(!heap.is_initialized());
    }

    #[test]
    fn init_rejects_misaligned_base() {
        let (_buf, base) = arena_buffer(128);
        let mut heap = Heap::new();
        assert_eq!(
            heap.init(base + 1, 64),
            Err(HeapError::InvalidConfiguration)
        );
    }

    #[test]
    fn init_is_idempotent() {
        let (_buf, base) = arena_buffer(4096);
        let mut heap = Heap::new();
        heap.init(base, 4096).unwrap();
        let before = heap.stats();

        // A second call must not reseed or change bounds.
        heap.init(base, 2048).unwrap();
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn operations_before_init_fail() {
        let mut heap = Heap::new();
        assert_eq!(heap.allocate(16), Err(HeapError::NotInitialized));
        assert_eq!(heap.free(0x1000 as *mut u8), Err(HeapError::NotInitialized));
        assert_eq!(
            heap.reallocate(0x1000 as *mut u8, 16),
            Err(HeapError::NotInitialized)
        );
        assert_eq!(heap.calloc(4, 4), Err(HeapError::NotInitialized));
        assert_eq!(heap.stats(), HeapStats::default());
    }

    #[test]
    fn zero_size_allocation_fails() {
        let (_buf, mut heap) = heap_of(4096);
        assert_eq!(heap.allocate(0), Err(HeapError::InvalidConfiguration));
        assert_eq!(heap.stats().allocation_count, 0);
    }

    #[test]
    fn first_allocation_lands_after_header() {
        // Header is 24 bytes and 32 stays 32 after rounding, so the
        // first payload sits exactly one header past the base.
        let (_buf, base) = arena_buffer(4096);
        let mut heap = Heap::new();
        heap.init(base, 4096).unwrap();

        let ptr = heap.allocate(32).unwrap();
        assert_eq!(ptr.as_ptr() as usize, base + HEADER_SIZE);

        let stats = heap.stats();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.total_allocated, HEADER_SIZE + 32);
    }

    #[test]
    fn sizes_are_rounded_to_word_multiples() {
        let (_buf, mut heap) = heap_of(4096);
        heap.allocate(13).unwrap();
        assert_eq!(heap.stats().total_allocated, HEADER_SIZE + 16);
    }

    #[test]
    fn allocations_are_word_aligned() {
        let (_buf, mut heap) = heap_of(4096);
        for size in [1, 7, 8, 13, 100] {
            let ptr = heap.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
        }
        heap.check_consistency().unwrap();
    }

    #[test]
    fn conservation_holds_after_every_call() {
        let (_buf, mut heap) = heap_of(4096);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.total_allocated + stats.total_free, stats.total_heap);

        heap.free(a.as_ptr()).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.total_allocated + stats.total_free, stats.total_heap);

        heap.free(b.as_ptr()).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.total_allocated + stats.total_free, stats.total_heap);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn round_trip_restores_initial_stats() {
        let (_buf, mut heap) = heap_of(4096);
        let before = heap.stats();
        let ptr = heap.allocate(100).unwrap();
        heap.free(ptr.as_ptr()).unwrap();
        assert_eq!(heap.stats(), before);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn whole_block_handed_out_when_tail_too_small() {
        let (_buf, mut heap) = heap_of(4096);
        let a = heap.allocate(64).unwrap();
        heap.allocate(64).unwrap();
        heap.free(a.as_ptr()).unwrap();

        // Reusing the 64-byte hole for 40 bytes leaves a 24-byte tail,
        // not enough for a header plus a usable sliver, so the slack is
        // granted along with the block.
        let before = heap.stats();
        let again = heap.allocate(40).unwrap();
        assert_eq!(again, a);
        assert_eq!(
            heap.stats().total_allocated,
            before.total_allocated + HEADER_SIZE + 64
        );
        heap.check_consistency().unwrap();
    }

    #[test]
    fn first_fit_reuses_earliest_hole() {
        let (_buf, mut heap) = heap_of(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        heap.allocate(64).unwrap();

        heap.free(a.as_ptr()).unwrap();
        heap.free(b.as_ptr()).unwrap();

        // The coalesced hole at the arena start is found first.
        let reused = heap.allocate(32).unwrap();
        assert_eq!(reused, a);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn out_of_memory_is_reported_and_state_preserved() {
        let (_buf, base) = arena_buffer(4096);
        let mut heap = Heap::with_sink(RecordingSink::default());
        heap.init(base, 4096).unwrap();
        let before = heap.stats();

        assert_eq!(heap.allocate(8192), Err(HeapError::OutOfMemory));
        assert_eq!(heap.stats(), before);
        assert!(heap
            .sink
            .reports
            .iter()
            .any(|(s, m)| *s == Severity::Warning && m.contains("out of memory")));
    }

    #[test]
    fn free_null_is_a_noop() {
        let (_buf, mut heap) = heap_of(4096);
        let before = heap.stats();
        heap.free(core::ptr::null_mut()).unwrap();
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn free_out_of_bounds_pointer_rejected() {
        let (_buf, base) = arena_buffer(4096);
        let mut heap = Heap::with_sink(RecordingSink::default());
        heap.init(base, 4096).unwrap();
        heap.allocate(32).unwrap();
        let before = heap.stats();

        let mut outside = 0u64;
        let foreign = &mut outside as *mut u64 as *mut u8;
        assert_eq!(heap.free(foreign), Err(HeapError::InvalidPointer));
        assert_eq!(heap.stats(), before);
        assert!(heap
            .sink
            .reports
            .iter()
            .any(|(s, m)| *s == Severity::Warning && m.contains("invalid pointer")));
    }

    #[test]
    fn double_free_detected_without_damage() {
        let (_buf, base) = arena_buffer(4096);
        let mut heap = Heap::with_sink(RecordingSink::default());
        heap.init(base, 4096).unwrap();

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        heap.free(a.as_ptr()).unwrap();
        let after_first = heap.stats();

        assert_eq!(heap.free(a.as_ptr()), Err(HeapError::DoubleFree));
        assert_eq!(heap.stats(), after_first);
        assert!(heap
            .sink
            .reports
            .iter()
            .any(|(s, m)| *s == Severity::Warning && m.contains("double free")));

        // The other allocation is untouched.
        heap.free(b.as_ptr()).unwrap();
        heap.check_consistency().unwrap();
    }

    #[test]
    fn corrupted_header_detected() {
        let (_buf, base) = arena_buffer(4096);
        let mut heap = Heap::with_sink(RecordingSink::default());
        heap.init(base, 4096).unwrap();
        let ptr = heap.allocate(64).unwrap();

        // Scribble over the header magic.
        unsafe {
            ptr.as_ptr().sub(HEADER_SIZE).cast::<u32>().write(0xDEAD_BEEF);
        }

        assert_eq!(heap.free(ptr.as_ptr()), Err(HeapError::CorruptedBlock));
        assert!(heap
            .sink
            .reports
            .iter()
            .any(|(s, m)| *s == Severity::Error && m.contains("corrupted")));
    }

    #[test]
    fn consistency_check_flags_scribbled_chain() {
        let (_buf, mut heap) = heap_of(4096);
        let ptr = heap.allocate(64).unwrap();
        heap.check_consistency().unwrap();

        unsafe {
            ptr.as_ptr().sub(HEADER_SIZE).cast::<u32>().write(0);
        }
        assert_eq!(heap.check_consistency(), Err(HeapError::CorruptedBlock));
    }

    #[test]
    fn freeing_neighbors_coalesces_both_sides() {
        // Free the middle block, then the first; they merge into one
        // hole while the third stays allocated.
        let (_buf, mut heap) = heap_of(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();

        heap.free(b.as_ptr()).unwrap();
        heap.free(a.as_ptr()).unwrap();
        heap.check_consistency().unwrap();

        // The merged hole spans both payloads plus the swallowed
        // header: exactly enough for a 152-byte request in place of `a`.
        let merged = heap.allocate(64 + 64 + HEADER_SIZE).unwrap();
        assert_eq!(merged, a);

        // `c` is still live and untouched.
        let stats = heap.stats();
        assert_eq!(stats.allocation_count, 2);
        heap.free(c.as_ptr()).unwrap();
        heap.check_consistency().unwrap();
    }

    #[test]
    fn free_merges_with_following_hole() {
        let (_buf, mut heap) = heap_of(4096);
        let a = heap.allocate(64).unwrap();
        // Freeing the only allocation merges forward into the big tail
        // hole, restoring the single spanning block.
        heap.free(a.as_ptr()).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.total_free, stats.total_heap);
        assert_eq!(stats.allocation_count, 0);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn realloc_null_behaves_as_allocate() {
        let (_buf, mut heap) = heap_of(4096);
        let ptr = heap.reallocate(core::ptr::null_mut(), 48).unwrap();
        assert!(ptr.is_some());
        assert_eq!(heap.stats().allocation_count, 1);
    }

    #[test]
    fn realloc_to_zero_behaves_as_free() {
        let (_buf, mut heap) = heap_of(4096);
        let before = heap.stats();
        let ptr = heap.allocate(48).unwrap();
        let result = heap.reallocate(ptr.as_ptr(), 0).unwrap();
        assert_eq!(result, None);
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn realloc_shrink_keeps_pointer_and_sheds_tail() {
        // 100 -> 50 stays in place; total_allocated shrinks by the
        // rounded difference (104 - 56 = 48).
        let (_buf, mut heap) = heap_of(4096);
        let ptr = heap.allocate(100).unwrap();
        let before = heap.stats();

        let same = heap.reallocate(ptr.as_ptr(), 50).unwrap().unwrap();
        assert_eq!(same, ptr);
        assert_eq!(heap.stats().total_allocated, before.total_allocated - 48);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn realloc_small_shrink_is_a_noop() {
        let (_buf, mut heap) = heap_of(4096);
        let ptr = heap.allocate(64).unwrap();
        let before = heap.stats();

        // Shedding 8 bytes cannot form a block; nothing changes.
        let same = heap.reallocate(ptr.as_ptr(), 56).unwrap().unwrap();
        assert_eq!(same, ptr);
        assert_eq!(heap.stats(), before);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn realloc_grow_moves_and_preserves_data() {
        // 100 -> 500 moves the block, keeps the first 100 bytes, and
        // frees the old one.
        let (_buf, mut heap) = heap_of(4096);
        let ptr = heap.allocate(100).unwrap();
        for i in 0..100u8 {
            unsafe { ptr.as_ptr().add(i as usize).write(i) };
        }

        let moved = heap.reallocate(ptr.as_ptr(), 500).unwrap().unwrap();
        assert_ne!(moved, ptr);
        for i in 0..100u8 {
            assert_eq!(unsafe { moved.as_ptr().add(i as usize).read() }, i);
        }

        // The old block is visible as free space again: a new 100-byte
        // request lands exactly where the first one did.
        assert_eq!(heap.stats().allocation_count, 1);
        let refill = heap.allocate(100).unwrap();
        assert_eq!(refill, ptr);
        heap.check_consistency().unwrap();
    }

    #[test]
    fn realloc_grow_oom_leaves_original_intact() {
        let (_buf, mut heap) = heap_of(512);
        let ptr = heap.allocate(256).unwrap();
        for i in 0..256usize {
            unsafe { ptr.as_ptr().add(i).write(i as u8) };
        }
        let before = heap.stats();

        assert_eq!(
            heap.reallocate(ptr.as_ptr(), 4096),
            Err(HeapError::OutOfMemory)
        );
        assert_eq!(heap.stats(), before);
        for i in 0..256usize {
            assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, i as u8);
        }
        heap.check_consistency().unwrap();
    }

    #[test]
    fn realloc_of_freed_block_rejected() {
        let (_buf, mut heap) = heap_of(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        heap.free(a.as_ptr()).unwrap();
        assert_eq!(
            heap.reallocate(a.as_ptr(), 128),
            Err(HeapError::DoubleFree)
        );
        heap.free(b.as_ptr()).unwrap();
    }

    #[test]
    fn calloc_zero_fills_the_block() {
        let (_buf, mut heap) = heap_of(4096);
        // Dirty the arena first so the zeroing is observable.
        let dirty = heap.allocate(64).unwrap();
        unsafe { core::ptr::write_bytes(dirty.as_ptr(), 0xAA, 64) };
        heap.free(dirty.as_ptr()).unwrap();

        let ptr = heap.calloc(16, 4).unwrap();
        for i in 0..64usize {
            assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, 0);
        }
    }

    #[test]
    fn calloc_overflow_rejected() {
        let (_buf, mut heap) = heap_of(4096);
        let before = heap.stats();
        assert_eq!(heap.calloc(usize::MAX / 2, 3), Err(HeapError::Overflow));
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn usage_percent_derives_from_counters() {
        let (_buf, mut heap) = heap_of(4096);
        assert_eq!(heap.stats().usage_percent(), 0);
        heap.allocate(1000).unwrap();
        let stats = heap.stats();
        assert_eq!(
            stats.usage_percent(),
            stats.total_allocated * 100 / stats.total_heap
        );
        assert_eq!(HeapStats::default().usage_percent(), 0);
    }
}
