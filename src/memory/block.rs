//! Intrusive block directory.
//!
//! Block headers live inside the arena itself, each immediately
//! followed by its payload, and form a doubly linked chain in address
//! order. Links are stored as arena-relative byte offsets, so a header
//! is recovered from a payload address by subtracting [`HEADER_SIZE`]
//! and re-validating against the arena bounds.
//!
//! All raw pointer arithmetic and dereferencing is confined to this
//! module. The engines in `heap.rs` only manipulate validated
//! [`BlockRef`] handles.

use core::mem::size_of;
use core::ptr::NonNull;

/// Size of one block header in bytes.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Sentinel stored in every live header ("HEAP" in ASCII).
pub(crate) const BLOCK_MAGIC: u32 = 0x4845_4150;

/// Link value meaning "no neighbor".
const NO_BLOCK: u32 = u32::MAX;

const STATE_IN_USE: u32 = 0;
const STATE_FREE: u32 = 1;

/// Per-block metadata embedded in arena memory.
///
/// `size` counts payload bytes only; `prev`/`next` are arena-relative
/// offsets of the neighboring headers. Offsets are `u32`, which caps
/// the arena below 4 GiB and keeps the header at 24 bytes on 64-bit
/// targets.
#[repr(C)]
pub(crate) struct BlockHeader {
    magic: u32,
    state: u32,
    size: usize,
    prev: u32,
    next: u32,
}

#[cfg(target_pointer_width = "64")]
const _: () = assert!(HEADER_SIZE == 24);

/// Validated arena-relative handle to a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockRef(u32);

impl BlockRef {
    /// Byte offset of the header from the arena base.
    pub(crate) fn offset(self) -> usize {
        self.0 as usize
    }
}

/// View over one arena granting header access through handles.
///
/// The directory itself holds no lock; callers must have exclusive
/// access to the arena while using mutating methods. The heap engines
/// guarantee that by requiring `&mut Heap`.
#[derive(Clone, Copy)]
pub(crate) struct BlockDirectory {
    base: usize,
    size: usize,
}

impl BlockDirectory {
    pub(crate) fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Handle to the block at the start of the arena.
    pub(crate) fn first(&self) -> BlockRef {
        BlockRef(0)
    }

    /// Validates a raw offset as a block handle: in bounds, room for a
    /// header, and aligned so the header can be dereferenced.
    fn checked(&self, offset: u32) -> Option<BlockRef> {
        if offset == NO_BLOCK {
            return None;
        }
        let off = offset as usize;
        if off % core::mem::align_of::<BlockHeader>() != 0 {
            return None;
        }
        let end = off.checked_add(HEADER_SIZE)?;
        if end <= self.size {
            Some(BlockRef(offset))
        } else {
            None
        }
    }

    #[inline]
    fn header_ptr(&self, block: BlockRef) -> *mut BlockHeader {
        (self.base + block.offset()) as *mut BlockHeader
    }

    /// Payload size of the block in bytes.
    pub(crate) fn block_size(&self, block: BlockRef) -> usize {
        // SAFETY:
        // - This requires `unsafe` because it dereferences a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked`, so the header lies inside the arena.
        unsafe { (*self.header_ptr(block)).size }
    }

    /// Whether the block's magic matches the live sentinel.
    pub(crate) fn magic_ok(&self, block: BlockRef) -> bool {
        // SAFETY:
        // - This requires `unsafe` because it dereferences a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked`, so the header lies inside the arena.
        unsafe { (*self.header_ptr(block)).magic == BLOCK_MAGIC }
    }

    pub(crate) fn is_free(&self, block: BlockRef) -> bool {
        // SAFETY:
        // - This requires `unsafe` because it dereferences a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked`, so the header lies inside the arena.
        unsafe { (*self.header_ptr(block)).state == STATE_FREE }
    }

    pub(crate) fn set_free(&mut self, block: BlockRef, free: bool) {
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked` and the caller has exclusive arena access.
        unsafe {
            (*self.header_ptr(block)).state = if free { STATE_FREE } else { STATE_IN_USE };
        }
    }

    fn set_size(&mut self, block: BlockRef, size: usize) {
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked` and the caller has exclusive arena access.
        unsafe {
            (*self.header_ptr(block)).size = size;
        }
    }

    /// Next block in address order, if any.
    pub(crate) fn next_of(&self, block: BlockRef) -> Option<BlockRef> {
        // SAFETY:
        // - This requires `unsafe` because it dereferences a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked`, so the header lies inside the arena.
        let raw = unsafe { (*self.header_ptr(block)).next };
        self.checked(raw)
    }

    /// Previous block in address order, if any.
    pub(crate) fn prev_of(&self, block: BlockRef) -> Option<BlockRef> {
        // SAFETY:
        // - This requires `unsafe` because it dereferences a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked`, so the header lies inside the arena.
        let raw = unsafe { (*self.header_ptr(block)).prev };
        self.checked(raw)
    }

    fn set_next(&mut self, block: BlockRef, next: Option<BlockRef>) {
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked` and the caller has exclusive arena access.
        unsafe {
            (*self.header_ptr(block)).next = next.map_or(NO_BLOCK, |n| n.0);
        }
    }

    fn set_prev(&mut self, block: BlockRef, prev: Option<BlockRef>) {
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `block` was produced by `checked` and the caller has exclusive arena access.
        unsafe {
            (*self.header_ptr(block)).prev = prev.map_or(NO_BLOCK, |p| p.0);
        }
    }

    /// Seeds the arena with a single free block spanning the region.
    pub(crate) fn init_arena(&mut self) {
        debug_assert!(self.size >= HEADER_SIZE);
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `base..base + size` is the region handed to `Heap::init`, which the
        //   boot layer guarantees to be writable.
        unsafe {
            self.header_ptr(BlockRef(0)).write(BlockHeader {
                magic: BLOCK_MAGIC,
                state: STATE_FREE,
                size: self.size - HEADER_SIZE,
                prev: NO_BLOCK,
                next: NO_BLOCK,
            });
        }
    }

    /// Shrinks `block` to `keep` payload bytes and carves the tail into
    /// a new free block linked after it. The caller must ensure the
    /// tail can hold a header (`block_size > keep + HEADER_SIZE`).
    pub(crate) fn split(&mut self, block: BlockRef, keep: usize) -> BlockRef {
        let old_size = self.block_size(block);
        debug_assert!(old_size > keep + HEADER_SIZE);

        let tail_off = block.offset() + HEADER_SIZE + keep;
        let tail = BlockRef(tail_off as u32);
        let next = self.next_of(block);

        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `tail_off + HEADER_SIZE <= block.offset() + HEADER_SIZE + old_size`,
        //   which stays inside the arena, and `keep` is 8-byte aligned so the
        //   tail header is too.
        unsafe {
            self.header_ptr(tail).write(BlockHeader {
                magic: BLOCK_MAGIC,
                state: STATE_FREE,
                size: old_size - keep - HEADER_SIZE,
                prev: block.0,
                next: next.map_or(NO_BLOCK, |n| n.0),
            });
        }

        if let Some(next) = next {
            self.set_prev(next, Some(tail));
        }
        self.set_next(block, Some(tail));
        self.set_size(block, keep);
        tail
    }

    /// Merges `block` with its immediate successor. Both must be free.
    pub(crate) fn merge_with_next(&mut self, block: BlockRef) {
        let Some(next) = self.next_of(block) else {
            return;
        };
        debug_assert!(self.is_free(block) && self.is_free(next));

        let merged = self.block_size(block) + HEADER_SIZE + self.block_size(next);
        let after = self.next_of(next);

        // Clear the swallowed header's magic so a stale pointer into the
        // merged region is detected as corruption, not a live block.
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - `next` was produced by `checked` and the caller has exclusive arena access.
        unsafe {
            (*self.header_ptr(next)).magic = 0;
        }

        self.set_size(block, merged);
        self.set_next(block, after);
        if let Some(after) = after {
            self.set_prev(after, Some(block));
        }
    }

    /// Pointer to the block's payload (`header + HEADER_SIZE`).
    pub(crate) fn payload_ptr(&self, block: BlockRef) -> NonNull<u8> {
        let addr = self.base + block.offset() + HEADER_SIZE;
        // SAFETY:
        // - `addr` lies inside the arena, whose base is nonzero, so the
        //   pointer cannot be null.
        unsafe { NonNull::new_unchecked(addr as *mut u8) }
    }

    /// Recovers the block handle for a payload address, or `None` if
    /// the address does not belong to the arena or cannot carry a
    /// properly aligned header in front of it.
    pub(crate) fn block_from_payload(&self, addr: usize) -> Option<BlockRef> {
        if addr < self.base || addr >= self.base + self.size {
            return None;
        }
        let rel = addr - self.base;
        let off = rel.checked_sub(HEADER_SIZE)?;
        self.checked(off as u32)
    }

    /// Copies `len` payload bytes from `src` to `dst`.
    pub(crate) fn copy_payload(&mut self, src: BlockRef, dst: BlockRef, len: usize) {
        debug_assert!(len <= self.block_size(src));
        debug_assert!(len <= self.block_size(dst));
        debug_assert!(src != dst);
        // SAFETY:
        // - This requires `unsafe` because it copies through raw pointers, which Rust cannot validate.
        // - Both payloads lie inside the arena with at least `len` bytes, and
        //   distinct blocks never overlap.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.payload_ptr(src).as_ptr(),
                self.payload_ptr(dst).as_ptr(),
                len,
            );
        }
    }

    /// Zero-fills `len` payload bytes of `block`.
    pub(crate) fn zero_payload(&mut self, block: BlockRef, len: usize) {
        debug_assert!(len <= self.block_size(block));
        // SAFETY:
        // - This requires `unsafe` because it writes through a raw pointer, which Rust cannot validate.
        // - The payload lies inside the arena with at least `len` bytes.
        unsafe {
            core::ptr::write_bytes(self.payload_ptr(block).as_ptr(), 0, len);
        }
    }
}
