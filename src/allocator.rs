//! Global allocator backed by a locked heap instance.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;

use spin::Mutex;

use crate::diag::LogSink;
use crate::error::HeapError;
use crate::memory::heap::{Heap, HeapStats, ALIGNMENT};

/// A [`Heap`] behind a spinlock, usable as `#[global_allocator]`.
///
/// The inner heap is single-context by design; the lock serializes
/// callers. Interrupt handlers must not allocate while the lock is
/// held.
pub struct LockedHeap {
    inner: Mutex<Heap<LogSink>>,
}

impl LockedHeap {
    /// Creates an empty, uninitialized locked heap.
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(Heap::new()),
        }
    }

    /// Initializes the underlying heap over `base..base + size`.
    pub fn init(&self, base: usize, size: usize) -> Result<(), HeapError> {
        self.inner.lock().init(base, size)
    }

    /// Snapshot of the underlying heap counters.
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::empty()
    }
}

#[inline]
fn align_up(addr: usize, align: usize) -> Option<usize> {
    let mask = align.checked_sub(1)?;
    addr.checked_add(mask).map(|v| v & !mask)
}

#[inline]
fn aligned_backref_slot(aligned_ptr: *mut u8) -> *mut *mut u8 {
    aligned_ptr
        .wrapping_sub(size_of::<*mut u8>())
        .cast::<*mut u8>()
}

// SAFETY:
// - The spinlock provides exclusive access to the inner heap.
// - The heap returns pointers inside the arena the caller handed to
//   `init`, aligned to `ALIGNMENT`.
unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(1);
        let align = layout.align();
        if align <= ALIGNMENT {
            return match self.inner.lock().allocate(size) {
                Ok(ptr) => ptr.as_ptr(),
                Err(_) => core::ptr::null_mut(),
            };
        }

        // Over-aligned layout: over-allocate, align inside the block,
        // and stash the original pointer one slot before the aligned
        // address for `dealloc` to recover.
        let overhead = match align
            .checked_sub(1)
            .and_then(|v| v.checked_add(size_of::<*mut u8>()))
        {
            Some(v) => v,
            None => return core::ptr::null_mut(),
        };
        let total_size = match size.checked_add(overhead) {
            Some(v) => v,
            None => return core::ptr::null_mut(),
        };

        let raw_ptr = match self.inner.lock().allocate(total_size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => return core::ptr::null_mut(),
        };

        let Some(aligned_addr) = align_up(raw_ptr as usize + size_of::<*mut u8>(), align) else {
            let _ = self.inner.lock().free(raw_ptr);
            return core::ptr::null_mut();
        };
        let aligned_ptr = aligned_addr as *mut u8;

        // SAFETY:
        // - `aligned_ptr` lies within the over-allocated block.
        // - One pointer-sized slot before `aligned_ptr` is reserved for
        //   storing `raw_ptr`.
        unsafe {
            core::ptr::write(aligned_backref_slot(aligned_ptr), raw_ptr);
        }
        aligned_ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }

        if layout.align() <= ALIGNMENT {
            let _ = self.inner.lock().free(ptr);
            return;
        }

        // SAFETY:
        // - For over-aligned allocations, `alloc` stored the original
        //   heap pointer one pointer-sized slot before `ptr`.
        let raw_ptr = unsafe { core::ptr::read(aligned_backref_slot(ptr)) };
        let _ = self.inner.lock().free(raw_ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // Only word-aligned layouts can be resized in place; the
        // over-aligned path moves the data like the default
        // implementation would.
        if layout.align() > ALIGNMENT {
            let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
                return core::ptr::null_mut();
            };
            // SAFETY:
            // - `new_ptr` is freshly allocated with room for `new_size`
            //   bytes; `ptr` holds `layout.size()` readable bytes.
            unsafe {
                let new_ptr = self.alloc(new_layout);
                if !new_ptr.is_null() {
                    core::ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                    self.dealloc(ptr, layout);
                }
                return new_ptr;
            }
        }

        match self.inner.lock().reallocate(ptr, new_size.max(1)) {
            Ok(Some(ptr)) => ptr.as_ptr(),
            Ok(None) => core::ptr::null_mut(),
            Err(_) => core::ptr::null_mut(),
        }
    }
}
