//! Raw byte storage for base blocks.

use std::ptr::NonNull;

/// One contiguous region carved from the arena for a base block.
///
/// The bytes are owned through a raw pointer so disjoint [`MemoryBlock`]s can
/// hand out `&mut [u8]` views into the same chunk without aliasing a Rust
/// reference to the whole region.
///
/// [`MemoryBlock`]: super::MemoryBlock
pub(crate) struct Chunk {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: a Chunk is plain owned heap memory. Concurrent access is mediated by
// the allocator, which never hands out overlapping ranges to live blocks.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    pub(crate) fn new(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let len = boxed.len();
        Self {
            ptr: NonNull::from(Box::leak(boxed)).cast::<u8>(),
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// `offset + len` must be within the chunk, and no mutable view of any
    /// overlapping range may be alive.
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// # Safety
    ///
    /// `offset + len` must be within the chunk, and the caller must hold the
    /// only view of that range for the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }

    pub(crate) fn same_region(&self, other: &Chunk) -> bool {
        self.ptr == other.ptr
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from leaking a boxed slice of this length.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}
