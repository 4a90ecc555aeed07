//! Bump allocation.
//!
//! A bump allocator hands out consecutive ranges of its region by advancing a
//! cursor. Individual allocations are never freed; the whole region is
//! released at once.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case |
//! |--------------------------|-----------|------------|
//! | Allocate                 | O(1)      | O(1)       |
//! | Release all              | O(1)      | O(1)       |
//!
//! #### Fragmentation
//!
//! Because bump allocators can allocate blocks of any size, they suffer no
//! internal fragmentation. Space is only reclaimed by [`Bump::reset`] or by
//! releasing the allocator.

use core::{alloc::Layout, fmt, ptr::NonNull};

#[cfg(feature = "log")]
use log::trace;

use crate::{base::BasePtr, region_layout, AllocError, AllocInitError, BackingAllocator, Global, Raw};

/// A bump allocator.
pub struct Bump<A: BackingAllocator> {
    base: BasePtr,
    cursor: usize,
    layout: Layout,
    backing_allocator: A,
}

impl Bump<Raw> {
    /// Constructs a new `Bump` over `total_size` bytes starting at `region`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `total_size` is zero.
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes for `total_size` bytes for
    /// the lifetime of the allocator.
    pub unsafe fn new_raw(
        region: NonNull<u8>,
        total_size: usize,
    ) -> Result<Bump<Raw>, AllocInitError> {
        if total_size == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        let layout =
            Layout::from_size_align(total_size, 1).map_err(|_| AllocInitError::InvalidConfig)?;

        Ok(Bump::from_parts(region, layout, Raw))
    }
}

impl Bump<Global> {
    /// Attempts to construct a new `Bump` backed by the global allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if `total_size` is zero or if sufficient memory could
    /// not be allocated from the global allocator.
    pub fn try_new(total_size: usize) -> Result<Bump<Global>, AllocInitError> {
        let layout = region_layout(total_size)?;
        let region = Global::allocate(layout)?;

        Ok(Bump::from_parts(region, layout, Global))
    }
}

impl<A> Bump<A>
where
    A: BackingAllocator,
{
    fn from_parts(region: NonNull<u8>, layout: Layout, backing_allocator: A) -> Bump<A> {
        Bump {
            base: BasePtr::new(region, layout.size()),
            cursor: 0,
            layout,
            backing_allocator,
        }
    }

    /// Attempts to allocate `size` bytes directly after the previous
    /// allocation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ZeroSize`] if `size` is zero, and
    /// [`AllocError::OutOfSpace`] if the allocation would run past the end of
    /// the region.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let new_cursor = self
            .cursor
            .checked_add(size)
            .filter(|&end| end <= self.base.extent())
            .ok_or(AllocError::OutOfSpace)?;

        let ofs = self.cursor;
        self.cursor = new_cursor;
        trace!("bump allocated {size} bytes at offset {ofs:#x}");

        Ok(self.base.with_offset_and_size(ofs, size))
    }

    /// Returns the number of bytes handed out since construction or the last
    /// reset.
    #[inline]
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Returns the number of bytes still available.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.base.extent() - self.cursor
    }

    /// Returns the size of the managed region in bytes.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.base.extent()
    }

    /// Rewinds the cursor to the start of the region.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - No references to data allocated by this `Bump` may exist when the method
    ///   is called.
    /// - Any pointers to data previously allocated by this allocator may no
    ///   longer be dereferenced.
    pub unsafe fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Releases the whole region, invalidating every allocation.
    pub fn release_all(self) {
        drop(self);
    }

    /// Returns a pointer to the managed region.
    ///
    /// It is undefined behavior to dereference the returned pointer or upgrade
    /// it to a reference if there are any outstanding allocations.
    pub fn region(&mut self) -> NonNull<[u8]> {
        self.base.region()
    }
}

impl<A> Drop for Bump<A>
where
    A: BackingAllocator,
{
    fn drop(&mut self) {
        unsafe {
            self.backing_allocator
                .deallocate(self.base.ptr(), self.layout)
        };
    }
}

impl<A> fmt::Debug for Bump<A>
where
    A: BackingAllocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bump")
            .field("base", &self.base)
            .field("cursor", &self.cursor)
            .finish()
    }
}
