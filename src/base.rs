use core::{
    num::NonZeroUsize,
    ptr::{self, NonNull},
};

/// A pointer to the base of the region of memory managed by an allocator.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr`.
    ///
    /// The returned value assumes the provenance of `ptr`.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> BasePtr {
        ptr.addr()
            .get()
            .checked_add(extent)
            .expect("region limit overflows usize");

        BasePtr { ptr, extent }
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the size of the region in bytes.
    #[inline]
    pub fn extent(self) -> usize {
        self.extent
    }

    /// Returns the address of the base pointer.
    #[inline]
    pub fn addr(self) -> NonZeroUsize {
        self.ptr.addr()
    }

    /// Calculates the offset of `ptr` from the base.
    ///
    /// Returns `None` if `ptr` lies outside the region.
    #[inline]
    pub fn offset_of(self, ptr: NonNull<u8>) -> Option<usize> {
        let ofs = ptr.addr().get().checked_sub(self.addr().get())?;
        (ofs < self.extent).then_some(ofs)
    }

    /// Creates a new pointer `offset` bytes past the base.
    ///
    /// The returned pointer has the provenance of this pointer.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not within the region.
    #[inline]
    pub fn with_offset(self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.extent, "offset {offset} out of region");

        // The constructor checked that `addr + extent` does not overflow.
        self.ptr
            .map_addr(|a| NonZeroUsize::new(a.get() + offset).unwrap())
    }

    /// Creates a slice pointer of `len` bytes starting `offset` bytes past the
    /// base.
    #[inline]
    pub fn with_offset_and_size(self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset.checked_add(len).map_or(false, |end| end <= self.extent));

        let raw_slice = ptr::slice_from_raw_parts_mut(self.with_offset(offset).as_ptr(), len);

        // SAFETY: the data pointer came from a `NonNull`.
        unsafe { NonNull::new_unchecked(raw_slice) }
    }

    /// Returns a pointer to the whole region.
    #[inline]
    pub fn region(self) -> NonNull<[u8]> {
        let raw_slice = ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.extent);

        // SAFETY: the data pointer came from a `NonNull`.
        unsafe { NonNull::new_unchecked(raw_slice) }
    }
}
