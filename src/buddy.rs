//! Binary-buddy allocation over a block table.
//!
//! A `Buddy` manages one region of `total_size` bytes. Every byte of the
//! region belongs to exactly one block in its [`BlockTable`], and every block
//! is a power of two in size when `total_size` is.
//!
//! ## Allocation policy
//!
//! An allocation always starts from the *largest* free block, choosing the
//! lowest-addressed one when several share that size, and halves it until the
//! next halving would be too small for the request. This consumes the biggest
//! contiguous free space first rather than the smallest block that fits.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case                |
//! |--------------------------|-----------|---------------------------|
//! | Allocate                 | O(n)      | O(n log total_size)       |
//! | Deallocate               | O(log n)  | O(n log total_size)       |
//!
//! where `n` is the number of blocks in the table.
//!
//! #### Fragmentation
//!
//! Blocks are rounded up to a power of two, so internal fragmentation is at
//! most half of each block. External fragmentation is bounded by coalescing:
//! once every allocation is freed, the table is a single free block again.

use alloc::vec::Vec;
use core::{
    alloc::Layout,
    fmt,
    ptr::{self, NonNull},
};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

use crate::{
    base::BasePtr,
    region_layout,
    table::{Block, BlockTable},
    AllocError, AllocInitError, BackingAllocator, Global, Raw,
};

/// A binary-buddy allocator.
///
/// The region is acquired when the allocator is constructed and handed back
/// to its backing allocator when the `Buddy` is dropped.
pub struct Buddy<A: BackingAllocator> {
    base: BasePtr,
    layout: Layout,
    table: BlockTable,
    backing_allocator: A,
}

impl Buddy<Raw> {
    /// Constructs a new `Buddy` over `total_size` bytes starting at `region`.
    ///
    /// The allocator never frees `region`; use [`Buddy::into_raw_parts`] to
    /// recover it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `total_size` is zero.
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes for `total_size` bytes for
    /// the lifetime of the allocator, and must not be accessed except through
    /// blocks allocated from it.
    pub unsafe fn new_raw(
        region: NonNull<u8>,
        total_size: usize,
    ) -> Result<Buddy<Raw>, AllocInitError> {
        if total_size == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        let layout =
            Layout::from_size_align(total_size, 1).map_err(|_| AllocInitError::InvalidConfig)?;

        Ok(Buddy::from_parts(region, layout, Raw))
    }

    /// Decomposes the allocator into its region pointer and size.
    ///
    /// All outstanding allocations are invalidated; the caller becomes the
    /// sole owner of the region again.
    pub fn into_raw_parts(self) -> (NonNull<u8>, usize) {
        let parts = (self.base.ptr(), self.base.extent());
        // Dropping a `Raw`-backed allocator only releases the table.
        drop(self);
        parts
    }
}

impl Buddy<Global> {
    /// Attempts to construct a new `Buddy` backed by the global allocator.
    ///
    /// The caller is responsible for `total_size` being a power of two; other
    /// sizes are accepted, but the table invariants are only guaranteed for
    /// powers of two.
    ///
    /// # Errors
    ///
    /// Returns an error if `total_size` is zero or if the region could not be
    /// allocated from the global allocator.
    pub fn try_new(total_size: usize) -> Result<Buddy<Global>, AllocInitError> {
        let layout = region_layout(total_size)?;
        let region = Global::allocate(layout)?;

        Ok(Buddy::from_parts(region, layout, Global))
    }
}

impl<A: BackingAllocator> Buddy<A> {
    fn from_parts(region: NonNull<u8>, layout: Layout, backing_allocator: A) -> Buddy<A> {
        let total_size = layout.size();
        if !total_size.is_power_of_two() {
            warn!("buddy region size {total_size} is not a power of two");
        }

        Buddy {
            base: BasePtr::new(region, total_size),
            layout,
            table: BlockTable::new(total_size),
            backing_allocator,
        }
    }

    /// Returns the size of the managed region in bytes.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.table.total_size()
    }

    /// Returns the block table.
    #[inline]
    pub fn table(&self) -> &BlockTable {
        &self.table
    }

    /// Iterates over every block, free or used, in offset order.
    #[inline]
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.table.iter()
    }

    /// Returns a pointer to the managed region.
    ///
    /// It is undefined behavior to create a reference from the returned
    /// pointer that overlaps an outstanding allocation.
    #[inline]
    pub fn region(&self) -> NonNull<[u8]> {
        self.base.region()
    }

    /// Returns the offset of `ptr` from the start of the region, or `None` if
    /// it points outside the region.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.base.offset_of(ptr)
    }

    /// Finds the table index of the used block starting at `ptr`.
    fn used_index(&self, ptr: NonNull<u8>) -> Option<usize> {
        let ofs = self.base.offset_of(ptr)?;
        let index = self.table.position_of(ofs)?;

        self.table
            .get(index)
            .filter(|b| b.is_used())
            .map(|_| index)
    }

    /// Attempts to allocate a block of at least `size` bytes.
    ///
    /// On success, returns a pointer to the whole chosen block; its length is
    /// the block size, which is at least `size`. The contents of the block
    /// are whatever the region last held there.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ZeroSize`] if `size` is zero, and
    /// [`AllocError::OutOfSpace`] if the largest free block is smaller than
    /// `size`. The table is unchanged on error.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let index = self
            .table
            .largest_free()
            .filter(|&i| self.table.get(i).map_or(false, |b| b.size() >= size))
            .ok_or(AllocError::OutOfSpace)?;

        let block = self.table.split_and_take(index, size);
        trace!(
            "allocated {} bytes at offset {:#x} for a request of {}",
            block.size(),
            block.offset(),
            size
        );

        Ok(self
            .base
            .with_offset_and_size(block.offset(), block.size()))
    }

    /// Deallocates the block starting at `ptr`, merging it with its buddy for
    /// as long as the buddy is free.
    ///
    /// The block's bytes are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidFree`] if `ptr` is not the start of a
    /// block currently allocated by this allocator. The table is unchanged in
    /// that case.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let index = self.used_index(ptr).ok_or_else(|| {
            warn!("ignoring free of {ptr:p}: not an allocated block");
            AllocError::InvalidFree
        })?;

        let merged = self.table.release(index);
        if let Some(block) = self.table.get(merged) {
            trace!(
                "freed {ptr:p}; free block is now {:#x}+{}",
                block.offset(),
                block.size()
            );
        }

        Ok(())
    }

    /// Moves an allocation into a block of at least `new_size` bytes,
    /// preserving its first `old_size` bytes.
    ///
    /// The old block is released before the new one is allocated, so the new
    /// block may start at the same address or overlap the old one; the copy
    /// handles overlapping ranges. At most `old_size` bytes are copied, and
    /// never more than either block holds.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidFree`] if `ptr` is not an allocated block,
    /// and [`AllocError::ResizeFailed`] if no block of `new_size` bytes could
    /// be allocated. On error the table is exactly as it was and `ptr`
    /// remains a valid allocation.
    pub fn resize(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let index = self.used_index(ptr).ok_or_else(|| {
            warn!("cannot resize {ptr:p}: not an allocated block");
            AllocError::InvalidFree
        })?;

        let old = *self.table.get(index).ok_or(AllocError::InvalidFree)?;
        let snapshot = self.table.clone();

        self.table.release(index);

        let new = match self.allocate(new_size) {
            Ok(new) => new,
            Err(e) => {
                warn!("resize of {ptr:p} to {new_size} bytes failed: {e}");
                self.table = snapshot;
                return Err(AllocError::ResizeFailed);
            }
        };

        let count = old_size.min(old.size()).min(new.len());
        let src = self.base.with_offset(old.offset());

        // SAFETY: both ranges lie inside the region, which is valid for reads
        // and writes. `ptr::copy` permits them to overlap.
        unsafe { ptr::copy(src.as_ptr(), new.cast::<u8>().as_ptr(), count) };

        Ok(new)
    }

    /// Returns the `(size, offset)` of every used block in offset order.
    pub fn dump_used_blocks(&self) -> Vec<(usize, usize)> {
        self.table
            .used_blocks()
            .map(|b| (b.size(), b.offset()))
            .collect()
    }

    /// Returns a displayable listing of the used blocks.
    #[inline]
    pub fn used_blocks(&self) -> UsedBlocks<'_> {
        UsedBlocks { table: &self.table }
    }

    /// Writes the used-block listing to the log at `debug` level.
    pub fn log_used_blocks(&self) {
        debug!("{}", self.used_blocks());
    }
}

impl<A: BackingAllocator> Drop for Buddy<A> {
    fn drop(&mut self) {
        unsafe {
            self.backing_allocator
                .deallocate(self.base.ptr(), self.layout)
        };
    }
}

impl<A: BackingAllocator> fmt::Debug for Buddy<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buddy")
            .field("base", &self.base)
            .field("table", &self.table)
            .finish()
    }
}

/// The used blocks of a [`Buddy`], formatted one per line.
#[derive(Copy, Clone, Debug)]
pub struct UsedBlocks<'a> {
    table: &'a BlockTable,
}

impl fmt::Display for UsedBlocks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Used buddies:")?;
        for block in self.table.used_blocks() {
            write!(f, "\nSize: {}, Byte offset: {}", block.size(), block.offset())?;
        }

        Ok(())
    }
}
